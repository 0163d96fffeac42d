use gw_config::{AppConfig, ConfigError, ProtocolKind};

// 环境变量是进程级共享状态，所有断言放在同一个测试中顺序执行。
#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::remove_var("GW_PLATFORM_URL");
        std::env::set_var("GW_SERVICE_IDENTIFIER", "sensor-plugin");
    }
    match AppConfig::from_env() {
        Err(ConfigError::Missing(key)) => assert_eq!(key, "GW_PLATFORM_URL"),
        other => panic!("expected missing platform url, got {:?}", other),
    }

    unsafe {
        std::env::set_var("GW_PLATFORM_URL", "http://127.0.0.1:9999");
        std::env::set_var("GW_LISTEN_PORT", "16001");
        std::env::set_var("GW_PROTOCOL", "gateway");
        std::env::set_var("GW_IDLE_TIMEOUT_SECONDS", "45");
    }
    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.listen_port, 16001);
    assert_eq!(config.protocol, ProtocolKind::Gateway);
    assert_eq!(config.idle_timeout_seconds, 45);
    assert_eq!(config.write_timeout_ms, 5000);
    assert_eq!(config.mqtt_port, 1883);
    assert!(config.device_log_enabled);
    assert_eq!(config.max_connections, 1000);
    assert_eq!(config.device_log_max_devices, 10_000);

    unsafe {
        std::env::set_var("GW_LISTEN_PORT", "not-a-port");
    }
    match AppConfig::from_env() {
        Err(ConfigError::Invalid(key, value)) => {
            assert_eq!(key, "GW_LISTEN_PORT");
            assert_eq!(value, "not-a-port");
        }
        other => panic!("expected invalid port, got {:?}", other),
    }

    unsafe {
        std::env::set_var("GW_LISTEN_PORT", "16001");
        std::env::set_var("GW_MAX_CONNECTIONS", "18446744073709551615");
    }
    match AppConfig::from_env() {
        Err(ConfigError::Invalid(key, _)) => assert_eq!(key, "GW_MAX_CONNECTIONS"),
        other => panic!("expected invalid max connections, got {:?}", other),
    }

    unsafe {
        std::env::set_var("GW_MAX_CONNECTIONS", "0");
    }
    match AppConfig::from_env() {
        Err(ConfigError::Invalid(key, value)) => {
            assert_eq!(key, "GW_MAX_CONNECTIONS");
            assert_eq!(value, "0");
        }
        other => panic!("expected invalid max connections, got {:?}", other),
    }
}
