//! 应用运行配置加载。

use std::env;

/// 并发连接上限的取值上界
pub const MAX_CONNECTIONS_LIMIT: usize = 1 << 20;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 设备侧协议选择。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolKind {
    /// 无状态传感器协议（12 字节定长帧）
    Sensor,
    /// 有状态网关协议（握手 + 多消息类型）
    Gateway,
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub platform_url: String,
    pub service_identifier: String,
    pub listen_port: u16,
    pub protocol: ProtocolKind,
    pub http_addr: String,
    pub idle_timeout_seconds: u64,
    pub write_timeout_ms: u64,
    pub max_connections: usize,
    pub read_buffer_size: usize,
    pub heartbeat_interval_seconds: u64,
    pub session_heartbeat_timeout_seconds: u64,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub http_timeout_ms: u64,
    pub device_log_enabled: bool,
    pub device_log_history: usize,
    pub device_log_max_devices: usize,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let platform_url = env::var("GW_PLATFORM_URL")
            .map_err(|_| ConfigError::Missing("GW_PLATFORM_URL".to_string()))?;
        let service_identifier = env::var("GW_SERVICE_IDENTIFIER")
            .map_err(|_| ConfigError::Missing("GW_SERVICE_IDENTIFIER".to_string()))?;
        let listen_port = read_u16_with_default("GW_LISTEN_PORT", 15001)?;
        let protocol = read_protocol("GW_PROTOCOL")?;
        let http_addr = env::var("GW_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8090".to_string());
        let idle_timeout_seconds = read_u64_with_default("GW_IDLE_TIMEOUT_SECONDS", 30)?;
        let write_timeout_ms = read_u64_with_default("GW_WRITE_TIMEOUT_MS", 5000)?;
        let max_connections = read_u64_with_default("GW_MAX_CONNECTIONS", 1000)? as usize;
        let read_buffer_size = read_u64_with_default("GW_READ_BUFFER_SIZE", 4096)? as usize;
        let heartbeat_interval_seconds =
            read_u64_with_default("GW_HEARTBEAT_INTERVAL_SECONDS", 60)?;
        let session_heartbeat_timeout_seconds =
            read_u64_with_default("GW_SESSION_HEARTBEAT_TIMEOUT_SECONDS", 60)?;
        let mqtt_host = env::var("GW_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_u16_with_default("GW_MQTT_PORT", 1883)?;
        let mqtt_username = read_optional("GW_MQTT_USERNAME");
        let mqtt_password = read_optional("GW_MQTT_PASSWORD");
        let http_timeout_ms = read_u64_with_default("GW_HTTP_TIMEOUT_MS", 5000)?;
        let device_log_enabled = read_bool_with_default("GW_DEVICE_LOG_ENABLED", true);
        let device_log_history = read_u64_with_default("GW_DEVICE_LOG_HISTORY", 64)? as usize;
        let device_log_max_devices =
            read_u64_with_default("GW_DEVICE_LOG_MAX_DEVICES", 10_000)? as usize;

        if idle_timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "GW_IDLE_TIMEOUT_SECONDS".to_string(),
                "0".to_string(),
            ));
        }
        if max_connections == 0 || max_connections > MAX_CONNECTIONS_LIMIT {
            return Err(ConfigError::Invalid(
                "GW_MAX_CONNECTIONS".to_string(),
                max_connections.to_string(),
            ));
        }
        if read_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "GW_READ_BUFFER_SIZE".to_string(),
                "0".to_string(),
            ));
        }

        Ok(Self {
            platform_url,
            service_identifier,
            listen_port,
            protocol,
            http_addr,
            idle_timeout_seconds,
            write_timeout_ms,
            max_connections,
            read_buffer_size,
            heartbeat_interval_seconds,
            session_heartbeat_timeout_seconds,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            http_timeout_ms,
            device_log_enabled,
            device_log_history,
            device_log_max_devices,
        })
    }
}

fn read_protocol(key: &str) -> Result<ProtocolKind, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(ProtocolKind::Sensor),
    };
    match value.to_ascii_lowercase().as_str() {
        "" | "sensor" => Ok(ProtocolKind::Sensor),
        "gateway" => Ok(ProtocolKind::Gateway),
        _ => Err(ConfigError::Invalid(key.to_string(), value)),
    }
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
