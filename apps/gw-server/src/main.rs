//! 设备接入网关：设备 TCP 监听、上游平台对接、管理接口。

mod bridge;
mod handlers;
mod heartbeat;
mod middleware;
mod routes;
mod utils;

use axum::Router;
use gw_config::{AppConfig, ProtocolKind};
use gw_directory::DeviceDirectory;
use gw_platform::{Platform, PlatformClient, PlatformClientConfig};
use gw_protocol::{
    GatewayProtocolHandler, HandlerVariant, SensorProtocolHandler, TcpServer, TcpServerConfig,
};
use gw_telemetry::{DeviceAuditLog, DeviceLogConfig, init_tracing};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub engine: TcpServer,
    pub directory: Arc<DeviceDirectory>,
    pub audit: Arc<DeviceAuditLog>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 上游平台：HTTP 查询身份/心跳，MQTT 上报与指令订阅
    let (client, mqtt_task) = PlatformClient::connect(PlatformClientConfig {
        base_url: config.platform_url.clone(),
        service_identifier: config.service_identifier.clone(),
        http_timeout: Duration::from_millis(config.http_timeout_ms),
        mqtt_host: config.mqtt_host.clone(),
        mqtt_port: config.mqtt_port,
        mqtt_username: config.mqtt_username.clone(),
        mqtt_password: config.mqtt_password.clone(),
    })?;
    let platform: Arc<dyn Platform> = Arc::new(client);
    let directory = Arc::new(DeviceDirectory::new(platform.clone()));
    let audit = Arc::new(DeviceAuditLog::new(DeviceLogConfig {
        enabled: config.device_log_enabled,
        history: config.device_log_history,
        max_devices: config.device_log_max_devices,
    }));

    let engine = TcpServer::new(
        handler_for(&config),
        directory.clone(),
        platform.clone(),
        audit.clone(),
        engine_config(&config),
    );
    let device_addr = engine.start().await?;

    // 平台指令 → 设备连接
    platform.register_command_sink(Arc::new(bridge::CommandBridge::new(
        engine.clone(),
        directory.clone(),
    )))?;

    let shutdown = CancellationToken::new();
    let heartbeat = heartbeat::spawn_heartbeat(
        platform.clone(),
        config.service_identifier.clone(),
        Duration::from_secs(config.heartbeat_interval_seconds),
        shutdown.clone(),
    );

    let app = build_app(AppState {
        engine: engine.clone(),
        directory,
        audit,
    });
    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(
        target: "gw.server",
        device_addr = %device_addr,
        http_addr = %config.http_addr,
        protocol = %engine.descriptor().name,
        "gateway_started"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 先停心跳，再停引擎（引擎停止时为每个在线设备发送离线通知）
    shutdown.cancel();
    let _ = heartbeat.await;
    if let Err(err) = engine.stop().await {
        warn!(target: "gw.server", error = %err, "engine_stop_failed");
    }
    mqtt_task.abort();
    info!(target: "gw.server", "gateway_stopped");
    Ok(())
}

/// 按配置选择协议处理器。
fn handler_for(config: &AppConfig) -> HandlerVariant {
    match config.protocol {
        ProtocolKind::Sensor => HandlerVariant::framed(SensorProtocolHandler::new(config.listen_port)),
        ProtocolKind::Gateway => HandlerVariant::session(
            GatewayProtocolHandler::new(config.listen_port).with_heartbeat_timeout(
                Duration::from_secs(config.session_heartbeat_timeout_seconds),
            ),
        ),
    }
}

fn engine_config(config: &AppConfig) -> TcpServerConfig {
    TcpServerConfig {
        listen_port: config.listen_port,
        max_connections: config.max_connections,
        idle_timeout: Duration::from_secs(config.idle_timeout_seconds),
        write_timeout: Duration::from_millis(config.write_timeout_ms),
        read_buffer_size: config.read_buffer_size,
        ..TcpServerConfig::default()
    }
}

/// 管理接口：路由 + 请求上下文 + HTTP 追踪。
pub fn build_app(state: AppState) -> Router {
    routes::create_api_router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(middleware::request_context))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target: "gw.server", error = %err, "shutdown_signal_failed");
    }
    info!(target: "gw.server", "shutdown_requested");
}
