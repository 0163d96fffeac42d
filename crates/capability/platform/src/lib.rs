//! 上游平台能力：设备身份查询、遥测/状态上报、服务心跳与平台指令订阅。
//!
//! - `Platform`：连接引擎与设备目录依赖的上游契约
//! - `PlatformClient`：HTTP（身份查询、心跳）+ MQTT（上报、指令订阅）实现
//! - `InMemoryPlatform`：测试替身，记录调用并可注入失败

mod client;
mod command;
mod memory;

pub use client::{PlatformClient, PlatformClientConfig};
pub use command::{CommandListenerConfig, PlatformCommand, spawn_command_listener};
pub use memory::InMemoryPlatform;

use async_trait::async_trait;
use domain::{DeviceIdentity, DeviceStatus, ScalarValue};
use std::collections::BTreeMap;
use std::sync::Arc;

/// 上游平台错误。
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("request error: {0}")]
    Request(String),
    #[error("platform rejected request: code={code} message={message}")]
    Rejected { code: i64, message: String },
    #[error("publish error: {0}")]
    Publish(String),
    #[error("payload error: {0}")]
    Payload(String),
    #[error("platform unavailable: {0}")]
    Unavailable(String),
}

/// 上游平台契约。
#[async_trait]
pub trait Platform: Send + Sync {
    /// 按设备编号查询平台身份；平台无此设备时返回 `NotFound`。
    async fn fetch_identity(&self, wire_id: &str) -> Result<DeviceIdentity, PlatformError>;

    async fn publish_telemetry(
        &self,
        device_id: &str,
        values: &BTreeMap<String, ScalarValue>,
    ) -> Result<(), PlatformError>;

    async fn publish_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
    ) -> Result<(), PlatformError>;

    async fn send_heartbeat(&self, service_id: &str) -> Result<(), PlatformError>;

    /// 注册平台指令接收方。重复注册时以最后一次为准。
    fn register_command_sink(&self, sink: Arc<dyn CommandSink>) -> Result<(), PlatformError>;
}

/// 平台指令接收方。
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn on_command(&self, command: PlatformCommand);
}
