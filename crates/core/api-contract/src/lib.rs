//! 稳定的 DTO 与 API 响应契约。

use serde::{Deserialize, Serialize};

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 健康检查返回结构。
#[derive(Debug, Serialize)]
pub struct HealthDto {
    pub status: String,
}

/// 协议信息返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolInfoDto {
    pub name: String,
    pub version: String,
    pub port: u16,
    /// running / stopped
    pub status: String,
    pub stateful: bool,
}

/// 已连接设备。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedDeviceDto {
    pub wire_id: String,
    pub device_id: String,
    pub peer: String,
    pub connected_at_ms: i64,
}

/// 已连接设备列表。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedDevicesDto {
    pub total: usize,
    pub devices: Vec<ConnectedDeviceDto>,
}

/// 下发指令请求体。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCommandRequest {
    pub action: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
    #[serde(default, alias = "timeout_ms")]
    pub timeout_ms: Option<u64>,
}

/// 下发指令返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendCommandResponse {
    pub command_id: String,
    pub wire_id: String,
    pub action: String,
}

/// 设备断开通知请求体（平台侧）。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDisconnectRequest {
    #[serde(alias = "device_id")]
    pub device_id: String,
}

/// 设备断开通知返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDisconnectResponse {
    pub device_id: String,
    /// 被移出缓存的设备编号，未缓存时为空
    pub wire_id: Option<String>,
}

/// 清空设备缓存返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheClearResponse {
    pub cleared: usize,
}

/// 设备审计日志统计。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLogStatsDto {
    pub enabled: bool,
    pub active_devices: usize,
    pub events_total: u64,
    pub history_limit: usize,
    pub device_limit: usize,
    pub untracked_events: u64,
}

/// 释放设备审计历史返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLogClearResponse {
    pub wire_id: String,
    pub removed: bool,
}
