//! HTTP 响应辅助函数和 DTO 转换
//!
//! - 错误响应：bad_request_error, not_connected_error, engine_error
//! - DTO 转换：protocol_info_to_dto, connected_device_to_dto, audit_stats_to_dto
//!
//! 所有错误返回统一的 ApiResponse 格式。

use api_contract::{ApiResponse, ConnectedDeviceDto, DeviceLogStatsDto, ProtocolInfoDto};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use gw_protocol::{ConnectedDevice, EngineError, ProtocolInfo};
use gw_telemetry::AuditStats;

/// 成功响应
pub fn ok<T: serde::Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// 错误请求响应
pub fn bad_request_error(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error("INVALID.REQUEST", message.into())),
    )
        .into_response()
}

/// 设备未连接
pub fn not_connected_error(wire_id: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error(
            "DEVICE.NOT_CONNECTED",
            format!("device {} not connected", wire_id),
        )),
    )
        .into_response()
}

/// 指令下发错误：未连接 404，编码错误 400，写入失败 502。
pub fn engine_error(wire_id: &str, err: EngineError) -> Response {
    match err {
        EngineError::NotConnected(_) => not_connected_error(wire_id),
        EngineError::Encode(err) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error("COMMAND.INVALID", err.to_string())),
        )
            .into_response(),
        err => (
            StatusCode::BAD_GATEWAY,
            Json(ApiResponse::<()>::error("DEVICE.WRITE_FAILED", err.to_string())),
        )
            .into_response(),
    }
}

pub fn protocol_info_to_dto(info: ProtocolInfo, stateful: bool) -> ProtocolInfoDto {
    ProtocolInfoDto {
        name: info.name,
        version: info.version,
        port: info.port,
        status: info.status.as_str().to_string(),
        stateful,
    }
}

pub fn connected_device_to_dto(device: ConnectedDevice) -> ConnectedDeviceDto {
    ConnectedDeviceDto {
        wire_id: device.wire_id,
        device_id: device.device_id,
        peer: device.peer,
        connected_at_ms: device.connected_at_ms,
    }
}

pub fn audit_stats_to_dto(stats: AuditStats) -> DeviceLogStatsDto {
    DeviceLogStatsDto {
        enabled: stats.enabled,
        active_devices: stats.active_devices,
        events_total: stats.events_total,
        history_limit: stats.history_limit,
        device_limit: stats.device_limit,
        untracked_events: stats.untracked_events,
    }
}
