//! 设备 handlers
//!
//! - GET /api/devices/connected
//! - POST /api/devices/:wire_id/commands
//! - POST /api/devices/disconnect
//! - POST /api/devices/cache/clear

use crate::AppState;
use crate::utils::response::{bad_request_error, connected_device_to_dto, engine_error, ok};
use api_contract::{
    CacheClearResponse, ConnectedDevicesDto, DeviceDisconnectRequest, DeviceDisconnectResponse,
    SendCommandRequest, SendCommandResponse,
};
use axum::{
    Json,
    extract::{Path, State},
    response::Response,
};
use domain::Command;
use std::time::Duration;
use tracing::info;

/// 列出在线设备
pub async fn list_connected_devices(State(state): State<AppState>) -> Response {
    let devices: Vec<_> = state
        .engine
        .connected_devices()
        .into_iter()
        .map(connected_device_to_dto)
        .collect();
    ok(ConnectedDevicesDto {
        total: devices.len(),
        devices,
    })
}

/// 向设备下发指令
pub async fn send_device_command(
    State(state): State<AppState>,
    Path(wire_id): Path<String>,
    Json(req): Json<SendCommandRequest>,
) -> Response {
    let action = req.action.trim();
    if action.is_empty() {
        return bad_request_error("action is required");
    }

    let mut command = Command::new(wire_id.clone(), action);
    command.command_id = uuid::Uuid::new_v4().to_string();
    command.params = req.params;
    if let Some(timeout_ms) = req.timeout_ms {
        command.timeout = Duration::from_millis(timeout_ms);
    }
    let command_id = command.command_id.clone();
    let action = command.action.clone();

    match state.engine.send_command(&wire_id, command).await {
        Ok(()) => ok(SendCommandResponse {
            command_id,
            wire_id,
            action,
        }),
        Err(err) => engine_error(&wire_id, err),
    }
}

/// 平台通知设备断开：清除该设备的身份缓存
pub async fn device_disconnect(
    State(state): State<AppState>,
    Json(req): Json<DeviceDisconnectRequest>,
) -> Response {
    let device_id = req.device_id.trim().to_string();
    if device_id.is_empty() {
        return bad_request_error("device_id is required");
    }
    let wire_id = state.directory.invalidate_by_identity(&device_id);
    info!(
        target: "gw.server",
        device_id = %device_id,
        wire_id = wire_id.as_deref().unwrap_or(""),
        "device_disconnect_notified"
    );
    ok(DeviceDisconnectResponse { device_id, wire_id })
}

/// 清空设备身份缓存
pub async fn clear_device_cache(State(state): State<AppState>) -> Response {
    let cleared = state.directory.clear();
    info!(target: "gw.server", cleared = cleared, "device_cache_cleared");
    ok(CacheClearResponse { cleared })
}
