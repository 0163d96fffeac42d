//! 设备审计日志 handlers
//!
//! - GET /api/device-logs/stats
//! - GET /api/device-logs/:wire_id
//! - DELETE /api/device-logs/:wire_id

use crate::AppState;
use crate::utils::response::{audit_stats_to_dto, ok};
use api_contract::DeviceLogClearResponse;
use axum::{
    extract::{Path, State},
    response::Response,
};

pub async fn device_log_stats(State(state): State<AppState>) -> Response {
    ok(audit_stats_to_dto(state.audit.stats()))
}

/// 单个设备最近的审计事件（旧 → 新）
pub async fn device_log_history(
    State(state): State<AppState>,
    Path(wire_id): Path<String>,
) -> Response {
    ok(state.audit.history(&wire_id))
}

/// 释放单个设备的审计历史
pub async fn clear_device_log(
    State(state): State<AppState>,
    Path(wire_id): Path<String>,
) -> Response {
    let removed = state.audit.forget(&wire_id);
    tracing::info!(target: "gw.server", wire_id = %wire_id, removed, "device_log_cleared");
    ok(DeviceLogClearResponse { wire_id, removed })
}
