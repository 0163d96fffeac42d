//! 系统状态 handlers
//!
//! - GET /health
//! - GET /api/protocol
//! - GET /api/metrics

use crate::AppState;
use crate::utils::response::{ok, protocol_info_to_dto};
use api_contract::HealthDto;
use axum::{extract::State, response::Response};
use gw_telemetry::metrics;

pub async fn health() -> Response {
    ok(HealthDto {
        status: "ok".to_string(),
    })
}

/// 协议描述与运行状态
pub async fn get_protocol(State(state): State<AppState>) -> Response {
    ok(protocol_info_to_dto(
        state.engine.info(),
        state.engine.is_stateful(),
    ))
}

pub async fn get_metrics() -> Response {
    ok(metrics().snapshot())
}
