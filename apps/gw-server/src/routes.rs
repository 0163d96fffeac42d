//! 路由定义
//!
//! - 健康检查：/health
//! - 协议状态与指标：/api/protocol, /api/metrics
//! - 设备：/api/devices/*
//! - 设备审计日志：/api/device-logs/*

use super::AppState;
use super::handlers::*;
use axum::{
    Router,
    routing::{get, post},
};

/// 创建管理接口路由
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/protocol", get(get_protocol))
        .route("/api/metrics", get(get_metrics))
        .route("/api/devices/connected", get(list_connected_devices))
        .route("/api/devices/disconnect", post(device_disconnect))
        .route("/api/devices/cache/clear", post(clear_device_cache))
        .route("/api/devices/:wire_id/commands", post(send_device_command))
        .route("/api/device-logs/stats", get(device_log_stats))
        .route(
            "/api/device-logs/:wire_id",
            get(device_log_history).delete(clear_device_log),
        )
}
