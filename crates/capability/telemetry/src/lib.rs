//! 追踪初始化、请求 ID、基础计数指标与设备审计日志。

mod audit;

pub use audit::{
    AuditEvent, AuditRecord, AuditStats, DeviceAuditLog, DeviceLogConfig, UNKNOWN_DEVICE,
};

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 基础指标快照。
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub connections_rejected: u64,
    pub frames_received: u64,
    pub frames_dropped: u64,
    pub identity_failures: u64,
    pub telemetry_published: u64,
    pub telemetry_failures: u64,
    pub status_published: u64,
    pub status_failures: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub heartbeat_failures: u64,
}

/// 基础指标。
pub struct TelemetryMetrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    connections_rejected: AtomicU64,
    frames_received: AtomicU64,
    frames_dropped: AtomicU64,
    identity_failures: AtomicU64,
    telemetry_published: AtomicU64,
    telemetry_failures: AtomicU64,
    status_published: AtomicU64,
    status_failures: AtomicU64,
    commands_sent: AtomicU64,
    commands_failed: AtomicU64,
    heartbeat_failures: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            connections_opened: AtomicU64::new(0),
            connections_closed: AtomicU64::new(0),
            connections_rejected: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            identity_failures: AtomicU64::new(0),
            telemetry_published: AtomicU64::new(0),
            telemetry_failures: AtomicU64::new(0),
            status_published: AtomicU64::new(0),
            status_failures: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            heartbeat_failures: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            connections_rejected: self.connections_rejected.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            identity_failures: self.identity_failures.load(Ordering::Relaxed),
            telemetry_published: self.telemetry_published.load(Ordering::Relaxed),
            telemetry_failures: self.telemetry_failures.load(Ordering::Relaxed),
            status_published: self.status_published.load(Ordering::Relaxed),
            status_failures: self.status_failures.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            heartbeat_failures: self.heartbeat_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录新建连接次数。
pub fn record_connection_opened() {
    metrics().connections_opened.fetch_add(1, Ordering::Relaxed);
}

/// 记录连接关闭次数。
pub fn record_connection_closed() {
    metrics().connections_closed.fetch_add(1, Ordering::Relaxed);
}

/// 记录因连接数上限被拒绝的连接。
pub fn record_connection_rejected() {
    metrics().connections_rejected.fetch_add(1, Ordering::Relaxed);
}

/// 记录收到的帧。
pub fn record_frame_received() {
    metrics().frames_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录解析失败被丢弃的帧。
pub fn record_frame_dropped() {
    metrics().frames_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录设备身份解析失败次数。
pub fn record_identity_failure() {
    metrics().identity_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录遥测上报结果。
pub fn record_telemetry(ok: bool) {
    let metrics = metrics();
    if ok {
        metrics.telemetry_published.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.telemetry_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录状态上报结果。
pub fn record_status(ok: bool) {
    let metrics = metrics();
    if ok {
        metrics.status_published.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.status_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录指令下发结果。
pub fn record_command(ok: bool) {
    let metrics = metrics();
    if ok {
        metrics.commands_sent.fetch_add(1, Ordering::Relaxed);
    } else {
        metrics.commands_failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// 记录服务心跳失败次数。
pub fn record_heartbeat_failure() {
    metrics().heartbeat_failures.fetch_add(1, Ordering::Relaxed);
}
