//! 设备审计日志。
//!
//! 每条记录以 `gw.device` 为 target 输出 tracing 事件（按 `wire_id` 字段可拆分为每设备一条日志流），
//! 启用时同时在内存中保留每个设备最近若干条记录与计数，供管理接口查询。
//!
//! 由启动流程显式构造并注入连接引擎，不存在进程级单例。
//! 保留历史的设备数有上限，超出后新设备只输出 tracing 事件；历史可经管理接口释放。

use domain::now_epoch_ms;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// 尚未提取到设备编号时使用的日志键。
pub const UNKNOWN_DEVICE: &str = "unknown";

/// 审计日志配置。
#[derive(Debug, Clone)]
pub struct DeviceLogConfig {
    /// 是否保留内存历史
    pub enabled: bool,
    /// 每个设备保留的历史条数
    pub history: usize,
    /// 保留历史的设备数上限
    pub max_devices: usize,
}

impl Default for DeviceLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            history: 64,
            max_devices: 10_000,
        }
    }
}

/// 审计事件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    ConnectionEstablished {
        peer: String,
        device_id: String,
        protocol: String,
    },
    ConnectionClosed {
        peer: String,
        device_id: String,
        reason: String,
    },
    ConnectionError {
        peer: String,
        error: String,
    },
    FrameReceived {
        peer: String,
        data_hex: String,
    },
    FrameSent {
        peer: String,
        action: String,
        data_hex: String,
    },
    ExtractFailed {
        peer: String,
        error: String,
        data_hex: String,
    },
    ParseFailed {
        error: String,
        data_hex: String,
    },
    IdentityFailed {
        wire_id: String,
        error: String,
    },
    StatusSent {
        device_id: String,
        status: String,
    },
    StatusSendFailed {
        device_id: String,
        status: String,
        error: String,
    },
    TelemetrySent {
        device_id: String,
        kind: String,
        fields: usize,
    },
    TelemetrySendFailed {
        device_id: String,
        kind: String,
        error: String,
    },
    CommandSending {
        command_id: String,
        action: String,
    },
    CommandResult {
        command_id: String,
        action: String,
        result: String,
        error: Option<String>,
    },
}

impl AuditEvent {
    /// 事件名（snake_case）。
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionEstablished { .. } => "connection_established",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::ConnectionError { .. } => "connection_error",
            Self::FrameReceived { .. } => "frame_received",
            Self::FrameSent { .. } => "frame_sent",
            Self::ExtractFailed { .. } => "extract_failed",
            Self::ParseFailed { .. } => "parse_failed",
            Self::IdentityFailed { .. } => "identity_failed",
            Self::StatusSent { .. } => "status_sent",
            Self::StatusSendFailed { .. } => "status_send_failed",
            Self::TelemetrySent { .. } => "telemetry_sent",
            Self::TelemetrySendFailed { .. } => "telemetry_send_failed",
            Self::CommandSending { .. } => "command_sending",
            Self::CommandResult { .. } => "command_result",
        }
    }

    pub fn frame_received(peer: &str, data: &[u8]) -> Self {
        Self::FrameReceived {
            peer: peer.to_string(),
            data_hex: hex::encode(data),
        }
    }

    pub fn frame_sent(peer: &str, action: &str, data: &[u8]) -> Self {
        Self::FrameSent {
            peer: peer.to_string(),
            action: action.to_string(),
            data_hex: hex::encode(data),
        }
    }

    pub fn extract_failed(peer: &str, error: impl ToString, data: &[u8]) -> Self {
        Self::ExtractFailed {
            peer: peer.to_string(),
            error: error.to_string(),
            data_hex: hex::encode(data),
        }
    }

    pub fn parse_failed(error: impl ToString, data: &[u8]) -> Self {
        Self::ParseFailed {
            error: error.to_string(),
            data_hex: hex::encode(data),
        }
    }
}

/// 带时间戳的审计记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub ts_ms: i64,
    #[serde(flatten)]
    pub event: AuditEvent,
}

/// 审计日志统计。
#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    pub enabled: bool,
    pub active_devices: usize,
    pub events_total: u64,
    pub history_limit: usize,
    pub device_limit: usize,
    pub untracked_events: u64,
}

#[derive(Default)]
struct DeviceLog {
    records: VecDeque<AuditRecord>,
    events: u64,
}

/// 按设备编号分流的审计日志。
pub struct DeviceAuditLog {
    config: DeviceLogConfig,
    devices: RwLock<HashMap<String, DeviceLog>>,
    events_total: AtomicU64,
    untracked_events: AtomicU64,
}

impl DeviceAuditLog {
    pub fn new(config: DeviceLogConfig) -> Self {
        Self {
            config,
            devices: RwLock::new(HashMap::new()),
            events_total: AtomicU64::new(0),
            untracked_events: AtomicU64::new(0),
        }
    }

    /// 仅输出 tracing 事件，不保留历史。
    pub fn disabled() -> Self {
        Self::new(DeviceLogConfig {
            enabled: false,
            history: 0,
            max_devices: 0,
        })
    }

    /// 记录一条设备事件。`wire_id` 为空时归入 [`UNKNOWN_DEVICE`]。
    pub fn record(&self, wire_id: &str, event: AuditEvent) {
        let wire_id = if wire_id.is_empty() {
            UNKNOWN_DEVICE
        } else {
            wire_id
        };
        self.events_total.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            target: "gw.device",
            wire_id = %wire_id,
            event = event.name(),
            detail = ?event,
            "device_event"
        );
        if !self.config.enabled {
            return;
        }

        let record = AuditRecord {
            ts_ms: now_epoch_ms(),
            event,
        };
        let mut devices = self.write();
        if !devices.contains_key(wire_id) && devices.len() >= self.config.max_devices {
            self.untracked_events.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let log = devices.entry(wire_id.to_string()).or_default();
        log.events = log.events.saturating_add(1);
        log.records.push_back(record);
        while log.records.len() > self.config.history {
            log.records.pop_front();
        }
    }

    /// 指定设备的最近记录（旧 → 新）。
    pub fn history(&self, wire_id: &str) -> Vec<AuditRecord> {
        self.read()
            .get(wire_id)
            .map(|log| log.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 指定设备历史中某类事件的条数。
    pub fn count(&self, wire_id: &str, event_name: &str) -> usize {
        self.read()
            .get(wire_id)
            .map(|log| {
                log.records
                    .iter()
                    .filter(|record| record.event.name() == event_name)
                    .count()
            })
            .unwrap_or(0)
    }

    /// 释放设备的历史记录，返回是否存在。
    pub fn forget(&self, wire_id: &str) -> bool {
        self.write().remove(wire_id).is_some()
    }

    pub fn stats(&self) -> AuditStats {
        AuditStats {
            enabled: self.config.enabled,
            active_devices: self.read().len(),
            events_total: self.events_total.load(Ordering::Relaxed),
            history_limit: self.config.history,
            device_limit: self.config.max_devices,
            untracked_events: self.untracked_events.load(Ordering::Relaxed),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DeviceLog>> {
        self.devices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DeviceLog>> {
        self.devices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for DeviceAuditLog {
    fn default() -> Self {
        Self::new(DeviceLogConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded_per_device() {
        let log = DeviceAuditLog::new(DeviceLogConfig {
            history: 2,
            ..DeviceLogConfig::default()
        });
        for i in 0..3u8 {
            log.record("00000001", AuditEvent::frame_received("peer", &[i]));
        }
        log.record("00000002", AuditEvent::IdentityFailed {
            wire_id: "00000002".to_string(),
            error: "not found".to_string(),
        });

        let history = log.history("00000001");
        assert_eq!(history.len(), 2);
        assert_eq!(
            history[1].event,
            AuditEvent::FrameReceived {
                peer: "peer".to_string(),
                data_hex: "02".to_string(),
            }
        );
        let stats = log.stats();
        assert_eq!(stats.active_devices, 2);
        assert_eq!(stats.events_total, 4);
    }

    #[test]
    fn empty_wire_id_goes_to_unknown() {
        let log = DeviceAuditLog::default();
        log.record("", AuditEvent::parse_failed("bad", &[0xab]));
        assert_eq!(log.count(UNKNOWN_DEVICE, "parse_failed"), 1);
        assert!(log.forget(UNKNOWN_DEVICE));
        assert!(!log.forget(UNKNOWN_DEVICE));
    }

    #[test]
    fn device_count_is_capped() {
        let log = DeviceAuditLog::new(DeviceLogConfig {
            max_devices: 2,
            ..DeviceLogConfig::default()
        });
        for id in ["00000001", "00000002", "00000003"] {
            log.record(id, AuditEvent::frame_received("peer", &[1]));
        }
        log.record("00000001", AuditEvent::frame_received("peer", &[2]));

        assert!(log.history("00000003").is_empty());
        assert_eq!(log.history("00000001").len(), 2);
        let stats = log.stats();
        assert_eq!(stats.active_devices, 2);
        assert_eq!(stats.untracked_events, 1);
        assert_eq!(stats.events_total, 4);

        assert!(log.forget("00000002"));
        log.record("00000003", AuditEvent::frame_received("peer", &[3]));
        assert_eq!(log.history("00000003").len(), 1);
    }

    #[test]
    fn disabled_log_keeps_no_history() {
        let log = DeviceAuditLog::disabled();
        log.record("00000001", AuditEvent::frame_received("peer", &[1, 2]));
        assert!(log.history("00000001").is_empty());
        assert_eq!(log.stats().events_total, 1);
    }
}
