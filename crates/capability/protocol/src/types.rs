//! 协议相关类型定义

use serde::Serialize;

/// 引擎运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolStatus {
    Running,
    Stopped,
}

impl ProtocolStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
        }
    }
}

/// 协议信息（描述 + 运行状态）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolInfo {
    pub name: String,
    pub version: String,
    pub port: u16,
    pub status: ProtocolStatus,
}

/// 单个连接的状态
///
/// `Accepted → IdentityPending → Active → Closing → Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// 已接受，读超时已启用
    Accepted,
    /// 已收到数据，设备编号尚未提取/解析
    IdentityPending,
    /// 身份已解析，稳定收发
    Active,
    /// 正在关闭（发送离线通知、移除路由）
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::IdentityPending => "identity_pending",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }
}

/// 连接关闭原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// 对端关闭
    Eof,
    /// 读空闲超时
    IdleTimeout,
    /// 读错误
    ReadError,
    /// 身份解析失败
    IdentityFailed,
    /// 引擎停止或会话被取消
    Cancelled,
    /// 协议处理器返回错误
    HandlerError,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eof => "eof",
            Self::IdleTimeout => "idle_timeout",
            Self::ReadError => "read_error",
            Self::IdentityFailed => "identity_failed",
            Self::Cancelled => "cancelled",
            Self::HandlerError => "handler_error",
        }
    }
}

/// 已连接设备快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedDevice {
    pub wire_id: String,
    pub device_id: String,
    pub peer: String,
    pub connected_at_ms: i64,
}
