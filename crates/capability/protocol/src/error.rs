//! 协议错误类型定义

use gw_directory::DirectoryError;

/// 报文错误：丢弃该帧，连接保持。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    /// 长度不符
    #[error("frame length mismatch: expected {expected}, got {actual}")]
    Length { expected: usize, actual: usize },

    /// 不足以提取设备编号
    #[error("frame too short: need at least {min} bytes, got {actual}")]
    TooShort { min: usize, actual: usize },

    /// 校验和不符
    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    Checksum { expected: u8, actual: u8 },

    /// 物理量超出取值范围
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },

    /// 未知消息类型
    #[error("unknown message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    /// 握手不合法
    #[error("invalid handshake: {0}")]
    Handshake(&'static str),

    /// 无法对齐到帧边界的字节
    #[error("{skipped} bytes do not align to a frame boundary")]
    Unaligned { skipped: usize },

    /// 帧中的设备编号与会话绑定的设备不一致
    #[error("wire id mismatch: session {expected}, frame {actual}")]
    WireIdMismatch { expected: String, actual: String },
}

/// 指令编码错误。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("invalid wire id: {0}")]
    InvalidWireId(String),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: String, reason: String },
}

/// 连接引擎错误
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// 目标设备没有在线连接
    #[error("device {0} not connected")]
    NotConnected(String),

    /// 指令编码失败
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// IO 错误（含读空闲超时）
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 写超时
    #[error("write timed out after {0:?}")]
    WriteTimeout(std::time::Duration),

    /// 设备身份解析失败
    #[error("identity error: {0}")]
    Identity(#[from] DirectoryError),

    /// 引擎已在运行
    #[error("engine already running")]
    AlreadyRunning,

    /// 引擎未运行
    #[error("engine not running")]
    NotRunning,

    /// 协议处理器错误
    #[error("handler error: {0}")]
    Handler(String),
}
