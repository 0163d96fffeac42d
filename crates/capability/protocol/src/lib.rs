//! # 协议接入能力模块
//!
//! 终结设备的原始字节流连接，把设备私有的二进制帧解码为统一的 [`domain::Message`]，
//! 转发到上游平台；同时把平台下发的指令编码后写回设备所在的连接。
//!
//! 新协议只需实现编解码：
//! - [`ProtocolHandler`]：无状态协议，由引擎的帧循环驱动；`split_frame` 决定字节流中的帧边界
//! - [`SessionHandler`]：有状态协议（握手、多消息类型），自行驱动连接
//!
//! ## 架构设计
//!
//! ```text
//! 设备 TCP 连接
//!       │
//!       ▼
//! TcpServer（连接上限、空闲超时、取消）
//!       │
//!       ├── frame_loop ── ProtocolHandler（SensorProtocolHandler）
//!       └── session_loop ── SessionHandler（GatewayProtocolHandler）
//!       │
//!       ▼
//! ConnectionContext
//!       │
//!       ├── DeviceDirectory（设备编号 → 平台身份）
//!       └── Platform（遥测、上下线、指令）
//! ```
//!
//! ## 连接状态
//!
//! `Accepted → IdentityPending → Active → Closing → Closed`
//!
//! 只有进入过 `Active` 的连接在关闭时发送离线通知，且只发送一次。

mod context;
mod error;
mod gateway;
mod handler;
mod registry;
mod sensor;
mod session;
mod tcp_server;
mod types;

pub use context::ConnectionContext;
pub use error::{EncodeError, EngineError, FrameError};
pub use gateway::{
    DEFAULT_HEARTBEAT_TIMEOUT, GatewayFrame, GatewayPayload, GatewayProtocolHandler,
    decode_handshake,
};
pub use handler::{FrameSplit, HandlerVariant, ProtocolHandler, SessionHandler};
pub use sensor::{SensorAction, SensorFrame, SensorProtocolHandler, xor_checksum};
pub use session::Session;
pub use tcp_server::{TcpServer, TcpServerConfig};
pub use types::*;
