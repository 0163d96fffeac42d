//! 协议处理器契约。
//!
//! - `ProtocolHandler`：无状态编解码（绝大多数协议），连接由引擎的帧循环驱动
//! - `SessionHandler`：有状态协议（握手、多消息类型），自行驱动整个连接
//!
//! 引擎在每个连接开始时按 `HandlerVariant` 分派一次，而不是逐帧判断。

use crate::context::ConnectionContext;
use crate::error::{EncodeError, EngineError, FrameError};
use async_trait::async_trait;
use domain::{Command, Message, ProtocolDescriptor};
use std::sync::Arc;

/// 接收缓冲区的切分结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSplit {
    /// 数据不足一帧，继续读取
    Incomplete,
    /// 缓冲区开头的 n 字节构成一帧
    Frame(usize),
    /// 缓冲区开头的 n 字节无法对齐到帧边界，丢弃
    Skip(usize),
}

/// 无状态协议处理器。
pub trait ProtocolHandler: Send + Sync {
    fn descriptor(&self) -> &ProtocolDescriptor;

    /// 从接收缓冲区切出下一帧。`bound_wire_id` 为本连接已绑定的设备编号。
    ///
    /// 默认把已收到的全部数据当作一帧。
    fn split_frame(&self, buf: &[u8], _bound_wire_id: Option<&str>) -> FrameSplit {
        if buf.is_empty() {
            FrameSplit::Incomplete
        } else {
            FrameSplit::Frame(buf.len())
        }
    }

    /// 从最短的帧前缀中提取设备编号；帧的其余部分损坏时也必须成功。
    fn extract_wire_id(&self, data: &[u8]) -> Result<String, FrameError>;

    /// 先校验长度与校验和，再解释字段；超出取值范围的物理量是错误，不做截断。
    fn parse_data(&self, data: &[u8]) -> Result<Message, FrameError>;

    fn encode_command(&self, command: &Command) -> Result<Vec<u8>, EncodeError>;

    fn start(&self) -> Result<(), EngineError> {
        Ok(())
    }

    fn stop(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// 有状态协议处理器：接管整个连接生命周期。
///
/// 返回后引擎进入关闭流程（已绑定设备时发送离线通知）。
#[async_trait]
pub trait SessionHandler: ProtocolHandler {
    async fn handle_connection(&self, ctx: &mut ConnectionContext) -> Result<(), EngineError>;

    async fn on_connection_established(&self, _peer: &str) -> Result<(), EngineError> {
        Ok(())
    }

    async fn on_connection_closed(&self, _peer: &str) -> Result<(), EngineError> {
        Ok(())
    }
}

/// 协议处理器的两种形态。
#[derive(Clone)]
pub enum HandlerVariant {
    Framed(Arc<dyn ProtocolHandler>),
    Session(Arc<dyn SessionHandler>),
}

impl HandlerVariant {
    pub fn framed<H: ProtocolHandler + 'static>(handler: H) -> Self {
        Self::Framed(Arc::new(handler))
    }

    pub fn session<H: SessionHandler + 'static>(handler: H) -> Self {
        Self::Session(Arc::new(handler))
    }

    /// 编解码视图（两种形态共用）。
    pub fn codec(&self) -> &dyn ProtocolHandler {
        match self {
            Self::Framed(handler) => handler.as_ref(),
            Self::Session(handler) => handler.as_ref(),
        }
    }

    pub fn descriptor(&self) -> &ProtocolDescriptor {
        self.codec().descriptor()
    }

    pub fn is_stateful(&self) -> bool {
        matches!(self, Self::Session(_))
    }
}
