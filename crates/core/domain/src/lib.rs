//! 网关核心领域模型：设备消息、下行指令、设备身份与协议描述。
//!
//! 本 crate 不做任何 I/O，仅定义各能力模块之间共享的数据结构。

pub mod command;
pub mod data;
pub mod device;

pub use command::{Command, CommandParams, DEFAULT_COMMAND_TIMEOUT};
pub use data::{Message, MessageKind, Quality, ScalarValue};
pub use device::{DeviceIdentity, DeviceStatus, ProtocolDescriptor};

/// 获取当前时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
