//! 上行设备消息（规范化后的遥测模型）。

use crate::now_epoch_ms;
use serde::Serialize;
use std::collections::BTreeMap;

/// 消息类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Data,
    Heartbeat,
    Status,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Heartbeat => "heartbeat",
            Self::Status => "status",
        }
    }
}

/// 数据质量标记。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Good,
    Bad,
}

/// 标量值。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    I64(i64),
    F64(f64),
    Bool(bool),
    String(String),
}

impl ScalarValue {
    /// 数值类型转换为 f64，非数值返回 None。
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::I64(value) => Some(*value as f64),
            Self::F64(value) => Some(*value),
            Self::Bool(_) | Self::String(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<u8> for ScalarValue {
    fn from(value: u8) -> Self {
        Self::I64(i64::from(value))
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

/// 规范化后的设备消息。
///
/// - `wire_id`：设备编号，由编解码器从报文中提取
/// - `device_id`：平台分配的设备 ID，解析前为空
///
/// 交付上游前两者都必须非空，见 [`Message::is_resolved`]。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub wire_id: String,
    pub device_id: String,
    pub kind: MessageKind,
    pub timestamp_ms: i64,
    pub values: BTreeMap<String, ScalarValue>,
    pub quality: Quality,
}

impl Message {
    /// 以当前时间构造空消息。
    pub fn new(wire_id: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            wire_id: wire_id.into(),
            device_id: String::new(),
            kind,
            timestamp_ms: now_epoch_ms(),
            values: BTreeMap::new(),
            quality: Quality::Good,
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: impl Into<ScalarValue>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn value(&self, name: &str) -> Option<&ScalarValue> {
        self.values.get(name)
    }

    /// 设备编号与平台身份都已就绪。
    pub fn is_resolved(&self) -> bool {
        !self.wire_id.is_empty() && !self.device_id.is_empty()
    }
}
