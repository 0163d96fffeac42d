//! 下行指令。

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 指令参数：按动作约定 schema 的键值对，在编码时校验。
pub type CommandParams = serde_json::Map<String, serde_json::Value>;

/// 未指定时的指令超时。
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// 发往设备的指令。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// 目标设备编号
    pub wire_id: String,
    /// 目标平台设备 ID
    pub device_id: String,
    /// 指令关联 ID
    pub command_id: String,
    /// 动作标识（由协议定义，如 sleep/config/query）
    pub action: String,
    #[serde(default)]
    pub params: CommandParams,
    #[serde(default = "default_timeout", with = "duration_ms")]
    pub timeout: Duration,
}

fn default_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

impl Command {
    pub fn new(wire_id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            wire_id: wire_id.into(),
            device_id: String::new(),
            command_id: String::new(),
            action: action.into(),
            params: CommandParams::new(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
        self.params.get(key)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
