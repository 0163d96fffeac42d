//! 设备身份与协议描述。

use serde::{Deserialize, Serialize};

/// 平台解析出的设备身份。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// 平台设备 ID
    pub device_id: String,
    /// 设备编号（设备自报）
    pub wire_id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// 平台返回的完整设备记录
    #[serde(default)]
    pub record: serde_json::Value,
}

impl DeviceIdentity {
    pub fn new(device_id: impl Into<String>, wire_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            wire_id: wire_id.into(),
            name: None,
            record: serde_json::Value::Null,
        }
    }
}

/// 设备在线状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    Offline,
    Online,
}

impl DeviceStatus {
    /// 平台约定的状态码：0=离线，1=在线。
    pub fn code(&self) -> u8 {
        match self {
            Self::Offline => 0,
            Self::Online => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Online => "online",
        }
    }
}

/// 协议描述：进程生命周期内不可变。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolDescriptor {
    pub name: String,
    pub version: String,
    pub port: u16,
}

impl ProtocolDescriptor {
    pub fn new(name: impl Into<String>, version: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            port,
        }
    }
}
