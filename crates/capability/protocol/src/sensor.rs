//! 传感器协议（参考编解码）。
//!
//! 上行数据帧，12 字节，多字节字段均为大端：
//!
//! ```text
//! [设备编号 u32][温度 i16 0.1°C][湿度 u16 0.1%][电压 u16 0.01V][电量 u8 %][校验 u8]
//! ```
//!
//! 下行指令帧，8 字节：
//!
//! ```text
//! [设备编号 u32][指令 u8][参数 u16][校验 u8]
//! ```
//!
//! 校验为前面所有字节的异或。取值范围：温度 -40.0~85.0，湿度 0~100，电压 0~5.00，电量 0~100。
//!
//! 字节流按 12 字节定长切帧。异或校验无法可靠地定位帧边界（帧头多为 0），
//! 绑定设备后以设备编号的 4 字节作为对齐标记。

use crate::error::{EncodeError, FrameError};
use crate::handler::{FrameSplit, ProtocolHandler};
use domain::{Command, CommandParams, Message, MessageKind, ProtocolDescriptor};

pub const SENSOR_FRAME_LEN: usize = 12;
pub const SENSOR_COMMAND_LEN: usize = 8;
const WIRE_ID_LEN: usize = 4;

const TEMPERATURE_RANGE: (i16, i16) = (-400, 850);
const HUMIDITY_MAX: u16 = 1000;
const VOLTAGE_MAX: u16 = 500;
const BATTERY_MAX: u8 = 100;

const DEFAULT_SLEEP_MINUTES: u16 = 60;
const DEFAULT_REPORT_INTERVAL: u16 = 300;

/// 异或校验。
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, byte| acc ^ byte)
}

/// 设备编号：4 字节大端整数，格式化为 8 位十进制（`00000001`）。
pub(crate) fn read_wire_id(data: &[u8]) -> Result<String, FrameError> {
    if data.len() < WIRE_ID_LEN {
        return Err(FrameError::TooShort {
            min: WIRE_ID_LEN,
            actual: data.len(),
        });
    }
    let id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    Ok(format!("{:08}", id))
}

/// 指令中的设备编号：任意十进制表示的 u32。
pub(crate) fn parse_wire_id(wire_id: &str) -> Result<u32, EncodeError> {
    wire_id
        .trim()
        .parse::<u32>()
        .map_err(|_| EncodeError::InvalidWireId(wire_id.to_string()))
}

/// 读取 u16 参数；缺省或 null 时使用默认值。
pub(crate) fn u16_param(params: &CommandParams, name: &str, default: u16) -> Result<u16, EncodeError> {
    let invalid = |reason: &str| EncodeError::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let value = match params.get(name) {
        None | Some(serde_json::Value::Null) => return Ok(default),
        Some(value) => value,
    };
    let number = match value {
        serde_json::Value::Number(number) => number,
        _ => return Err(invalid("expected an integer")),
    };
    let integer = match (number.as_u64(), number.as_i64(), number.as_f64()) {
        (Some(value), _, _) => value,
        (None, Some(_), _) => return Err(invalid("must not be negative")),
        (None, None, Some(value)) if value.fract() == 0.0 && value >= 0.0 => value as u64,
        _ => return Err(invalid("expected an integer")),
    };
    u16::try_from(integer).map_err(|_| invalid("must be within 0..=65535"))
}

/// 解码后的传感器数据帧（原始定点值）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorFrame {
    pub wire_id: u32,
    /// 0.1 °C
    pub temperature: i16,
    /// 0.1 %
    pub humidity: u16,
    /// 0.01 V
    pub voltage: u16,
    /// %
    pub battery: u8,
}

impl SensorFrame {
    /// 先校验长度与校验和，再校验取值范围。
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() != SENSOR_FRAME_LEN {
            return Err(FrameError::Length {
                expected: SENSOR_FRAME_LEN,
                actual: data.len(),
            });
        }
        let expected = xor_checksum(&data[..SENSOR_FRAME_LEN - 1]);
        let actual = data[SENSOR_FRAME_LEN - 1];
        if expected != actual {
            return Err(FrameError::Checksum { expected, actual });
        }

        let frame = Self {
            wire_id: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            temperature: i16::from_be_bytes([data[4], data[5]]),
            humidity: u16::from_be_bytes([data[6], data[7]]),
            voltage: u16::from_be_bytes([data[8], data[9]]),
            battery: data[10],
        };
        frame.validate()?;
        Ok(frame)
    }

    pub fn encode(&self) -> [u8; SENSOR_FRAME_LEN] {
        let mut frame = [0u8; SENSOR_FRAME_LEN];
        frame[0..4].copy_from_slice(&self.wire_id.to_be_bytes());
        frame[4..6].copy_from_slice(&self.temperature.to_be_bytes());
        frame[6..8].copy_from_slice(&self.humidity.to_be_bytes());
        frame[8..10].copy_from_slice(&self.voltage.to_be_bytes());
        frame[10] = self.battery;
        frame[11] = xor_checksum(&frame[..11]);
        frame
    }

    pub fn temperature_celsius(&self) -> f64 {
        f64::from(self.temperature) / 10.0
    }

    pub fn humidity_percent(&self) -> f64 {
        f64::from(self.humidity) / 10.0
    }

    pub fn voltage_volts(&self) -> f64 {
        f64::from(self.voltage) / 100.0
    }

    fn validate(&self) -> Result<(), FrameError> {
        if self.temperature < TEMPERATURE_RANGE.0 || self.temperature > TEMPERATURE_RANGE.1 {
            return Err(FrameError::OutOfRange {
                field: "temperature",
                value: self.temperature_celsius(),
            });
        }
        if self.humidity > HUMIDITY_MAX {
            return Err(FrameError::OutOfRange {
                field: "humidity",
                value: self.humidity_percent(),
            });
        }
        if self.voltage > VOLTAGE_MAX {
            return Err(FrameError::OutOfRange {
                field: "voltage",
                value: self.voltage_volts(),
            });
        }
        if self.battery > BATTERY_MAX {
            return Err(FrameError::OutOfRange {
                field: "battery",
                value: f64::from(self.battery),
            });
        }
        Ok(())
    }

    fn into_message(self) -> Message {
        Message::new(format!("{:08}", self.wire_id), MessageKind::Data)
            .with_value("temperature", self.temperature_celsius())
            .with_value("humidity", self.humidity_percent())
            .with_value("voltage", self.voltage_volts())
            .with_value("battery", self.battery)
    }
}

/// 传感器指令。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorAction {
    /// 0x01，`sleep_minutes`，默认 60
    Sleep { minutes: u16 },
    /// 0x02，`report_interval`（秒），默认 300
    Configure { report_interval: u16 },
    /// 0x03，参数固定为 0
    Query,
}

impl SensorAction {
    pub fn from_command(command: &Command) -> Result<Self, EncodeError> {
        match command.action.as_str() {
            "sleep" => Ok(Self::Sleep {
                minutes: u16_param(&command.params, "sleep_minutes", DEFAULT_SLEEP_MINUTES)?,
            }),
            "config" | "configure" => Ok(Self::Configure {
                report_interval: u16_param(
                    &command.params,
                    "report_interval",
                    DEFAULT_REPORT_INTERVAL,
                )?,
            }),
            "query" => Ok(Self::Query),
            other => Err(EncodeError::UnsupportedAction(other.to_string())),
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Sleep { .. } => 0x01,
            Self::Configure { .. } => 0x02,
            Self::Query => 0x03,
        }
    }

    pub fn parameter(&self) -> u16 {
        match self {
            Self::Sleep { minutes } => *minutes,
            Self::Configure { report_interval } => *report_interval,
            Self::Query => 0,
        }
    }

    pub fn encode(&self, wire_id: u32) -> [u8; SENSOR_COMMAND_LEN] {
        let mut frame = [0u8; SENSOR_COMMAND_LEN];
        frame[0..4].copy_from_slice(&wire_id.to_be_bytes());
        frame[4] = self.code();
        frame[5..7].copy_from_slice(&self.parameter().to_be_bytes());
        frame[7] = xor_checksum(&frame[..7]);
        frame
    }
}

/// 定长切帧；`bound` 为已绑定的设备编号，缓冲区开头不是该编号时跳到下一个出现位置。
fn split_sensor_frame(buf: &[u8], bound: Option<u32>) -> FrameSplit {
    if buf.len() < SENSOR_FRAME_LEN {
        return FrameSplit::Incomplete;
    }
    let Some(wire_id) = bound else {
        return FrameSplit::Frame(SENSOR_FRAME_LEN);
    };
    let marker = wire_id.to_be_bytes();
    if buf.starts_with(&marker) {
        return FrameSplit::Frame(SENSOR_FRAME_LEN);
    }
    match buf.windows(WIRE_ID_LEN).position(|window| window == marker) {
        Some(at) => FrameSplit::Skip(at),
        // 末尾 3 字节可能是下一个标记的开头
        None => FrameSplit::Skip(buf.len() - (WIRE_ID_LEN - 1)),
    }
}

/// 传感器协议处理器（无状态）。
pub struct SensorProtocolHandler {
    descriptor: ProtocolDescriptor,
}

impl SensorProtocolHandler {
    pub fn new(port: u16) -> Self {
        Self {
            descriptor: ProtocolDescriptor::new("SensorProtocol", "1.0.0", port),
        }
    }
}

impl ProtocolHandler for SensorProtocolHandler {
    fn descriptor(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    fn split_frame(&self, buf: &[u8], bound_wire_id: Option<&str>) -> FrameSplit {
        let bound = bound_wire_id.and_then(|wire_id| parse_wire_id(wire_id).ok());
        split_sensor_frame(buf, bound)
    }

    fn extract_wire_id(&self, data: &[u8]) -> Result<String, FrameError> {
        read_wire_id(data)
    }

    fn parse_data(&self, data: &[u8]) -> Result<Message, FrameError> {
        SensorFrame::decode(data).map(SensorFrame::into_message)
    }

    fn encode_command(&self, command: &Command) -> Result<Vec<u8>, EncodeError> {
        let action = SensorAction::from_command(command)?;
        let wire_id = parse_wire_id(&command.wire_id)?;
        Ok(action.encode(wire_id).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::ScalarValue;

    /// 设备 1：25.6°C、60.5%、3.30V、85%。
    const SAMPLE_FRAME: [u8; 12] = [
        0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x02, 0x5D, 0x01, 0x4A, 0x55, 0x41,
    ];

    fn handler() -> SensorProtocolHandler {
        SensorProtocolHandler::new(15001)
    }

    #[test]
    fn sample_frame_decodes_to_fields() {
        let message = handler().parse_data(&SAMPLE_FRAME).expect("parse");
        assert_eq!(message.wire_id, "00000001");
        assert!(message.device_id.is_empty());
        assert_eq!(message.kind, MessageKind::Data);
        assert_eq!(message.value("temperature"), Some(&ScalarValue::F64(25.6)));
        assert_eq!(message.value("humidity"), Some(&ScalarValue::F64(60.5)));
        assert_eq!(message.value("voltage"), Some(&ScalarValue::F64(3.3)));
        assert_eq!(message.value("battery"), Some(&ScalarValue::I64(85)));
    }

    #[test]
    fn sample_fields_encode_to_sample_frame() {
        let frame = SensorFrame {
            wire_id: 1,
            temperature: 256,
            humidity: 605,
            voltage: 330,
            battery: 85,
        };
        assert_eq!(frame.encode(), SAMPLE_FRAME);
        assert_eq!(SensorFrame::decode(&SAMPLE_FRAME).expect("decode"), frame);
    }

    #[test]
    fn reencoded_fields_reproduce_checksum() {
        let frames = [
            SensorFrame { wire_id: 42, temperature: -400, humidity: 0, voltage: 0, battery: 0 },
            SensorFrame { wire_id: u32::MAX, temperature: 850, humidity: 1000, voltage: 500, battery: 100 },
            SensorFrame { wire_id: 7, temperature: -1, humidity: 333, voltage: 299, battery: 50 },
        ];
        for frame in frames {
            let bytes = frame.encode();
            let decoded = SensorFrame::decode(&bytes).expect("decode");
            assert_eq!(decoded.encode()[11], bytes[11]);
        }
    }

    #[test]
    fn wrong_length_is_a_frame_error() {
        for len in [0usize, 1, 4, 11, 13, 24] {
            let data = vec![0u8; len];
            assert_eq!(
                handler().parse_data(&data),
                Err(FrameError::Length { expected: 12, actual: len })
            );
        }
    }

    #[test]
    fn any_single_bit_flip_breaks_checksum() {
        for byte in 0..11 {
            for bit in 0..8 {
                let mut data = SAMPLE_FRAME;
                data[byte] ^= 1 << bit;
                assert!(matches!(
                    handler().parse_data(&data),
                    Err(FrameError::Checksum { .. })
                ));
            }
        }
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let cases = [
            (SensorFrame { wire_id: 1, temperature: 851, humidity: 0, voltage: 0, battery: 0 }, "temperature"),
            (SensorFrame { wire_id: 1, temperature: -401, humidity: 0, voltage: 0, battery: 0 }, "temperature"),
            (SensorFrame { wire_id: 1, temperature: 0, humidity: 1001, voltage: 0, battery: 0 }, "humidity"),
            (SensorFrame { wire_id: 1, temperature: 0, humidity: 0, voltage: 501, battery: 0 }, "voltage"),
            (SensorFrame { wire_id: 1, temperature: 0, humidity: 0, voltage: 0, battery: 101 }, "battery"),
        ];
        for (frame, expected) in cases {
            match handler().parse_data(&frame.encode()) {
                Err(FrameError::OutOfRange { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected out of range for {}: {:?}", expected, other),
            }
        }
    }

    #[test]
    fn wire_id_extracts_from_prefix_of_corrupt_frame() {
        let mut data = SAMPLE_FRAME.to_vec();
        data.truncate(5);
        assert_eq!(handler().extract_wire_id(&data).as_deref(), Ok("00000001"));
        assert_eq!(
            handler().extract_wire_id(&[0, 1]),
            Err(FrameError::TooShort { min: 4, actual: 2 })
        );
    }

    #[test]
    fn stream_splits_into_fixed_frames() {
        let h = handler();
        assert_eq!(h.split_frame(&SAMPLE_FRAME[..11], None), FrameSplit::Incomplete);
        assert_eq!(h.split_frame(&SAMPLE_FRAME, None), FrameSplit::Frame(12));

        let mut two = SAMPLE_FRAME.to_vec();
        two.extend_from_slice(&SAMPLE_FRAME[..5]);
        assert_eq!(h.split_frame(&two, Some("00000001")), FrameSplit::Frame(12));

        // 未绑定时没有对齐标记，按定长切出
        let mut shifted = vec![0xAA, 0xBB];
        shifted.extend_from_slice(&SAMPLE_FRAME);
        assert_eq!(h.split_frame(&shifted, None), FrameSplit::Frame(12));
    }

    #[test]
    fn bound_stream_realigns_on_wire_id() {
        let h = handler();
        let mut shifted = vec![0xAA, 0xBB];
        shifted.extend_from_slice(&SAMPLE_FRAME);
        assert_eq!(h.split_frame(&shifted, Some("00000001")), FrameSplit::Skip(2));
        assert_eq!(h.split_frame(&shifted[2..], Some("00000001")), FrameSplit::Frame(12));

        // 找不到标记时保留末尾 3 字节
        let garbage = [0xEEu8; 14];
        assert_eq!(h.split_frame(&garbage, Some("00000001")), FrameSplit::Skip(11));

        // 帧尾与下一帧开头拼接成的错位数据
        let mut torn = SAMPLE_FRAME[5..].to_vec();
        torn.extend_from_slice(&SAMPLE_FRAME);
        assert_eq!(h.split_frame(&torn, Some("00000001")), FrameSplit::Skip(7));
    }

    #[test]
    fn sleep_command_encodes_minutes() {
        let command = Command::new("00000001", "sleep").with_param("sleep_minutes", 60);
        let bytes = handler().encode_command(&command).expect("encode");
        assert_eq!(bytes, vec![0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x3C, 0x3C]);
        assert_eq!(bytes[7], xor_checksum(&bytes[..7]));
    }

    #[test]
    fn command_defaults_apply() {
        let sleep = handler().encode_command(&Command::new("1", "sleep")).expect("sleep");
        assert_eq!(&sleep[4..7], &[0x01, 0x00, 60]);
        let config = handler().encode_command(&Command::new("1", "config")).expect("config");
        assert_eq!(&config[4..7], &[0x02, 0x01, 0x2C]);
        let query = handler().encode_command(&Command::new("1", "query")).expect("query");
        assert_eq!(&query[4..7], &[0x03, 0x00, 0x00]);
    }

    #[test]
    fn invalid_commands_are_rejected() {
        let h = handler();
        assert_eq!(
            h.encode_command(&Command::new("1", "reboot")),
            Err(EncodeError::UnsupportedAction("reboot".to_string()))
        );
        assert!(matches!(
            h.encode_command(&Command::new("dev-1", "query")),
            Err(EncodeError::InvalidWireId(_))
        ));
        for value in [
            serde_json::json!(-1),
            serde_json::json!(65536),
            serde_json::json!(1.5),
            serde_json::json!("60"),
        ] {
            let command = Command::new("1", "sleep").with_param("sleep_minutes", value);
            assert!(matches!(
                h.encode_command(&command),
                Err(EncodeError::InvalidParameter { .. })
            ));
        }
        let whole_float = Command::new("1", "configure").with_param("report_interval", 30.0);
        assert_eq!(&h.encode_command(&whole_float).expect("encode")[5..7], &[0x00, 30]);
    }
}
