use domain::{Command, DeviceStatus, Message, MessageKind, ScalarValue};
use std::time::Duration;

#[test]
fn message_resolution_requires_both_ids() {
    let mut message = Message::new("00000001", MessageKind::Data).with_value("battery", 85u8);
    assert!(!message.is_resolved());

    message.device_id = "dev-1".to_string();
    assert!(message.is_resolved());
    assert_eq!(message.value("battery"), Some(&ScalarValue::I64(85)));
}

#[test]
fn scalar_values_serialize_untagged() {
    let message = Message::new("1", MessageKind::Data)
        .with_value("temperature", 25.6)
        .with_value("online", true);
    let json = serde_json::to_value(&message.values).expect("serialize");
    assert_eq!(json, serde_json::json!({ "online": true, "temperature": 25.6 }));
}

#[test]
fn command_deserializes_timeout_ms() {
    let json = r#"{
        "wire_id": "1",
        "device_id": "dev-1",
        "command_id": "c-1",
        "action": "sleep",
        "params": { "sleep_minutes": 60 },
        "timeout": 1500
    }"#;
    let command: Command = serde_json::from_str(json).expect("command");
    assert_eq!(command.timeout, Duration::from_millis(1500));
    assert_eq!(command.param("sleep_minutes"), Some(&serde_json::json!(60)));
}

#[test]
fn device_status_codes() {
    assert_eq!(DeviceStatus::Online.code(), 1);
    assert_eq!(DeviceStatus::Offline.code(), 0);
}
