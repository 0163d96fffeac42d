use api_contract::{
    ConnectedDeviceDto, ConnectedDevicesDto, DeviceDisconnectRequest, SendCommandRequest,
};
use serde_json::Value;

#[test]
fn connected_devices_are_camel_case() {
    let response = ConnectedDevicesDto {
        total: 1,
        devices: vec![ConnectedDeviceDto {
            wire_id: "00000001".to_string(),
            device_id: "dev-1".to_string(),
            peer: "127.0.0.1:40000".to_string(),
            connected_at_ms: 1_700_000_000_000,
        }],
    };
    let value = serde_json::to_value(response).expect("serialize");
    let device = &value["devices"][0];
    assert_eq!(device["wireId"], Value::from("00000001"));
    assert!(device.get("connectedAtMs").is_some());
    assert!(device.get("wire_id").is_none());
}

#[test]
fn send_command_request_accepts_both_timeout_spellings() {
    let camel: SendCommandRequest =
        serde_json::from_str(r#"{"action":"sleep","params":{"sleep_minutes":30},"timeoutMs":500}"#)
            .expect("parse");
    assert_eq!(camel.action, "sleep");
    assert_eq!(camel.params.get("sleep_minutes"), Some(&Value::from(30)));
    assert_eq!(camel.timeout_ms, Some(500));

    let snake: SendCommandRequest =
        serde_json::from_str(r#"{"action":"query","timeout_ms":250}"#).expect("parse");
    assert!(snake.params.is_empty());
    assert_eq!(snake.timeout_ms, Some(250));
}

#[test]
fn send_command_request_requires_action() {
    assert!(serde_json::from_str::<SendCommandRequest>(r#"{"params":{}}"#).is_err());
}

#[test]
fn disconnect_request_accepts_snake_case() {
    let req: DeviceDisconnectRequest =
        serde_json::from_str(r#"{"device_id":"dev-9"}"#).expect("parse");
    assert_eq!(req.device_id, "dev-9");
    let req: DeviceDisconnectRequest =
        serde_json::from_str(r#"{"deviceId":"dev-8"}"#).expect("parse");
    assert_eq!(req.device_id, "dev-8");
}
