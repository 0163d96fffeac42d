use async_trait::async_trait;
use domain::{DeviceStatus, ScalarValue};
use gw_platform::{CommandSink, InMemoryPlatform, Platform, PlatformCommand, PlatformError};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingSink {
    commands: Mutex<Vec<PlatformCommand>>,
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn on_command(&self, command: PlatformCommand) {
        self.commands.lock().expect("lock").push(command);
    }
}

#[tokio::test]
async fn fetch_identity_counts_every_call() {
    let platform = InMemoryPlatform::new();
    platform.register_device("00000001", "dev-1");

    let identity = platform.fetch_identity("00000001").await.expect("identity");
    assert_eq!(identity.device_id, "dev-1");
    assert!(matches!(
        platform.fetch_identity("00000009").await,
        Err(PlatformError::NotFound(_))
    ));
    platform.fetch_identity("00000001").await.expect("identity");

    assert_eq!(platform.fetch_count("00000001"), 2);
    assert_eq!(platform.fetch_count("00000009"), 1);
}

#[tokio::test]
async fn publish_failures_are_not_recorded() {
    let platform = InMemoryPlatform::new();
    let mut values = BTreeMap::new();
    values.insert("temperature".to_string(), ScalarValue::F64(25.6));

    platform.publish_telemetry("dev-1", &values).await.expect("publish");
    platform.publish_status("dev-1", DeviceStatus::Online).await.expect("status");
    platform.set_fail_publish(true);
    assert!(platform.publish_status("dev-1", DeviceStatus::Offline).await.is_err());
    assert!(platform.publish_telemetry("dev-1", &values).await.is_err());

    assert_eq!(platform.telemetry().len(), 1);
    assert_eq!(platform.status_count("dev-1", DeviceStatus::Online), 1);
    assert_eq!(platform.status_count("dev-1", DeviceStatus::Offline), 0);
}

#[tokio::test]
async fn delivered_commands_reach_registered_sink() {
    let platform = InMemoryPlatform::new();
    let command = PlatformCommand {
        device_id: "dev-1".to_string(),
        message_id: "m-1".to_string(),
        method: "query".to_string(),
        params: serde_json::Map::new(),
    };
    assert!(!platform.deliver_command(command.clone()).await);

    let sink = Arc::new(RecordingSink::default());
    platform.register_command_sink(sink.clone()).expect("register");
    assert!(platform.deliver_command(command.clone()).await);
    assert_eq!(*sink.commands.lock().expect("lock"), vec![command]);
}

#[tokio::test]
async fn heartbeat_can_fail() {
    let platform = InMemoryPlatform::new();
    platform.send_heartbeat("svc").await.expect("heartbeat");
    platform.set_fail_heartbeat(true);
    assert!(platform.send_heartbeat("svc").await.is_err());
    assert_eq!(platform.heartbeats(), vec!["svc".to_string()]);
}
