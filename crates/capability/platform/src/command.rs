//! 平台指令订阅。
//!
//! Topic：`plugin/{service_identifier}/devices/command/{device_id}/{message_id}`
//! Payload：`{"method": "...", "params": {...}}`

use crate::CommandSink;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 平台下发的一条指令。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformCommand {
    pub device_id: String,
    pub message_id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct CommandPayload {
    #[serde(alias = "action")]
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

pub(crate) fn command_topic_filter(service_identifier: &str) -> String {
    format!("plugin/{}/devices/command/+/+", service_identifier)
}

pub(crate) fn extract_command_scope(service_identifier: &str, topic: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = topic.trim_matches('/').split('/').collect();
    if parts.len() != 6 {
        return None;
    }
    if parts[0] != "plugin" || parts[1] != service_identifier {
        return None;
    }
    if parts[2] != "devices" || parts[3] != "command" {
        return None;
    }
    if parts[4].is_empty() || parts[5].is_empty() {
        return None;
    }
    Some((parts[4].to_string(), parts[5].to_string()))
}

pub(crate) fn parse_command(
    device_id: String,
    message_id: String,
    payload: &[u8],
) -> Result<PlatformCommand, String> {
    let payload: CommandPayload = serde_json::from_slice(payload).map_err(|err| err.to_string())?;
    if payload.method.trim().is_empty() {
        return Err("missing method".to_string());
    }
    let params = match payload.params {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Null => serde_json::Map::new(),
        other => return Err(format!("params must be an object, got {}", other)),
    };
    Ok(PlatformCommand {
        device_id,
        message_id,
        method: payload.method,
        params,
    })
}

/// MQTT 指令监听配置。
#[derive(Debug, Clone)]
pub struct CommandListenerConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub service_identifier: String,
}

/// broker 未保留会话时需要重新订阅
pub(crate) fn needs_subscribe(event: &Event) -> bool {
    matches!(event, Event::Incoming(Packet::ConnAck(ack)) if !ack.session_present)
}

/// 订阅平台指令 topic，并把解析后的指令交给 `sink`。格式错误的消息记录后跳过。
///
/// 每次连上 broker 且会话未保留时重新订阅，断线重连后仍能收到指令。
pub fn spawn_command_listener(
    config: CommandListenerConfig,
    sink: Arc<dyn CommandSink>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let client_id = format!("gw-command-{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (config.username, config.password) {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let topic = command_topic_filter(&config.service_identifier);
        info!(target: "gw.platform", topic = %topic, "command_listener_started");

        loop {
            match eventloop.poll().await {
                Ok(event) if needs_subscribe(&event) => {
                    // 事件循环所在任务不能等待请求队列
                    match client.try_subscribe(topic.clone(), QoS::AtLeastOnce) {
                        Ok(()) => info!(target: "gw.platform", topic = %topic, "command_subscribed"),
                        Err(err) => {
                            warn!(target: "gw.platform", error = %err, "command_subscribe_failed")
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let Some((device_id, message_id)) =
                        extract_command_scope(&config.service_identifier, &publish.topic)
                    else {
                        warn!(target: "gw.platform", topic = %publish.topic, "command_topic_skipped");
                        continue;
                    };
                    let command = match parse_command(device_id, message_id, &publish.payload) {
                        Ok(command) => command,
                        Err(err) => {
                            warn!(
                                target: "gw.platform",
                                topic = %publish.topic,
                                error = %err,
                                "command_payload_invalid"
                            );
                            continue;
                        }
                    };
                    info!(
                        target: "gw.platform",
                        device_id = %command.device_id,
                        message_id = %command.message_id,
                        method = %command.method,
                        "command_received"
                    );
                    sink.on_command(command).await;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(target: "gw.platform", error = %err, "command_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rumqttc::{ConnAck, ConnectReturnCode};

    #[test]
    fn subscribe_follows_every_fresh_session() {
        let fresh = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
        }));
        assert!(needs_subscribe(&fresh));

        let resumed = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: true,
            code: ConnectReturnCode::Success,
        }));
        assert!(!needs_subscribe(&resumed));
        assert!(!needs_subscribe(&Event::Incoming(Packet::PingResp)));
    }

    #[test]
    fn command_topic_scope_requires_six_segments() {
        let scope = extract_command_scope("svc", "plugin/svc/devices/command/dev-1/msg-9");
        assert_eq!(scope, Some(("dev-1".to_string(), "msg-9".to_string())));
        assert!(extract_command_scope("svc", "plugin/svc/devices/command/dev-1").is_none());
        assert!(extract_command_scope("svc", "plugin/other/devices/command/dev-1/m").is_none());
        assert!(extract_command_scope("svc", "plugin/svc/devices/command/dev-1/m/x").is_none());
    }

    #[test]
    fn command_payload_parses_method_and_params() {
        let payload = br#"{"method":"sleep","params":{"sleep_minutes":30}}"#;
        let command = parse_command("dev-1".into(), "m-1".into(), payload).expect("command");
        assert_eq!(command.method, "sleep");
        assert_eq!(command.params.get("sleep_minutes"), Some(&serde_json::json!(30)));
    }

    #[test]
    fn command_payload_without_params_is_empty_map() {
        let command = parse_command("d".into(), "m".into(), br#"{"method":"query"}"#).expect("command");
        assert!(command.params.is_empty());
    }

    #[test]
    fn command_payload_rejects_non_object_params() {
        assert!(parse_command("d".into(), "m".into(), br#"{"method":"q","params":[1]}"#).is_err());
        assert!(parse_command("d".into(), "m".into(), br#"{"method":" "}"#).is_err());
        assert!(parse_command("d".into(), "m".into(), b"not json").is_err());
    }
}
