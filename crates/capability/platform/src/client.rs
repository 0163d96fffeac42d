//! HTTP + MQTT 平台客户端。

use crate::command::{CommandListenerConfig, spawn_command_listener};
use crate::{CommandSink, Platform, PlatformError};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use domain::{DeviceIdentity, DeviceStatus, ScalarValue};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const TELEMETRY_TOPIC: &str = "devices/telemetry";
const IDENTITY_PATH: &str = "/api/v1/plugin/device/config";
const HEARTBEAT_PATH: &str = "/api/v1/plugin/heartbeat";
const SUCCESS_CODE: i64 = 200;

/// 平台客户端配置。
#[derive(Debug, Clone)]
pub struct PlatformClientConfig {
    pub base_url: String,
    pub service_identifier: String,
    pub http_timeout: Duration,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct IdentityRequest<'a> {
    device_number: &'a str,
}

#[derive(Debug, Serialize)]
struct HeartbeatRequest<'a> {
    service_identifier: &'a str,
}

#[derive(Debug, Serialize)]
struct TelemetryPayload<'a> {
    device_id: &'a str,
    values: String,
}

/// 平台客户端：HTTP 查询身份/上报心跳，MQTT 上报遥测/状态并订阅指令。
pub struct PlatformClient {
    http: reqwest::Client,
    mqtt: AsyncClient,
    config: PlatformClientConfig,
    listener: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PlatformClient {
    /// 建立客户端，返回 MQTT 事件循环任务句柄。
    pub fn connect(
        config: PlatformClientConfig,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), PlatformError> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|err| PlatformError::Request(err.to_string()))?;

        let client_id = format!("gw-publish-{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, config.mqtt_host.clone(), config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) =
            (config.mqtt_username.clone(), config.mqtt_password.clone())
        {
            options.set_credentials(username, password);
        }
        let (mqtt, mut eventloop) = AsyncClient::new(options, 64);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!(target: "gw.platform", error = %err, "publish_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });

        Ok((
            Self {
                http,
                mqtt,
                config,
                listener: Mutex::new(None),
            },
            handle,
        ))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value, PlatformError> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|err| PlatformError::Request(err.to_string()))?;
        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|err| PlatformError::Payload(err.to_string()))?;
        unwrap_envelope(envelope)
    }

    async fn publish(&self, topic: String, payload: Vec<u8>) -> Result<(), PlatformError> {
        self.mqtt
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|err| PlatformError::Publish(err.to_string()))
    }
}

#[async_trait]
impl Platform for PlatformClient {
    async fn fetch_identity(&self, wire_id: &str) -> Result<DeviceIdentity, PlatformError> {
        let data = self
            .post(IDENTITY_PATH, &IdentityRequest {
                device_number: wire_id,
            })
            .await?;
        let identity = identity_from_data(wire_id, data)?;
        debug!(
            target: "gw.platform",
            wire_id = %wire_id,
            device_id = %identity.device_id,
            "identity_fetched"
        );
        Ok(identity)
    }

    async fn publish_telemetry(
        &self,
        device_id: &str,
        values: &BTreeMap<String, ScalarValue>,
    ) -> Result<(), PlatformError> {
        let payload = telemetry_payload(device_id, values)?;
        self.publish(TELEMETRY_TOPIC.to_string(), payload).await
    }

    async fn publish_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
    ) -> Result<(), PlatformError> {
        let topic = format!("devices/status/{}", device_id);
        self.publish(topic, status.code().to_string().into_bytes())
            .await
    }

    async fn send_heartbeat(&self, service_id: &str) -> Result<(), PlatformError> {
        self.post(HEARTBEAT_PATH, &HeartbeatRequest {
            service_identifier: service_id,
        })
        .await?;
        Ok(())
    }

    fn register_command_sink(&self, sink: Arc<dyn CommandSink>) -> Result<(), PlatformError> {
        let config = CommandListenerConfig {
            host: self.config.mqtt_host.clone(),
            port: self.config.mqtt_port,
            username: self.config.mqtt_username.clone(),
            password: self.config.mqtt_password.clone(),
            service_identifier: self.config.service_identifier.clone(),
        };
        let mut listener = self
            .listener
            .lock()
            .map_err(|_| PlatformError::Unavailable("lock failed".to_string()))?;
        if let Some(previous) = listener.take() {
            previous.abort();
        }
        *listener = Some(spawn_command_listener(config, sink));
        info!(
            target: "gw.platform",
            service_identifier = %self.config.service_identifier,
            "command_sink_registered"
        );
        Ok(())
    }
}

impl Drop for PlatformClient {
    fn drop(&mut self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
    }
}

fn unwrap_envelope(envelope: ApiEnvelope) -> Result<serde_json::Value, PlatformError> {
    if envelope.code != SUCCESS_CODE {
        return Err(PlatformError::Rejected {
            code: envelope.code,
            message: envelope.message,
        });
    }
    Ok(envelope.data)
}

fn identity_from_data(wire_id: &str, data: serde_json::Value) -> Result<DeviceIdentity, PlatformError> {
    let device_id = match data.get("id") {
        Some(serde_json::Value::String(id)) => id.trim().to_string(),
        Some(serde_json::Value::Number(id)) => id.to_string(),
        _ => String::new(),
    };
    if device_id.is_empty() {
        return Err(PlatformError::NotFound(wire_id.to_string()));
    }
    let name = data
        .get("name")
        .and_then(|value| value.as_str())
        .map(str::to_string);
    Ok(DeviceIdentity {
        device_id,
        wire_id: wire_id.to_string(),
        name,
        record: data,
    })
}

fn telemetry_payload(
    device_id: &str,
    values: &BTreeMap<String, ScalarValue>,
) -> Result<Vec<u8>, PlatformError> {
    let encoded = serde_json::to_vec(values).map_err(|err| PlatformError::Payload(err.to_string()))?;
    let payload = TelemetryPayload {
        device_id,
        values: STANDARD.encode(encoded),
    };
    serde_json::to_vec(&payload).map_err(|err| PlatformError::Payload(err.to_string()))
}
