//! 网关协议（有状态参考实现）。
//!
//! 连接建立后第一帧必须是握手：
//!
//! ```text
//! 请求  [设备编号 u32][0xA0][保留 3B]
//! 应答  [设备编号 u32][0x01 接受 | 0x00 拒绝][0x00 0x00 0x00]
//! ```
//!
//! 握手后每帧为 `[设备编号 u32][类型 u8][负载]`：
//!
//! | 类型 | 长度 | 负载 |
//! |---|---|---|
//! | 0x01 心跳 | 5 | 无，应答 `[id][0x81][0x00]` |
//! | 0x02 数据 | 9 | `[温度 i16 0.1°C][湿度 u16 0.1%]` |
//! | 0x03 状态 | 6 | `[状态码 u8]` |
//!
//! 字节流按类型字节对应的长度切帧；未知类型把已收到的数据整体作为一帧丢弃。
//!
//! 超过心跳超时未收到心跳时，会话被取消，由引擎完成下线。

use crate::context::ConnectionContext;
use crate::error::{EncodeError, EngineError, FrameError};
use crate::handler::{FrameSplit, ProtocolHandler, SessionHandler};
use crate::sensor::{parse_wire_id, read_wire_id, u16_param};
use async_trait::async_trait;
use domain::{Command, Message, MessageKind, ProtocolDescriptor};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const HANDSHAKE_LEN: usize = 8;
const HANDSHAKE_MARKER: u8 = 0xA0;
const HANDSHAKE_ACCEPTED: u8 = 0x01;
const HANDSHAKE_REJECTED: u8 = 0x00;

const TYPE_HEARTBEAT: u8 = 0x01;
const TYPE_DATA: u8 = 0x02;
const TYPE_STATUS: u8 = 0x03;
const HEARTBEAT_ACK: u8 = 0x81;

const HEARTBEAT_FRAME_LEN: usize = 5;
const DATA_FRAME_LEN: usize = 9;
const STATUS_FRAME_LEN: usize = 6;

const CMD_HEARTBEAT: u8 = 0x01;
const CMD_CONFIG: u8 = 0x10;
const CMD_QUERY: u8 = 0x11;

const DEFAULT_REPORT_INTERVAL: u16 = 300;
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// 握手请求中的设备编号；不合法时返回错误。
pub fn decode_handshake(data: &[u8]) -> Result<String, FrameError> {
    if data.len() < HANDSHAKE_LEN {
        return Err(FrameError::TooShort {
            min: HANDSHAKE_LEN,
            actual: data.len(),
        });
    }
    if data[4] != HANDSHAKE_MARKER {
        return Err(FrameError::Handshake("missing handshake marker"));
    }
    read_wire_id(data)
}

fn split_handshake(buf: &[u8]) -> FrameSplit {
    if buf.len() < HANDSHAKE_LEN {
        FrameSplit::Incomplete
    } else {
        FrameSplit::Frame(HANDSHAKE_LEN)
    }
}

fn split_gateway_frame(buf: &[u8]) -> FrameSplit {
    if buf.len() < HEARTBEAT_FRAME_LEN {
        return FrameSplit::Incomplete;
    }
    let len = match buf[4] {
        TYPE_HEARTBEAT => HEARTBEAT_FRAME_LEN,
        TYPE_DATA => DATA_FRAME_LEN,
        TYPE_STATUS => STATUS_FRAME_LEN,
        _ => buf.len(),
    };
    if buf.len() < len {
        FrameSplit::Incomplete
    } else {
        FrameSplit::Frame(len)
    }
}

fn handshake_reply(id: &[u8], accepted: bool) -> Vec<u8> {
    let mut reply = id.to_vec();
    reply.push(if accepted {
        HANDSHAKE_ACCEPTED
    } else {
        HANDSHAKE_REJECTED
    });
    reply.extend_from_slice(&[0x00, 0x00, 0x00]);
    reply
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayPayload {
    Heartbeat,
    /// 温度 0.1°C，湿度 0.1%
    Data { temperature: i16, humidity: u16 },
    Status { code: u8 },
}

/// 握手之后的一帧。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayFrame {
    pub wire_id: u32,
    pub payload: GatewayPayload,
}

impl GatewayFrame {
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < HEARTBEAT_FRAME_LEN {
            return Err(FrameError::TooShort {
                min: HEARTBEAT_FRAME_LEN,
                actual: data.len(),
            });
        }
        let wire_id = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let expect_len = |expected: usize| {
            if data.len() == expected {
                Ok(())
            } else {
                Err(FrameError::Length {
                    expected,
                    actual: data.len(),
                })
            }
        };

        let payload = match data[4] {
            TYPE_HEARTBEAT => {
                expect_len(HEARTBEAT_FRAME_LEN)?;
                GatewayPayload::Heartbeat
            }
            TYPE_DATA => {
                expect_len(DATA_FRAME_LEN)?;
                let temperature = i16::from_be_bytes([data[5], data[6]]);
                let humidity = u16::from_be_bytes([data[7], data[8]]);
                if !(-400..=850).contains(&temperature) {
                    return Err(FrameError::OutOfRange {
                        field: "temperature",
                        value: f64::from(temperature) / 10.0,
                    });
                }
                if humidity > 1000 {
                    return Err(FrameError::OutOfRange {
                        field: "humidity",
                        value: f64::from(humidity) / 10.0,
                    });
                }
                GatewayPayload::Data {
                    temperature,
                    humidity,
                }
            }
            TYPE_STATUS => {
                expect_len(STATUS_FRAME_LEN)?;
                GatewayPayload::Status { code: data[5] }
            }
            other => return Err(FrameError::UnknownMessageType(other)),
        };
        Ok(Self { wire_id, payload })
    }

    pub fn wire_id_string(&self) -> String {
        format!("{:08}", self.wire_id)
    }

    pub fn to_message(&self) -> Message {
        let wire_id = self.wire_id_string();
        match self.payload {
            GatewayPayload::Heartbeat => {
                Message::new(wire_id, MessageKind::Heartbeat).with_value("heartbeat", 1i64)
            }
            GatewayPayload::Data {
                temperature,
                humidity,
            } => Message::new(wire_id, MessageKind::Data)
                .with_value("temperature", f64::from(temperature) / 10.0)
                .with_value("humidity", f64::from(humidity) / 10.0),
            GatewayPayload::Status { code } => {
                Message::new(wire_id, MessageKind::Status).with_value("status_code", code)
            }
        }
    }
}

/// 最近一次心跳时间。
struct HeartbeatClock {
    last: Mutex<Instant>,
}

impl HeartbeatClock {
    fn new() -> Self {
        Self {
            last: Mutex::new(Instant::now()),
        }
    }

    fn beat(&self) {
        *self.lock() = Instant::now();
    }

    fn last(&self) -> Instant {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, Instant> {
        self.last
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn spawn_heartbeat_monitor(
    wire_id: String,
    clock: Arc<HeartbeatClock>,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let deadline = clock.last() + timeout;
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
            if clock.last().elapsed() >= timeout {
                warn!(
                    target: "gw.engine",
                    wire_id = %wire_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "session_heartbeat_timeout"
                );
                cancel.cancel();
                return;
            }
        }
    })
}

/// 网关协议处理器。
pub struct GatewayProtocolHandler {
    descriptor: ProtocolDescriptor,
    heartbeat_timeout: Duration,
    sessions: Mutex<HashMap<u64, CancellationToken>>,
}

impl GatewayProtocolHandler {
    pub fn new(port: u16) -> Self {
        Self {
            descriptor: ProtocolDescriptor::new("GatewayProtocol", "1.0.0", port),
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// 处于握手或已握手状态的会话数。
    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, CancellationToken>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_session(&self, ctx: &mut ConnectionContext) -> Result<(), EngineError> {
        let idle_timeout = ctx.idle_timeout();
        let Some(data) = ctx
            .next_frame(|buf, _| split_handshake(buf), idle_timeout)
            .await?
        else {
            return Ok(());
        };
        ctx.record_received(&data);

        let wire_id = match decode_handshake(&data) {
            Ok(wire_id) => wire_id,
            Err(err) => {
                if data.len() >= 4 {
                    reject(ctx, &data[..4]).await;
                }
                ctx.report_extract_failure(&err, &data);
                return Err(EngineError::Handler(err.to_string()));
            }
        };
        if let Err(err) = ctx.bind_device(&wire_id).await {
            reject(ctx, &data[..4]).await;
            return Err(err);
        }
        ctx.write(&handshake_reply(&data[..4], true)).await?;
        debug!(target: "gw.engine", wire_id = %wire_id, peer = %ctx.peer(), "handshake_accepted");

        let clock = Arc::new(HeartbeatClock::new());
        let monitor = spawn_heartbeat_monitor(
            wire_id.clone(),
            clock.clone(),
            self.heartbeat_timeout,
            ctx.cancellation(),
        );
        let result = frame_loop(ctx, &wire_id, &clock).await;
        monitor.abort();
        result
    }
}

async fn reject(ctx: &ConnectionContext, id: &[u8]) {
    if let Err(err) = ctx.write(&handshake_reply(id, false)).await {
        debug!(target: "gw.engine", peer = %ctx.peer(), error = %err, "handshake_reject_failed");
    }
}

async fn frame_loop(
    ctx: &mut ConnectionContext,
    wire_id: &str,
    clock: &HeartbeatClock,
) -> Result<(), EngineError> {
    let idle_timeout = ctx.idle_timeout();
    loop {
        let Some(data) = ctx
            .next_frame(|buf, _| split_gateway_frame(buf), idle_timeout)
            .await?
        else {
            return Ok(());
        };
        ctx.record_received(&data);

        let frame = match GatewayFrame::decode(&data) {
            Ok(frame) => frame,
            Err(err) => {
                ctx.report_frame_error(&err, &data);
                continue;
            }
        };
        let frame_wire_id = frame.wire_id_string();
        if frame_wire_id != wire_id {
            let err = FrameError::WireIdMismatch {
                expected: wire_id.to_string(),
                actual: frame_wire_id,
            };
            ctx.report_frame_error(&err, &data);
            continue;
        }

        if frame.payload == GatewayPayload::Heartbeat {
            clock.beat();
            let mut ack = data[..4].to_vec();
            ack.extend_from_slice(&[HEARTBEAT_ACK, 0x00]);
            ctx.write(&ack).await?;
        }
        ctx.forward(frame.to_message()).await;
    }
}

impl ProtocolHandler for GatewayProtocolHandler {
    fn descriptor(&self) -> &ProtocolDescriptor {
        &self.descriptor
    }

    fn split_frame(&self, buf: &[u8], _bound_wire_id: Option<&str>) -> FrameSplit {
        split_gateway_frame(buf)
    }

    fn extract_wire_id(&self, data: &[u8]) -> Result<String, FrameError> {
        read_wire_id(data)
    }

    fn parse_data(&self, data: &[u8]) -> Result<Message, FrameError> {
        GatewayFrame::decode(data).map(|frame| frame.to_message())
    }

    fn encode_command(&self, command: &Command) -> Result<Vec<u8>, EncodeError> {
        let wire_id = parse_wire_id(&command.wire_id)?;
        let mut frame = wire_id.to_be_bytes().to_vec();
        match command.action.as_str() {
            "heartbeat" => frame.extend_from_slice(&[CMD_HEARTBEAT, 0x00]),
            "config" => {
                let interval =
                    u16_param(&command.params, "report_interval", DEFAULT_REPORT_INTERVAL)?;
                frame.push(CMD_CONFIG);
                frame.extend_from_slice(&interval.to_be_bytes());
            }
            "query" => frame.extend_from_slice(&[CMD_QUERY, 0x00]),
            other => return Err(EncodeError::UnsupportedAction(other.to_string())),
        }
        Ok(frame)
    }

    fn start(&self) -> Result<(), EngineError> {
        info!(
            target: "gw.engine",
            protocol = %self.descriptor.name,
            heartbeat_timeout_ms = self.heartbeat_timeout.as_millis() as u64,
            "gateway_handler_started"
        );
        Ok(())
    }

    /// 取消所有会话。
    fn stop(&self) -> Result<(), EngineError> {
        let sessions: Vec<CancellationToken> = self.sessions().drain().map(|(_, token)| token).collect();
        for token in &sessions {
            token.cancel();
        }
        info!(
            target: "gw.engine",
            protocol = %self.descriptor.name,
            cancelled = sessions.len(),
            "gateway_handler_stopped"
        );
        Ok(())
    }
}

#[async_trait]
impl SessionHandler for GatewayProtocolHandler {
    async fn handle_connection(&self, ctx: &mut ConnectionContext) -> Result<(), EngineError> {
        let conn_id = ctx.session().conn_id();
        self.sessions().insert(conn_id, ctx.cancellation());
        let result = self.run_session(ctx).await;
        self.sessions().remove(&conn_id);
        result
    }

    async fn on_connection_established(&self, peer: &str) -> Result<(), EngineError> {
        debug!(target: "gw.engine", peer = %peer, "gateway_session_opened");
        Ok(())
    }

    async fn on_connection_closed(&self, peer: &str) -> Result<(), EngineError> {
        debug!(target: "gw.engine", peer = %peer, "gateway_session_closed");
        Ok(())
    }
}
