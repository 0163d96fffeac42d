//! 连接上下文：引擎交给帧循环与有状态协议处理器的连接句柄。
//!
//! 读（带空闲超时与取消）、写（带写超时）、身份绑定、上行转发都经由这里，
//! 保证两种处理器形态的审计日志、计数与上下线通知一致。
//!
//! 收到的字节先进入接收缓冲区，再按处理器给出的帧边界切分，
//! 因此 TCP 合并或拆分的报文都能按到达顺序还原成帧。

use crate::error::{EngineError, FrameError};
use crate::handler::FrameSplit;
use crate::registry::SharedWriter;
use crate::session::Session;
use crate::tcp_server::{EngineShared, write_frame};
use crate::types::{CloseReason, ConnectionState};
use domain::{DeviceIdentity, DeviceStatus, Message};
use gw_telemetry::{AuditEvent, UNKNOWN_DEVICE};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// 接收缓冲区上限；超过仍切不出帧时整体丢弃。
const MAX_PENDING_BYTES: usize = 64 * 1024;

pub struct ConnectionContext {
    engine: Arc<EngineShared>,
    session: Session,
    reader: BoxedReader,
    writer: SharedWriter,
    buffer: Vec<u8>,
    pending: Vec<u8>,
    close_reason: Option<CloseReason>,
}

impl ConnectionContext {
    pub(crate) fn new(
        engine: Arc<EngineShared>,
        session: Session,
        reader: BoxedReader,
        writer: SharedWriter,
    ) -> Self {
        let buffer = vec![0u8; engine.config.read_buffer_size.max(1)];
        Self {
            engine,
            session,
            reader,
            writer,
            buffer,
            pending: Vec::new(),
            close_reason: None,
        }
    }

    pub fn peer(&self) -> &str {
        self.session.peer()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub(crate) fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub(crate) fn writer(&self) -> &SharedWriter {
        &self.writer
    }

    /// 引擎配置的读空闲超时。
    pub fn idle_timeout(&self) -> Duration {
        self.engine.config.idle_timeout
    }

    /// 会话取消令牌；取消后 `next_frame` 立即返回 `None`。
    pub fn cancellation(&self) -> CancellationToken {
        self.session.cancellation()
    }

    pub(crate) fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// 读取下一帧。
    ///
    /// `split` 在接收缓冲区上决定帧边界，第二个参数为已绑定的设备编号：
    /// - `Ok(Some(frame))`：切出一帧，按到达顺序返回
    /// - `Ok(None)`：对端关闭或会话被取消，缓冲区中不足一帧的残余字节丢弃
    /// - `Err(Io)`：读错误；超过 `timeout` 未收到数据按网络错误（`TimedOut`）处理
    ///
    /// 无法对齐的字节按报文错误记录后丢弃，连接保持。
    pub async fn next_frame<F>(
        &mut self,
        split: F,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, EngineError>
    where
        F: Fn(&[u8], Option<&str>) -> FrameSplit + Send,
    {
        loop {
            if !self.pending.is_empty() {
                let available = self.pending.len();
                match split(&self.pending, self.session.wire_id()) {
                    FrameSplit::Frame(len) if (1..=available).contains(&len) => {
                        gw_telemetry::record_frame_received();
                        return Ok(Some(self.pending.drain(..len).collect()));
                    }
                    FrameSplit::Skip(len) if len > 0 => {
                        let skipped: Vec<u8> = self.pending.drain(..len.min(available)).collect();
                        self.report_unaligned(&skipped);
                        continue;
                    }
                    _ if available >= MAX_PENDING_BYTES => {
                        let skipped = std::mem::take(&mut self.pending);
                        self.report_unaligned(&skipped);
                    }
                    _ => {}
                }
            }

            match self.read_chunk(timeout).await? {
                Some(chunk) => self.pending.extend_from_slice(&chunk),
                None => {
                    if !self.pending.is_empty() {
                        debug!(
                            target: "gw.engine",
                            conn_id = self.session.conn_id(),
                            peer = %self.peer(),
                            bytes = self.pending.len(),
                            "partial_frame_discarded"
                        );
                        self.pending.clear();
                    }
                    return Ok(None);
                }
            }
        }
    }

    async fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>, EngineError> {
        let cancel = self.session.cancellation();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            read = tokio::time::timeout(timeout, self.reader.read(&mut self.buffer)) => Some(read),
        };
        match outcome {
            None => {
                self.close_reason = Some(CloseReason::Cancelled);
                Ok(None)
            }
            Some(Err(_)) => {
                self.close_reason = Some(CloseReason::IdleTimeout);
                Err(EngineError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("no data for {:?}", timeout),
                )))
            }
            Some(Ok(Ok(0))) => {
                self.close_reason = Some(CloseReason::Eof);
                Ok(None)
            }
            Some(Ok(Ok(n))) => {
                self.session.touch();
                if self.session.state() == ConnectionState::Accepted {
                    self.session.transition(ConnectionState::IdentityPending);
                }
                Ok(Some(self.buffer[..n].to_vec()))
            }
            Some(Ok(Err(err))) => {
                self.close_reason = Some(CloseReason::ReadError);
                Err(EngineError::Io(err))
            }
        }
    }

    /// 向设备写入一帧（协议应答）。
    pub async fn write(&self, data: &[u8]) -> Result<(), EngineError> {
        write_frame(&self.writer, data, self.engine.config.write_timeout).await?;
        self.engine.audit.record(
            self.audit_key(),
            AuditEvent::frame_sent(self.peer(), "reply", data),
        );
        Ok(())
    }

    /// 解析设备身份并绑定到本连接：登记指令路由、发送上线通知。
    ///
    /// 解析失败时连接应被关闭。
    pub async fn bind_device(&mut self, wire_id: &str) -> Result<DeviceIdentity, EngineError> {
        if let Some(identity) = self.session.identity() {
            if identity.wire_id == wire_id {
                return Ok(identity.clone());
            }
            return Err(EngineError::Handler(format!(
                "connection already bound to {}",
                identity.wire_id
            )));
        }
        self.session.transition(ConnectionState::IdentityPending);

        let identity = match self.engine.directory.resolve(wire_id).await {
            Ok(identity) => identity,
            Err(err) => {
                warn!(
                    target: "gw.engine",
                    conn_id = self.session.conn_id(),
                    peer = %self.peer(),
                    wire_id = %wire_id,
                    error = %err,
                    "identity_resolution_failed"
                );
                gw_telemetry::record_identity_failure();
                // 未通过身份解析的编号不单独建日志
                self.engine.audit.record(UNKNOWN_DEVICE, AuditEvent::IdentityFailed {
                    wire_id: wire_id.to_string(),
                    error: err.to_string(),
                });
                self.close_reason = Some(CloseReason::IdentityFailed);
                return Err(err.into());
            }
        };

        self.session.bind(identity.clone());
        self.engine.registry.insert(
            self.session.conn_id(),
            &identity.wire_id,
            &identity.device_id,
            self.session.peer(),
            self.writer.clone(),
        );
        info!(
            target: "gw.engine",
            conn_id = self.session.conn_id(),
            peer = %self.peer(),
            wire_id = %identity.wire_id,
            device_id = %identity.device_id,
            "connection_established"
        );
        self.engine
            .audit
            .record(&identity.wire_id, AuditEvent::ConnectionEstablished {
                peer: self.peer().to_string(),
                device_id: identity.device_id.clone(),
                protocol: self.engine.descriptor().name.clone(),
            });
        self.engine
            .notify_status(&identity, DeviceStatus::Online)
            .await;
        Ok(identity)
    }

    /// 把消息转发到上游。缺失的设备编号/平台 ID 由会话补齐；空值集合不上报。
    ///
    /// 返回是否已成功上报。
    pub async fn forward(&self, mut message: Message) -> bool {
        let Some(identity) = self.session.identity() else {
            warn!(
                target: "gw.engine",
                conn_id = self.session.conn_id(),
                peer = %self.peer(),
                "message_before_identity"
            );
            return false;
        };
        if message.wire_id.is_empty() {
            message.wire_id = identity.wire_id.clone();
        }
        if message.device_id.is_empty() {
            message.device_id = identity.device_id.clone();
        }
        if message.values.is_empty() {
            debug!(
                target: "gw.engine",
                wire_id = %message.wire_id,
                kind = message.kind.as_str(),
                "message_empty_skipped"
            );
            return false;
        }

        match self
            .engine
            .platform
            .publish_telemetry(&message.device_id, &message.values)
            .await
        {
            Ok(()) => {
                gw_telemetry::record_telemetry(true);
                self.engine
                    .audit
                    .record(&identity.wire_id, AuditEvent::TelemetrySent {
                        device_id: message.device_id.clone(),
                        kind: message.kind.as_str().to_string(),
                        fields: message.values.len(),
                    });
                true
            }
            Err(err) => {
                gw_telemetry::record_telemetry(false);
                warn!(
                    target: "gw.engine",
                    wire_id = %identity.wire_id,
                    device_id = %message.device_id,
                    error = %err,
                    "telemetry_publish_failed"
                );
                self.engine
                    .audit
                    .record(&identity.wire_id, AuditEvent::TelemetrySendFailed {
                        device_id: message.device_id.clone(),
                        kind: message.kind.as_str().to_string(),
                        error: err.to_string(),
                    });
                false
            }
        }
    }

    /// 记录收到的原始帧。
    pub fn record_received(&self, data: &[u8]) {
        self.engine
            .audit
            .record(self.audit_key(), AuditEvent::frame_received(self.peer(), data));
    }

    /// 记录一个被丢弃的帧；连接继续。
    pub fn report_frame_error(&self, error: &FrameError, data: &[u8]) {
        gw_telemetry::record_frame_dropped();
        debug!(
            target: "gw.engine",
            conn_id = self.session.conn_id(),
            wire_id = %self.audit_key(),
            error = %error,
            "frame_parse_failed"
        );
        self.engine
            .audit
            .record(self.audit_key(), AuditEvent::parse_failed(error, data));
    }

    pub(crate) fn report_extract_failure(&self, error: &FrameError, data: &[u8]) {
        gw_telemetry::record_frame_dropped();
        debug!(
            target: "gw.engine",
            conn_id = self.session.conn_id(),
            peer = %self.peer(),
            error = %error,
            "wire_id_extract_failed"
        );
        self.engine.audit.record(
            UNKNOWN_DEVICE,
            AuditEvent::extract_failed(self.peer(), error, data),
        );
    }

    fn report_unaligned(&self, data: &[u8]) {
        let err = FrameError::Unaligned {
            skipped: data.len(),
        };
        if self.session.identity().is_some() {
            self.report_frame_error(&err, data);
        } else {
            self.report_extract_failure(&err, data);
        }
    }

    pub(crate) fn report_connection_error(&self, error: &EngineError) {
        if self.close_reason == Some(CloseReason::IdleTimeout) {
            info!(
                target: "gw.engine",
                conn_id = self.session.conn_id(),
                peer = %self.peer(),
                wire_id = %self.audit_key(),
                "connection_idle_timeout"
            );
        } else {
            warn!(
                target: "gw.engine",
                conn_id = self.session.conn_id(),
                peer = %self.peer(),
                error = %error,
                "connection_error"
            );
        }
        if self.session.wire_id().is_some() {
            self.engine
                .audit
                .record(self.audit_key(), AuditEvent::ConnectionError {
                    peer: self.peer().to_string(),
                    error: error.to_string(),
                });
        }
    }

    fn audit_key(&self) -> &str {
        self.session.wire_id().unwrap_or(UNKNOWN_DEVICE)
    }
}
