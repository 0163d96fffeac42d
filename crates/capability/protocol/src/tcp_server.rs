//! TCP 连接引擎
//!
//! 监听端口，为每个连接启动一个任务，按协议处理器形态驱动连接状态机：
//!
//! ```text
//! Accepted → IdentityPending → Active → Closing → Closed
//! ```
//!
//! - 字节流按处理器的 `split_frame` 切分成帧，无法对齐的字节记录后丢弃
//! - 提取设备编号失败：记录后继续读取
//! - 身份解析失败：关闭连接
//! - 单帧解析失败：记录后继续读取
//! - 读错误、EOF、空闲超时、引擎停止：进入 Closing，发送离线通知并移除路由
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let server = TcpServer::new(
//!     HandlerVariant::framed(SensorProtocolHandler::new(15001)),
//!     directory,
//!     platform,
//!     audit,
//!     TcpServerConfig::default(),
//! );
//! server.start().await?;
//! server.send_command("00000001", Command::new("00000001", "query")).await?;
//! ```

use crate::context::ConnectionContext;
use crate::error::EngineError;
use crate::handler::{HandlerVariant, ProtocolHandler, SessionHandler};
use crate::registry::{BoxedWriter, ConnectionRegistry, SharedWriter};
use crate::session::Session;
use crate::types::{CloseReason, ConnectedDevice, ConnectionState, ProtocolInfo, ProtocolStatus};
use domain::{Command, DeviceIdentity, DeviceStatus, ProtocolDescriptor};
use gw_directory::DeviceDirectory;
use gw_platform::Platform;
use gw_telemetry::{AuditEvent, DeviceAuditLog};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// 停止时等待连接任务收尾的上限。
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// TCP 服务器配置
#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    /// 监听地址
    pub listen_host: String,
    /// 监听端口（0 表示由系统分配）
    pub listen_port: u16,
    /// 最大并发连接数
    pub max_connections: usize,
    /// 读空闲超时（每次读取重新计时）
    pub idle_timeout: Duration,
    /// 单次写超时
    pub write_timeout: Duration,
    /// 单次读取缓冲区大小
    pub read_buffer_size: usize,
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 15001,
            max_connections: 1000,
            idle_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(5),
            read_buffer_size: 4096,
        }
    }
}

struct Lifecycle {
    running: bool,
    cancel: CancellationToken,
    accept: Option<JoinHandle<()>>,
}

pub(crate) struct EngineShared {
    handler: HandlerVariant,
    pub(crate) directory: Arc<DeviceDirectory>,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) audit: Arc<DeviceAuditLog>,
    pub(crate) registry: ConnectionRegistry,
    pub(crate) config: TcpServerConfig,
    limiter: Arc<Semaphore>,
    capacity: usize,
    lifecycle: Mutex<Lifecycle>,
    tracker: TaskTracker,
    next_conn_id: AtomicU64,
}

/// TCP 连接引擎
#[derive(Clone)]
pub struct TcpServer {
    shared: Arc<EngineShared>,
}

impl TcpServer {
    pub fn new(
        handler: HandlerVariant,
        directory: Arc<DeviceDirectory>,
        platform: Arc<dyn Platform>,
        audit: Arc<DeviceAuditLog>,
        config: TcpServerConfig,
    ) -> Self {
        // 超过 Semaphore 上限时构造会 panic
        let capacity = config.max_connections.clamp(1, Semaphore::MAX_PERMITS);
        let limiter = Arc::new(Semaphore::new(capacity));
        Self {
            shared: Arc::new(EngineShared {
                handler,
                directory,
                platform,
                audit,
                registry: ConnectionRegistry::default(),
                config,
                limiter,
                capacity,
                lifecycle: Mutex::new(Lifecycle {
                    running: false,
                    cancel: CancellationToken::new(),
                    accept: None,
                }),
                tracker: TaskTracker::new(),
                next_conn_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn descriptor(&self) -> &ProtocolDescriptor {
        self.shared.descriptor()
    }

    pub fn info(&self) -> ProtocolInfo {
        let descriptor = self.shared.descriptor();
        ProtocolInfo {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            port: descriptor.port,
            status: if self.is_running() {
                ProtocolStatus::Running
            } else {
                ProtocolStatus::Stopped
            },
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// 是否为有状态协议处理器。
    pub fn is_stateful(&self) -> bool {
        self.shared.handler.is_stateful()
    }

    /// 绑定监听端口并启动接收循环，返回实际监听地址。
    pub async fn start(&self) -> Result<SocketAddr, EngineError> {
        if self.is_running() {
            return Err(EngineError::AlreadyRunning);
        }
        let config = &self.shared.config;
        let listener = TcpListener::bind((config.listen_host.as_str(), config.listen_port)).await?;
        let local_addr = listener.local_addr()?;

        {
            let mut lifecycle = self.shared.lifecycle();
            if lifecycle.running {
                return Err(EngineError::AlreadyRunning);
            }
            self.shared.handler.codec().start()?;
            if lifecycle.cancel.is_cancelled() {
                lifecycle.cancel = CancellationToken::new();
            }
            lifecycle.running = true;
            lifecycle.accept = Some(tokio::spawn(accept_loop(
                self.shared.clone(),
                listener,
                lifecycle.cancel.clone(),
            )));
        }

        let descriptor = self.shared.descriptor();
        info!(
            target: "gw.engine",
            protocol = %descriptor.name,
            version = %descriptor.version,
            addr = %local_addr,
            stateful = self.shared.handler.is_stateful(),
            "engine_started"
        );
        Ok(local_addr)
    }

    /// 停止接收并取消所有连接；每个已绑定设备的连接都会发送离线通知。
    pub async fn stop(&self) -> Result<(), EngineError> {
        let (cancel, accept) = {
            let mut lifecycle = self.shared.lifecycle();
            if !lifecycle.running {
                return Err(EngineError::NotRunning);
            }
            lifecycle.running = false;
            (lifecycle.cancel.clone(), lifecycle.accept.take())
        };
        cancel.cancel();
        if let Some(accept) = accept {
            let _ = accept.await;
        }

        self.shared.tracker.close();
        if tokio::time::timeout(SHUTDOWN_GRACE, self.shared.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                target: "gw.engine",
                remaining = self.shared.tracker.len(),
                "engine_stop_grace_elapsed"
            );
        }
        self.shared.tracker.reopen();

        if let Err(err) = self.shared.handler.codec().stop() {
            warn!(target: "gw.engine", error = %err, "handler_stop_failed");
        }
        info!(
            target: "gw.engine",
            protocol = %self.shared.descriptor().name,
            "engine_stopped"
        );
        Ok(())
    }

    /// 在引擎中运行一个已建立的双向流（受连接上限约束）。
    ///
    /// 超出上限时返回 `None`，流被直接丢弃。
    pub fn serve_connection<S>(&self, stream: S, peer: impl Into<String>) -> Option<JoinHandle<()>>
    where
        S: AsyncRead + AsyncWrite + Send + Sync + 'static,
    {
        let peer = peer.into();
        let permit = self.shared.try_permit(&peer)?;
        let cancel = self.shared.lifecycle().cancel.child_token();
        Some(self.shared.spawn_connection(stream, peer, cancel, permit))
    }

    /// 向设备下发指令。
    ///
    /// 设备没有在线连接（或引擎未运行）时返回 `NotConnected`；编码与写入错误原样返回，不重试。
    pub async fn send_command(&self, wire_id: &str, command: Command) -> Result<(), EngineError> {
        self.shared.send_command(wire_id, command).await
    }

    /// 在线设备编号快照。
    pub fn list_connected_devices(&self) -> Vec<String> {
        self.shared.registry.wire_ids()
    }

    pub fn connected_devices(&self) -> Vec<ConnectedDevice> {
        self.shared.registry.snapshot()
    }

    /// 当前连接数（含尚未完成身份解析的连接）。
    pub fn active_connections(&self) -> usize {
        self.shared.capacity - self.shared.limiter.available_permits()
    }
}

async fn accept_loop(shared: Arc<EngineShared>, listener: TcpListener, cancel: CancellationToken) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer_addr)) => {
                let peer = peer_addr.to_string();
                let Some(permit) = shared.try_permit(&peer) else {
                    drop(stream);
                    continue;
                };
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(target: "gw.engine", peer = %peer, error = %err, "set_nodelay_failed");
                }
                shared.spawn_connection(stream, peer, cancel.child_token(), permit);
            }
            Err(err) => {
                error!(target: "gw.engine", error = %err, "accept_failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    info!(target: "gw.engine", "accept_loop_stopped");
}

impl EngineShared {
    pub(crate) fn descriptor(&self) -> &ProtocolDescriptor {
        self.handler.descriptor()
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_running(&self) -> bool {
        self.lifecycle().running
    }

    fn try_permit(&self, peer: &str) -> Option<OwnedSemaphorePermit> {
        match self.limiter.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!(
                    target: "gw.engine",
                    peer = %peer,
                    max_connections = self.config.max_connections,
                    "connection_rejected"
                );
                gw_telemetry::record_connection_rejected();
                None
            }
        }
    }

    fn spawn_connection<S>(
        self: &Arc<Self>,
        stream: S,
        peer: String,
        cancel: CancellationToken,
        permit: OwnedSemaphorePermit,
    ) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Send + Sync + 'static,
    {
        let shared = self.clone();
        self.tracker.spawn(async move {
            let _permit = permit;
            shared.run_connection(stream, peer, cancel).await;
        })
    }

    async fn run_connection<S>(self: Arc<Self>, stream: S, peer: String, cancel: CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Send + Sync + 'static,
    {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed) + 1;
        gw_telemetry::record_connection_opened();
        info!(target: "gw.engine", conn_id = conn_id, peer = %peer, "connection_accepted");

        let (reader, writer) = tokio::io::split(stream);
        let writer: BoxedWriter = Box::new(writer);
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(writer));
        let mut ctx = ConnectionContext::new(
            self.clone(),
            Session::new(conn_id, peer, cancel),
            Box::new(reader),
            writer,
        );

        let reason = match self.handler.clone() {
            HandlerVariant::Framed(handler) => frame_loop(handler.as_ref(), &mut ctx).await,
            HandlerVariant::Session(handler) => session_loop(handler.as_ref(), &mut ctx).await,
        };
        self.finish(ctx, reason).await;
    }

    /// Closing → Closed：移除路由、发送离线通知（仅一次）、关闭写端。
    async fn finish(&self, mut ctx: ConnectionContext, reason: CloseReason) {
        ctx.session_mut().transition(ConnectionState::Closing);
        let conn_id = ctx.session().conn_id();
        let identity = ctx.session().identity().cloned();

        match &identity {
            Some(identity) => {
                self.registry.remove(conn_id);
                info!(
                    target: "gw.engine",
                    conn_id = conn_id,
                    peer = %ctx.peer(),
                    wire_id = %identity.wire_id,
                    device_id = %identity.device_id,
                    reason = reason.as_str(),
                    "connection_closed"
                );
                self.audit
                    .record(&identity.wire_id, AuditEvent::ConnectionClosed {
                        peer: ctx.peer().to_string(),
                        device_id: identity.device_id.clone(),
                        reason: reason.as_str().to_string(),
                    });
                self.notify_status(identity, DeviceStatus::Offline).await;
            }
            None => {
                debug!(
                    target: "gw.engine",
                    conn_id = conn_id,
                    peer = %ctx.peer(),
                    reason = reason.as_str(),
                    "connection_closed_unbound"
                );
            }
        }

        let shutdown = async {
            let mut writer = ctx.writer().lock().await;
            writer.shutdown().await
        };
        if let Ok(Err(err)) = tokio::time::timeout(self.config.write_timeout, shutdown).await {
            debug!(target: "gw.engine", conn_id = conn_id, error = %err, "writer_shutdown_failed");
        }
        ctx.session_mut().transition(ConnectionState::Closed);
        gw_telemetry::record_connection_closed();
    }

    pub(crate) async fn notify_status(&self, identity: &DeviceIdentity, status: DeviceStatus) {
        match self
            .platform
            .publish_status(&identity.device_id, status)
            .await
        {
            Ok(()) => {
                gw_telemetry::record_status(true);
                info!(
                    target: "gw.engine",
                    wire_id = %identity.wire_id,
                    device_id = %identity.device_id,
                    status = status.as_str(),
                    "device_status_sent"
                );
                self.audit
                    .record(&identity.wire_id, AuditEvent::StatusSent {
                        device_id: identity.device_id.clone(),
                        status: status.as_str().to_string(),
                    });
            }
            Err(err) => {
                gw_telemetry::record_status(false);
                warn!(
                    target: "gw.engine",
                    wire_id = %identity.wire_id,
                    device_id = %identity.device_id,
                    status = status.as_str(),
                    error = %err,
                    "device_status_send_failed"
                );
                self.audit
                    .record(&identity.wire_id, AuditEvent::StatusSendFailed {
                        device_id: identity.device_id.clone(),
                        status: status.as_str().to_string(),
                        error: err.to_string(),
                    });
            }
        }
    }

    async fn send_command(&self, wire_id: &str, mut command: Command) -> Result<(), EngineError> {
        command.wire_id = wire_id.to_string();
        let result = self.deliver(&mut command).await;
        let outcome = match &result {
            Ok(()) => "success",
            Err(EngineError::Encode(_)) => "encode_failed",
            Err(_) => "write_failed",
        };
        gw_telemetry::record_command(result.is_ok());
        match &result {
            Ok(()) => info!(
                target: "gw.engine",
                wire_id = %wire_id,
                command_id = %command.command_id,
                action = %command.action,
                "command_sent"
            ),
            Err(err) => warn!(
                target: "gw.engine",
                wire_id = %wire_id,
                command_id = %command.command_id,
                action = %command.action,
                error = %err,
                "command_failed"
            ),
        }
        // 没有在线连接的编号不写设备日志
        if matches!(result, Err(EngineError::NotConnected(_))) {
            return result;
        }
        self.audit.record(wire_id, AuditEvent::CommandResult {
            command_id: command.command_id.clone(),
            action: command.action.clone(),
            result: outcome.to_string(),
            error: result.as_ref().err().map(|err| err.to_string()),
        });
        result
    }

    async fn deliver(&self, command: &mut Command) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotConnected(command.wire_id.clone()));
        }
        let route = self
            .registry
            .route(&command.wire_id)
            .ok_or_else(|| EngineError::NotConnected(command.wire_id.clone()))?;
        if command.device_id.is_empty() {
            command.device_id = route.device_id.clone();
        }
        self.audit.record(&command.wire_id, AuditEvent::CommandSending {
            command_id: command.command_id.clone(),
            action: command.action.clone(),
        });

        let frame = self.handler.codec().encode_command(command)?;
        let deadline = if command.timeout.is_zero() {
            self.config.write_timeout
        } else {
            self.config.write_timeout.min(command.timeout)
        };
        write_frame(&route.writer, &frame, deadline).await?;
        debug!(
            target: "gw.engine",
            conn_id = route.conn_id,
            wire_id = %command.wire_id,
            bytes = frame.len(),
            "command_frame_written"
        );
        self.audit.record(
            &command.wire_id,
            AuditEvent::frame_sent(&route.peer, &command.action, &frame),
        );
        Ok(())
    }
}

/// 无状态协议的帧循环。
async fn frame_loop(handler: &dyn ProtocolHandler, ctx: &mut ConnectionContext) -> CloseReason {
    let idle_timeout = ctx.idle_timeout();
    loop {
        let next = ctx
            .next_frame(|buf, bound| handler.split_frame(buf, bound), idle_timeout)
            .await;
        let data = match next {
            Ok(Some(data)) => data,
            Ok(None) => return ctx.close_reason().unwrap_or(CloseReason::Eof),
            Err(err) => {
                ctx.report_connection_error(&err);
                return ctx.close_reason().unwrap_or(CloseReason::ReadError);
            }
        };

        if ctx.session().identity().is_none() {
            let wire_id = match handler.extract_wire_id(&data) {
                Ok(wire_id) => wire_id,
                Err(err) => {
                    ctx.report_extract_failure(&err, &data);
                    continue;
                }
            };
            if ctx.bind_device(&wire_id).await.is_err() {
                return CloseReason::IdentityFailed;
            }
        }

        ctx.record_received(&data);
        match handler.parse_data(&data) {
            Ok(message) => {
                ctx.forward(message).await;
            }
            Err(err) => ctx.report_frame_error(&err, &data),
        }
    }
}

/// 有状态协议：连接交给处理器，前后调用连接事件钩子。
async fn session_loop(handler: &dyn SessionHandler, ctx: &mut ConnectionContext) -> CloseReason {
    let peer = ctx.peer().to_string();
    if let Err(err) = handler.on_connection_established(&peer).await {
        warn!(target: "gw.engine", peer = %peer, error = %err, "connection_established_hook_failed");
    }
    let result = handler.handle_connection(ctx).await;
    if let Err(err) = handler.on_connection_closed(&peer).await {
        warn!(target: "gw.engine", peer = %peer, error = %err, "connection_closed_hook_failed");
    }
    match result {
        Ok(()) => ctx.close_reason().unwrap_or(CloseReason::Eof),
        Err(err) => {
            ctx.report_connection_error(&err);
            ctx.close_reason().unwrap_or(CloseReason::HandlerError)
        }
    }
}

pub(crate) async fn write_frame(
    writer: &SharedWriter,
    data: &[u8],
    deadline: Duration,
) -> Result<(), EngineError> {
    let write = async {
        let mut writer = writer.lock().await;
        writer.write_all(data).await?;
        writer.flush().await
    };
    match tokio::time::timeout(deadline, write).await {
        Ok(result) => result.map_err(EngineError::from),
        Err(_) => Err(EngineError::WriteTimeout(deadline)),
    }
}
