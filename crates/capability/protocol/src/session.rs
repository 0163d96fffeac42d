//! 单连接会话状态。
//!
//! 由创建它的连接任务独占，连接关闭时销毁；引擎只通过路由表持有 连接 → 设备编号 的查询关系。

use crate::types::ConnectionState;
use domain::DeviceIdentity;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct Session {
    conn_id: u64,
    peer: String,
    state: ConnectionState,
    identity: Option<DeviceIdentity>,
    created_at: Instant,
    last_activity: Instant,
    cancel: CancellationToken,
}

impl Session {
    pub(crate) fn new(conn_id: u64, peer: String, cancel: CancellationToken) -> Self {
        let now = Instant::now();
        Self {
            conn_id,
            peer,
            state: ConnectionState::Accepted,
            identity: None,
            created_at: now,
            last_activity: now,
            cancel,
        }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// 设备编号；握手完成前为 `None`。
    pub fn wire_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|identity| identity.wire_id.as_str())
    }

    /// 平台设备 ID；握手完成前为 `None`。
    pub fn device_id(&self) -> Option<&str> {
        self.identity
            .as_ref()
            .map(|identity| identity.device_id.as_str())
    }

    pub fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// 会话级取消令牌（引擎停止时随之取消）。
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn bind(&mut self, identity: DeviceIdentity) {
        self.identity = Some(identity);
        self.transition(ConnectionState::Active);
    }

    pub(crate) fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!(
            target: "gw.engine",
            conn_id = self.conn_id,
            peer = %self.peer,
            from = self.state.as_str(),
            to = next.as_str(),
            "connection_state_changed"
        );
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_moves_session_to_active() {
        let mut session = Session::new(7, "127.0.0.1:1".to_string(), CancellationToken::new());
        assert_eq!(session.state(), ConnectionState::Accepted);
        assert!(session.wire_id().is_none());

        session.transition(ConnectionState::IdentityPending);
        session.bind(DeviceIdentity::new("dev-1", "00000001"));
        assert_eq!(session.state(), ConnectionState::Active);
        assert_eq!(session.wire_id(), Some("00000001"));
        assert_eq!(session.device_id(), Some("dev-1"));
    }

    #[test]
    fn cancellation_is_shared() {
        let parent = CancellationToken::new();
        let session = Session::new(1, "peer".to_string(), parent.child_token());
        assert!(!session.is_cancelled());
        parent.cancel();
        assert!(session.is_cancelled());
        assert!(session.cancellation().is_cancelled());
    }
}
