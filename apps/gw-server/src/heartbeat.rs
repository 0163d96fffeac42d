//! 上游服务心跳：启动时立即发送一次，之后按固定周期发送，失败只记录不退出。

use gw_platform::Platform;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub fn spawn_heartbeat(
    platform: Arc<dyn Platform>,
    service_id: String,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let period = interval.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            target: "gw.server",
            service_id = %service_id,
            interval_ms = period.as_millis() as u64,
            "heartbeat_started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match platform.send_heartbeat(&service_id).await {
                Ok(()) => debug!(target: "gw.server", service_id = %service_id, "heartbeat_sent"),
                Err(err) => {
                    gw_telemetry::record_heartbeat_failure();
                    warn!(
                        target: "gw.server",
                        service_id = %service_id,
                        error = %err,
                        "heartbeat_failed"
                    );
                }
            }
        }
        info!(target: "gw.server", service_id = %service_id, "heartbeat_stopped");
    })
}
