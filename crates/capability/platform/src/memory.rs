//! 内存平台实现（用于测试与本地联调）。

use crate::command::PlatformCommand;
use crate::{CommandSink, Platform, PlatformError};
use async_trait::async_trait;
use domain::{DeviceIdentity, DeviceStatus, ScalarValue};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// 记录所有调用的内存平台。
#[derive(Default)]
pub struct InMemoryPlatform {
    devices: RwLock<HashMap<String, DeviceIdentity>>,
    fetches: Mutex<HashMap<String, usize>>,
    telemetry: Mutex<Vec<(String, BTreeMap<String, ScalarValue>)>>,
    statuses: Mutex<Vec<(String, DeviceStatus)>>,
    heartbeats: Mutex<Vec<String>>,
    sink: Mutex<Option<Arc<dyn CommandSink>>>,
    fetch_delay: Mutex<Duration>,
    fail_fetch: AtomicBool,
    fail_publish: AtomicBool,
    fail_heartbeat: AtomicBool,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记设备：`wire_id` → `device_id`。
    pub fn register_device(&self, wire_id: &str, device_id: &str) {
        if let Ok(mut devices) = self.devices.write() {
            devices.insert(wire_id.to_string(), DeviceIdentity::new(device_id, wire_id));
        }
    }

    /// 每次身份查询前的等待时间，用于构造并发未命中。
    pub fn set_fetch_delay(&self, delay: Duration) {
        if let Ok(mut current) = self.fetch_delay.lock() {
            *current = delay;
        }
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_heartbeat(&self, fail: bool) {
        self.fail_heartbeat.store(fail, Ordering::SeqCst);
    }

    /// 指定设备编号的身份查询次数（含失败）。
    pub fn fetch_count(&self, wire_id: &str) -> usize {
        self.fetches
            .lock()
            .map(|fetches| fetches.get(wire_id).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn telemetry(&self) -> Vec<(String, BTreeMap<String, ScalarValue>)> {
        self.telemetry
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    pub fn statuses(&self) -> Vec<(String, DeviceStatus)> {
        self.statuses
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    /// 指定设备收到的某种状态通知次数。
    pub fn status_count(&self, device_id: &str, status: DeviceStatus) -> usize {
        self.statuses()
            .iter()
            .filter(|(id, value)| id == device_id && *value == status)
            .count()
    }

    pub fn heartbeats(&self) -> Vec<String> {
        self.heartbeats
            .lock()
            .map(|items| items.clone())
            .unwrap_or_default()
    }

    /// 模拟平台下发一条指令；未注册接收方时返回 `false`。
    pub async fn deliver_command(&self, command: PlatformCommand) -> bool {
        let sink = self.sink.lock().ok().and_then(|sink| sink.clone());
        match sink {
            Some(sink) => {
                sink.on_command(command).await;
                true
            }
            None => false,
        }
    }

    /// 轮询等待条件成立，超时返回 `false`。
    pub async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&Self) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if predicate(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Platform for InMemoryPlatform {
    async fn fetch_identity(&self, wire_id: &str) -> Result<DeviceIdentity, PlatformError> {
        {
            let mut fetches = self
                .fetches
                .lock()
                .map_err(|_| PlatformError::Unavailable("lock failed".to_string()))?;
            *fetches.entry(wire_id.to_string()).or_insert(0) += 1;
        }
        let delay = self
            .fetch_delay
            .lock()
            .map(|delay| *delay)
            .unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable("fetch disabled".to_string()));
        }
        let devices = self
            .devices
            .read()
            .map_err(|_| PlatformError::Unavailable("lock failed".to_string()))?;
        devices
            .get(wire_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(wire_id.to_string()))
    }

    async fn publish_telemetry(
        &self,
        device_id: &str,
        values: &BTreeMap<String, ScalarValue>,
    ) -> Result<(), PlatformError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(PlatformError::Publish("publish disabled".to_string()));
        }
        let mut telemetry = self
            .telemetry
            .lock()
            .map_err(|_| PlatformError::Unavailable("lock failed".to_string()))?;
        telemetry.push((device_id.to_string(), values.clone()));
        Ok(())
    }

    async fn publish_status(
        &self,
        device_id: &str,
        status: DeviceStatus,
    ) -> Result<(), PlatformError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(PlatformError::Publish("publish disabled".to_string()));
        }
        let mut statuses = self
            .statuses
            .lock()
            .map_err(|_| PlatformError::Unavailable("lock failed".to_string()))?;
        statuses.push((device_id.to_string(), status));
        Ok(())
    }

    async fn send_heartbeat(&self, service_id: &str) -> Result<(), PlatformError> {
        if self.fail_heartbeat.load(Ordering::SeqCst) {
            return Err(PlatformError::Unavailable("heartbeat disabled".to_string()));
        }
        let mut heartbeats = self
            .heartbeats
            .lock()
            .map_err(|_| PlatformError::Unavailable("lock failed".to_string()))?;
        heartbeats.push(service_id.to_string());
        Ok(())
    }

    fn register_command_sink(&self, sink: Arc<dyn CommandSink>) -> Result<(), PlatformError> {
        let mut current = self
            .sink
            .lock()
            .map_err(|_| PlatformError::Unavailable("lock failed".to_string()))?;
        *current = Some(sink);
        Ok(())
    }
}
