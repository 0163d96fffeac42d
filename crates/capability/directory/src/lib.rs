//! 设备目录：设备编号 → 平台身份的并发安全缓存。
//!
//! 两个索引（按设备编号、按平台设备 ID）在同一把锁下维护，始终互相一致。
//! 未命中时向上游查询；同一设备编号的并发未命中合并为一次查询，不同设备编号互不阻塞。
//! 缓存没有过期时间，只在显式失效或清空时移除。

use domain::DeviceIdentity;
use gw_platform::{Platform, PlatformError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// 设备目录错误。
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("empty wire id")]
    EmptyWireId,
    #[error("resolve {wire_id} failed: {source}")]
    Resolution {
        wire_id: String,
        #[source]
        source: PlatformError,
    },
    #[error("device {0} not cached")]
    NotCached(String),
}

#[derive(Default)]
struct Indices {
    by_wire: HashMap<String, DeviceIdentity>,
    by_device: HashMap<String, String>,
}

impl Indices {
    fn insert(&mut self, identity: DeviceIdentity) {
        if let Some(previous) = self.by_wire.remove(&identity.wire_id) {
            self.by_device.remove(&previous.device_id);
        }
        if let Some(previous_wire) = self.by_device.remove(&identity.device_id) {
            self.by_wire.remove(&previous_wire);
        }
        self.by_device
            .insert(identity.device_id.clone(), identity.wire_id.clone());
        self.by_wire.insert(identity.wire_id.clone(), identity);
    }

    fn remove_wire(&mut self, wire_id: &str) -> Option<DeviceIdentity> {
        let identity = self.by_wire.remove(wire_id)?;
        self.by_device.remove(&identity.device_id);
        Some(identity)
    }
}

type Gate = Arc<tokio::sync::Mutex<()>>;

/// 设备目录。
pub struct DeviceDirectory {
    platform: Arc<dyn Platform>,
    indices: RwLock<Indices>,
    inflight: Mutex<HashMap<String, Gate>>,
}

impl DeviceDirectory {
    pub fn new(platform: Arc<dyn Platform>) -> Self {
        Self {
            platform,
            indices: RwLock::new(Indices::default()),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// 解析设备编号：命中直接返回，未命中查询上游并写入两个索引。失败不缓存。
    pub async fn resolve(&self, wire_id: &str) -> Result<DeviceIdentity, DirectoryError> {
        if wire_id.is_empty() {
            return Err(DirectoryError::EmptyWireId);
        }
        if let Some(identity) = self.cached(wire_id) {
            return Ok(identity);
        }

        let gate = self.gate(wire_id);
        let _guard = gate.lock().await;
        let result = match self.cached(wire_id) {
            Some(identity) => {
                debug!(target: "gw.directory", wire_id = %wire_id, "resolve_coalesced");
                Ok(identity)
            }
            None => self.fetch(wire_id).await,
        };
        self.release(wire_id, &gate);
        result
    }

    /// 按平台设备 ID 反查，不访问上游。
    pub fn resolve_by_identity(&self, device_id: &str) -> Result<DeviceIdentity, DirectoryError> {
        let indices = self.read();
        indices
            .by_device
            .get(device_id)
            .and_then(|wire_id| indices.by_wire.get(wire_id))
            .cloned()
            .ok_or_else(|| DirectoryError::NotCached(device_id.to_string()))
    }

    /// 仅查缓存。
    pub fn cached(&self, wire_id: &str) -> Option<DeviceIdentity> {
        self.read().by_wire.get(wire_id).cloned()
    }

    /// 从两个索引中移除；未知设备编号时返回 `false`。
    pub fn invalidate(&self, wire_id: &str) -> bool {
        let removed = self.write().remove_wire(wire_id);
        if let Some(identity) = &removed {
            info!(
                target: "gw.directory",
                wire_id = %wire_id,
                device_id = %identity.device_id,
                "directory_invalidated"
            );
        }
        removed.is_some()
    }

    /// 按平台设备 ID 失效，返回被移除的设备编号。
    pub fn invalidate_by_identity(&self, device_id: &str) -> Option<String> {
        let mut indices = self.write();
        let wire_id = indices.by_device.get(device_id).cloned()?;
        indices.remove_wire(&wire_id);
        drop(indices);
        info!(
            target: "gw.directory",
            wire_id = %wire_id,
            device_id = %device_id,
            "directory_invalidated"
        );
        Some(wire_id)
    }

    /// 清空缓存，返回移除的条目数。
    pub fn clear(&self) -> usize {
        let mut indices = self.write();
        let count = indices.by_wire.len();
        indices.by_wire.clear();
        indices.by_device.clear();
        drop(indices);
        info!(target: "gw.directory", count = count, "directory_cleared");
        count
    }

    pub fn len(&self) -> usize {
        self.read().by_wire.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn fetch(&self, wire_id: &str) -> Result<DeviceIdentity, DirectoryError> {
        match self.platform.fetch_identity(wire_id).await {
            Ok(identity) => {
                let identity = DeviceIdentity {
                    wire_id: wire_id.to_string(),
                    ..identity
                };
                self.write().insert(identity.clone());
                info!(
                    target: "gw.directory",
                    wire_id = %wire_id,
                    device_id = %identity.device_id,
                    "directory_resolved"
                );
                Ok(identity)
            }
            Err(source) => {
                warn!(
                    target: "gw.directory",
                    wire_id = %wire_id,
                    error = %source,
                    "directory_resolve_failed"
                );
                Err(DirectoryError::Resolution {
                    wire_id: wire_id.to_string(),
                    source,
                })
            }
        }
    }

    fn gate(&self, wire_id: &str) -> Gate {
        self.inflight()
            .entry(wire_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    fn release(&self, wire_id: &str, gate: &Gate) {
        let mut inflight = self.inflight();
        if inflight
            .get(wire_id)
            .is_some_and(|current| Arc::ptr_eq(current, gate))
        {
            inflight.remove(wire_id);
        }
    }

    fn inflight(&self) -> MutexGuard<'_, HashMap<String, Gate>> {
        self.inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(device_id: &str, wire_id: &str) -> DeviceIdentity {
        DeviceIdentity::new(device_id, wire_id)
    }

    #[test]
    fn reinsert_keeps_indices_consistent() {
        let mut indices = Indices::default();
        indices.insert(identity("dev-1", "00000001"));
        indices.insert(identity("dev-2", "00000001"));
        assert_eq!(indices.by_wire.len(), 1);
        assert_eq!(indices.by_device.len(), 1);
        assert_eq!(indices.by_device.get("dev-2").map(String::as_str), Some("00000001"));

        indices.insert(identity("dev-2", "00000002"));
        assert_eq!(indices.by_wire.len(), 1);
        assert!(indices.by_wire.contains_key("00000002"));
        assert_eq!(indices.by_device.len(), 1);
    }

    #[test]
    fn remove_wire_clears_both_indices() {
        let mut indices = Indices::default();
        indices.insert(identity("dev-1", "00000001"));
        assert!(indices.remove_wire("00000001").is_some());
        assert!(indices.remove_wire("00000001").is_none());
        assert!(indices.by_device.is_empty());
    }
}
