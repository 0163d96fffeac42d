//! 连接路由表：连接 → 设备编号。
//!
//! 只由拥有连接的任务插入、由引擎的关闭流程删除。同一设备编号存在多个连接时，最新的连接接收指令。

use crate::types::ConnectedDevice;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::io::AsyncWrite;

pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub(crate) type SharedWriter = Arc<tokio::sync::Mutex<BoxedWriter>>;

#[derive(Clone)]
pub(crate) struct Route {
    pub conn_id: u64,
    pub device_id: String,
    pub peer: String,
    pub writer: SharedWriter,
}

struct Entry {
    wire_id: String,
    device_id: String,
    peer: String,
    connected_at_ms: i64,
    writer: SharedWriter,
}

#[derive(Default)]
struct Tables {
    entries: HashMap<u64, Entry>,
    // 设备编号 → 连接号，最大的连接号即最新连接
    by_wire: HashMap<String, BTreeSet<u64>>,
}

impl Tables {
    fn unindex(&mut self, conn_id: u64, wire_id: &str) {
        if let Some(conns) = self.by_wire.get_mut(wire_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                self.by_wire.remove(wire_id);
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    tables: RwLock<Tables>,
}

impl ConnectionRegistry {
    pub fn insert(&self, conn_id: u64, wire_id: &str, device_id: &str, peer: &str, writer: SharedWriter) {
        let mut tables = self.write();
        let previous = tables.entries.insert(conn_id, Entry {
            wire_id: wire_id.to_string(),
            device_id: device_id.to_string(),
            peer: peer.to_string(),
            connected_at_ms: domain::now_epoch_ms(),
            writer,
        });
        if let Some(previous) = previous {
            tables.unindex(conn_id, &previous.wire_id);
        }
        tables
            .by_wire
            .entry(wire_id.to_string())
            .or_default()
            .insert(conn_id);
    }

    pub fn remove(&self, conn_id: u64) -> bool {
        let mut tables = self.write();
        match tables.entries.remove(&conn_id) {
            Some(entry) => {
                tables.unindex(conn_id, &entry.wire_id);
                true
            }
            None => false,
        }
    }

    /// 设备编号对应的最新连接。
    pub fn route(&self, wire_id: &str) -> Option<Route> {
        let tables = self.read();
        let conn_id = *tables.by_wire.get(wire_id)?.last()?;
        let entry = tables.entries.get(&conn_id)?;
        Some(Route {
            conn_id,
            device_id: entry.device_id.clone(),
            peer: entry.peer.clone(),
            writer: entry.writer.clone(),
        })
    }

    /// 在线设备编号（去重、排序）。
    pub fn wire_ids(&self) -> Vec<String> {
        let mut wire_ids: Vec<String> = self.read().by_wire.keys().cloned().collect();
        wire_ids.sort();
        wire_ids
    }

    pub fn snapshot(&self) -> Vec<ConnectedDevice> {
        let mut devices: Vec<(u64, ConnectedDevice)> = self
            .read()
            .entries
            .iter()
            .map(|(conn_id, entry)| {
                (*conn_id, ConnectedDevice {
                    wire_id: entry.wire_id.clone(),
                    device_id: entry.device_id.clone(),
                    peer: entry.peer.clone(),
                    connected_at_ms: entry.connected_at_ms,
                })
            })
            .collect();
        devices.sort_by_key(|(conn_id, _)| *conn_id);
        devices.into_iter().map(|(_, device)| device).collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
