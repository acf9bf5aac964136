//! In-process remote store
//!
//! Behaves like the realtime database from a client's point of view:
//! subscribers get the current value on subscribe and a fresh snapshot
//! after every write that touches their path, server timestamps are
//! resolved on write, and `null` deletes.
//!
//! Writes made through [`RemoteStore`] are recorded in a write log.
//! `external_set` / `external_update` simulate writes by another client
//! (typically the cooker firmware) and are not logged.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use super::tree::{apply_update, get_path, resolve_server_values, set_path, split_path};
use super::{RemoteStore, StoreEvent, Subscription};
use crate::error::StoreError;
use crate::status::now_millis;

/// Kind of a logged write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Set,
    Update,
}

/// A write made through the store API
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub op: WriteOp,
    pub path: String,
    /// The written value, or the update map as an object
    pub value: Value,
}

struct Subscriber {
    path: String,
    tx: mpsc::UnboundedSender<StoreEvent>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    subscribers: Vec<Subscriber>,
    writes: Vec<WriteRecord>,
    /// Fixed clock for server timestamps (wall clock when unset)
    clock_ms: Option<i64>,
    /// Path prefixes that reject every operation
    denied: Vec<String>,
    /// Error returned by every API write while set
    write_failure: Option<StoreError>,
    /// Snapshot delivery paused (writes still apply)
    paused: bool,
    /// New subscriptions never complete, like a server that accepts the
    /// connection and never answers
    stall_subscribe: bool,
}

impl Inner {
    fn now_ms(&self) -> i64 {
        self.clock_ms.unwrap_or_else(now_millis)
    }

    fn check_access(&self, path: &str) -> Result<(), StoreError> {
        let segments = split_path(path);
        let denied = self.denied.iter().any(|prefix| {
            let prefix = split_path(prefix);
            segments.len() >= prefix.len() && segments[..prefix.len()] == prefix[..]
        });
        if denied {
            Err(StoreError::PermissionDenied {
                path: path.to_string(),
            })
        } else {
            Ok(())
        }
    }

    fn snapshot(&self, path: &str) -> Option<Value> {
        get_path(&self.root, path).cloned()
    }

    /// Send fresh snapshots to every subscriber whose path overlaps `path`
    fn notify(&mut self, path: &str) {
        if self.paused {
            return;
        }

        let written = split_path(path);
        let root = &self.root;
        self.subscribers.retain(|sub| {
            let watched = split_path(&sub.path);
            let n = watched.len().min(written.len());
            if watched[..n] != written[..n] {
                return !sub.tx.is_closed();
            }
            let snapshot = get_path(root, &sub.path).cloned();
            sub.tx.send(StoreEvent::Snapshot(snapshot)).is_ok()
        });
    }

    fn write_set(&mut self, path: &str, mut value: Value) {
        let now = self.now_ms();
        resolve_server_values(&mut value, now);
        set_path(&mut self.root, path, value);
        self.notify(path);
    }

    fn write_update(&mut self, path: &str, mut patch: Map<String, Value>) {
        let now = self.now_ms();
        for value in patch.values_mut() {
            resolve_server_values(value, now);
        }
        apply_update(&mut self.root, path, &patch);
        self.notify(path);
    }
}

/// Realtime-database stand-in living in memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a fixed clock for server timestamps
    pub async fn set_clock(&self, now_ms: i64) {
        self.inner.lock().await.clock_ms = Some(now_ms);
    }

    /// Reject all operations below `prefix`
    pub async fn deny(&self, prefix: &str) {
        self.inner.lock().await.denied.push(prefix.to_string());
    }

    /// Make every API write fail with `error` (or succeed again with `None`)
    pub async fn fail_writes(&self, error: Option<StoreError>) {
        self.inner.lock().await.write_failure = error;
    }

    /// Stop or resume delivering snapshots
    pub async fn pause_notifications(&self, paused: bool) {
        self.inner.lock().await.paused = paused;
    }

    /// Make new subscriptions hang (or behave again with `false`)
    pub async fn stall_subscriptions(&self, stall: bool) {
        self.inner.lock().await.stall_subscribe = stall;
    }

    /// Writes made through the store API, oldest first
    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.inner.lock().await.writes.clone()
    }

    pub async fn clear_writes(&self) {
        self.inner.lock().await.writes.clear();
    }

    /// Current value at `path`
    pub async fn value(&self, path: &str) -> Option<Value> {
        self.inner.lock().await.snapshot(path)
    }

    /// Write as another client would, without logging
    pub async fn external_set(&self, path: &str, value: Value) {
        self.inner.lock().await.write_set(path, value);
    }

    /// Update as another client would, without logging
    pub async fn external_update(&self, path: &str, patch: Map<String, Value>) {
        self.inner.lock().await.write_update(path, patch);
    }

    /// Deliver an arbitrary snapshot to subscribers of `path`
    ///
    /// Used to replay stale or out-of-order notifications.
    pub async fn inject_snapshot(&self, path: &str, snapshot: Option<Value>) {
        let inner = self.inner.lock().await;
        for sub in inner.subscribers.iter().filter(|s| s.path == path) {
            let _ = sub.tx.send(StoreEvent::Snapshot(snapshot.clone()));
        }
    }

    /// Fail every live subscription, as a dropped connection would
    pub async fn disconnect_all(&self, error: StoreError) {
        let mut inner = self.inner.lock().await;
        for sub in inner.subscribers.drain(..) {
            let _ = sub.tx.send(StoreEvent::Error(error.clone()));
        }
    }

    /// Number of subscriptions still held by someone
    pub async fn subscriber_count(&self) -> usize {
        let mut inner = self.inner.lock().await;
        inner.subscribers.retain(|sub| !sub.tx.is_closed());
        inner.subscribers.len()
    }
}

impl RemoteStore for MemoryStore {
    async fn subscribe(&self, path: &str) -> Result<Subscription, StoreError> {
        if self.inner.lock().await.stall_subscribe {
            debug!("Memory store subscription on {} stalled", path);
            std::future::pending::<()>().await;
        }

        let mut inner = self.inner.lock().await;
        inner.check_access(path)?;

        let (tx, rx) = mpsc::unbounded_channel();
        if !inner.paused {
            let _ = tx.send(StoreEvent::Snapshot(inner.snapshot(path)));
        }
        inner.subscribers.push(Subscriber {
            path: path.to_string(),
            tx,
        });
        debug!("Memory store subscription on {}", path);

        Ok(Subscription::new(path, rx))
    }

    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let inner = self.inner.lock().await;
        inner.check_access(path)?;
        Ok(inner.snapshot(path))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_access(path)?;
        if let Some(error) = inner.write_failure.clone() {
            return Err(error);
        }

        inner.writes.push(WriteRecord {
            op: WriteOp::Set,
            path: path.to_string(),
            value: value.clone(),
        });
        inner.write_set(path, value);
        Ok(())
    }

    async fn update(&self, path: &str, patch: Map<String, Value>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.check_access(path)?;
        if let Some(error) = inner.write_failure.clone() {
            return Err(error);
        }

        inner.writes.push(WriteRecord {
            op: WriteOp::Update,
            path: path.to_string(),
            value: Value::Object(patch.clone()),
        });
        inner.write_update(path, patch);
        Ok(())
    }
}
