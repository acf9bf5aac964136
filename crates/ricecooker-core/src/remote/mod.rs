//! Remote store client
//!
//! The device record lives in a hierarchical real-time database. This module
//! defines the seam the synchronizer talks to and two implementations:
//!
//! - [`RtdbStore`]: REST + event-stream client for a Firebase-style
//!   realtime database
//! - [`MemoryStore`]: in-process store used by tests and local runs
//!
//! ## Paths and updates
//!
//! Paths are slash separated (`devices/cooker-001/settings`). Updates are
//! multi-path merges: each key of the update map is a path relative to the
//! update location, and a `null` value deletes.
//!
//! ## Usage
//!
//! ```ignore
//! let store = Arc::new(RtdbStore::new("https://example.firebaseio.com", Some(token)));
//! let mut sub = store.subscribe("devices/cooker-001").await?;
//! while let Some(event) = sub.next().await { /* ... */ }
//! ```

use std::future::Future;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use crate::error::StoreError;

mod memory;
mod rtdb;
mod tree;

pub use memory::{MemoryStore, WriteOp, WriteRecord};
pub use rtdb::RtdbStore;
pub use tree::{apply_update, get_path, join_path, resolve_server_values, set_path, split_path};

/// Notifications delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// Full value at the subscribed path (`None` when nothing is stored)
    Snapshot(Option<Value>),
    /// The subscription failed and will deliver nothing further
    Error(StoreError),
}

/// A live subscription to one path
///
/// Dropping the subscription cancels it.
#[derive(Debug)]
pub struct Subscription {
    path: String,
    rx: mpsc::UnboundedReceiver<StoreEvent>,
}

impl Subscription {
    pub fn new(path: impl Into<String>, rx: mpsc::UnboundedReceiver<StoreEvent>) -> Self {
        Self {
            path: path.into(),
            rx,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Wait for the next notification
    ///
    /// Returns `None` once the store side has gone away.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.rx.recv().await
    }
}

/// Server-resolved placeholder values
pub struct ServerValue;

impl ServerValue {
    /// Placeholder the store replaces with its own clock on write
    pub fn timestamp() -> Value {
        json!({".sv": "timestamp"})
    }

    pub fn is_timestamp(value: &Value) -> bool {
        value.get(".sv").and_then(Value::as_str) == Some("timestamp")
    }
}

/// Operations the synchronizer needs from the real-time database
///
/// Implementations are constructed explicitly and shared through an `Arc`.
pub trait RemoteStore: Send + Sync + 'static {
    /// Subscribe to changes at `path`
    ///
    /// The current value is delivered as the first event.
    fn subscribe(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Subscription, StoreError>> + Send;

    /// Read the value at `path` once
    fn get(&self, path: &str) -> impl Future<Output = Result<Option<Value>, StoreError>> + Send;

    /// Replace the value at `path`
    fn set(&self, path: &str, value: Value) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Merge a multi-path update below `path`
    fn update(
        &self,
        path: &str,
        patch: Map<String, Value>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
