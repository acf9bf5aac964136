//! Device state synchronizer
//!
//! Keeps a live, derived view of one device's remote record and exposes
//! guarded operations to change it.
//!
//! ## Lifecycle
//!
//! 1. Select a device: the previous subscription and timers are torn down
//!    and the record at `devices/{id}` is watched
//! 2. A missing record is created with defaults
//! 3. Every accepted snapshot replaces local state and re-derives status
//! 4. Commands flip the status to `SENDING_COMMAND` until the device
//!    confirms them or the timeout reverts them
//!
//! ## Usage
//!
//! ```ignore
//! let mut sync = spawn_device_sync(Arc::new(store), SyncOptions::default());
//! sync.select_device(Some("cooker-001".to_string()));
//! sync.cook();
//! while let Some(event) = sync.next_event().await { /* ... */ }
//! ```

mod state;
mod task;

pub use state::{DeviceView, LocalState, SnapshotOutcome};
pub use task::{spawn_device_sync, DeviceSyncHandle, SyncEvent, SyncOptions};
