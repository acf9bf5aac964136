//! Rice cooker core library
//!
//! Keeps a live view of a networked rice cooker whose state lives in a
//! hierarchical real-time database, and issues cook-cycle commands that
//! the cooker's firmware picks up from the same record.
//!
//! # Architecture
//!
//! - **Remote store**: the device record at `devices/{id}` is the source
//!   of truth, reached through the [`RemoteStore`] trait
//! - **Synchronizer**: a spawned task that subscribes to one record,
//!   derives a display status and tracks commands until the device
//!   confirms them
//!
//! # Quick Start
//!
//! ```text
//! let store = Arc::new(RtdbStore::new(&url, token)?);
//! let mut sync = spawn_device_sync(store, SyncOptions::default());
//!
//! sync.select_device(Some("cooker-001".to_string()));
//! sync.apply_preset(Preset::Medium)?;
//! sync.cook();
//! ```
//!
//! # Modules
//!
//! - `sync`: device state synchronizer (main entry point)
//! - `models`: device record, settings and stages
//! - `command`: command vocabulary and wire encodings
//! - `status`: derived status and progress
//! - `remote`: remote store seam and implementations
//! - `profile`: user to device association
//! - `config`: application configuration

pub mod command;
pub mod config;
pub mod error;
pub mod models;
pub mod profile;
pub mod remote;
pub mod status;
pub mod sync;

pub use command::{Command, CommandWire};
pub use config::Config;
pub use error::{DeviceError, StoreError};
pub use models::{CurrentAction, DeviceRecord, DeviceSettings, Preset, SettingsPatch, Stage};
pub use profile::{ProfileError, UserProfile};
pub use remote::{MemoryStore, RemoteStore, RtdbStore};
pub use status::{DerivedStatus, Progress};
pub use sync::{spawn_device_sync, DeviceSyncHandle, DeviceView, SyncEvent, SyncOptions};
