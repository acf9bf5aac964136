//! Watch command handler

use anyhow::Result;
use tracing::{info, warn};

use ricecooker_core::{spawn_device_sync, Config, DeviceView, SyncEvent};

use super::{open_store, resolve_device};
use crate::output::Output;

/// Follow a device until Ctrl-C
///
/// Prints a line whenever the status, the displayed countdown or the
/// error changes. A missing record is created with defaults, as the
/// dashboard does on first connection.
pub async fn run(config: &Config, device: Option<String>, output: &Output) -> Result<()> {
    let device_id = resolve_device(config, device)?;
    let store = open_store(config)?;

    let mut sync = spawn_device_sync(store, config.sync_options());
    sync.select_device(Some(device_id.clone()));
    let mut views = sync.subscribe_view();
    let mut last_line: Option<LineKey> = None;

    output.message(&format!("Watching {} (Ctrl-C to stop)", device_id));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                let key = LineKey::of(&view);
                if last_line.as_ref() != Some(&key) && !view.loading {
                    output.print_view(&view);
                    last_line = Some(key);
                }
            }
            Some(event) = sync.next_event() => {
                if let SyncEvent::Error(e) = event {
                    warn!("{}", e);
                }
            }
        }
    }

    sync.shutdown();
    Ok(())
}

/// The parts of a view that warrant a new line
#[derive(Debug, Clone, PartialEq)]
struct LineKey {
    status: String,
    remaining_secs: u64,
    pending: Option<String>,
    error: Option<String>,
}

impl LineKey {
    fn of(view: &DeviceView) -> Self {
        Self {
            status: view.status.to_string(),
            remaining_secs: view.progress.remaining_whole_secs(),
            pending: view.pending_command.map(|c| c.to_string()),
            error: view.error.clone(),
        }
    }
}
