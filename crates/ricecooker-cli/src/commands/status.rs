//! Status command handler

use anyhow::{Context, Result};
use tracing::debug;

use ricecooker_core::models::device_path;
use ricecooker_core::status::now_millis;
use ricecooker_core::{Config, DerivedStatus, DeviceRecord, Progress, RemoteStore};

use super::{open_store, resolve_device};
use crate::output::Output;

/// Read the device record once and print it
pub async fn show(config: &Config, device: Option<String>, output: &Output) -> Result<()> {
    let device_id = resolve_device(config, device)?;
    let store = open_store(config)?;

    let value = store
        .get(&device_path(&device_id))
        .await
        .with_context(|| format!("Failed to read device '{}'", device_id))?;
    let Some(value) = value else {
        anyhow::bail!(
            "Device '{}' has no record yet. Run `ricecooker watch --device {}` to create one.",
            device_id,
            device_id
        );
    };
    debug!("Read record for {}", device_id);

    let record = DeviceRecord::from_value(&value);
    let status = DerivedStatus::from_record(&record);
    let progress = record
        .active_stage()
        .map(|stage| Progress::extrapolate(stage, now_millis()))
        .unwrap_or_default();

    output.print_device(&device_id, &record, status, &progress);
    Ok(())
}
