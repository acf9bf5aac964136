//! Command handlers

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use ricecooker_core::profile::validate_device_id;
use ricecooker_core::{
    spawn_device_sync, Config, DeviceError, DeviceSyncHandle, DeviceView, RtdbStore,
};

pub mod config;
pub mod control;
pub mod device;
pub mod status;
pub mod watch;

/// Open the configured realtime database
pub fn open_store(config: &Config) -> Result<Arc<RtdbStore>> {
    let Some(url) = config.database_url.as_deref() else {
        bail!(
            "No database configured. Set one with:\n  ricecooker config set database_url https://<project>.firebaseio.com"
        );
    };
    let store = RtdbStore::new(url, config.auth_token.clone())
        .context("Failed to create database client")?;
    Ok(Arc::new(store))
}

/// Pick the device from the flag or the configured default
pub fn resolve_device(config: &Config, flag: Option<String>) -> Result<String> {
    let Some(device_id) = flag.or_else(|| config.device_id.clone()) else {
        bail!(
            "No device given. Pass --device or set a default with:\n  ricecooker config set device_id <id>"
        );
    };
    validate_device_id(&device_id)?;
    Ok(device_id)
}

/// Start a synchronizer on `device_id` and wait until it is connected
pub async fn connect(config: &Config, device_id: &str) -> Result<DeviceSyncHandle> {
    let store = open_store(config)?;
    let sync = spawn_device_sync(store, config.sync_options());
    sync.select_device(Some(device_id.to_string()));

    let mut views = sync.subscribe_view();
    let view = views
        .wait_for(|v| v.device_id.as_deref() == Some(device_id) && !v.loading)
        .await
        .context("Device sync stopped unexpectedly")?
        .clone();
    ensure_connected(&view)?;
    Ok(sync)
}

fn ensure_connected(view: &DeviceView) -> Result<()> {
    if view.status.is_connected() {
        return Ok(());
    }
    match &view.error {
        Some(message) => bail!("{}", message),
        None => bail!("Device is not connected"),
    }
}

/// Turn a device error into a CLI error with its recovery hint
pub fn device_failure(error: DeviceError) -> anyhow::Error {
    let mut message = error.user_message();
    if let Some(hint) = error.recovery_suggestion() {
        message.push_str(&format!("\n{}", hint));
    }
    anyhow::Error::new(error).context(message)
}
