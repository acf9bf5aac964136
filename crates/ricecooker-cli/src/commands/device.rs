//! Device association handlers

use anyhow::{bail, Result};

use ricecooker_core::profile::{link_device, load_profile, unlink_device};
use ricecooker_core::Config;

use super::open_store;
use crate::output::Output;

fn require_user(config: &Config) -> Result<&str> {
    match config.user_id.as_deref() {
        Some(user_id) => Ok(user_id),
        None => bail!("No user configured. Set one with:\n  ricecooker config set user_id <uid>"),
    }
}

/// List devices linked to the configured user
pub async fn list(config: &Config, output: &Output) -> Result<()> {
    let user_id = require_user(config)?;
    let store = open_store(config)?;

    let profile = load_profile(store.as_ref(), user_id).await?;
    output.print_profile(&profile);
    Ok(())
}

/// Link a device to the configured user
pub async fn link(config: &Config, device_id: String, output: &Output) -> Result<()> {
    let user_id = require_user(config)?;
    let store = open_store(config)?;

    if link_device(store.as_ref(), user_id, &device_id).await? {
        output.success(&format!("Linked device {}", device_id));
    } else {
        output.message(&format!("Device {} already linked", device_id));
    }
    Ok(())
}

/// Remove a device from the configured user
///
/// The device record itself stays in the database.
pub async fn unlink(config: &Config, device_id: String, output: &Output) -> Result<()> {
    let user_id = require_user(config)?;
    let store = open_store(config)?;

    if unlink_device(store.as_ref(), user_id, &device_id).await? {
        output.success(&format!("Unlinked device {}", device_id));
    } else {
        output.message(&format!("Device {} was not linked", device_id));
    }
    Ok(())
}
