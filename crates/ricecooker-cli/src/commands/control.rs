//! Command and settings handlers
//!
//! Each handler runs the synchronizer just long enough to see its request
//! through: a command until the device confirms it (or the timeout fires),
//! a settings change until the debounced save lands.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::debug;

use ricecooker_core::{
    Command, Config, DeviceRecord, DeviceSyncHandle, Preset, SettingsPatch, SyncEvent,
};

use super::{connect, device_failure, resolve_device};
use crate::output::Output;

/// Extra wait on top of the command timeout before giving up locally
const GRACE: Duration = Duration::from_secs(2);

/// Issue `command` and wait for the outcome
pub async fn issue(
    config: &Config,
    device: Option<String>,
    command: Command,
    output: &Output,
) -> Result<()> {
    let device_id = resolve_device(config, device)?;
    let mut sync = connect(config, &device_id).await?;

    let record = sync.view().record.unwrap_or_default();
    check_accepts(command, &record)?;

    sync.take_events();
    sync.issue(command);
    debug!("Issued {} to {}", command, device_id);

    let wait = config.sync_options().command_timeout + GRACE;
    let outcome = tokio::time::timeout(wait, wait_for_command(&mut sync, command)).await;
    sync.shutdown();

    match outcome {
        Ok(result) => result?,
        Err(_) => bail!("Gave up waiting for the device after {}s", wait.as_secs()),
    }

    output.success(&format!("Device {} accepted {}", device_id, command));
    Ok(())
}

/// Fail early when the device would ignore `command`
fn check_accepts(command: Command, record: &DeviceRecord) -> Result<()> {
    let action = record.current_action;
    if record.has_outstanding_command() {
        bail!("Device has not picked up its last command yet. Try again shortly.");
    }
    if command.is_cancel() && !action.is_in_progress() {
        bail!("Nothing to cancel: device is {}", action);
    }
    if !command.is_cancel() && !action.accepts_commands() {
        bail!("Device is busy ({}). Cancel it first.", action);
    }
    Ok(())
}

async fn wait_for_command(sync: &mut DeviceSyncHandle, command: Command) -> Result<()> {
    while let Some(event) = sync.next_event().await {
        match event {
            SyncEvent::CommandConfirmed(confirmed) if confirmed == command => return Ok(()),
            SyncEvent::Error(e) => return Err(device_failure(e)),
            _ => {}
        }
    }
    bail!("Device sync stopped unexpectedly")
}

/// Build the settings change from the command-line flags
pub fn settings_patch(
    water: Option<u32>,
    dispense: Option<u32>,
    cook: Option<u32>,
    preset: Option<Preset>,
) -> SettingsPatch {
    let base = preset.map(Preset::patch).unwrap_or_default();
    SettingsPatch {
        pump_time_secs: water.or(base.pump_time_secs),
        dispense_time_secs: dispense.or(base.dispense_time_secs),
        cook_time_mins: cook.or(base.cook_time_mins),
    }
}

/// Change settings, or print them when `patch` is empty
pub async fn settings(
    config: &Config,
    device: Option<String>,
    patch: SettingsPatch,
    output: &Output,
) -> Result<()> {
    patch.validate().map_err(device_failure)?;
    let device_id = resolve_device(config, device)?;
    let mut sync = connect(config, &device_id).await?;

    if patch.is_empty() {
        output.print_settings(&sync.view().settings);
        sync.shutdown();
        return Ok(());
    }

    sync.take_events();
    sync.update_settings(patch).map_err(device_failure)?;

    let wait = config.sync_options().settings_debounce + Duration::from_secs(15);
    let outcome = tokio::time::timeout(wait, wait_for_save(&mut sync))
        .await
        .context("Timed out saving settings")?;
    let settings = sync.view().settings;
    sync.shutdown();
    outcome?;

    if output.is_json() {
        output.print_settings(&settings);
    } else {
        output.success(&format!(
            "Saved settings: water {}s, dispense {}s, cook {} min",
            settings.pump_time_secs, settings.dispense_time_secs, settings.cook_time_mins
        ));
    }
    Ok(())
}

async fn wait_for_save(sync: &mut DeviceSyncHandle) -> Result<()> {
    while let Some(event) = sync.next_event().await {
        match event {
            SyncEvent::SettingsSaved => return Ok(()),
            SyncEvent::Error(e) => return Err(device_failure(e)),
            _ => {}
        }
    }
    bail!("Device sync stopped unexpectedly")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: serde_json::Value) -> DeviceRecord {
        DeviceRecord::from_value(&value)
    }

    #[test]
    fn test_check_accepts() {
        let idle = record(json!({"currentAction": "idle"}));
        let done = record(json!({"currentAction": "done"}));
        let washing = record(json!({"currentAction": "add water"}));
        let cooking = record(json!({"currentAction": "cook"}));
        let canceled = record(json!({"currentAction": "canceled"}));

        assert!(check_accepts(Command::Cook, &idle).is_ok());
        assert!(check_accepts(Command::Cook, &done).is_ok());
        assert!(check_accepts(Command::Cook, &washing).is_err());
        assert!(check_accepts(Command::Cancel, &cooking).is_ok());
        assert!(check_accepts(Command::Cancel, &canceled).is_err());
    }

    #[test]
    fn test_outstanding_command_is_refused() {
        let waiting = record(json!({"currentAction": "idle", "command": {"cook": true}}));
        assert!(check_accepts(Command::DispenseRice, &waiting).is_err());
        assert!(check_accepts(Command::Cook, &waiting).is_err());
    }

    #[test]
    fn test_flags_override_preset() {
        let patch = settings_patch(None, Some(4), None, Some(Preset::Small));
        assert_eq!(patch.pump_time_secs, Some(5));
        assert_eq!(patch.dispense_time_secs, Some(4));
        assert_eq!(patch.cook_time_mins, Some(20));

        assert!(settings_patch(None, None, None, None).is_empty());
    }
}
