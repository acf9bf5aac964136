use std::sync::Arc;
use std::time::Duration;

use ricecooker_core::error::StoreError;
use ricecooker_core::remote::{MemoryStore, WriteOp};
use ricecooker_core::status::now_millis;
use ricecooker_core::{
    spawn_device_sync, Command, DerivedStatus, DeviceError, DeviceSettings, DeviceSyncHandle,
    DeviceView, Preset, SettingsPatch, SyncEvent, SyncOptions,
};
use serde_json::{json, Map, Value};

const NOW: i64 = 1_700_000_000_000;
const DEVICE: &str = "cooker-001";

fn patch(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

/// Let the sync task and any spawned writes run to quiescence
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

async fn wait_for_view(
    sync: &DeviceSyncHandle,
    mut predicate: impl FnMut(&DeviceView) -> bool,
) -> DeviceView {
    let mut rx = sync.subscribe_view();
    let view = tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|v| predicate(v)))
        .await
        .expect("view never matched")
        .expect("sync task stopped")
        .clone();
    view
}

async fn store_with_device(action: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(NOW).await;
    store
        .external_set(
            &format!("devices/{}", DEVICE),
            json!({
                "settings": {"washDuration": 5, "dispenseDuration": 10, "cookDuration": 1800},
                "currentAction": action,
                "command": {"add_water": false, "dispense": false, "cook": false, "cancel": false},
                "lastUpdated": {".sv": "timestamp"},
            }),
        )
        .await;
    store
}

async fn connect(store: &Arc<MemoryStore>) -> DeviceSyncHandle {
    let mut sync = spawn_device_sync(Arc::clone(store), SyncOptions::default());
    sync.select_device(Some(DEVICE.to_string()));
    wait_for_view(&sync, |v| v.record.is_some() && !v.loading).await;
    sync.take_events();
    sync
}

fn timeouts(events: &[SyncEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SyncEvent::Error(DeviceError::DeviceTimeout { .. })))
        .count()
}

#[tokio::test(start_paused = true)]
async fn test_unknown_device_gets_default_record() {
    let store = Arc::new(MemoryStore::new());
    store.set_clock(NOW).await;
    let sync = spawn_device_sync(Arc::clone(&store), SyncOptions::default());
    assert_eq!(sync.view().status, DerivedStatus::NotConnected);

    sync.select_device(Some(DEVICE.to_string()));
    let view = wait_for_view(&sync, |v| v.status == DerivedStatus::Ready).await;

    assert!(!view.loading);
    assert_eq!(view.settings, DeviceSettings::default());

    let record = store.value("devices/cooker-001").await.unwrap();
    assert_eq!(record["currentAction"], json!("idle"));
    assert_eq!(record["settings"]["cookDuration"], json!(1800));
    assert_eq!(record["command"]["cook"], json!(false));
    assert_eq!(record["lastUpdated"], json!(NOW));

    settle().await;
    let writes = store.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].op, WriteOp::Set);
}

#[tokio::test(start_paused = true)]
async fn test_failed_initialization_stays_not_connected() {
    let store = Arc::new(MemoryStore::new());
    store
        .fail_writes(Some(StoreError::PermissionDenied {
            path: "devices/cooker-001".to_string(),
        }))
        .await;
    let mut sync = spawn_device_sync(Arc::clone(&store), SyncOptions::default());

    sync.select_device(Some(DEVICE.to_string()));
    let view = wait_for_view(&sync, |v| v.error.is_some()).await;

    assert_eq!(view.status, DerivedStatus::NotConnected);
    assert!(!view.loading);
    assert!(sync.take_events().iter().any(|e| matches!(
        e,
        SyncEvent::Error(DeviceError::InitializationFailed { .. })
    )));
}

#[tokio::test(start_paused = true)]
async fn test_cook_writes_once_and_confirms() {
    let store = store_with_device("idle").await;
    let mut sync = connect(&store).await;
    store.clear_writes().await;

    sync.cook();
    wait_for_view(&sync, |v| v.status == DerivedStatus::SendingCommand).await;
    // A second request while pending is ignored
    sync.cook();
    settle().await;

    let writes = store.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].op, WriteOp::Update);
    assert_eq!(writes[0].path, "devices/cooker-001");
    assert_eq!(writes[0].value["command/cook"], json!(true));
    assert_eq!(writes[0].value["command/dispense"], json!(false));
    assert_eq!(writes[0].value["lastUpdated"], json!({".sv": "timestamp"}));
    // Our own echo still shows the device idle
    assert_eq!(sync.view().status, DerivedStatus::SendingCommand);

    // Firmware starts cooking
    store
        .external_update(
            "devices/cooker-001",
            patch(json!({
                "currentAction": "cook",
                "command/cook": false,
                "currentStage": {"name": "COOKING", "startTime": now_millis(), "duration": 1800},
            })),
        )
        .await;
    let view = wait_for_view(&sync, |v| v.status == DerivedStatus::Cooking).await;
    assert_eq!(view.pending_command, None);
    assert!(!view.progress.is_zero());

    let events = sync.take_events();
    assert!(events.contains(&SyncEvent::CommandConfirmed(Command::Cook)));
    assert!(events.contains(&SyncEvent::StatusChanged(DerivedStatus::Cooking)));

    // Busy device: start commands are no-ops
    sync.dispense_rice();
    sync.add_water();
    settle().await;
    assert_eq!(store.writes().await.len(), 1);
    assert_eq!(sync.view().status, DerivedStatus::Cooking);

    // The confirmed command never times out
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(timeouts(&sync.take_events()), 0);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_command_times_out_once() {
    let store = store_with_device("done").await;
    let mut sync = connect(&store).await;

    sync.add_water();
    wait_for_view(&sync, |v| v.status == DerivedStatus::SendingCommand).await;

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(sync.view().status, DerivedStatus::SendingCommand);

    tokio::time::sleep(Duration::from_secs(2)).await;
    let view = wait_for_view(&sync, |v| v.status == DerivedStatus::Done).await;
    assert!(view.error.unwrap().contains("did not respond"));

    tokio::time::sleep(Duration::from_secs(20)).await;
    let events = sync.take_events();
    assert_eq!(timeouts(&events), 1);
    assert!(events.contains(&SyncEvent::Error(DeviceError::DeviceTimeout {
        command: Command::AddWater,
        waited_secs: 8,
    })));
}

#[tokio::test(start_paused = true)]
async fn test_failed_command_write_reverts_immediately() {
    let store = store_with_device("idle").await;
    let mut sync = connect(&store).await;
    store
        .fail_writes(Some(StoreError::Unreachable {
            details: "offline".to_string(),
        }))
        .await;

    sync.dispense_rice();
    settle().await;

    let view = sync.view();
    assert_eq!(view.status, DerivedStatus::Ready);
    assert_eq!(view.pending_command, None);
    assert!(view.error.is_some());

    tokio::time::sleep(Duration::from_secs(10)).await;
    let events = sync.take_events();
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::Error(DeviceError::CommandSendFailed {
            command: Command::DispenseRice,
            ..
        })
    )));
    assert_eq!(timeouts(&events), 0);
}

#[tokio::test(start_paused = true)]
async fn test_settings_edits_coalesce_into_one_write() {
    let store = store_with_device("idle").await;
    let mut sync = connect(&store).await;
    store.clear_writes().await;

    sync.update_settings(SettingsPatch::new().cook_time(40)).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    sync.update_settings(SettingsPatch::new().cook_time(45)).unwrap();
    sync.update_settings(SettingsPatch::new().pump_time(12)).unwrap();

    let view = wait_for_view(&sync, |v| v.settings.pump_time_secs == 12).await;
    assert_eq!(view.settings.cook_time_mins, 45);
    assert!(store.writes().await.is_empty());

    tokio::time::sleep(Duration::from_secs(1)).await;
    let writes = store.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].path, "devices/cooker-001/settings");
    assert_eq!(
        writes[0].value,
        json!({"washDuration": 12, "dispenseDuration": 10, "cookDuration": 2700})
    );
    assert_eq!(
        store.value("devices/cooker-001/settings/cookDuration").await,
        Some(json!(2700))
    );

    let events = sync.take_events();
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == SyncEvent::SettingsSaved)
            .count(),
        1
    );
    assert_eq!(sync.view().settings.cook_time_mins, 45);
}

#[tokio::test(start_paused = true)]
async fn test_invalid_settings_are_rejected_locally() {
    let store = store_with_device("idle").await;
    let sync = connect(&store).await;

    let err = sync
        .update_settings(SettingsPatch::new().cook_time(200))
        .unwrap_err();
    assert!(matches!(err, DeviceError::InvalidSetting { max: 120, .. }));

    sync.apply_preset(Preset::Large).unwrap();
    let view = wait_for_view(&sync, |v| v.settings.cook_time_mins == 45).await;
    assert_eq!(view.settings.pump_time_secs, 15);
    assert_eq!(view.settings.dispense_time_secs, 8);
}

#[tokio::test(start_paused = true)]
async fn test_failed_settings_save_keeps_local_values() {
    let store = store_with_device("idle").await;
    let mut sync = connect(&store).await;
    store
        .fail_writes(Some(StoreError::Unreachable {
            details: "offline".to_string(),
        }))
        .await;

    sync.update_settings(SettingsPatch::new().dispense_time(20))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(sync.view().settings.dispense_time_secs, 20);
    assert!(sync.take_events().iter().any(|e| matches!(
        e,
        SyncEvent::Error(DeviceError::SettingsSaveFailed { .. })
    )));
}

#[tokio::test(start_paused = true)]
async fn test_dispensing_to_ready_resets_progress() {
    let store = store_with_device("idle").await;
    let sync = connect(&store).await;

    sync.dispense_rice();
    wait_for_view(&sync, |v| v.status == DerivedStatus::SendingCommand).await;

    store
        .external_update(
            "devices/cooker-001",
            patch(json!({
                "currentAction": "dispense rice",
                "command/dispense": false,
                "currentStage": {"name": "DISPENSING", "startTime": now_millis(), "duration": 10},
            })),
        )
        .await;
    let view = wait_for_view(&sync, |v| v.status == DerivedStatus::Dispensing).await;
    assert!(view.progress.time_remaining_secs > 0.0);

    // Ticks keep the view fresh while the stage runs
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(sync.view().status, DerivedStatus::Dispensing);

    store
        .external_update(
            "devices/cooker-001",
            patch(json!({"currentAction": "idle", "currentStage": null})),
        )
        .await;
    let view = wait_for_view(&sync, |v| v.status == DerivedStatus::Ready).await;
    assert!(view.progress.is_zero());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_clears_stage_and_confirms() {
    let store = store_with_device("cook").await;
    store
        .external_update(
            "devices/cooker-001",
            patch(json!({
                "currentStage": {"name": "COOKING", "startTime": now_millis(), "duration": 1800},
            })),
        )
        .await;
    let mut sync = connect(&store).await;
    assert_eq!(sync.view().status, DerivedStatus::Cooking);
    store.clear_writes().await;

    sync.cancel();
    let view = wait_for_view(&sync, |v| v.status == DerivedStatus::SendingCommand).await;
    assert!(view.progress.is_zero());
    settle().await;

    let writes = store.writes().await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].value["command/cancel"], json!(true));
    assert_eq!(writes[0].value["currentStage"], Value::Null);
    assert_eq!(store.value("devices/cooker-001/currentStage").await, None);

    store
        .external_update(
            "devices/cooker-001",
            patch(json!({"currentAction": "canceled", "command/cancel": false})),
        )
        .await;
    wait_for_view(&sync, |v| v.status == DerivedStatus::Canceled).await;
    assert!(sync
        .take_events()
        .contains(&SyncEvent::CommandConfirmed(Command::Cancel)));

    // Cancel is only accepted while something runs
    sync.cancel();
    settle().await;
    assert_eq!(store.writes().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_snapshot_is_ignored_while_sending() {
    let store = store_with_device("idle").await;
    let sync = connect(&store).await;

    sync.cook();
    wait_for_view(&sync, |v| v.status == DerivedStatus::SendingCommand).await;

    store
        .inject_snapshot(
            "devices/cooker-001",
            Some(json!({"currentAction": "idle", "lastUpdated": NOW - 5_000})),
        )
        .await;
    settle().await;
    assert_eq!(sync.view().status, DerivedStatus::SendingCommand);
}

#[tokio::test(start_paused = true)]
async fn test_permission_denied_is_reported() {
    let store = Arc::new(MemoryStore::new());
    store.deny("devices/secret").await;
    let mut sync = spawn_device_sync(Arc::clone(&store), SyncOptions::default());

    sync.select_device(Some("secret".to_string()));
    let view = wait_for_view(&sync, |v| v.error.is_some()).await;

    assert_eq!(view.status, DerivedStatus::NotConnected);
    assert!(!view.loading);
    assert!(view.error.unwrap().starts_with("Permission denied"));
    assert!(sync.take_events().contains(&SyncEvent::Error(
        DeviceError::PermissionDenied {
            path: "devices/secret".to_string()
        }
    )));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_connection_is_terminal() {
    let store = store_with_device("idle").await;
    let sync = connect(&store).await;

    store
        .disconnect_all(StoreError::Unreachable {
            details: "connection reset".to_string(),
        })
        .await;
    let view = wait_for_view(&sync, |v| v.status == DerivedStatus::NotConnected).await;
    assert!(view.error.unwrap().contains("Could not connect"));

    // Re-selecting the device is the way back
    sync.select_device(Some(DEVICE.to_string()));
    let view = wait_for_view(&sync, |v| v.status == DerivedStatus::Ready).await;
    assert_eq!(view.error, None);
}

#[tokio::test(start_paused = true)]
async fn test_switching_devices_tears_down_the_old_one() {
    let store = store_with_device("idle").await;
    store
        .external_set(
            "devices/cooker-002",
            json!({"currentAction": "done", "lastUpdated": NOW}),
        )
        .await;
    let mut sync = connect(&store).await;

    sync.cook();
    wait_for_view(&sync, |v| v.status == DerivedStatus::SendingCommand).await;

    sync.select_device(Some("cooker-002".to_string()));
    let view = wait_for_view(&sync, |v| {
        v.device_id.as_deref() == Some("cooker-002") && !v.loading
    })
    .await;
    assert_eq!(view.status, DerivedStatus::Done);
    assert_eq!(view.pending_command, None);
    assert_eq!(store.subscriber_count().await, 1);

    // Changes to the old device no longer reach us
    store
        .external_update(
            "devices/cooker-001",
            patch(json!({"currentAction": "cook"})),
        )
        .await;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(sync.view().status, DerivedStatus::Done);
    assert_eq!(timeouts(&sync.take_events()), 0);

    sync.select_device(None);
    let view = wait_for_view(&sync, |v| v.device_id.is_none()).await;
    assert_eq!(view.status, DerivedStatus::NotConnected);
    assert!(!view.loading);
    settle().await;
    assert_eq!(store.subscriber_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_command_left_by_another_client_is_respected() {
    let store = store_with_device("idle").await;
    store
        .external_update("devices/cooker-001", patch(json!({"command/cook": true})))
        .await;
    let sync = connect(&store).await;

    let view = sync.view();
    assert_eq!(view.status, DerivedStatus::SendingCommand);
    assert_eq!(view.pending_command, None);

    store.clear_writes().await;
    sync.dispense_rice();
    sync.cook();
    settle().await;
    assert!(store.writes().await.is_empty());
    assert_eq!(
        store.value("devices/cooker-001/command/cook").await,
        Some(json!(true))
    );
    assert_eq!(
        store.value("devices/cooker-001/command/dispense").await,
        Some(json!(false))
    );

    // The firmware picks the other client's cook up
    store
        .external_update(
            "devices/cooker-001",
            patch(json!({"currentAction": "cook", "command/cook": false})),
        )
        .await;
    wait_for_view(&sync, |v| v.status == DerivedStatus::Cooking).await;
}

#[tokio::test(start_paused = true)]
async fn test_stalled_subscription_does_not_block_requests() {
    let store = store_with_device("idle").await;
    store.stall_subscriptions(true).await;
    let sync = spawn_device_sync(Arc::clone(&store), SyncOptions::default());

    sync.select_device(Some(DEVICE.to_string()));
    settle().await;
    assert!(sync.view().loading);

    // Later requests are still served while the subscribe hangs
    sync.select_device(None);
    let view = wait_for_view(&sync, |v| v.device_id.is_none()).await;
    assert!(!view.loading);
    assert_eq!(view.status, DerivedStatus::NotConnected);

    store.stall_subscriptions(false).await;
    sync.select_device(Some(DEVICE.to_string()));
    let view = wait_for_view(&sync, |v| v.status == DerivedStatus::Ready).await;
    assert_eq!(view.device_id.as_deref(), Some(DEVICE));
    assert_eq!(store.subscriber_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_saved_settings_echo_is_stable() {
    let store = store_with_device("idle").await;
    let mut sync = connect(&store).await;

    sync.update_settings(SettingsPatch::new().cook_time(45).pump_time(12))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(sync.take_events().contains(&SyncEvent::SettingsSaved));

    let merged = DeviceSettings {
        pump_time_secs: 12,
        dispense_time_secs: 10,
        cook_time_mins: 45,
    };
    assert_eq!(sync.view().settings, merged);

    // Re-deliver what the store now holds, twice
    let stored = store.value("devices/cooker-001").await;
    store
        .inject_snapshot("devices/cooker-001", stored.clone())
        .await;
    settle().await;
    let first = sync.view();
    assert_eq!(first.settings, merged);
    assert_eq!(first.record.as_ref().map(|r| r.settings), Some(merged));

    store.inject_snapshot("devices/cooker-001", stored).await;
    settle().await;
    assert_eq!(sync.view(), first);
    assert!(store
        .writes()
        .await
        .iter()
        .all(|w| w.path == "devices/cooker-001/settings"));
}

#[tokio::test(start_paused = true)]
async fn test_held_back_echo_times_out() {
    let store = store_with_device("idle").await;
    let mut sync = connect(&store).await;

    store.pause_notifications(true).await;
    sync.cook();
    wait_for_view(&sync, |v| v.status == DerivedStatus::SendingCommand).await;

    // The device starts, but we never hear about it
    store
        .external_update("devices/cooker-001", patch(json!({"currentAction": "cook"})))
        .await;
    tokio::time::sleep(Duration::from_secs(9)).await;

    let view = sync.view();
    assert_eq!(view.status, DerivedStatus::Ready);
    assert_eq!(view.pending_command, None);
    assert_eq!(timeouts(&sync.take_events()), 1);

    // Notifications resume with the device already cooking
    store.pause_notifications(false).await;
    store
        .external_update(
            "devices/cooker-001",
            patch(json!({"command/cook": false})),
        )
        .await;
    wait_for_view(&sync, |v| v.status == DerivedStatus::Cooking).await;
    assert!(!sync
        .take_events()
        .contains(&SyncEvent::CommandConfirmed(Command::Cook)));
}

#[tokio::test(start_paused = true)]
async fn test_settings_locked_while_running() {
    let store = store_with_device("cook").await;
    let sync = connect(&store).await;
    store.clear_writes().await;

    let err = sync
        .update_settings(SettingsPatch::new().cook_time(40))
        .unwrap_err();
    assert_eq!(
        err,
        DeviceError::SettingsLocked {
            status: DerivedStatus::Cooking
        }
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(store.writes().await.is_empty());
    assert_eq!(sync.view().settings.cook_time_mins, 30);
}
