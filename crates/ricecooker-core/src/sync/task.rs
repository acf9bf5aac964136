//! Device sync task
//!
//! One spawned task per synchronizer owns the [`LocalState`], the live
//! subscription and every timer. Remote notifications, requests from the
//! handle, the progress ticker, the command timeout, the settings debounce
//! and write completions all resume the same `select!` loop, so state is
//! never touched concurrently.
//!
//! Subscribing and writing run in their own tasks and report back over an
//! internal channel tagged with the generation they were issued under, so a
//! slow store never holds up the loop. Selecting another device bumps the
//! generation, so completions for the old device are dropped.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::state::{DeviceView, LocalState, SnapshotOutcome};
use crate::command::{Command, CommandWire};
use crate::error::{DeviceError, StoreError};
use crate::models::{device_path, settings_path, DeviceRecord, Preset, SettingsPatch};
use crate::remote::{RemoteStore, StoreEvent, Subscription};
use crate::status::{now_millis, DerivedStatus};

/// Timing and wire options for the synchronizer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
    /// Quiet period after the last settings edit before saving
    pub settings_debounce: Duration,
    /// How long a command may go unconfirmed
    pub command_timeout: Duration,
    /// Progress refresh interval while a stage runs
    pub progress_tick: Duration,
    pub command_wire: CommandWire,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            settings_debounce: Duration::from_millis(400),
            command_timeout: Duration::from_secs(8),
            progress_tick: Duration::from_millis(500),
            command_wire: CommandWire::default(),
        }
    }
}

/// Events emitted by the sync task
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Derived status changed
    StatusChanged(DerivedStatus),
    /// A remote record was accepted
    RecordUpdated,
    /// Debounced settings were persisted
    SettingsSaved,
    /// The device picked up a command
    CommandConfirmed(Command),
    Error(DeviceError),
}

#[derive(Debug)]
enum Request {
    SelectDevice(Option<String>),
    UpdateSettings(SettingsPatch),
    Issue(Command),
    Shutdown,
}

#[derive(Debug)]
enum Completion {
    Subscribed {
        generation: u64,
        path: String,
        result: Result<Subscription, StoreError>,
    },
    Initialized {
        generation: u64,
        result: Result<(), StoreError>,
    },
    SettingsSaved {
        generation: u64,
        result: Result<(), StoreError>,
    },
    CommandSent {
        generation: u64,
        seq: u64,
        result: Result<(), StoreError>,
    },
}

/// Handle to control and observe a sync task
///
/// Dropping the handle stops the task.
pub struct DeviceSyncHandle {
    request_tx: mpsc::UnboundedSender<Request>,
    event_rx: mpsc::UnboundedReceiver<SyncEvent>,
    view_rx: watch::Receiver<DeviceView>,
}

impl DeviceSyncHandle {
    fn send(&self, request: Request) {
        if self.request_tx.send(request).is_err() {
            debug!("Sync task already stopped");
        }
    }

    /// Watch a device, or stop watching with `None`
    pub fn select_device(&self, device_id: Option<String>) {
        self.send(Request::SelectDevice(device_id));
    }

    /// Edit settings locally and schedule a debounced save
    ///
    /// Refused while a stage runs or the device is not connected.
    pub fn update_settings(&self, patch: SettingsPatch) -> Result<(), DeviceError> {
        patch.validate()?;
        let status = self.view_rx.borrow().status;
        if !status.allows_settings() {
            return Err(DeviceError::SettingsLocked { status });
        }
        if !patch.is_empty() {
            self.send(Request::UpdateSettings(patch));
        }
        Ok(())
    }

    pub fn apply_preset(&self, preset: Preset) -> Result<(), DeviceError> {
        self.update_settings(preset.patch())
    }

    /// Issue a command; a no-op unless the device can take it
    pub fn issue(&self, command: Command) {
        self.send(Request::Issue(command));
    }

    pub fn add_water(&self) {
        self.issue(Command::AddWater);
    }

    pub fn dispense_rice(&self) {
        self.issue(Command::DispenseRice);
    }

    pub fn cook(&self) {
        self.issue(Command::Cook);
    }

    pub fn cancel(&self) {
        self.issue(Command::Cancel);
    }

    pub fn shutdown(&self) {
        self.send(Request::Shutdown);
    }

    /// Current view
    pub fn view(&self) -> DeviceView {
        self.view_rx.borrow().clone()
    }

    /// Receiver notified on every view change
    pub fn subscribe_view(&self) -> watch::Receiver<DeviceView> {
        self.view_rx.clone()
    }

    /// Drain pending events
    pub fn take_events(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Wait for the next event
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        self.event_rx.recv().await
    }
}

/// Spawn a synchronizer over `store`
///
/// The task starts with no device selected.
pub fn spawn_device_sync<S: RemoteStore>(store: Arc<S>, options: SyncOptions) -> DeviceSyncHandle {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(DeviceView::default());
    let (done_tx, done_rx) = mpsc::unbounded_channel();

    let task = DeviceSync {
        store,
        options,
        state: LocalState::new(),
        generation: 0,
        subscription: None,
        debounce_at: None,
        command_deadline: None,
        done_tx,
        event_tx,
        view_tx,
    };
    tokio::spawn(task.run(request_rx, done_rx));

    DeviceSyncHandle {
        request_tx,
        event_rx,
        view_rx,
    }
}

struct DeviceSync<S: RemoteStore> {
    store: Arc<S>,
    options: SyncOptions,
    state: LocalState,
    /// Bumped on every device selection
    generation: u64,
    subscription: Option<Subscription>,
    debounce_at: Option<Instant>,
    /// Deadline and sequence number of the pending command
    command_deadline: Option<(Instant, u64)>,
    done_tx: mpsc::UnboundedSender<Completion>,
    event_tx: mpsc::UnboundedSender<SyncEvent>,
    view_tx: watch::Sender<DeviceView>,
}

impl<S: RemoteStore> DeviceSync<S> {
    async fn run(
        mut self,
        mut request_rx: mpsc::UnboundedReceiver<Request>,
        mut done_rx: mpsc::UnboundedReceiver<Completion>,
    ) {
        let mut ticker = time::interval(self.options.progress_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let progress_active = self.state.is_progress_active();
            let command_deadline = self.command_deadline;

            tokio::select! {
                request = request_rx.recv() => match request {
                    Some(Request::SelectDevice(device_id)) => self.select_device(device_id),
                    Some(Request::UpdateSettings(patch)) => self.update_settings(patch),
                    Some(Request::Issue(command)) => self.issue(command),
                    Some(Request::Shutdown) | None => break,
                },
                event = next_store_event(&mut self.subscription) => {
                    self.handle_store_event(event);
                }
                Some(completion) = done_rx.recv() => self.handle_completion(completion),
                _ = sleep_until(self.debounce_at) => {
                    self.debounce_at = None;
                    self.save_settings();
                }
                _ = sleep_until(command_deadline.map(|(at, _)| at)) => {
                    self.command_deadline = None;
                    if let Some((_, seq)) = command_deadline {
                        self.command_timed_out(seq);
                    }
                }
                _ = ticker.tick(), if progress_active => {
                    self.state.refresh_progress(now_millis());
                    self.publish();
                }
            }
        }

        self.subscription = None;
        info!("Device sync stopped");
    }

    fn select_device(&mut self, device_id: Option<String>) {
        self.generation += 1;
        self.subscription = None;
        self.debounce_at = None;
        self.command_deadline = None;
        self.state.reset(device_id.clone());
        self.publish();

        let Some(device_id) = device_id else {
            info!("No device selected");
            return;
        };

        let store = Arc::clone(&self.store);
        let path = device_path(&device_id);
        let generation = self.generation;
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = store.subscribe(&path).await;
            let _ = done_tx.send(Completion::Subscribed {
                generation,
                path,
                result,
            });
        });
    }

    fn handle_store_event(&mut self, event: Option<StoreEvent>) {
        match event {
            Some(StoreEvent::Snapshot(snapshot)) => self.handle_snapshot(snapshot),
            Some(StoreEvent::Error(e)) => self.subscription_failed(e),
            None => self.subscription_failed(StoreError::Unreachable {
                details: "subscription closed".to_string(),
            }),
        }
    }

    fn handle_snapshot(&mut self, snapshot: Option<Value>) {
        match self.state.apply_snapshot(snapshot, now_millis()) {
            SnapshotOutcome::NeedsInitialization => self.initialize(),
            SnapshotOutcome::Ignored => {}
            SnapshotOutcome::Applied { confirmed } => {
                debug!("Applied snapshot, status {}", self.state.status());
                if let Some(command) = confirmed {
                    info!("Device confirmed {}", command);
                    self.command_deadline = None;
                    self.emit(SyncEvent::CommandConfirmed(command));
                }
                self.emit(SyncEvent::RecordUpdated);
            }
        }
        self.publish();
    }

    fn subscription_failed(&mut self, error: StoreError) {
        let error = DeviceError::from_subscription(error);
        warn!("Subscription failed: {}", error);

        self.subscription = None;
        self.debounce_at = None;
        self.command_deadline = None;
        self.state.subscription_failed(&error);
        self.emit(SyncEvent::Error(error));
        self.publish();
    }

    /// Write the default record for a device seen for the first time
    fn initialize(&self) {
        let Some(device_id) = self.state.device_id() else {
            return;
        };
        info!("Creating default record for {}", device_id);

        let store = Arc::clone(&self.store);
        let path = device_path(device_id);
        let generation = self.generation;
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = store.set(&path, DeviceRecord::default_value()).await;
            let _ = done_tx.send(Completion::Initialized { generation, result });
        });
    }

    fn update_settings(&mut self, patch: SettingsPatch) {
        if self.state.device_id().is_none() {
            debug!("Ignoring settings edit with no device selected");
            return;
        }
        if !self.state.status().allows_settings() {
            debug!("Ignoring settings edit while {}", self.state.status());
            return;
        }

        let settings = self.state.apply_settings_patch(&patch);
        debug!("Settings edited locally: {:?}", settings);
        self.debounce_at = Some(Instant::now() + self.options.settings_debounce);
        self.publish();
    }

    fn save_settings(&mut self) {
        let Some(device_id) = self.state.device_id().map(str::to_string) else {
            return;
        };
        let Some(settings) = self.state.begin_settings_save() else {
            return;
        };
        debug!("Saving settings for {}", device_id);

        let store = Arc::clone(&self.store);
        let generation = self.generation;
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = store
                .update(&settings_path(&device_id), settings.to_map())
                .await;
            let _ = done_tx.send(Completion::SettingsSaved { generation, result });
        });
    }

    fn issue(&mut self, command: Command) {
        let Some(device_id) = self.state.device_id().map(str::to_string) else {
            debug!("Ignoring {} with no device selected", command);
            return;
        };
        let Some(seq) = self.state.begin_command(command) else {
            return;
        };
        info!("Sending {} to {}", command, device_id);

        self.command_deadline = Some((Instant::now() + self.options.command_timeout, seq));
        self.publish();

        let store = Arc::clone(&self.store);
        let patch = command.patch(self.options.command_wire);
        let generation = self.generation;
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = store.update(&device_path(&device_id), patch).await;
            let _ = done_tx.send(Completion::CommandSent {
                generation,
                seq,
                result,
            });
        });
    }

    fn command_timed_out(&mut self, seq: u64) {
        if let Some(command) = self.state.command_timed_out(seq, now_millis()) {
            let error = DeviceError::DeviceTimeout {
                command,
                waited_secs: self.options.command_timeout.as_secs(),
            };
            self.state.set_error(&error);
            self.emit(SyncEvent::Error(error));
            self.publish();
        }
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Subscribed {
                generation,
                path,
                result,
            } => {
                if generation != self.generation {
                    debug!("Dropping subscription on {} for a previous selection", path);
                    return;
                }
                match result {
                    Ok(subscription) => {
                        info!("Watching {}", path);
                        self.subscription = Some(subscription);
                    }
                    Err(e) => self.subscription_failed(e),
                }
            }
            Completion::Initialized { generation, result } => {
                if generation != self.generation {
                    return;
                }
                match result {
                    Ok(()) => {
                        if self.state.adopt_default() {
                            self.emit(SyncEvent::RecordUpdated);
                        }
                    }
                    Err(e) => {
                        let error = DeviceError::InitializationFailed {
                            device_id: self.state.device_id().unwrap_or_default().to_string(),
                            details: e.to_string(),
                        };
                        warn!("{}", error);
                        self.state.initialization_failed(&error);
                        self.emit(SyncEvent::Error(error));
                    }
                }
            }
            Completion::SettingsSaved { generation, result } => {
                if generation != self.generation {
                    return;
                }
                match result {
                    Ok(()) => {
                        self.state.settings_saved();
                        self.emit(SyncEvent::SettingsSaved);
                    }
                    Err(e) => {
                        let error = DeviceError::SettingsSaveFailed {
                            details: e.to_string(),
                        };
                        warn!("{}", error);
                        self.state.settings_save_failed(&error);
                        self.emit(SyncEvent::Error(error));
                    }
                }
            }
            Completion::CommandSent {
                generation,
                seq,
                result,
            } => {
                if generation != self.generation {
                    return;
                }
                if let Err(e) = result {
                    if let Some(command) = self.state.command_write_failed(seq, now_millis()) {
                        let error = DeviceError::CommandSendFailed {
                            command,
                            details: e.to_string(),
                        };
                        warn!("{}", error);
                        self.command_deadline = None;
                        self.state.set_error(&error);
                        self.emit(SyncEvent::Error(error));
                    }
                }
            }
        }
        self.publish();
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Publish the view, emitting `StatusChanged` when the status moved
    fn publish(&self) {
        let view = self.state.view();
        let previous = self.view_tx.borrow().status;
        if view.status != previous {
            debug!("Status {} -> {}", previous, view.status);
            self.emit(SyncEvent::StatusChanged(view.status));
        }

        self.view_tx.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

async fn next_store_event(subscription: &mut Option<Subscription>) -> Option<StoreEvent> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
