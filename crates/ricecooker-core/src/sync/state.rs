//! Local synchronizer state
//!
//! Pure bookkeeping with no I/O or timers. The sync task feeds it remote
//! snapshots, local requests and write completions, and publishes
//! [`LocalState::view`] after each step.

use serde_json::Value;
use tracing::{debug, warn};

use crate::command::Command;
use crate::error::DeviceError;
use crate::models::{DeviceRecord, DeviceSettings, SettingsPatch};
use crate::status::{DerivedStatus, Progress};

/// Published view of the selected device
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceView {
    pub device_id: Option<String>,
    /// Last accepted remote record
    pub record: Option<DeviceRecord>,
    /// Settings the controls bind to (local edits included)
    pub settings: DeviceSettings,
    pub status: DerivedStatus,
    pub loading: bool,
    /// User-facing message for the last error
    pub error: Option<String>,
    pub progress: Progress,
    /// Command awaiting confirmation
    pub pending_command: Option<Command>,
}

impl Default for DeviceView {
    fn default() -> Self {
        Self {
            device_id: None,
            record: None,
            settings: DeviceSettings::default(),
            status: DerivedStatus::NotConnected,
            loading: false,
            error: None,
            progress: Progress::zero(),
            pending_command: None,
        }
    }
}

/// What the task should do after a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotOutcome {
    /// No record exists yet; write the default record
    NeedsInitialization,
    /// Stale, duplicate or unusable; nothing changed
    Ignored,
    /// Local state now reflects the snapshot
    Applied { confirmed: Option<Command> },
}

#[derive(Debug, Clone, Copy)]
struct PendingCommand {
    command: Command,
    seq: u64,
    /// `lastUpdated` of the first snapshot that carried this command
    echo_ms: Option<i64>,
}

#[derive(Debug, Default)]
pub struct LocalState {
    view: DeviceView,
    pending: Option<PendingCommand>,
    /// Newest `lastUpdated` accepted for this device
    newest_ms: Option<i64>,
    init_requested: bool,
    /// Settings edited locally and waiting for the debounce
    settings_edited: bool,
    settings_in_flight: usize,
    next_seq: u64,
}

impl LocalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything about the previous device
    ///
    /// Command sequence numbers keep counting so completions from before
    /// the reset can never match.
    pub fn reset(&mut self, device_id: Option<String>) {
        let next_seq = self.next_seq;
        *self = Self {
            view: DeviceView {
                loading: device_id.is_some(),
                device_id,
                ..DeviceView::default()
            },
            next_seq,
            ..Self::default()
        };
    }

    pub fn device_id(&self) -> Option<&str> {
        self.view.device_id.as_deref()
    }

    pub fn status(&self) -> DerivedStatus {
        self.view.status
    }

    pub fn settings(&self) -> DeviceSettings {
        self.view.settings
    }

    pub fn view(&self) -> DeviceView {
        self.view.clone()
    }

    /// Local settings must not be replaced by remote values
    pub fn settings_dirty(&self) -> bool {
        self.settings_edited || self.settings_in_flight > 0
    }

    /// Fold a remote notification into local state
    pub fn apply_snapshot(&mut self, snapshot: Option<Value>, now_ms: i64) -> SnapshotOutcome {
        let Some(value) = snapshot else {
            if self.view.record.is_none() && !self.init_requested {
                self.init_requested = true;
                return SnapshotOutcome::NeedsInitialization;
            }
            debug!("Ignoring empty snapshot");
            return SnapshotOutcome::Ignored;
        };

        let record = DeviceRecord::from_value(&value);

        if let (Some(newest), Some(stamp)) = (self.newest_ms, record.last_updated_ms) {
            if stamp < newest {
                debug!(
                    "Dropping out-of-order snapshot ({} older than {})",
                    stamp, newest
                );
                return SnapshotOutcome::Ignored;
            }
        }
        if let Some(stamp) = record.last_updated_ms {
            self.newest_ms = Some(stamp);
        }

        let confirmed = self.check_pending(&record);

        if !self.settings_dirty() {
            self.view.settings = record.settings;
        }
        self.view.status = match self.pending {
            Some(_) => DerivedStatus::SendingCommand,
            None => DerivedStatus::from_record(&record),
        };
        self.view.record = Some(record);
        self.view.loading = false;
        self.view.pending_command = self.pending.map(|p| p.command);
        self.refresh_progress(now_ms);

        SnapshotOutcome::Applied { confirmed }
    }

    /// Resolve the pending command against a newly accepted record
    fn check_pending(&mut self, record: &DeviceRecord) -> Option<Command> {
        let pending = self.pending.as_mut()?;

        if pending.command.is_confirmed_by(record.current_action) {
            let command = pending.command;
            self.pending = None;
            return Some(command);
        }

        if record.command == Some(pending.command) {
            if pending.echo_ms.is_none() {
                pending.echo_ms = Some(record.last_updated_ms.unwrap_or_default());
            }
            return None;
        }

        // The firmware cleared the command after we saw it land, so it was
        // picked up even though the action already moved past the expected
        // one (a short cook finishing as done, for example)
        if pending.echo_ms.is_some() {
            let command = pending.command;
            self.pending = None;
            return Some(command);
        }

        None
    }

    /// Adopt the default record after writing it
    ///
    /// A snapshot that already arrived takes precedence.
    pub fn adopt_default(&mut self) -> bool {
        if self.view.record.is_some() {
            return false;
        }

        let record = DeviceRecord::from_value(&DeviceRecord::default_value());
        self.view.settings = record.settings;
        self.view.status = DerivedStatus::from_record(&record);
        self.view.record = Some(record);
        self.view.loading = false;
        true
    }

    pub fn initialization_failed(&mut self, error: &DeviceError) {
        self.view.status = DerivedStatus::NotConnected;
        self.view.loading = false;
        self.view.error = Some(error.user_message());
    }

    /// The subscription is gone and will not come back on its own
    pub fn subscription_failed(&mut self, error: &DeviceError) {
        self.pending = None;
        self.settings_edited = false;
        self.view.record = None;
        self.view.status = DerivedStatus::NotConnected;
        self.view.loading = false;
        self.view.error = Some(error.user_message());
        self.view.pending_command = None;
        self.view.progress = Progress::zero();
    }

    pub fn set_error(&mut self, error: &DeviceError) {
        self.view.error = Some(error.user_message());
    }

    /// Start a command if the device can take it
    ///
    /// Returns the sequence number identifying this issue, or `None` when
    /// the call is a no-op.
    pub fn begin_command(&mut self, command: Command) -> Option<u64> {
        let record = self.view.record.as_ref()?;
        if self.pending.is_some() || !self.view.status.is_connected() {
            return None;
        }
        if record.has_outstanding_command() {
            debug!("Ignoring {} while another command is outstanding", command);
            return None;
        }

        let allowed = if command.is_cancel() {
            record.current_action.is_in_progress()
        } else {
            record.current_action.accepts_commands()
        };
        if !allowed {
            debug!(
                "Ignoring {} while device is {}",
                command, record.current_action
            );
            return None;
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        self.pending = Some(PendingCommand {
            command,
            seq,
            echo_ms: None,
        });
        self.view.status = DerivedStatus::SendingCommand;
        self.view.error = None;
        self.view.pending_command = Some(command);
        self.view.progress = Progress::zero();
        Some(seq)
    }

    /// Drop the pending command identified by `seq`
    fn abandon_command(&mut self, seq: u64, now_ms: i64) -> Option<Command> {
        let pending = self.pending.filter(|p| p.seq == seq)?;
        self.pending = None;
        self.view.pending_command = None;
        self.view.status = self
            .view
            .record
            .as_ref()
            .map(DerivedStatus::from_record)
            .unwrap_or(DerivedStatus::NotConnected);
        self.refresh_progress(now_ms);
        Some(pending.command)
    }

    /// The command write failed; revert at once
    pub fn command_write_failed(&mut self, seq: u64, now_ms: i64) -> Option<Command> {
        self.abandon_command(seq, now_ms)
    }

    /// No confirmation arrived in time; revert
    ///
    /// Returns `None` when `seq` was already resolved or superseded.
    pub fn command_timed_out(&mut self, seq: u64, now_ms: i64) -> Option<Command> {
        let command = self.abandon_command(seq, now_ms)?;
        warn!("Command {} timed out", command);
        Some(command)
    }

    /// Apply a settings edit locally
    pub fn apply_settings_patch(&mut self, patch: &SettingsPatch) -> DeviceSettings {
        self.view.settings = patch.merge_into(self.view.settings);
        self.settings_edited = true;
        self.view.settings
    }

    /// The debounce elapsed; hand out the values to write
    pub fn begin_settings_save(&mut self) -> Option<DeviceSettings> {
        if !self.settings_edited {
            return None;
        }
        self.settings_edited = false;
        self.settings_in_flight += 1;
        Some(self.view.settings)
    }

    pub fn settings_saved(&mut self) {
        self.settings_in_flight = self.settings_in_flight.saturating_sub(1);
    }

    /// Local values are kept so an edit in progress is not lost
    pub fn settings_save_failed(&mut self, error: &DeviceError) {
        self.settings_in_flight = self.settings_in_flight.saturating_sub(1);
        self.view.error = Some(error.user_message());
    }

    /// Progress should be ticking
    pub fn is_progress_active(&self) -> bool {
        self.view.status.is_running()
            && self
                .view
                .record
                .as_ref()
                .and_then(DeviceRecord::active_stage)
                .is_some()
    }

    /// Recompute progress at `now_ms`
    pub fn refresh_progress(&mut self, now_ms: i64) {
        let stage = self
            .view
            .record
            .as_ref()
            .and_then(DeviceRecord::active_stage)
            .filter(|_| self.view.status.is_running());

        self.view.progress = match stage {
            Some(stage) => Progress::extrapolate(stage, now_ms),
            None => Progress::zero(),
        };
    }
}
