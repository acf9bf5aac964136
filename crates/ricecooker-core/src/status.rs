//! Derived status and progress
//!
//! The status shown to the user is a pure function of the record's current
//! action plus local optimism. Progress is extrapolated locally from the
//! running stage and is presentation-only.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::models::{CurrentAction, DeviceRecord, Stage};

/// Current wall-clock time in milliseconds since the epoch
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// User-facing device status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DerivedStatus {
    NotConnected,
    Ready,
    SendingCommand,
    Dispensing,
    Washing,
    Cooking,
    Done,
    Canceled,
}

impl DerivedStatus {
    /// Fixed mapping from the record's action
    pub fn from_action(action: CurrentAction) -> Self {
        match action {
            CurrentAction::Idle => DerivedStatus::Ready,
            CurrentAction::DispenseRice => DerivedStatus::Dispensing,
            CurrentAction::AddWater => DerivedStatus::Washing,
            CurrentAction::Cook => DerivedStatus::Cooking,
            CurrentAction::Done => DerivedStatus::Done,
            CurrentAction::Canceled => DerivedStatus::Canceled,
        }
    }

    /// Status of a record with no local command pending
    ///
    /// An idle device carrying a start command shows as sending.
    pub fn from_record(record: &DeviceRecord) -> Self {
        if record.has_outstanding_command() {
            DerivedStatus::SendingCommand
        } else {
            DerivedStatus::from_action(record.current_action)
        }
    }

    /// A timed activity is running
    pub fn is_running(self) -> bool {
        matches!(
            self,
            DerivedStatus::Dispensing | DerivedStatus::Washing | DerivedStatus::Cooking
        )
    }

    pub fn is_connected(self) -> bool {
        self != DerivedStatus::NotConnected
    }

    /// Settings may be edited: connected and nothing running
    pub fn allows_settings(self) -> bool {
        self.is_connected() && !self.is_running()
    }

    /// Operator-facing label
    pub fn label(self) -> &'static str {
        match self {
            DerivedStatus::NotConnected => "NOT CONNECTED",
            DerivedStatus::Ready => "SYSTEM READY",
            DerivedStatus::SendingCommand => "SENDING...",
            DerivedStatus::Dispensing => "DISPENSING RICE",
            DerivedStatus::Washing => "ADDING WATER",
            DerivedStatus::Cooking => "COOKING",
            DerivedStatus::Done => "COOKING COMPLETE",
            DerivedStatus::Canceled => "OPERATION CANCELED",
        }
    }

    /// Wire-style name, e.g. `SENDING_COMMAND`
    pub fn as_str(self) -> &'static str {
        match self {
            DerivedStatus::NotConnected => "NOT_CONNECTED",
            DerivedStatus::Ready => "READY",
            DerivedStatus::SendingCommand => "SENDING_COMMAND",
            DerivedStatus::Dispensing => "DISPENSING",
            DerivedStatus::Washing => "WASHING",
            DerivedStatus::Cooking => "COOKING",
            DerivedStatus::Done => "DONE",
            DerivedStatus::Canceled => "CANCELED",
        }
    }
}

impl fmt::Display for DerivedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extrapolated progress of the running stage
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Progress {
    pub time_remaining_secs: f64,
    /// 0 to 100
    pub percent: f64,
}

impl Progress {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Progress of `stage` at wall-clock time `now_ms`
    ///
    /// Clock skew that puts `now_ms` before the stage start counts as zero
    /// elapsed time.
    pub fn extrapolate(stage: &Stage, now_ms: i64) -> Self {
        if stage.duration_secs <= 0.0 {
            return Self::zero();
        }

        let elapsed = (now_ms - stage.start_time_ms).max(0) as f64 / 1000.0;
        Self {
            time_remaining_secs: (stage.duration_secs - elapsed).max(0.0),
            percent: (100.0 * elapsed / stage.duration_secs).min(100.0),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.time_remaining_secs == 0.0 && self.percent == 0.0
    }

    /// Remaining time rounded up to whole seconds
    pub fn remaining_whole_secs(&self) -> u64 {
        self.time_remaining_secs.ceil() as u64
    }

    /// Remaining time as `MM:SS`
    pub fn clock(&self) -> String {
        let secs = self.remaining_whole_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StageName;

    fn stage(start_time_ms: i64, duration_secs: f64) -> Stage {
        Stage {
            name: StageName::Cooking,
            start_time_ms,
            duration_secs,
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            DerivedStatus::from_action(CurrentAction::Idle),
            DerivedStatus::Ready
        );
        assert_eq!(
            DerivedStatus::from_action(CurrentAction::DispenseRice),
            DerivedStatus::Dispensing
        );
        assert_eq!(
            DerivedStatus::from_action(CurrentAction::AddWater),
            DerivedStatus::Washing
        );
        assert_eq!(
            DerivedStatus::from_action(CurrentAction::Canceled),
            DerivedStatus::Canceled
        );
        assert!(DerivedStatus::Cooking.is_running());
        assert!(!DerivedStatus::SendingCommand.is_running());
        assert!(!DerivedStatus::NotConnected.is_connected());
        assert!(DerivedStatus::SendingCommand.allows_settings());
        assert!(DerivedStatus::Done.allows_settings());
        assert!(!DerivedStatus::Washing.allows_settings());
        assert!(!DerivedStatus::NotConnected.allows_settings());
    }

    #[test]
    fn test_status_from_record() {
        let waiting = DeviceRecord::from_value(&serde_json::json!({
            "currentAction": "idle",
            "command": {"dispense": true},
        }));
        assert_eq!(
            DerivedStatus::from_record(&waiting),
            DerivedStatus::SendingCommand
        );

        let done = DeviceRecord::from_value(&serde_json::json!({
            "currentAction": "done",
            "command": {"cook": true},
        }));
        assert_eq!(DerivedStatus::from_record(&done), DerivedStatus::Done);
    }

    #[test]
    fn test_status_names() {
        assert_eq!(DerivedStatus::SendingCommand.to_string(), "SENDING_COMMAND");
        assert_eq!(
            serde_json::to_string(&DerivedStatus::NotConnected).unwrap(),
            "\"NOT_CONNECTED\""
        );
        assert_eq!(DerivedStatus::Done.label(), "COOKING COMPLETE");
    }

    #[test]
    fn test_progress_at_half_time() {
        let start = 1_700_000_000_000;
        let progress = Progress::extrapolate(&stage(start, 60.0), start + 30_000);

        assert!((progress.percent - 50.0).abs() < 0.01);
        assert!((progress.time_remaining_secs - 30.0).abs() < 0.01);
        assert_eq!(progress.clock(), "00:30");
    }

    #[test]
    fn test_progress_is_clamped() {
        let start = 1_000_000;

        let late = Progress::extrapolate(&stage(start, 10.0), start + 60_000);
        assert_eq!(late.percent, 100.0);
        assert_eq!(late.time_remaining_secs, 0.0);

        let early = Progress::extrapolate(&stage(start, 10.0), start - 5_000);
        assert_eq!(early.percent, 0.0);
        assert_eq!(early.time_remaining_secs, 10.0);
    }

    #[test]
    fn test_clock_rounds_up() {
        let progress = Progress {
            time_remaining_secs: 61.2,
            percent: 10.0,
        };
        assert_eq!(progress.remaining_whole_secs(), 62);
        assert_eq!(progress.clock(), "01:02");
        assert!(Progress::zero().is_zero());
    }
}
