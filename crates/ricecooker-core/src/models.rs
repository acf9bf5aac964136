//! Data models for the rice cooker
//!
//! Defines the device record as stored remotely and the typed local view
//! of it: settings, current action and the running stage.
//!
//! Decoding never fails. The record is written by the firmware and by
//! dashboard clients, sometimes partially; each field falls back to its
//! default when missing or malformed.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::warn;

use crate::command::Command;
use crate::error::DeviceError;
use crate::remote::ServerValue;

/// Allowed water pump time in seconds
pub const PUMP_TIME_RANGE: RangeInclusive<u32> = 1..=30;
/// Allowed rice dispense time in seconds
pub const DISPENSE_TIME_RANGE: RangeInclusive<u32> = 1..=30;
/// Allowed cook time in minutes
pub const COOK_TIME_RANGE: RangeInclusive<u32> = 10..=120;

/// Path of a device record
pub fn device_path(device_id: &str) -> String {
    format!("devices/{}", device_id)
}

/// Path of a device's settings object
pub fn settings_path(device_id: &str) -> String {
    format!("devices/{}/settings", device_id)
}

/// What the cooker is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentAction {
    #[default]
    Idle,
    DispenseRice,
    AddWater,
    Cook,
    Done,
    Canceled,
}

impl CurrentAction {
    /// Decode the raw `currentAction` field
    ///
    /// Missing values decode as idle. Unknown strings are logged and also
    /// treated as idle.
    pub fn from_wire(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return CurrentAction::Idle;
        };

        let normalized = raw.trim().to_ascii_lowercase().replace(&['-', '_'][..], " ");
        match normalized.as_str() {
            "" | "idle" => CurrentAction::Idle,
            "dispense rice" | "dispense" | "dispensing" => CurrentAction::DispenseRice,
            "add water" | "washing" => CurrentAction::AddWater,
            "cook" | "cooking" => CurrentAction::Cook,
            "done" => CurrentAction::Done,
            "canceled" | "cancelled" => CurrentAction::Canceled,
            _ => {
                warn!("Unknown currentAction '{}', treating as idle", raw);
                CurrentAction::Idle
            }
        }
    }

    /// Spelling used by the firmware
    pub fn as_wire(self) -> &'static str {
        match self {
            CurrentAction::Idle => "idle",
            CurrentAction::DispenseRice => "dispense rice",
            CurrentAction::AddWater => "add water",
            CurrentAction::Cook => "cook",
            CurrentAction::Done => "done",
            CurrentAction::Canceled => "canceled",
        }
    }

    /// A timed activity is running
    pub fn is_in_progress(self) -> bool {
        matches!(
            self,
            CurrentAction::DispenseRice | CurrentAction::AddWater | CurrentAction::Cook
        )
    }

    /// The device will accept a new start command
    pub fn accepts_commands(self) -> bool {
        matches!(
            self,
            CurrentAction::Idle | CurrentAction::Done | CurrentAction::Canceled
        )
    }
}

impl fmt::Display for CurrentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// Configured durations for one cook cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Water pump time in seconds
    pub pump_time_secs: u32,
    /// Rice dispense time in seconds
    pub dispense_time_secs: u32,
    /// Cook time in minutes (stored remotely in seconds)
    pub cook_time_mins: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            pump_time_secs: 5,
            dispense_time_secs: 10,
            cook_time_mins: 30,
        }
    }
}

impl DeviceSettings {
    /// Decode the remote `settings` object
    ///
    /// Each field falls back to its default on its own.
    pub fn from_value(value: Option<&Value>) -> Self {
        let defaults = Self::default();
        let field = |name: &str| value.and_then(|v| v.get(name)).and_then(positive_number);

        Self {
            pump_time_secs: field("washDuration")
                .and_then(whole_units)
                .unwrap_or(defaults.pump_time_secs),
            dispense_time_secs: field("dispenseDuration")
                .and_then(whole_units)
                .unwrap_or(defaults.dispense_time_secs),
            cook_time_mins: field("cookDuration")
                .and_then(|secs| whole_units(secs / 60.0))
                .unwrap_or(defaults.cook_time_mins),
        }
    }

    /// Encode as the remote `settings` object
    pub fn to_value(&self) -> Value {
        Value::Object(self.to_map())
    }

    /// Encode as a map, for multi-path updates
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("washDuration".to_string(), json!(self.pump_time_secs));
        map.insert("dispenseDuration".to_string(), json!(self.dispense_time_secs));
        map.insert("cookDuration".to_string(), json!(self.cook_time_secs()));
        map
    }

    /// Cook time converted to seconds
    pub fn cook_time_secs(&self) -> u32 {
        self.cook_time_mins * 60
    }
}

/// A partial settings change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub pump_time_secs: Option<u32>,
    pub dispense_time_secs: Option<u32>,
    pub cook_time_mins: Option<u32>,
}

impl SettingsPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pump_time(mut self, secs: u32) -> Self {
        self.pump_time_secs = Some(secs);
        self
    }

    pub fn dispense_time(mut self, secs: u32) -> Self {
        self.dispense_time_secs = Some(secs);
        self
    }

    pub fn cook_time(mut self, mins: u32) -> Self {
        self.cook_time_mins = Some(mins);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pump_time_secs.is_none()
            && self.dispense_time_secs.is_none()
            && self.cook_time_mins.is_none()
    }

    /// Overlay the present fields onto `settings`
    pub fn merge_into(&self, settings: DeviceSettings) -> DeviceSettings {
        DeviceSettings {
            pump_time_secs: self.pump_time_secs.unwrap_or(settings.pump_time_secs),
            dispense_time_secs: self
                .dispense_time_secs
                .unwrap_or(settings.dispense_time_secs),
            cook_time_mins: self.cook_time_mins.unwrap_or(settings.cook_time_mins),
        }
    }

    /// Check every present field against the operator ranges
    pub fn validate(&self) -> Result<(), DeviceError> {
        check_range("water time", self.pump_time_secs, &PUMP_TIME_RANGE)?;
        check_range("dispense time", self.dispense_time_secs, &DISPENSE_TIME_RANGE)?;
        check_range("cook time", self.cook_time_mins, &COOK_TIME_RANGE)?;
        Ok(())
    }
}

fn check_range(
    field: &'static str,
    value: Option<u32>,
    range: &RangeInclusive<u32>,
) -> Result<(), DeviceError> {
    match value {
        Some(v) if !range.contains(&v) => Err(DeviceError::InvalidSetting {
            field,
            value: v,
            min: *range.start(),
            max: *range.end(),
        }),
        _ => Ok(()),
    }
}

/// Portion presets offered by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// One person
    Small,
    /// Two people
    Medium,
    /// Four people
    Large,
}

impl Preset {
    pub fn patch(self) -> SettingsPatch {
        let (water, dispense, cook) = match self {
            Preset::Small => (5, 3, 20),
            Preset::Medium => (10, 5, 30),
            Preset::Large => (15, 8, 45),
        };
        SettingsPatch::new()
            .pump_time(water)
            .dispense_time(dispense)
            .cook_time(cook)
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "small" | "1" => Ok(Preset::Small),
            "medium" | "2" => Ok(Preset::Medium),
            "large" | "4" => Ok(Preset::Large),
            other => Err(format!(
                "unknown preset '{}', expected small, medium or large",
                other
            )),
        }
    }
}

/// Timed phase names as written to `currentStage.name`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageName {
    Dispensing,
    Washing,
    Cooking,
}

impl StageName {
    fn from_wire(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "DISPENSING" => Some(StageName::Dispensing),
            "WASHING" => Some(StageName::Washing),
            "COOKING" => Some(StageName::Cooking),
            _ => None,
        }
    }

    /// Stage implied by an in-progress action
    pub fn for_action(action: CurrentAction) -> Option<Self> {
        match action {
            CurrentAction::DispenseRice => Some(StageName::Dispensing),
            CurrentAction::AddWater => Some(StageName::Washing),
            CurrentAction::Cook => Some(StageName::Cooking),
            _ => None,
        }
    }
}

/// The currently running timed phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stage {
    pub name: StageName,
    /// Server timestamp in milliseconds since the epoch
    pub start_time_ms: i64,
    pub duration_secs: f64,
}

impl Stage {
    /// Decode `currentStage`
    ///
    /// Returns `None` for null, for unresolved server timestamps and for
    /// non-positive start times or durations.
    pub fn from_value(value: &Value, action: CurrentAction) -> Option<Self> {
        let obj = value.as_object()?;
        let start_time_ms = obj.get("startTime").and_then(timestamp_ms)?;
        let duration_secs = obj.get("duration").and_then(positive_number)?;
        if start_time_ms <= 0 {
            return None;
        }

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .and_then(StageName::from_wire)
            .or_else(|| StageName::for_action(action))?;

        Some(Self {
            name,
            start_time_ms,
            duration_secs,
        })
    }
}

/// Typed view of one remote device record
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeviceRecord {
    pub settings: DeviceSettings,
    pub current_action: CurrentAction,
    /// Outstanding instruction for the firmware
    pub command: Option<Command>,
    pub current_stage: Option<Stage>,
    /// Server write timestamp in milliseconds
    pub last_updated_ms: Option<i64>,
}

impl DeviceRecord {
    /// Decode a record snapshot. Never fails.
    pub fn from_value(value: &Value) -> Self {
        let current_action =
            CurrentAction::from_wire(value.get("currentAction").and_then(Value::as_str));

        Self {
            settings: DeviceSettings::from_value(value.get("settings")),
            current_action,
            command: Command::decode(value),
            current_stage: value
                .get("currentStage")
                .and_then(|stage| Stage::from_value(stage, current_action)),
            last_updated_ms: value.get("lastUpdated").and_then(timestamp_ms),
        }
    }

    /// The record written when a device is first seen
    pub fn default_value() -> Value {
        json!({
            "settings": DeviceSettings::default().to_value(),
            "currentAction": CurrentAction::Idle.as_wire(),
            "command": {
                "add_water": false,
                "dispense": false,
                "cook": false,
                "cancel": false,
            },
            "lastUpdated": ServerValue::timestamp(),
        })
    }

    /// Stage that should drive the progress display
    ///
    /// A stage left behind on an idle or finished device is ignored.
    pub fn active_stage(&self) -> Option<&Stage> {
        if self.current_action.is_in_progress() {
            self.current_stage.as_ref()
        } else {
            None
        }
    }

    /// An idle device still carries a start command, left by this or
    /// another client, that the firmware has not picked up
    pub fn has_outstanding_command(&self) -> bool {
        matches!(self.command, Some(cmd) if !cmd.is_cancel())
            && self.current_action == CurrentAction::Idle
    }
}

/// A finite, strictly positive number
fn positive_number(value: &Value) -> Option<f64> {
    value.as_f64().filter(|n| n.is_finite() && *n > 0.0)
}

/// Round to a whole unit count, rejecting zero
fn whole_units(value: f64) -> Option<u32> {
    let rounded = value.round();
    if rounded >= 1.0 && rounded <= u32::MAX as f64 {
        Some(rounded as u32)
    } else {
        None
    }
}

/// Millisecond timestamp, ignoring unresolved server placeholders
fn timestamp_ms(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|n| n.is_finite()).map(|n| n as i64))
}
