//! Error handling
//!
//! Typed errors for the remote store seam and the device synchronizer,
//! with user-facing messages and recovery suggestions for the console.

use thiserror::Error;

use crate::command::Command;
use crate::status::DerivedStatus;

/// Errors reported by a remote store implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Security rules rejected the operation
    #[error("Permission denied on '{path}'")]
    PermissionDenied { path: String },

    /// Network failure or the store is offline
    #[error("Remote store unreachable: {details}")]
    Unreachable { details: String },

    /// The store answered with an error status
    #[error("Remote store returned status {status}: {message}")]
    Remote { status: u16, message: String },

    /// The store sent data we could not understand
    #[error("Invalid data from remote store: {details}")]
    Decode { details: String },
}

/// Errors surfaced by the device synchronizer
///
/// None of these are fatal to the synchronizer. They are published as
/// events and mirrored into the view's `error` field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Caller lacks access to the device record
    #[error("Permission denied: cannot access '{path}'")]
    PermissionDenied { path: String },

    /// Network failure or the device record is offline
    #[error("Device unreachable: {details}")]
    Unreachable { details: String },

    /// Writing the default record for a new device failed
    #[error("Could not initialize device '{device_id}': {details}")]
    InitializationFailed { device_id: String, details: String },

    /// Persisting debounced settings failed
    #[error("Failed to save settings: {details}")]
    SettingsSaveFailed { details: String },

    /// The command write itself failed
    #[error("Failed to send '{command}' to device: {details}")]
    CommandSendFailed { command: Command, details: String },

    /// The command was written but the device never picked it up
    #[error("Device did not respond to '{command}' within {waited_secs}s")]
    DeviceTimeout { command: Command, waited_secs: u64 },

    /// A settings value is outside the operator range
    #[error("Invalid {field}: {value} (allowed {min}-{max})")]
    InvalidSetting {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// Settings are locked while a stage runs or the device is offline
    #[error("Settings cannot be changed while the device is {status}")]
    SettingsLocked { status: DerivedStatus },

    /// Subscription failed for another reason
    #[error("Subscription failed: {details}")]
    Subscription { details: String },
}

impl DeviceError {
    /// Classify a subscription failure
    pub fn from_subscription(error: StoreError) -> Self {
        match error {
            StoreError::PermissionDenied { path } => DeviceError::PermissionDenied { path },
            StoreError::Unreachable { details } => DeviceError::Unreachable { details },
            other => DeviceError::Subscription {
                details: other.to_string(),
            },
        }
    }

    /// Human-readable message for the dashboard
    pub fn user_message(&self) -> String {
        match self {
            DeviceError::PermissionDenied { .. } => {
                "Permission denied. You do not have access to this device's data.".to_string()
            }
            DeviceError::Unreachable { .. } => {
                "Could not connect to device. Check the device ID and your connection."
                    .to_string()
            }
            DeviceError::InitializationFailed { .. } => {
                "Could not initialize device state.".to_string()
            }
            DeviceError::SettingsSaveFailed { .. } => "Failed to save settings.".to_string(),
            DeviceError::CommandSendFailed { .. } => {
                "Failed to send command to device.".to_string()
            }
            DeviceError::DeviceTimeout { command, .. } => {
                format!("The device did not respond to '{}'. Please try again.", command)
            }
            DeviceError::InvalidSetting { .. } => self.to_string(),
            DeviceError::SettingsLocked { status } => {
                format!("Settings are locked while the device shows {}.", status.label())
            }
            DeviceError::Subscription { .. } => {
                "Something went wrong while talking to the device.".to_string()
            }
        }
    }

    /// Check if the user can simply retry the same action
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeviceError::Unreachable { .. }
                | DeviceError::SettingsSaveFailed { .. }
                | DeviceError::CommandSendFailed { .. }
                | DeviceError::DeviceTimeout { .. }
        )
    }

    /// Get a recovery suggestion for this error
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            DeviceError::PermissionDenied { .. } => {
                Some("Check that the device is linked to your account and the auth token is valid.")
            }
            DeviceError::Unreachable { .. } => {
                Some("Check your network connection and the database URL, then select the device again.")
            }
            DeviceError::DeviceTimeout { .. } => {
                Some("Make sure the cooker is powered on and online.")
            }
            DeviceError::SettingsLocked { .. } => {
                Some("Wait for the current activity to finish or cancel it.")
            }
            DeviceError::InitializationFailed { .. } => {
                Some("Check write access to the devices path in the database rules.")
            }
            _ => None,
        }
    }
}
