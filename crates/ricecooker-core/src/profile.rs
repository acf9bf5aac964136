//! User profile device association
//!
//! A user's profile at `users/{uid}` records which devices they operate.
//! Older profiles carry a single `deviceId`; newer ones a `devices` map of
//! `{ id: true }`. Both are read, and `deviceId` is kept as the active
//! device.
//!
//! Unlinking removes the association only. Device records are never
//! deleted from here.

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::info;

use crate::error::StoreError;
use crate::remote::RemoteStore;

/// Characters the database does not allow in keys
const FORBIDDEN_KEY_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProfileError {
    #[error("Invalid device ID '{id}': {reason}")]
    InvalidDeviceId { id: String, reason: &'static str },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Path of a user's profile
pub fn user_path(user_id: &str) -> String {
    format!("users/{}", user_id)
}

/// Check that `id` can be used as a database key
pub fn validate_device_id(id: &str) -> Result<(), ProfileError> {
    let invalid = |reason| {
        Err(ProfileError::InvalidDeviceId {
            id: id.to_string(),
            reason,
        })
    };

    if id.trim().is_empty() {
        return invalid("must not be empty");
    }
    if id.trim() != id {
        return invalid("must not start or end with whitespace");
    }
    if id.contains(&FORBIDDEN_KEY_CHARS[..]) {
        return invalid("must not contain / . # $ [ ]");
    }
    Ok(())
}

/// Devices associated with one user
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct UserProfile {
    pub user_id: String,
    /// Linked devices, sorted
    pub device_ids: Vec<String>,
    /// Device the dashboard opens by default
    pub active_device: Option<String>,
}

impl UserProfile {
    /// Decode a profile snapshot
    pub fn from_value(user_id: &str, value: Option<&Value>) -> Self {
        let active_device = value
            .and_then(|v| v.get("deviceId"))
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let mut device_ids: Vec<String> = match value.and_then(|v| v.get("devices")) {
            Some(Value::Object(map)) => map
                .iter()
                .filter(|(_, linked)| linked.as_bool().unwrap_or(true))
                .map(|(id, _)| id.clone())
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        if let Some(active) = &active_device {
            device_ids.push(active.clone());
        }
        device_ids.sort();
        device_ids.dedup();

        Self {
            user_id: user_id.to_string(),
            device_ids,
            active_device,
        }
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.device_ids.iter().any(|id| id == device_id)
    }
}

/// Read a user's profile; a missing profile has no devices
pub async fn load_profile<S: RemoteStore>(
    store: &S,
    user_id: &str,
) -> Result<UserProfile, ProfileError> {
    let value = store.get(&user_path(user_id)).await?;
    Ok(UserProfile::from_value(user_id, value.as_ref()))
}

/// Link a device and make it the active one
///
/// Returns `false` when the device was already linked.
pub async fn link_device<S: RemoteStore>(
    store: &S,
    user_id: &str,
    device_id: &str,
) -> Result<bool, ProfileError> {
    validate_device_id(device_id)?;
    let profile = load_profile(store, user_id).await?;

    let mut patch = Map::new();
    patch.insert(format!("devices/{}", device_id), json!(true));
    // Fold a legacy single device into the map
    if let Some(active) = &profile.active_device {
        patch.insert(format!("devices/{}", active), json!(true));
    }
    patch.insert("deviceId".to_string(), json!(device_id));
    store.update(&user_path(user_id), patch).await?;

    let added = !profile.contains(device_id);
    if added {
        info!("Linked device {} to user {}", device_id, user_id);
    }
    Ok(added)
}

/// Remove a device from the profile
///
/// Returns `false` when the device was not linked.
pub async fn unlink_device<S: RemoteStore>(
    store: &S,
    user_id: &str,
    device_id: &str,
) -> Result<bool, ProfileError> {
    validate_device_id(device_id)?;
    let profile = load_profile(store, user_id).await?;
    if !profile.contains(device_id) {
        return Ok(false);
    }

    let mut patch = Map::new();
    patch.insert(format!("devices/{}", device_id), Value::Null);
    if profile.active_device.as_deref() == Some(device_id) {
        let next = profile.device_ids.iter().find(|id| *id != device_id);
        patch.insert(
            "deviceId".to_string(),
            next.map_or(Value::Null, |id| json!(id)),
        );
    }
    store.update(&user_path(user_id), patch).await?;

    info!("Unlinked device {} from user {}", device_id, user_id);
    Ok(true)
}
