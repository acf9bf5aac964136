//! Config command handlers

use std::path::Path;

use anyhow::{Context, Result};

use ricecooker_core::Config;

use crate::output::{Output, OutputFormat};

/// Show the auth token without printing it in full
fn masked(token: Option<&str>) -> String {
    match token {
        None => "(not set)".to_string(),
        Some(t) if t.len() <= 8 => "********".to_string(),
        Some(t) => format!("{}…", &t[..4]),
    }
}

fn or_unset(value: Option<&str>) -> &str {
    value.unwrap_or("(not set)")
}

/// Show current configuration
pub fn show(config_path: Option<&Path>, output: &Output) -> Result<()> {
    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "database_url": config.database_url,
                    "auth_token": config.auth_token.as_ref().map(|_| "********"),
                    "user_id": config.user_id,
                    "device_id": config.device_id,
                    "command_wire": config.command_wire,
                    "settings_debounce_ms": config.settings_debounce_ms,
                    "command_timeout_secs": config.command_timeout_secs,
                    "progress_tick_ms": config.progress_tick_ms,
                    "log_level": config.log_level,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", or_unset(config.database_url.as_deref()));
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!(
                "  database_url:         {}",
                or_unset(config.database_url.as_deref())
            );
            println!(
                "  auth_token:           {}",
                masked(config.auth_token.as_deref())
            );
            println!(
                "  user_id:              {}",
                or_unset(config.user_id.as_deref())
            );
            println!(
                "  device_id:            {}",
                or_unset(config.device_id.as_deref())
            );
            println!("  command_wire:         {}", config.command_wire);
            println!("  settings_debounce_ms: {}", config.settings_debounce_ms);
            println!("  command_timeout_secs: {}", config.command_timeout_secs);
            println!("  progress_tick_ms:     {}", config.progress_tick_ms);
            println!("  log_level:            {}", config.log_level);
            println!(
                "  log_file:             {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}

/// Set a configuration value
pub fn set(key: String, value: String, config_path: Option<&Path>, output: &Output) -> Result<()> {
    let mut config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;

    // "none" clears optional values, as an empty string does
    let value = if value == "none" { String::new() } else { value };
    config.set_value(&key, &value)?;

    // Save to the CLI-specified path or default
    let save_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::config_file_path);
    config
        .save_to_path(&save_path)
        .context("Failed to save configuration")?;

    let shown = if key == "auth_token" {
        masked(config.auth_token.as_deref())
    } else {
        value
    };
    output.success(&format!("Set {} = {}", key, shown));

    Ok(())
}
