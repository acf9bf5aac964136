//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{DateTime, Local};
use serde_json::{json, Value};

use ricecooker_core::{DerivedStatus, DeviceRecord, DeviceSettings, DeviceView, Progress, UserProfile};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    /// Print a one-shot device report
    pub fn print_device(
        &self,
        device_id: &str,
        record: &DeviceRecord,
        status: DerivedStatus,
        progress: &Progress,
    ) {
        match self.format {
            OutputFormat::Human => {
                println!("Device {}", device_id);
                println!("==========={}", "=".repeat(device_id.len()));
                println!();
                println!("Status:   {}", status.label());
                println!("Action:   {}", record.current_action);
                if let Some(command) = record.command {
                    println!("Command:  {} (waiting for device)", command);
                }
                if let Some(stage) = record.active_stage() {
                    println!(
                        "Stage:    {:?} {} remaining ({:.0}%)",
                        stage.name,
                        progress.clock(),
                        progress.percent
                    );
                }
                if let Some(updated) = record.last_updated_ms.and_then(format_timestamp) {
                    println!("Updated:  {}", updated);
                }
                println!();
                print_settings_human(&record.settings);
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    json!({
                        "device_id": device_id,
                        "status": status,
                        "current_action": record.current_action,
                        "command": record.command,
                        "stage": record.active_stage().map(|s| json!({
                            "name": s.name,
                            "start_time_ms": s.start_time_ms,
                            "duration_secs": s.duration_secs,
                        })),
                        "progress": progress,
                        "settings": record.settings,
                        "last_updated_ms": record.last_updated_ms,
                    })
                );
            }
            OutputFormat::Quiet => println!("{}", status),
        }
    }

    /// Print one line for a changed view while watching
    pub fn print_view(&self, view: &DeviceView) {
        match self.format {
            OutputFormat::Human => {
                let mut line = format!(
                    "[{}] {}",
                    Local::now().format("%H:%M:%S"),
                    view.status.label()
                );
                if view.status.is_running() && !view.progress.is_zero() {
                    line.push_str(&format!(
                        "  {} remaining  {:>3.0}%",
                        view.progress.clock(),
                        view.progress.percent
                    ));
                }
                if let Some(command) = view.pending_command {
                    line.push_str(&format!("  ({})", command));
                }
                if let Some(error) = &view.error {
                    line.push_str(&format!("  ! {}", error));
                }
                println!("{}", line);
            }
            OutputFormat::Json => println!("{}", view_json(view)),
            OutputFormat::Quiet => println!("{}", view.status),
        }
    }

    pub fn print_settings(&self, settings: &DeviceSettings) {
        match self.format {
            OutputFormat::Human => print_settings_human(settings),
            OutputFormat::Json => println!("{}", json!(settings)),
            OutputFormat::Quiet => {}
        }
    }

    /// Print the devices linked to a user
    pub fn print_profile(&self, profile: &UserProfile) {
        match self.format {
            OutputFormat::Human => {
                if profile.device_ids.is_empty() {
                    println!("No devices linked.");
                    return;
                }
                for id in &profile.device_ids {
                    let marker = if profile.active_device.as_ref() == Some(id) {
                        "*"
                    } else {
                        " "
                    };
                    println!("{} {}", marker, id);
                }
                println!("\n{} device(s)", profile.device_ids.len());
            }
            OutputFormat::Json => println!("{}", json!(profile)),
            OutputFormat::Quiet => {
                for id in &profile.device_ids {
                    println!("{}", id);
                }
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!("{}", json!({"status": "success", "message": message}));
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

fn print_settings_human(settings: &DeviceSettings) {
    println!("Settings:");
    println!("  Water:    {}s", settings.pump_time_secs);
    println!("  Dispense: {}s", settings.dispense_time_secs);
    println!("  Cook:     {} min", settings.cook_time_mins);
}

/// JSON form of a view, one object per line when watching
pub fn view_json(view: &DeviceView) -> Value {
    json!({
        "device_id": view.device_id,
        "status": view.status,
        "loading": view.loading,
        "error": view.error,
        "current_action": view.record.as_ref().map(|r| r.current_action),
        "pending_command": view.pending_command,
        "settings": view.settings,
        "progress": view.progress,
    })
}

fn format_timestamp(ms: i64) -> Option<String> {
    DateTime::from_timestamp_millis(ms)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
}
