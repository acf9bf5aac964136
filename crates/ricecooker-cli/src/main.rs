//! Rice cooker CLI
//!
//! Command-line console for networked rice cookers: read status, follow a
//! running cycle, send commands and adjust settings.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ricecooker_core::{Command, Config, Preset};

mod commands;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "ricecooker")]
#[command(about = "Operate a networked rice cooker")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the device record once
    Status {
        /// Device identifier (defaults to device_id from config)
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Follow the device until Ctrl-C
    Watch {
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Start adding water
    Water {
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Start dispensing rice
    Dispense {
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Start cooking
    Cook {
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Cancel the running activity
    Cancel {
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Show or change cook settings
    Settings {
        #[arg(short, long)]
        device: Option<String>,
        /// Water pump time in seconds
        #[arg(long)]
        water: Option<u32>,
        /// Rice dispense time in seconds
        #[arg(long)]
        dispense: Option<u32>,
        /// Cook time in minutes
        #[arg(long)]
        cook: Option<u32>,
        /// Portion preset (small, medium, large); flags override its values
        #[arg(long)]
        preset: Option<Preset>,
    },
    /// Manage devices linked to your user
    Device {
        #[command(subcommand)]
        command: Option<DeviceCommands>,
    },
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum DeviceCommands {
    /// List linked devices
    #[command(alias = "ls")]
    List,
    /// Link a device to your user
    #[command(alias = "add")]
    Link {
        /// Device identifier
        id: String,
    },
    /// Unlink a device from your user
    #[command(alias = "rm")]
    Unlink {
        /// Device identifier
        id: String,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (database_url, auth_token, user_id, device_id, ...)
        key: String,
        /// Configuration value ("none" clears it)
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_deref();

    // Config commands work even when the file is broken
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    init_logging(&config);

    let session = format!("ricecooker-{}", &Uuid::new_v4().to_string()[..8]);
    info!("Session {} started", session);

    match cli.command {
        Commands::Status { device } => commands::status::show(&config, device, &output).await,
        Commands::Watch { device } => commands::watch::run(&config, device, &output).await,
        Commands::Water { device } => {
            commands::control::issue(&config, device, Command::AddWater, &output).await
        }
        Commands::Dispense { device } => {
            commands::control::issue(&config, device, Command::DispenseRice, &output).await
        }
        Commands::Cook { device } => {
            commands::control::issue(&config, device, Command::Cook, &output).await
        }
        Commands::Cancel { device } => {
            commands::control::issue(&config, device, Command::Cancel, &output).await
        }
        Commands::Settings {
            device,
            water,
            dispense,
            cook,
            preset,
        } => {
            let patch = commands::control::settings_patch(water, dispense, cook, preset);
            commands::control::settings(&config, device, patch, &output).await
        }
        Commands::Device { command } => handle_device_command(command, &config, &output).await,
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

async fn handle_device_command(
    command: Option<DeviceCommands>,
    config: &Config,
    output: &Output,
) -> Result<()> {
    match command {
        Some(DeviceCommands::List) | None => commands::device::list(config, output).await,
        Some(DeviceCommands::Link { id }) => commands::device::link(config, id, output).await,
        Some(DeviceCommands::Unlink { id }) => commands::device::unlink(config, id, output).await,
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&Path>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}

/// Build the filter directive for our crates
///
/// A level like `debug` applies to both crates; anything containing `=` is
/// taken as a full directive.
fn filter_directive(level: &str) -> String {
    if level.contains('=') {
        level.to_string()
    } else {
        format!("ricecooker_core={},ricecooker_cli={}", level, level)
    }
}

/// Initialize logging
///
/// RICECOOKER_LOG overrides `log_level`. Logs go to `log_file` when set,
/// stderr otherwise.
fn init_logging(config: &Config) {
    let level = std::env::var("RICECOOKER_LOG").unwrap_or_else(|_| config.log_level.clone());
    let env_filter = EnvFilter::new(filter_directive(&level));

    match &config.log_file {
        Some(log_path) => {
            let log_file = match File::create(log_path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("Warning: Could not create log file {:?}: {}", log_path, e);
                    return;
                }
            };
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_ansi(false)
                .with_writer(log_file)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}
