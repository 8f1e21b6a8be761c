//! StageFocus CLI: keep a webcam subject centered and stream the result to
//! a virtual camera.
//!
//! Usage:
//!   stagefocus run --detector "<command>"   Start streaming
//!   stagefocus settings [show|set|reset|path]   Inspect or edit settings
//!   stagefocus check                        Check system capabilities

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use stagefocus_capture_engine::DEFAULT_VIRTUAL_DEVICE;
use stagefocus_common::logging::{init_logging, LoggingConfig};

mod commands;
mod control;

#[derive(Parser)]
#[command(
    name = "stagefocus",
    about = "Keep a webcam subject centered in frame",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    /// Settings file (defaults to $XDG_CONFIG_HOME/stagefocus/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a streaming session
    Run {
        /// Webcam index for this session (overrides WEBCAM_ID)
        #[arg(long)]
        webcam: Option<u32>,

        /// v4l2loopback device to publish the virtual camera on
        #[arg(long, default_value = DEFAULT_VIRTUAL_DEVICE)]
        virtual_device: String,

        /// Do not publish a virtual camera
        #[arg(long)]
        no_virtual_camera: bool,

        /// Do not open a preview window
        #[arg(long)]
        no_preview: bool,

        /// Do not mirror the picture
        #[arg(long)]
        no_mirror: bool,

        /// Pose detector helper command
        #[arg(long)]
        detector: String,
    },

    /// Show or change persisted settings
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },

    /// Check system capabilities
    Check,
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Print current settings
    Show {
        /// Print the settings file contents as JSON
        #[arg(long)]
        json: bool,
    },

    /// Change one setting
    Set {
        /// Setting name (e.g. SMOOTHING_FACTOR)
        key: String,

        /// New value
        value: String,
    },

    /// Restore built-in defaults
    Reset,

    /// Print the settings file location
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    init_logging(&LoggingConfig {
        level: log_level.to_string(),
        json: cli.json_logs,
    });

    let settings_path = cli
        .settings
        .unwrap_or_else(stagefocus_common::config::default_settings_path);

    match cli.command {
        Commands::Run {
            webcam,
            virtual_device,
            no_virtual_camera,
            no_preview,
            no_mirror,
            detector,
        } => {
            commands::run::run(
                settings_path,
                commands::run::RunOptions {
                    webcam,
                    virtual_device: (!no_virtual_camera).then_some(virtual_device),
                    preview: !no_preview,
                    mirror: !no_mirror,
                    detector,
                },
            )
            .await
        }
        Commands::Settings { action } => {
            match action.unwrap_or(SettingsAction::Show { json: false }) {
                SettingsAction::Show { json } => commands::settings::show(settings_path, json),
                SettingsAction::Set { key, value } => {
                    commands::settings::set(settings_path, &key, &value)
                }
                SettingsAction::Reset => commands::settings::reset(settings_path),
                SettingsAction::Path => commands::settings::path(&settings_path),
            }
        }
        Commands::Check => commands::check::run(&settings_path),
    }
}
