//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "shadectl", version, about = "Shade control CLI")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/shade_config.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive the simulated shades from a command script
    Run {
        /// Script file; reads stdin when omitted
        #[arg(long, value_name = "FILE")]
        script: Option<PathBuf>,
        /// Start the background poller (otherwise `poll` lines drive polling)
        #[arg(long, action = ArgAction::SetTrue)]
        poll: bool,
    },
    /// Load and validate the config, including calibrations and groups
    CheckConfig,
    /// Validate a calibration CSV and print its percent/raw table
    Calibration {
        /// CSV with headers `percent,raw`
        #[arg(long, value_name = "FILE")]
        csv: PathBuf,
        /// Evaluate the curve with the percent axis inverted
        #[arg(long, action = ArgAction::SetTrue)]
        invert: bool,
    },
    /// Poll the simulated controller once and print diagnostics as JSON
    Diagnostics,
}
