//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "shot", version, about = "Espresso shot timing and stop-at-weight")]
pub struct Cli {
    /// Path to config TOML (typed); built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

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
    /// Replay a recorded JSONL trace and print every published event as JSON
    Replay {
        /// Trace file: one `{"at_ms": .., "event": ..}` object per line
        #[arg(value_name = "TRACE")]
        trace: PathBuf,
        /// Override the stop target (g); 0 disables stop-at-weight
        #[arg(long, value_name = "GRAMS")]
        target: Option<f32>,
        /// Learning history CSV (strict header `drip_g,flow_gps`); overrides the config
        #[arg(long, value_name = "FILE")]
        learning: Option<PathBuf>,
    },
    /// Validate the configuration (and learning CSV) and print the effective values
    CheckConfig,
}
