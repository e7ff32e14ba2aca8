//! CLI argument definitions and shared statics.

use chrono::{DateTime, Utc};
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "glucoloop", version, about = "Glucose prediction and dose recommendation loop")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/glucoloop.toml")]
    pub config: PathBuf,

    /// Print results and errors as JSON instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace); overrides `logging.level`
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Recorded history to run the loop against.
#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    /// Glucose CSV (`time,mg_dl[,source]`)
    #[arg(long, value_name = "FILE")]
    pub glucose: PathBuf,

    /// Dose CSV (`kind,start,end,value`)
    #[arg(long, value_name = "FILE")]
    pub doses: Option<PathBuf>,

    /// Carb CSV (`time,grams[,absorption_min]`)
    #[arg(long, value_name = "FILE")]
    pub carbs: Option<PathBuf>,

    /// Leave the retrospective correction out of the prediction
    #[arg(long, action = ArgAction::SetTrue)]
    pub no_retrospection: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one loop cycle and print the recommendation
    Recommend {
        #[command(flatten)]
        history: HistoryArgs,
        /// Evaluation instant (RFC 3339); defaults to the last glucose reading
        #[arg(long, value_name = "TIME")]
        at: Option<DateTime<Utc>>,
        /// Include the predicted glucose timeline in the output
        #[arg(long, action = ArgAction::SetTrue)]
        prediction: bool,
    },
    /// Step a clock through recorded history and run a cycle at each step
    Replay {
        #[command(flatten)]
        history: HistoryArgs,
        /// Skip cycles before this instant (RFC 3339)
        #[arg(long, value_name = "TIME")]
        from: Option<DateTime<Utc>>,
        /// Stop after this instant (RFC 3339)
        #[arg(long, value_name = "TIME")]
        to: Option<DateTime<Utc>>,
        /// Minutes between cycles
        #[arg(
            long = "every-min",
            value_name = "MIN",
            default_value_t = 5,
            value_parser = clap::value_parser!(u32).range(1..)
        )]
        every_min: u32,
    },
    /// Validate the config and check every required therapy setting is present
    SelfCheck,
}
