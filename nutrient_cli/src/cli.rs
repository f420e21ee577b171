//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "nutrient_ctl", version, about = "Nutrient batch-preparation controller harness")]
pub struct Cli {
    /// Desktop tuning profile TOML (pins, backend, logging, NVRAM seed)
    #[arg(long, value_name = "FILE", default_value = "etc/nutrient_config.toml")]
    pub config: PathBuf,

    /// Log as JSON lines instead of the plain text layout
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// `CAL_PH`/`CAL_EC` sub-action, mirroring the wire protocol's calibration
/// sub-commands (§6) one for one.
#[derive(Subcommand, Debug, Clone)]
pub enum CalAction {
    /// Begin a new calibration session, discarding any prior in-progress points
    Start,
    /// Abandon the in-progress session without touching the saved calibration
    Abort,
    /// Record one calibration point against the current filtered reading
    Point {
        /// Known reference value for the solution currently on the probe
        reference: f32,
    },
    /// Commit the session's points to the persisted configuration
    Save,
    /// Print the currently saved calibration
    Read,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive the cooperative loop: read command lines from stdin, write
    /// STATUS/DONE/FAULT and command replies to stdout
    Run {
        /// Replay a scripted scenario file instead of stdin/wall-clock time
        #[arg(long, value_name = "FILE")]
        scenario: Option<PathBuf>,
    },
    /// Run one dosing pump for a fixed volume (`TEST_PUMP`)
    DoseJog {
        /// PH_DOWN, PH_UP, A (fert A), or B (fert B)
        channel: String,
        /// Volume to dispense, millilitres
        ml: f32,
    },
    /// Run both mixing pumps for a fixed duration (`MIX_ONLY`)
    MixOnly {
        /// Duration, milliseconds
        ms: u64,
    },
    /// pH probe calibration (`CAL_PH`)
    CalPh {
        #[command(subcommand)]
        action: CalAction,
    },
    /// EC probe calibration (`CAL_EC`)
    CalEc {
        #[command(subcommand)]
        action: CalAction,
    },
    /// Print the persisted configuration record (`CONFIG_DUMP`)
    ConfigDump,
    /// Reset the persisted configuration record to factory defaults
    ResetEeprom,
}
