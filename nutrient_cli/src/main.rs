#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! CLI entrypoint for the nutrient batch-preparation controller harness.
//!
//! Responsibilities:
//! - Parse the desktop tuning profile and assemble hardware or simulated components
//! - Initialize tracing and manage log sinks
//! - Drive the cooperative loop interactively, or replay a scripted scenario file
//! - Offer one-shot service subcommands (`TEST_PUMP`, `MIX_ONLY`, calibration, config dump/reset)
//! - Map a construction/config/I-O failure to a process exit code; a faulted
//!   batch during `run` is not such a failure — the loop stays up and keeps
//!   emitting `FAULT` frames until the operator sends `ABORT`/`START`, exactly
//!   as real firmware would

mod cli;
mod error_fmt;
mod runtime;
mod tracing_setup;

use std::time::Instant;

use clap::Parser;
use eyre::{Context as _, Result};

use cli::{CalAction, Cli, Commands};
use error_fmt::{exit_code_for_error, humanize};
use nutrient_traits::clock::{Clock, MonotonicClock};
use runtime::Components;

fn main() -> Result<()> {
    let _ = color_eyre::install();
    let cli = Cli::parse();

    let mut cfg = runtime::load_harness_config(&cli.config)?;
    tracing_setup::init_tracing(
        cli.json,
        &cli.log_level,
        cfg.logging.file.as_deref(),
        cfg.logging.rotation.as_deref(),
    );

    if let Err(e) = real_main(cli, &mut cfg) {
        eprintln!("{}", humanize(&e));
        std::process::exit(exit_code_for_error(&e));
    }
    Ok(())
}

fn real_main(cli: Cli, cfg: &mut nutrient_config::Config) -> Result<()> {
    match cli.cmd {
        Commands::Run { scenario } => {
            if scenario.is_some() {
                // Scripted replay runs against a deterministic clock; real
                // hardware cannot be driven by scenario timestamps.
                cfg.backend.hardware = false;
            }
            let now_ms = MonotonicClock::new().ms_since(Instant::now());
            let components = runtime::build_components(cfg, now_ms)?;
            match scenario {
                Some(path) => runtime::run_scenario(components, &path),
                None => runtime::run_interactive(components, cfg.runtime.tick_ms),
            }
        }
        Commands::DoseJog { channel, ml } => {
            run_one_shot(cfg, &format!("TEST_PUMP {} {ml}", channel.to_ascii_uppercase()), true)
        }
        Commands::MixOnly { ms } => run_one_shot(cfg, &format!("MIX_ONLY {ms}"), true),
        Commands::CalPh { action } => run_one_shot(cfg, &format!("CAL_PH {}", render_cal(&action)), false),
        Commands::CalEc { action } => run_one_shot(cfg, &format!("CAL_EC {}", render_cal(&action)), false),
        Commands::ConfigDump => run_one_shot(cfg, "CONFIG_DUMP", false),
        Commands::ResetEeprom => {
            let now_ms = MonotonicClock::new().ms_since(Instant::now());
            let mut c = runtime::build_components(cfg, now_ms)?;
            c.store.mutate(|cur| *cur = nutrient_core::config::Config::default());
            c.store.save();
            println!("OK");
            Ok(())
        }
    }
}

fn render_cal(action: &CalAction) -> String {
    match action {
        CalAction::Start => "START".to_string(),
        CalAction::Abort => "ABORT".to_string(),
        CalAction::Point { reference } => format!("POINT {reference}"),
        CalAction::Save => "SAVE".to_string(),
        CalAction::Read => "READ".to_string(),
    }
}

/// Build components, dispatch a single protocol command line, and (for
/// commands that start an asynchronous service op) poll the cooperative loop
/// until `SerialProtocol::is_busy()` clears before printing the result and
/// persisting the store.
fn run_one_shot(cfg: &nutrient_config::Config, line: &str, wait_for_completion: bool) -> Result<()> {
    let clock = MonotonicClock::new();
    let epoch = Instant::now();
    let mut c: Components = runtime::build_components(cfg, clock.ms_since(epoch))?;

    let now_ms = clock.ms_since(epoch);
    let reply = c
        .protocol
        .dispatch_line(line, &mut c.store, &mut c.engine, &mut c.sensors, &mut c.actuators, now_ms);
    if !reply.is_empty() {
        print!("{reply}");
    }

    if wait_for_completion {
        while c.protocol.is_busy() {
            let now_ms = clock.ms_since(epoch);
            c.sensors.tick(&clock, epoch, c.store.get(), &mut c.source);
            let mut out = String::new();
            c.protocol
                .update(&c.engine, &c.sensors, &mut c.actuators, now_ms, &mut out)
                .wrap_err("format status line")?;
            if !out.is_empty() {
                print!("{out}");
            }
            clock.sleep(std::time::Duration::from_millis(cfg.runtime.tick_ms));
        }
        println!("DONE");
    }

    c.store.save();
    Ok(())
}
