#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core batch-preparation logic (hardware-agnostic).
//!
//! This crate provides the hardware-independent controller for a closed-loop
//! nutrient/pH batch mixer. All hardware interaction goes through the
//! `nutrient_traits::{Actuators, SensorSource, NvramPort, Clock}` capability
//! traits, so the engine, sensor pipeline and config store here never touch
//! a GPIO pin, an ADC register or a file directly.
//!
//! ## Architecture
//!
//! - **`sensor`**: median+EMA filtering, pH/EC calibration and reporting
//!   (`SensorPipeline`).
//! - **`process`**: the batch state machine, dose computation and adaptive
//!   gain tracking (`ProcessEngine`).
//! - **`config`**: the persisted tuning record, its CRC-protected binary
//!   encoding and `ConfigStore`.
//! - **`protocol`**: the line-oriented ASCII serial command/status protocol
//!   (`SerialProtocol`).
//! - **`model`**: shared wire/state types (`ProcessState`, `PumpChannel`,
//!   timers, status frames) used across the other modules.
//! - **`error`**: `FaultKind` (a carried state value, not a `Result` error)
//!   plus the `thiserror` error types for genuine construction/decode/
//!   protocol failures.
//!
//! ## Loop model
//!
//! Everything here is driven cooperatively by a caller's poll loop, in a
//! fixed order: `SensorPipeline::tick` → `ProcessEngine::on_sensor_tick` →
//! `ProcessEngine::on_timer_tick` → `SerialProtocol::update`. None of these
//! types spawn threads or hold a lock; a caller on bare metal or on a
//! desktop test harness drives them identically.

pub mod config;
pub mod error;
pub mod model;
pub mod process;
pub mod protocol;
pub mod sensor;

pub use config::{Config, ConfigStore};
pub use error::{ConfigError, EngineError, FaultKind, ProtoError};
pub use model::{DoseLog, ProcessState, PumpChannel, StatusFrame};
pub use process::ProcessEngine;
pub use protocol::SerialProtocol;
pub use sensor::SensorPipeline;
