//! Typed runtime fault kinds and construction/protocol errors.
//!
//! `FaultKind` is a *data value* carried by `ProcessState::Fault` (§4.4), not
//! a `Result` error — the engine never panics or returns `Err` because a
//! sensor drifted out of range, it transitions to `Fault` and reports the
//! reason over the wire. `EngineError`/`ConfigError`/`ProtoError` are the
//! ordinary `thiserror` error types for places that really do fail a
//! construction or a protocol-level operation.

use thiserror::Error;

/// Structured mirror of every distinct Fault reason named in §4.4/§7.
///
/// `Display` renders exactly the legacy reason text so wire behavior and any
/// substring-matching host tooling are unaffected by this typed rework;
/// `fault_code` implements §7's table directly instead of by string match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// Covers both an out-of-[2,12] reading and a non-finite one — the
    /// legacy firmware reports both under the same reason text (§4.4).
    PhOutOfRange,
    EcInvalid,
    TdsInvalid,
    TemperatureMissing,
    ProcessTimeout,
    PhDosingLimit,
    PhTotalLimit,
    PumpCalibrationMissing,
    UserAbort(String),
    /// A reason string that didn't originate from this engine (e.g. supplied
    /// verbatim to `abort()`) and doesn't match any documented category.
    Other(String),
}

impl FaultKind {
    /// §7 fault-code table. Open question noted in §9: the legacy firmware
    /// derives this by case-insensitive substring match on the reason text;
    /// preserved here as a typed mapping kept in lock-step with
    /// `from_reason` rather than re-deriving it from `Display` output.
    pub fn fault_code(&self) -> u8 {
        match self {
            Self::PhOutOfRange => 1,
            Self::EcInvalid => 2,
            Self::TdsInvalid => 3,
            Self::TemperatureMissing => 4,
            Self::ProcessTimeout => 5,
            Self::PhDosingLimit | Self::PhTotalLimit => 6,
            Self::PumpCalibrationMissing => 7,
            Self::UserAbort(_) => 8,
            Self::Other(_) => 0,
        }
    }

    /// Reconstruct a `FaultKind` from a free-form reason string the same way
    /// the legacy firmware derives a fault code: case-insensitive substring
    /// match against the fixed table. Used when a reason arrives from
    /// `abort()` or from the protocol layer rather than being raised as a
    /// typed value directly by the process engine.
    pub fn from_reason(reason: &str) -> Self {
        let lower = reason.to_ascii_lowercase();
        if lower.starts_with("user abort") {
            Self::UserAbort(reason.to_string())
        } else if lower.contains("ph out of range") {
            Self::PhOutOfRange
        } else if lower.contains("ec invalid") {
            Self::EcInvalid
        } else if lower.contains("tds invalid") {
            Self::TdsInvalid
        } else if lower.contains("temperature missing") {
            Self::TemperatureMissing
        } else if lower.contains("process timeout") {
            Self::ProcessTimeout
        } else if lower.contains("ph dosing limit") {
            Self::PhDosingLimit
        } else if lower.contains("ph total limit") {
            Self::PhTotalLimit
        } else if lower.contains("pump calibration missing") {
            Self::PumpCalibrationMissing
        } else {
            Self::Other(reason.to_string())
        }
    }
}

impl core::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::PhOutOfRange => write!(f, "pH out of range"),
            Self::EcInvalid => write!(f, "EC invalid"),
            Self::TdsInvalid => write!(f, "TDS invalid"),
            Self::TemperatureMissing => write!(f, "Temperature missing"),
            Self::ProcessTimeout => write!(f, "Process timeout"),
            Self::PhDosingLimit => write!(f, "pH dosing limit"),
            Self::PhTotalLimit => write!(f, "pH total limit"),
            Self::PumpCalibrationMissing => write!(f, "Pump calibration missing"),
            Self::UserAbort(reason) => write!(f, "{reason}"),
            Self::Other(reason) => write!(f, "{reason}"),
        }
    }
}

/// Errors raised while constructing engine/sensor components from
/// user-supplied tuning values (not runtime faults — those are `FaultKind`).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("invalid tuning value: {0}")]
    InvalidTuning(&'static str),
}

/// Errors from loading/decoding the persisted configuration record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("persisted record too short: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },
    #[error("persisted record version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u16, got: u16 },
    #[error("persisted record CRC mismatch: expected {expected:#06x}, computed {computed:#06x}")]
    CrcMismatch { expected: u16, computed: u16 },
}

/// Protocol-level failures surfaced to the host as `ERR <code> <msg>`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtoError {
    #[error("command not recognized")]
    UnknownCommand,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("process busy")]
    ProcessBusy,
    #[error("pump busy")]
    PumpBusy,
    #[error("sensor error")]
    SensorError,
    #[error("operation failed")]
    OperationFailed,
    #[error("calibration error")]
    CalibrationError,
}

impl ProtoError {
    /// Wire error code per §6.
    pub fn code(self) -> u8 {
        match self {
            Self::UnknownCommand => 1,
            Self::InvalidArgument => 2,
            Self::ProcessBusy => 3,
            Self::PumpBusy => 4,
            Self::SensorError => 5,
            Self::OperationFailed => 6,
            Self::CalibrationError => 7,
        }
    }
}
