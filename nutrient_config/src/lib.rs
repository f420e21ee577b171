#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Desktop/dev-facing TOML tuning profile for the harness binary.
//!
//! This is distinct from, and never conflated with, `nutrient_core::Config`
//! (the firmware's own CRC-protected NVRAM record): this crate only decides
//! how the harness wires the cooperative loop up — which pins back which
//! relay, which backend drives the sensors, where the NVRAM image file
//! lives, how verbose logging is — and what to seed a blank `Config` with on
//! first boot.
use serde::Deserialize;

/// GPIO pin assignment for the six relay/MOSFET channels (`feature =
/// "hardware"` only; ignored when `backend.hardware` is false).
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RelayPins {
    pub mix1: u8,
    pub mix2: u8,
    pub ph_down: u8,
    pub ph_up: u8,
    pub fert_a: u8,
    pub fert_b: u8,
}

impl Default for RelayPins {
    fn default() -> Self {
        Self {
            mix1: 17,
            mix2: 27,
            ph_down: 22,
            ph_up: 23,
            fert_a: 24,
            fert_b: 25,
        }
    }
}

/// MCP3008 SPI wiring and channel assignment for the two analog sensors and
/// the Vcc reference divider.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct AdcCfg {
    pub spi_bus: u8,
    pub spi_select: u8,
    pub spi_speed_hz: u32,
    pub ph_channel: u8,
    pub ec_channel: u8,
    pub vcc_channel: u8,
}

impl Default for AdcCfg {
    fn default() -> Self {
        Self {
            spi_bus: 0,
            spi_select: 0,
            spi_speed_hz: 1_350_000,
            ph_channel: 0,
            ec_channel: 1,
            vcc_channel: 2,
        }
    }
}

/// I2C EEPROM wiring, used only when `nvram.hardware` is true.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct EepromCfg {
    pub i2c_bus: u8,
    pub address: u16,
}

impl Default for EepromCfg {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            address: 0x50,
        }
    }
}

/// Which `SensorSource`/`Actuators` implementation the harness wires up.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct BackendCfg {
    /// `false`: `SimulatedActuators`/`SimulatedSensorSource` (default; safe
    /// on a desktop). `true`: `GpioActuators`/`AdcSensorSource` over `rppal`,
    /// requires the `hardware` cargo feature.
    pub hardware: bool,
    pub relays: RelayPins,
    pub adc: AdcCfg,
}

impl Default for BackendCfg {
    fn default() -> Self {
        Self {
            hardware: false,
            relays: RelayPins::default(),
            adc: AdcCfg::default(),
        }
    }
}

/// Where the persisted `Config` record lives.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NvramCfg {
    /// `true`: `I2cEeprom` over `rppal`, requires the `hardware` feature.
    /// `false`: `FileNvram` at `path`.
    pub hardware: bool,
    pub path: String,
    pub eeprom: EepromCfg,
}

impl Default for NvramCfg {
    fn default() -> Self {
        Self {
            hardware: false,
            path: "nutrient_nvram.bin".to_string(),
            eeprom: EepromCfg::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Logging {
    /// Path to a rotating log file (JSON lines); stderr-only when absent.
    pub file: Option<String>,
    /// `tracing_subscriber::EnvFilter` directive string, e.g. `"info"` or
    /// `"nutrient_core=debug,warn"`.
    pub level: Option<String>,
    /// "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
    /// Emit JSON-formatted log lines instead of the default plain layout.
    pub json: bool,
}

/// Which `Clock` drives the cooperative loop. `Scripted` is for replaying a
/// scenario file with no wall-clock sleeping between ticks.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClockSource {
    #[default]
    Monotonic,
    Scripted,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RuntimeCfg {
    pub clock: ClockSource,
    /// Poll period for the cooperative loop's sensor tick, milliseconds.
    pub tick_ms: u64,
}

impl Default for RuntimeCfg {
    fn default() -> Self {
        Self {
            clock: ClockSource::Monotonic,
            tick_ms: 100,
        }
    }
}

/// Values used to seed a cold (blank or CRC-invalid) `nutrient_core::Config`
/// on first boot. Every field is optional; an absent field leaves the
/// firmware's own factory default in place. These are applied once, before
/// `sanitize()` runs, so out-of-range seed values are still clamped.
#[derive(Debug, Deserialize, Clone, Copy, Default)]
#[serde(default)]
pub struct ConfigSeed {
    pub ph_gain: Option<f32>,
    pub ph_offset: Option<f32>,
    pub ec_alpha: Option<f32>,
    pub tds_factor: Option<u16>,
    pub ec_k: Option<f32>,
    pub pump_ml_per_sec: Option<[f32; 4]>,
    pub relay_active_low: Option<bool>,
    pub device_id: Option<u16>,
    pub coarse_threshold: Option<f32>,
    pub fine_threshold: Option<f32>,
    pub coarse_pause_ms: Option<u32>,
    pub fine_pause_ms: Option<u32>,
    pub fert_pause_ms: Option<u32>,
    pub max_ph_dose_per_pulse_per_l: Option<f32>,
    pub max_ph_total_per_l: Option<f32>,
    pub dose_gain_up: Option<f32>,
    pub dose_gain_down: Option<f32>,
    pub fine_dose_scale: Option<f32>,
    pub process_timeout_ms: Option<u32>,
    pub require_temperature: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeCfg,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub nvram: NvramCfg,
    #[serde(default)]
    pub backend: BackendCfg,
    #[serde(default)]
    pub seed: ConfigSeed,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            runtime: RuntimeCfg::default(),
            logging: Logging::default(),
            nvram: NvramCfg::default(),
            backend: BackendCfg::default(),
            seed: ConfigSeed::default(),
        }
    }
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        if self.runtime.tick_ms == 0 {
            eyre::bail!("runtime.tick_ms must be >= 1");
        }
        if self.runtime.tick_ms > 60_000 {
            eyre::bail!("runtime.tick_ms is unreasonably large (>60s)");
        }
        if self.backend.adc.spi_speed_hz == 0 {
            eyre::bail!("backend.adc.spi_speed_hz must be > 0");
        }
        for (name, ch) in [
            ("ph_channel", self.backend.adc.ph_channel),
            ("ec_channel", self.backend.adc.ec_channel),
            ("vcc_channel", self.backend.adc.vcc_channel),
        ] {
            if ch > 7 {
                eyre::bail!("backend.adc.{name} must address an MCP3008 channel in 0..=7, got {ch}");
            }
        }
        if self.nvram.path.trim().is_empty() {
            eyre::bail!("nvram.path must not be empty");
        }
        if let Some(level) = &self.logging.level
            && level.trim().is_empty()
        {
            eyre::bail!("logging.level must not be empty when present");
        }
        if let Some(rotation) = &self.logging.rotation
            && !matches!(rotation.as_str(), "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never/daily/hourly, got {rotation:?}");
        }
        if let Some(pump) = self.seed.pump_ml_per_sec
            && pump.iter().any(|r| !r.is_finite() || *r <= 0.0)
        {
            eyre::bail!("seed.pump_ml_per_sec entries must be finite and > 0");
        }
        if let Some(fine) = self.seed.fine_threshold
            && let Some(coarse) = self.seed.coarse_threshold
            && fine > coarse
        {
            eyre::bail!("seed.fine_threshold must not exceed seed.coarse_threshold");
        }
        Ok(())
    }
}
