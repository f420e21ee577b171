//! Component assembly and the cooperative run loop for the harness binary.
//!
//! Everything the batch controller needs — `Actuators`, `SensorSource`,
//! `NvramPort` — is assembled here from the desktop tuning profile and
//! handed to `nutrient_core` as trait objects, so `main.rs` and the
//! subcommand handlers never choose between the simulated and hardware
//! backends themselves.

use std::io::{Read as _, Write as _};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use eyre::{Context as _, Result};

use nutrient_config::{Config as HarnessConfig, ConfigSeed};
use nutrient_core::config::Config;
use nutrient_core::{ConfigStore, ProcessEngine, SensorPipeline, SerialProtocol};
use nutrient_hardware::{FileNvram, SimulatedActuators, SimulatedSensorSource};
use nutrient_traits::clock::{Clock, MonotonicClock};
use nutrient_traits::{Actuators, NvramPort, SensorSource};

/// The assembled runtime: everything a cooperative-loop iteration needs.
pub struct Components {
    pub store: ConfigStore<Box<dyn NvramPort>>,
    pub actuators: Box<dyn Actuators>,
    pub source: Box<dyn SensorSource>,
    pub sensors: SensorPipeline,
    pub engine: ProcessEngine,
    pub protocol: SerialProtocol,
}

pub fn load_harness_config(path: &Path) -> Result<HarnessConfig> {
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("read config {path:?}"))?;
    let cfg = nutrient_config::load_toml(&text).wrap_err_with(|| format!("parse config {path:?}"))?;
    cfg.validate().wrap_err("invalid configuration")?;
    Ok(cfg)
}

fn apply_seed(seed: &ConfigSeed, c: &mut Config) {
    if let Some(v) = seed.ph_gain {
        c.ph_gain = v;
    }
    if let Some(v) = seed.ph_offset {
        c.ph_offset = v;
    }
    if let Some(v) = seed.ec_alpha {
        c.ec_alpha = v;
    }
    if let Some(v) = seed.tds_factor {
        c.tds_factor = v;
    }
    if let Some(v) = seed.ec_k {
        c.ec_k = v;
    }
    if let Some(v) = seed.pump_ml_per_sec {
        c.pump_ml_per_sec = v;
    }
    if let Some(v) = seed.relay_active_low {
        c.relay_active_low = v;
    }
    if let Some(v) = seed.device_id {
        c.device_id = v;
    }
    if let Some(v) = seed.coarse_threshold {
        c.coarse_threshold = v;
    }
    if let Some(v) = seed.fine_threshold {
        c.fine_threshold = v;
    }
    if let Some(v) = seed.coarse_pause_ms {
        c.coarse_pause_ms = v;
    }
    if let Some(v) = seed.fine_pause_ms {
        c.fine_pause_ms = v;
    }
    if let Some(v) = seed.fert_pause_ms {
        c.fert_pause_ms = v;
    }
    if let Some(v) = seed.max_ph_dose_per_pulse_per_l {
        c.max_ph_dose_per_pulse_per_l = v;
    }
    if let Some(v) = seed.max_ph_total_per_l {
        c.max_ph_total_per_l = v;
    }
    if let Some(v) = seed.dose_gain_up {
        c.dose_gain_up = v;
    }
    if let Some(v) = seed.dose_gain_down {
        c.dose_gain_down = v;
    }
    if let Some(v) = seed.fine_dose_scale {
        c.fine_dose_scale = v;
    }
    if let Some(v) = seed.process_timeout_ms {
        c.process_timeout_ms = v;
    }
    if let Some(v) = seed.require_temperature {
        c.require_temperature = v;
    }
}

#[cfg(feature = "hardware")]
fn build_hardware_nvram(cfg: &HarnessConfig) -> Result<Box<dyn NvramPort>> {
    if cfg.nvram.hardware {
        let i2c = rppal::i2c::I2c::with_bus(cfg.nvram.eeprom.i2c_bus).wrap_err("open EEPROM I2C bus")?;
        let eeprom = nutrient_hardware::eeprom::I2cEeprom::new(i2c, cfg.nvram.eeprom.address, Box::new(MonotonicClock::new()))
            .wrap_err("init EEPROM")?;
        Ok(Box::new(nutrient_hardware::I2cEepromNvram::new(eeprom)))
    } else {
        Ok(Box::new(FileNvram::new(&cfg.nvram.path)))
    }
}

#[cfg(feature = "hardware")]
fn build_hardware_sensor_source(cfg: &HarnessConfig) -> Result<Box<dyn SensorSource>> {
    use nutrient_hardware::adc::Mcp3008;
    use nutrient_hardware::AdcSensorSource;

    let spi = rppal::spi::Spi::new(
        rppal::spi::Bus::try_from(cfg.backend.adc.spi_bus).wrap_err("backend.adc.spi_bus")?,
        rppal::spi::SlaveSelect::try_from(cfg.backend.adc.spi_select).wrap_err("backend.adc.spi_select")?,
        cfg.backend.adc.spi_speed_hz,
        rppal::spi::Mode::Mode0,
    )
    .wrap_err("open MCP3008 SPI bus")?;
    Ok(Box::new(AdcSensorSource::new(Mcp3008::new(spi))))
}

#[cfg(feature = "hardware")]
fn build_hardware_actuators(cfg: &HarnessConfig, relay_active_low: bool) -> Result<Box<dyn Actuators>> {
    use nutrient_hardware::RelayPins;

    let pins = cfg.backend.relays;
    let relay_pins = RelayPins {
        mix1: pins.mix1,
        mix2: pins.mix2,
        ph_down: pins.ph_down,
        ph_up: pins.ph_up,
        fert_a: pins.fert_a,
        fert_b: pins.fert_b,
    };
    Ok(Box::new(
        nutrient_hardware::GpioActuators::new(relay_pins, relay_active_low).wrap_err("open GPIO relays")?,
    ))
}

fn build_simulated_nvram(cfg: &HarnessConfig) -> Box<dyn NvramPort> {
    Box::new(FileNvram::new(&cfg.nvram.path))
}

/// Assemble every component from a loaded harness config. `now_ms` seeds
/// `SerialProtocol`'s first periodic STATUS deadline.
///
/// Actuator construction is ordered after the `ConfigStore` load because the
/// GPIO relay polarity (`relay_active_low`) lives in the persisted `Config`,
/// not the desktop profile.
pub fn build_components(cfg: &HarnessConfig, now_ms: u64) -> Result<Components> {
    #[cfg(feature = "hardware")]
    let nvram = if cfg.backend.hardware {
        build_hardware_nvram(cfg)?
    } else {
        build_simulated_nvram(cfg)
    };
    #[cfg(not(feature = "hardware"))]
    let nvram = build_simulated_nvram(cfg);

    let cold = !Path::new(&cfg.nvram.path).exists();
    let mut store = ConfigStore::load_or_defaults(nvram);
    if cold {
        store.mutate(|c| apply_seed(&cfg.seed, c));
    }

    #[cfg(feature = "hardware")]
    let (actuators, source): (Box<dyn Actuators>, Box<dyn SensorSource>) = if cfg.backend.hardware {
        (
            build_hardware_actuators(cfg, store.get().relay_active_low)?,
            build_hardware_sensor_source(cfg)?,
        )
    } else {
        (Box::new(SimulatedActuators::new()), Box::new(SimulatedSensorSource::new()))
    };
    #[cfg(not(feature = "hardware"))]
    let (actuators, source): (Box<dyn Actuators>, Box<dyn SensorSource>) =
        (Box::new(SimulatedActuators::new()), Box::new(SimulatedSensorSource::new()));

    Ok(Components {
        store,
        actuators,
        source,
        sensors: SensorPipeline::default(),
        engine: ProcessEngine::new(),
        protocol: SerialProtocol::new(now_ms),
    })
}

/// Interactive cooperative loop: stdin is read from a dedicated thread into
/// an `mpsc` channel (the channel plays the role of a UART RX buffer an ISR
/// would fill), polled non-blockingly once per tick, so the core loop itself
/// never performs a blocking read. Ctrl-C requests a clean shutdown: finish
/// the current tick, abort any in-flight batch, persist config, then return.
pub fn run_interactive(mut c: Components, tick_ms: u64) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_handler = Arc::clone(&shutdown);
    ctrlc::set_handler(move || shutdown_handler.store(true, Ordering::SeqCst))
        .wrap_err("install Ctrl-C handler")?;

    let (tx, rx) = mpsc::channel::<u8>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for byte in stdin.lock().bytes() {
            match byte {
                Ok(b) => {
                    if tx.send(b).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    let clock = MonotonicClock::new();
    let epoch = Instant::now();
    let stdout = std::io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let now_ms = clock.ms_since(epoch);
        c.sensors.tick(&clock, epoch, c.store.get(), &mut c.source);
        c.engine.on_sensor_tick(c.store.get(), &c.sensors, now_ms, &mut c.actuators);
        c.engine.on_timer_tick(c.store.get(), now_ms, &mut c.actuators);

        let mut out = String::new();
        c.protocol
            .update(&c.engine, &c.sensors, &mut c.actuators, now_ms, &mut out)
            .wrap_err("format status line")?;
        if !out.is_empty() {
            print!("{out}");
            let _ = stdout.lock().flush();
        }

        while let Ok(byte) = rx.try_recv() {
            if let Some(line) = c.protocol.feed_byte(byte) {
                let now_ms = clock.ms_since(epoch);
                let reply = c.protocol.dispatch_line(&line, &mut c.store, &mut c.engine, &mut c.sensors, &mut c.actuators, now_ms);
                print!("{reply}");
                let _ = stdout.lock().flush();
            }
        }

        clock.sleep(std::time::Duration::from_millis(tick_ms));
    }

    if c.engine.state().is_active() {
        c.engine.abort("User abort: shutdown", &mut c.actuators);
    }
    let _ = c.actuators.all_off();
    c.store.save();
    Ok(())
}

/// Replay a deterministic scenario file with no wall-clock sleeping.
///
/// Each non-blank, non-`#`-prefixed line is `<due_ms> <ph_raw> <ec_raw>
/// <vcc_raw>`: at `due_ms` the simulated sensor source is set to the given
/// raw ADC counts and one full tick (`SensorPipeline` -> `ProcessEngine` ->
/// `SerialProtocol`) runs at that timestamp. Always runs against the
/// simulated backend and a deterministic clock, regardless of the loaded
/// profile's `[backend]` selection, since real hardware cannot be driven
/// deterministically.
pub fn run_scenario(mut c: Components, scenario_path: &Path) -> Result<()> {
    use nutrient_traits::clock::test_clock::TestClock;

    let text = std::fs::read_to_string(scenario_path)
        .wrap_err_with(|| format!("read scenario {scenario_path:?}"))?;
    let mut source = SimulatedSensorSource::new();

    let clock = TestClock::new();
    let epoch = clock.now();
    let stdout = std::io::stdout();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split_whitespace();
        let due_ms: u64 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| eyre::eyre!("bad scenario line: {line:?}"))?;
        let ph_raw: u16 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| eyre::eyre!("bad scenario line: {line:?}"))?;
        let ec_raw: u16 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| eyre::eyre!("bad scenario line: {line:?}"))?;
        let vcc_raw: u16 = fields
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| eyre::eyre!("bad scenario line: {line:?}"))?;

        source.set_ph_raw(ph_raw);
        source.set_ec_raw(ec_raw);
        source.set_vcc_raw(vcc_raw);
        clock.set_offset(std::time::Duration::from_millis(due_ms));

        c.sensors.tick(&clock, epoch, c.store.get(), &mut source);
        c.engine.on_sensor_tick(c.store.get(), &c.sensors, due_ms, &mut c.actuators);
        c.engine.on_timer_tick(c.store.get(), due_ms, &mut c.actuators);

        let mut out = String::new();
        c.protocol
            .update(&c.engine, &c.sensors, &mut c.actuators, due_ms, &mut out)
            .wrap_err("format status line")?;
        if !out.is_empty() {
            print!("{out}");
            let _ = stdout.lock().flush();
        }
    }

    c.store.save();
    Ok(())
}
