//! Real and simulated hardware backends for the `Actuators`, `SensorSource`
//! and `NvramPort` capability traits.
//!
//! Everything behind `feature = "hardware"` talks to real Raspberry Pi
//! peripherals through `rppal` (GPIO relays, an MCP3008 SPI ADC, an I2C
//! EEPROM); the unconditional `Simulated*`/`FileNvram` types let the
//! cooperative loop and the CLI harness run identically on a desktop.

pub mod error;
#[cfg(feature = "hardware")]
pub mod adc;
#[cfg(feature = "hardware")]
pub mod eeprom;
pub mod util;

#[cfg(feature = "hardware")]
use eeprom::I2cEeprom;

use std::cell::Cell;
use std::error::Error as StdError;
use std::fs;
use std::path::PathBuf;

use nutrient_traits::{Actuators, NvramPort, SensorSource};

type BoxErr = Box<dyn StdError + Send + Sync>;

/// Desktop stand-in for the six relay/MOSFET channels. Logs every transition
/// instead of driving a pin, so a harness run reads like a hardware trace.
#[derive(Debug, Default)]
pub struct SimulatedActuators {
    pub mix1: bool,
    pub mix2: bool,
    pub ph_down: bool,
    pub ph_up: bool,
    pub fert_a: bool,
    pub fert_b: bool,
}

impl SimulatedActuators {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actuators for SimulatedActuators {
    fn set_mix1(&mut self, on: bool) -> Result<(), BoxErr> {
        self.mix1 = on;
        tracing::debug!(on, "mix1 (simulated)");
        Ok(())
    }
    fn set_mix2(&mut self, on: bool) -> Result<(), BoxErr> {
        self.mix2 = on;
        tracing::debug!(on, "mix2 (simulated)");
        Ok(())
    }
    fn set_ph_down(&mut self, on: bool) -> Result<(), BoxErr> {
        self.ph_down = on;
        tracing::debug!(on, "ph_down pump (simulated)");
        Ok(())
    }
    fn set_ph_up(&mut self, on: bool) -> Result<(), BoxErr> {
        self.ph_up = on;
        tracing::debug!(on, "ph_up pump (simulated)");
        Ok(())
    }
    fn set_fert_a(&mut self, on: bool) -> Result<(), BoxErr> {
        self.fert_a = on;
        tracing::debug!(on, "fert_a pump (simulated)");
        Ok(())
    }
    fn set_fert_b(&mut self, on: bool) -> Result<(), BoxErr> {
        self.fert_b = on;
        tracing::debug!(on, "fert_b pump (simulated)");
        Ok(())
    }
}

/// Pin assignment for the six relay channels, passed to `GpioActuators::new`.
#[cfg(feature = "hardware")]
#[derive(Debug, Clone, Copy)]
pub struct RelayPins {
    pub mix1: u8,
    pub mix2: u8,
    pub ph_down: u8,
    pub ph_up: u8,
    pub fert_a: u8,
    pub fert_b: u8,
}

#[cfg(feature = "hardware")]
pub struct GpioActuators {
    mix1: rppal::gpio::OutputPin,
    mix2: rppal::gpio::OutputPin,
    ph_down: rppal::gpio::OutputPin,
    ph_up: rppal::gpio::OutputPin,
    fert_a: rppal::gpio::OutputPin,
    fert_b: rppal::gpio::OutputPin,
    mix_active_low: bool,
}

#[cfg(feature = "hardware")]
impl GpioActuators {
    /// `mix_active_low` comes from the loaded `Config::relay_active_low`
    /// (§4.1), not from pin wiring — it is a persisted characteristic of
    /// the relay board, re-read at startup rather than baked into `pins`.
    pub fn new(pins: RelayPins, mix_active_low: bool) -> error::Result<Self> {
        let gpio = rppal::gpio::Gpio::new().map_err(|e| error::HwError::Gpio(e.to_string()))?;
        let get_output = |pin: u8| -> error::Result<rppal::gpio::OutputPin> {
            gpio.get(pin)
                .map(rppal::gpio::Pin::into_output)
                .map_err(|e| error::HwError::Gpio(e.to_string()))
        };
        Ok(Self {
            mix1: get_output(pins.mix1)?,
            mix2: get_output(pins.mix2)?,
            ph_down: get_output(pins.ph_down)?,
            ph_up: get_output(pins.ph_up)?,
            fert_a: get_output(pins.fert_a)?,
            fert_b: get_output(pins.fert_b)?,
            mix_active_low,
        })
    }

    fn drive(pin: &mut rppal::gpio::OutputPin, on: bool, active_low: bool) {
        if on != active_low {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }
}

#[cfg(feature = "hardware")]
impl Actuators for GpioActuators {
    fn set_mix1(&mut self, on: bool) -> Result<(), BoxErr> {
        Self::drive(&mut self.mix1, on, self.mix_active_low);
        Ok(())
    }
    fn set_mix2(&mut self, on: bool) -> Result<(), BoxErr> {
        Self::drive(&mut self.mix2, on, self.mix_active_low);
        Ok(())
    }
    fn set_ph_down(&mut self, on: bool) -> Result<(), BoxErr> {
        Self::drive(&mut self.ph_down, on, false);
        Ok(())
    }
    fn set_ph_up(&mut self, on: bool) -> Result<(), BoxErr> {
        Self::drive(&mut self.ph_up, on, false);
        Ok(())
    }
    fn set_fert_a(&mut self, on: bool) -> Result<(), BoxErr> {
        Self::drive(&mut self.fert_a, on, false);
        Ok(())
    }
    fn set_fert_b(&mut self, on: bool) -> Result<(), BoxErr> {
        Self::drive(&mut self.fert_b, on, false);
        Ok(())
    }
}

/// Desktop stand-in for the two analog sensors and the Vcc divider. Raw
/// counts are set directly by a test or a scenario script; `tick()` in the
/// core sensor pipeline reads whatever was last set.
#[derive(Debug)]
pub struct SimulatedSensorSource {
    ph_raw: Cell<u16>,
    ec_raw: Cell<u16>,
    vcc_raw: Cell<u16>,
}

impl Default for SimulatedSensorSource {
    fn default() -> Self {
        Self {
            ph_raw: Cell::new(512),
            ec_raw: Cell::new(0),
            vcc_raw: Cell::new(1023),
        }
    }
}

impl SimulatedSensorSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ph_raw(&self, raw: u16) {
        self.ph_raw.set(raw);
    }

    pub fn set_ec_raw(&self, raw: u16) {
        self.ec_raw.set(raw);
    }

    pub fn set_vcc_raw(&self, raw: u16) {
        self.vcc_raw.set(raw);
    }
}

impl SensorSource for SimulatedSensorSource {
    fn read_ph_raw(&mut self) -> Result<u16, BoxErr> {
        Ok(self.ph_raw.get())
    }
    fn read_ec_raw(&mut self) -> Result<u16, BoxErr> {
        Ok(self.ec_raw.get())
    }
    fn read_vcc_raw(&mut self) -> Result<u16, BoxErr> {
        Ok(self.vcc_raw.get())
    }
}

#[cfg(feature = "hardware")]
pub struct AdcSensorSource {
    adc: adc::Mcp3008,
}

#[cfg(feature = "hardware")]
impl AdcSensorSource {
    pub fn new(adc: adc::Mcp3008) -> Self {
        Self { adc }
    }
}

#[cfg(feature = "hardware")]
impl SensorSource for AdcSensorSource {
    fn read_ph_raw(&mut self) -> Result<u16, BoxErr> {
        Ok(self.adc.read_channel(adc::AdcChannel::PH)?)
    }
    fn read_ec_raw(&mut self) -> Result<u16, BoxErr> {
        Ok(self.adc.read_channel(adc::AdcChannel::EC)?)
    }
    fn read_vcc_raw(&mut self) -> Result<u16, BoxErr> {
        Ok(self.adc.read_channel(adc::AdcChannel::VCC)?)
    }
}

/// File-backed stand-in for the EEPROM record, used by the desktop harness
/// and by every test that exercises `ConfigStore` without real hardware.
/// Reads of a missing or short file are zero-padded, matching a blank EEPROM.
pub struct FileNvram {
    path: PathBuf,
}

impl FileNvram {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// `NvramPort` over a real I2C EEPROM (`feature = "hardware"`).
#[cfg(feature = "hardware")]
pub struct I2cEepromNvram {
    eeprom: I2cEeprom,
}

#[cfg(feature = "hardware")]
impl I2cEepromNvram {
    pub fn new(eeprom: I2cEeprom) -> Self {
        Self { eeprom }
    }
}

#[cfg(feature = "hardware")]
impl NvramPort for I2cEepromNvram {
    fn read(&mut self, buf: &mut [u8]) -> Result<(), BoxErr> {
        self.eeprom.read(buf).map_err(|e| Box::new(e) as BoxErr)
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), BoxErr> {
        self.eeprom.write(buf).map_err(|e| Box::new(e) as BoxErr)
    }
}

impl NvramPort for FileNvram {
    fn read(&mut self, buf: &mut [u8]) -> Result<(), BoxErr> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                for b in &mut buf[n..] {
                    *b = 0;
                }
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                buf.fill(0);
                Ok(())
            }
            Err(e) => Err(Box::new(e)),
        }
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), BoxErr> {
        fs::write(&self.path, buf).map_err(|e| Box::new(e) as BoxErr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_actuators_track_last_write() {
        let mut a = SimulatedActuators::new();
        a.set_mix1(true).unwrap();
        a.set_ph_down(true).unwrap();
        a.set_ph_down(false).unwrap();
        assert!(a.mix1);
        assert!(!a.ph_down);
    }

    #[test]
    fn simulated_sensor_source_reads_last_set_value() {
        let source = SimulatedSensorSource::new();
        source.set_ph_raw(700);
        let mut source = source;
        assert_eq!(source.read_ph_raw().unwrap(), 700);
    }

    #[test]
    fn file_nvram_round_trips() {
        let dir = std::env::temp_dir().join(format!("nutrient_nvram_test_{}", std::process::id()));
        let mut nvram = FileNvram::new(&dir);
        let data = [1u8, 2, 3, 4, 5];
        nvram.write(&data).unwrap();
        let mut out = [0u8; 5];
        nvram.read(&mut out).unwrap();
        assert_eq!(out, data);
        let _ = fs::remove_file(&dir);
    }

    #[test]
    fn file_nvram_missing_file_reads_as_zero() {
        let dir = std::env::temp_dir().join(format!("nutrient_nvram_missing_{}", std::process::id()));
        let _ = fs::remove_file(&dir);
        let mut nvram = FileNvram::new(&dir);
        let mut out = [0xffu8; 8];
        nvram.read(&mut out).unwrap();
        assert_eq!(out, [0u8; 8]);
    }
}
