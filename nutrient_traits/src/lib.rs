#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Capability traits that define the hardware and time abstractions used by
//! the controller.
//!
//! - `Actuators` drives the six pump outputs (two mixing, four dosing).
//! - `SensorSource` supplies raw ADC counts for the pH/EC probes and the
//!   supply-voltage reference.
//! - `NvramPort` backs the persisted configuration record.
//! - `clock` offers a `MonotonicClock` for real use and a `TestClock` for
//!   deterministic tests.
//!
//! Other crates depend only on these traits, enabling simulation and
//! multiple hardware backends while keeping `nutrient_core` hardware-agnostic.
pub mod clock;

pub use clock::{Clock, MonotonicClock};
pub use clock::test_clock;
pub use clock::test_clock::TestClock;

use std::error::Error;

/// One of the six pump outputs the controller drives.
///
/// The two mixing pumps and four dosing pumps are addressed by distinct
/// setters, not a generic channel index, because their electrical polarity
/// differs (mixing pumps may be active-low relays; dosing pumps are always
/// active-high MOSFET drivers). Polarity handling belongs entirely to the
/// implementation, never to callers of this trait.
pub trait Actuators {
    fn set_mix1(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn set_mix2(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn set_ph_down(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn set_ph_up(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn set_fert_a(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>>;
    fn set_fert_b(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Turn every channel off. The default walks all six setters; override
    /// only if a backend has a cheaper all-off primitive.
    fn all_off(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.set_mix1(false)?;
        self.set_mix2(false)?;
        self.set_ph_down(false)?;
        self.set_ph_up(false)?;
        self.set_fert_a(false)?;
        self.set_fert_b(false)?;
        Ok(())
    }
}

/// Raw analog inputs the sensor pipeline conditions into engineering units.
///
/// Readings are plain 10-bit ADC counts (0..=1023) so voltage scaling and
/// filtering stay entirely inside the sensor pipeline. A scripted source can
/// hand back whatever trajectory a test scenario needs; a real source reads
/// an actual analog pin.
pub trait SensorSource {
    /// Raw pH probe ADC count.
    fn read_ph_raw(&mut self) -> Result<u16, Box<dyn Error + Send + Sync>>;
    /// Raw EC/TDS probe ADC count.
    fn read_ec_raw(&mut self) -> Result<u16, Box<dyn Error + Send + Sync>>;
    /// Raw supply-voltage reference ADC count (internal 1.1V reference vs Vcc).
    fn read_vcc_raw(&mut self) -> Result<u16, Box<dyn Error + Send + Sync>>;
}

/// Non-volatile storage backing the persisted `Config` record.
///
/// Mirrors the `Actuators`/`SensorSource` capability pattern: the config
/// store logic (versioning, CRC, sanitize-on-load) lives entirely in
/// `nutrient_core` and is oblivious to whether `read`/`write` land on a real
/// EEPROM, a flash page, or an in-memory/file-backed stand-in used in tests.
pub trait NvramPort {
    /// Read exactly `buf.len()` bytes starting at NVRAM offset 0.
    ///
    /// Implementations that cannot satisfy the full length (e.g. a blank or
    /// undersized backing store) should zero-fill `buf` and return `Ok(())`
    /// rather than erroring — the caller treats an all-zero/garbage record as
    /// a CRC mismatch and falls back to defaults, which is the documented
    /// load-failure behavior.
    fn read(&mut self, buf: &mut [u8]) -> Result<(), Box<dyn Error + Send + Sync>>;
    /// Write `buf` atomically to the start of NVRAM. A write failure is
    /// best-effort from the caller's perspective (§7): it is logged but
    /// never propagated as a process fault.
    fn write(&mut self, buf: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>>;
}

impl<T: ?Sized + NvramPort> NvramPort for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).read(buf)
    }
    fn write(&mut self, buf: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).write(buf)
    }
}

// Allow boxed trait objects to be used where a generic A: Actuators /
// S: SensorSource is expected.
impl<T: ?Sized + Actuators> Actuators for Box<T> {
    fn set_mix1(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).set_mix1(on)
    }
    fn set_mix2(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).set_mix2(on)
    }
    fn set_ph_down(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).set_ph_down(on)
    }
    fn set_ph_up(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).set_ph_up(on)
    }
    fn set_fert_a(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).set_fert_a(on)
    }
    fn set_fert_b(&mut self, on: bool) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).set_fert_b(on)
    }
    fn all_off(&mut self) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).all_off()
    }
}

impl<T: ?Sized + SensorSource> SensorSource for Box<T> {
    fn read_ph_raw(&mut self) -> Result<u16, Box<dyn Error + Send + Sync>> {
        (**self).read_ph_raw()
    }
    fn read_ec_raw(&mut self) -> Result<u16, Box<dyn Error + Send + Sync>> {
        (**self).read_ec_raw()
    }
    fn read_vcc_raw(&mut self) -> Result<u16, Box<dyn Error + Send + Sync>> {
        (**self).read_vcc_raw()
    }
}
