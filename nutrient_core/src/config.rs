//! Versioned, CRC-protected persistent configuration (§3, §4.1).
//!
//! `Config` is the firmware's own tuning/calibration record — distinct from
//! the desktop TOML tuning profile in `nutrient_config`, which only seeds a
//! cold `Config` and configures the ambient stack around it (§10). The
//! on-wire/on-NVRAM layout here is a hand-rolled byte encoder, not a
//! `serde`/`bincode` derive, because it must match a documented C-struct
//! field order and width exactly (§4.1) for a host tool to parse
//! independently.

use crc::{Crc, CRC_16_CCITT_FALSE};

use crate::error::ConfigError;
use crate::model::PumpChannel;

/// Current persisted record version. Bumped whenever `Config`'s layout
/// changes in a way that is not byte-compatible with a prior release.
pub const CONFIG_VERSION: u16 = 1;

/// `version` + `Config::BYTE_LEN` + `crc`.
pub const RECORD_LEN: usize = 2 + Config::BYTE_LEN + 2;

const CCITT_FALSE: Crc<u16> = Crc::<u16>::new(&CRC_16_CCITT_FALSE);

/// The persisted configuration record (§3).
///
/// Every field is clamped to its documented invariant range by
/// [`Config::sanitize`], which runs unconditionally on every load and save
/// (§4.1). Defaults below are the firmware's factory defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// pH linear fit: `pH = ph_gain * V + ph_offset`.
    pub ph_gain: f32,
    pub ph_offset: f32,
    /// Filtered voltages captured during the last successful `CAL_PH`
    /// session, indexed 0=4.01, 1=6.86, 2=9.18.
    pub ph_cal_voltage: [f32; 3],
    /// Bit `i` set iff `ph_cal_voltage[i]` has been captured this session.
    pub ph_cal_valid_mask: u8,

    /// EC temperature coefficient, range `[0, 0.2]`.
    pub ec_alpha: f32,
    /// Integer EC25(mS/cm) -> ppm multiplier, range `(0, 2000]`.
    pub tds_factor: u16,
    /// EC cell constant, range `(0, 10]`.
    pub ec_k: f32,

    /// ml/s for each of the four dosing pumps, indexed by
    /// [`PumpChannel::index`]; each in `(0, 100]`.
    pub pump_ml_per_sec: [f32; 4],
    /// Electrical polarity of the two mixing-pump relays. Dosing pumps are
    /// always active-high regardless of this flag (§4.2).
    pub relay_active_low: bool,
    pub device_id: u16,

    /// `|target - pH|` above which the engine is in `PhCoarse`, range
    /// `[0.05, 2.0]`.
    pub coarse_threshold: f32,
    /// `|target - pH|` below which the engine moves to `FertA`, range
    /// `[0.01, coarse_threshold]`.
    pub fine_threshold: f32,
    pub coarse_pause_ms: u32,
    pub fine_pause_ms: u32,
    pub fert_pause_ms: u32,
    pub max_ph_dose_per_pulse_per_l: f32,
    pub max_ph_total_per_l: f32,
    /// Direction-specific dose gains (ml of acid/base per pH unit per
    /// liter), each clamped to `[0.02, 2.0]`.
    pub dose_gain_up: f32,
    pub dose_gain_down: f32,
    /// Additional per-pulse ceiling multiplier applied only in `PhFine`,
    /// range `(0, 1]`.
    pub fine_dose_scale: f32,
    /// `0` disables the watchdog; otherwise clamped to `[60_000, 21_600_000]`.
    pub process_timeout_ms: u32,
    /// When set, a missing temperature reading faults the batch rather than
    /// merely disabling EC temperature compensation.
    pub require_temperature: bool,
}

/// Pause duration bounds shared by `coarse_pause_ms`/`fine_pause_ms`/`fert_pause_ms`.
const PAUSE_MIN_MS: u32 = 1_000;
const PAUSE_MAX_MS: u32 = 20 * 60 * 1000;
const TIMEOUT_MIN_MS: u32 = 60_000;
const TIMEOUT_MAX_MS: u32 = 6 * 60 * 60 * 1000;

impl Default for Config {
    fn default() -> Self {
        Self {
            ph_gain: -5.70,
            ph_offset: 21.34,
            ph_cal_voltage: [0.0; 3],
            ph_cal_valid_mask: 0,
            ec_alpha: 0.02,
            tds_factor: 500,
            ec_k: 1.0,
            // PhDown, PhUp, FertA, FertB — 3.0 ml/s on the fert channels
            // matches the worked example in §8 S1 (10 ml over 10/3 s).
            pump_ml_per_sec: [2.0, 2.0, 3.0, 3.0],
            relay_active_low: false,
            device_id: 1,
            coarse_threshold: 0.3,
            fine_threshold: 0.1,
            coarse_pause_ms: 5_000,
            fine_pause_ms: 5_000,
            fert_pause_ms: 5_000,
            max_ph_dose_per_pulse_per_l: 0.5,
            max_ph_total_per_l: 2.0,
            dose_gain_up: 0.2,
            dose_gain_down: 0.2,
            fine_dose_scale: 0.3,
            process_timeout_ms: 0,
            require_temperature: false,
        }
    }
}

impl Config {
    /// Encoded byte width of `Config` alone (excludes the `version`/`crc`
    /// envelope of the persisted record).
    pub const BYTE_LEN: usize = 4 + 4 + 12 + 1 + 4 + 2 + 4 + 16 + 1 + 2 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 4 + 1;

    /// Clamp every field to its documented invariant range and reset any
    /// non-finite float to its factory default (§4.1). Runs on every load
    /// and save.
    pub fn sanitize(&mut self) {
        let d = Config::default();

        self.ph_gain = finite_or(self.ph_gain, d.ph_gain);
        self.ph_offset = finite_or(self.ph_offset, d.ph_offset);
        for (v, dv) in self.ph_cal_voltage.iter_mut().zip(d.ph_cal_voltage) {
            *v = finite_or(*v, dv);
        }
        self.ph_cal_valid_mask &= 0b111;

        self.ec_alpha = finite_or(self.ec_alpha, d.ec_alpha).clamp(0.0, 0.2);
        if self.tds_factor == 0 || self.tds_factor > 2000 {
            self.tds_factor = d.tds_factor;
        }
        self.ec_k = finite_or(self.ec_k, d.ec_k).clamp(f32::MIN_POSITIVE, 10.0);

        for (rate, default_rate) in self.pump_ml_per_sec.iter_mut().zip(d.pump_ml_per_sec) {
            *rate = finite_or(*rate, default_rate).clamp(f32::MIN_POSITIVE, 100.0);
        }

        self.coarse_threshold = finite_or(self.coarse_threshold, d.coarse_threshold).clamp(0.05, 2.0);
        self.fine_threshold = finite_or(self.fine_threshold, d.fine_threshold)
            .clamp(0.01, self.coarse_threshold);

        self.coarse_pause_ms = self.coarse_pause_ms.clamp(PAUSE_MIN_MS, PAUSE_MAX_MS);
        self.fine_pause_ms = self.fine_pause_ms.clamp(PAUSE_MIN_MS, PAUSE_MAX_MS);
        self.fert_pause_ms = self.fert_pause_ms.clamp(PAUSE_MIN_MS, PAUSE_MAX_MS);

        self.max_ph_dose_per_pulse_per_l =
            finite_or(self.max_ph_dose_per_pulse_per_l, d.max_ph_dose_per_pulse_per_l)
                .max(f32::MIN_POSITIVE);
        self.max_ph_total_per_l =
            finite_or(self.max_ph_total_per_l, d.max_ph_total_per_l).max(f32::MIN_POSITIVE);

        self.dose_gain_up = finite_or(self.dose_gain_up, d.dose_gain_up).clamp(0.02, 2.0);
        self.dose_gain_down = finite_or(self.dose_gain_down, d.dose_gain_down).clamp(0.02, 2.0);
        self.fine_dose_scale =
            finite_or(self.fine_dose_scale, d.fine_dose_scale).clamp(f32::MIN_POSITIVE, 1.0);

        if self.process_timeout_ms != 0 {
            self.process_timeout_ms = self.process_timeout_ms.clamp(TIMEOUT_MIN_MS, TIMEOUT_MAX_MS);
        }
    }

    /// ml/s for a given pump channel.
    pub fn pump_rate(&self, channel: PumpChannel) -> f32 {
        self.pump_ml_per_sec[channel.index()]
    }

    /// Encode `self` into a fixed-width little-endian byte buffer matching
    /// the documented field order (§3).
    pub fn to_bytes(&self) -> [u8; Self::BYTE_LEN] {
        let mut out = [0u8; Self::BYTE_LEN];
        let mut w = ByteWriter::new(&mut out);
        w.f32(self.ph_gain);
        w.f32(self.ph_offset);
        for v in self.ph_cal_voltage {
            w.f32(v);
        }
        w.u8(self.ph_cal_valid_mask);
        w.f32(self.ec_alpha);
        w.u16(self.tds_factor);
        w.f32(self.ec_k);
        for r in self.pump_ml_per_sec {
            w.f32(r);
        }
        w.u8(self.relay_active_low as u8);
        w.u16(self.device_id);
        w.f32(self.coarse_threshold);
        w.f32(self.fine_threshold);
        w.u32(self.coarse_pause_ms);
        w.u32(self.fine_pause_ms);
        w.u32(self.fert_pause_ms);
        w.f32(self.max_ph_dose_per_pulse_per_l);
        w.f32(self.max_ph_total_per_l);
        w.f32(self.dose_gain_up);
        w.f32(self.dose_gain_down);
        w.f32(self.fine_dose_scale);
        w.u32(self.process_timeout_ms);
        w.u8(self.require_temperature as u8);
        debug_assert_eq!(w.pos, Self::BYTE_LEN);
        out
    }

    /// Decode a `Config` from exactly `Self::BYTE_LEN` bytes. The caller is
    /// responsible for CRC/version validation (see [`ConfigStore::load_or_defaults`]);
    /// this never rejects a record on its own, it only rejects a too-short slice.
    pub fn from_bytes(buf: &[u8]) -> Result<Self, ConfigError> {
        if buf.len() < Self::BYTE_LEN {
            return Err(ConfigError::Truncated {
                need: Self::BYTE_LEN,
                got: buf.len(),
            });
        }
        let mut r = ByteReader::new(buf);
        let mut cfg = Config {
            ph_gain: r.f32(),
            ph_offset: r.f32(),
            ph_cal_voltage: [r.f32(), r.f32(), r.f32()],
            ph_cal_valid_mask: r.u8(),
            ec_alpha: r.f32(),
            tds_factor: r.u16(),
            ec_k: r.f32(),
            pump_ml_per_sec: [r.f32(), r.f32(), r.f32(), r.f32()],
            relay_active_low: r.u8() != 0,
            device_id: r.u16(),
            coarse_threshold: r.f32(),
            fine_threshold: r.f32(),
            coarse_pause_ms: r.u32(),
            fine_pause_ms: r.u32(),
            fert_pause_ms: r.u32(),
            max_ph_dose_per_pulse_per_l: r.f32(),
            max_ph_total_per_l: r.f32(),
            dose_gain_up: r.f32(),
            dose_gain_down: r.f32(),
            fine_dose_scale: r.f32(),
            process_timeout_ms: r.u32(),
            require_temperature: r.u8() != 0,
        };
        debug_assert_eq!(r.pos, Self::BYTE_LEN);
        // Loaded-but-unsanitized records are rejected wholesale by the
        // caller on CRC mismatch; a CRC-valid record is still run through
        // sanitize() so a hand-edited NVRAM image can't smuggle an
        // out-of-range field past the engine.
        cfg.sanitize();
        Ok(cfg)
    }
}

#[inline]
fn finite_or(x: f32, default: f32) -> f32 {
    if x.is_finite() { x } else { default }
}

struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    fn u8(&mut self, v: u8) {
        self.buf[self.pos] = v;
        self.pos += 1;
    }
    fn u16(&mut self, v: u16) {
        self.buf[self.pos..self.pos + 2].copy_from_slice(&v.to_le_bytes());
        self.pos += 2;
    }
    fn u32(&mut self, v: u32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }
    fn f32(&mut self, v: f32) {
        self.buf[self.pos..self.pos + 4].copy_from_slice(&v.to_le_bytes());
        self.pos += 4;
    }
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }
    fn u16(&mut self) -> u16 {
        let v = u16::from_le_bytes(self.buf[self.pos..self.pos + 2].try_into().unwrap());
        self.pos += 2;
        v
    }
    fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }
    fn f32(&mut self) -> f32 {
        let v = f32::from_le_bytes(self.buf[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }
}

/// `{version, config, crc}` envelope (§4.1). `crc` is CRC-16/CCITT-FALSE
/// (poly `0x1021`, init `0xFFFF`) over the whole record with the CRC field
/// itself zeroed during computation.
pub fn encode_record(config: &Config) -> [u8; RECORD_LEN] {
    let mut out = [0u8; RECORD_LEN];
    out[0..2].copy_from_slice(&CONFIG_VERSION.to_le_bytes());
    out[2..2 + Config::BYTE_LEN].copy_from_slice(&config.to_bytes());
    // crc bytes already zeroed by initialization
    let crc = CCITT_FALSE.checksum(&out);
    out[RECORD_LEN - 2..].copy_from_slice(&crc.to_le_bytes());
    out
}

/// Decode and validate a `{version, config, crc}` record. Returns `Err` on
/// a short buffer, version mismatch, or CRC mismatch — the caller
/// ([`ConfigStore::load_or_defaults`]) treats all three as "fall back to
/// sanitized defaults" (§4.1, §8 invariant 5).
pub fn decode_record(buf: &[u8]) -> Result<Config, ConfigError> {
    if buf.len() < RECORD_LEN {
        return Err(ConfigError::Truncated {
            need: RECORD_LEN,
            got: buf.len(),
        });
    }
    let version = u16::from_le_bytes(buf[0..2].try_into().unwrap());
    if version != CONFIG_VERSION {
        return Err(ConfigError::VersionMismatch {
            expected: CONFIG_VERSION,
            got: version,
        });
    }
    let stored_crc = u16::from_le_bytes(buf[RECORD_LEN - 2..RECORD_LEN].try_into().unwrap());
    let mut zeroed = [0u8; RECORD_LEN];
    zeroed.copy_from_slice(&buf[..RECORD_LEN]);
    zeroed[RECORD_LEN - 2..].fill(0);
    let computed = CCITT_FALSE.checksum(&zeroed);
    if computed != stored_crc {
        return Err(ConfigError::CrcMismatch {
            expected: stored_crc,
            computed,
        });
    }
    Config::from_bytes(&buf[2..2 + Config::BYTE_LEN])
}

/// Versioned, CRC-protected persistent settings; an in-memory singleton with
/// sanitization, backed by an injectable [`nutrient_traits::NvramPort`].
pub struct ConfigStore<N: nutrient_traits::NvramPort> {
    nvram: N,
    current: Config,
}

impl<N: nutrient_traits::NvramPort> ConfigStore<N> {
    /// Read the persisted record; on any decode failure (truncated, wrong
    /// version, bad CRC) fall back to sanitized defaults rather than
    /// propagating an error (§4.1, §7 "load failure falls back to defaults").
    pub fn load_or_defaults(mut nvram: N) -> Self {
        let mut buf = [0u8; RECORD_LEN];
        let current = match nvram.read(&mut buf) {
            Ok(()) => match decode_record(&buf) {
                Ok(cfg) => cfg,
                Err(_) => Config::default(),
            },
            Err(_) => Config::default(),
        };
        Self { nvram, current }
    }

    /// Current in-memory configuration.
    pub fn get(&self) -> &Config {
        &self.current
    }

    /// Sanitize, recompute the CRC, and write the record back to NVRAM.
    /// A write failure is swallowed (§7: "a failed NVRAM write is silent,
    /// best-effort"); the in-memory copy is always updated.
    pub fn save(&mut self) {
        self.current.sanitize();
        let record = encode_record(&self.current);
        let _ = self.nvram.write(&record);
    }

    /// Apply `f` to the in-memory config, then sanitize and persist.
    pub fn mutate(&mut self, f: impl FnOnce(&mut Config)) {
        f(&mut self.current);
        self.save();
    }

    /// Multi-line human-readable dump for `CONFIG_DUMP` (§6).
    pub fn dump(&self, out: &mut impl std::fmt::Write) -> std::fmt::Result {
        let c = &self.current;
        writeln!(out, "device_id={}", c.device_id)?;
        writeln!(out, "ph_gain={} ph_offset={}", c.ph_gain, c.ph_offset)?;
        writeln!(
            out,
            "ph_cal_voltage=[{:.3},{:.3},{:.3}] valid_mask={:#05b}",
            c.ph_cal_voltage[0], c.ph_cal_voltage[1], c.ph_cal_voltage[2], c.ph_cal_valid_mask
        )?;
        writeln!(
            out,
            "ec_alpha={} ec_k={} tds_factor={}",
            c.ec_alpha, c.ec_k, c.tds_factor
        )?;
        writeln!(
            out,
            "pump_ml_per_sec=[ph_down={},ph_up={},fert_a={},fert_b={}] relay_active_low={}",
            c.pump_ml_per_sec[0],
            c.pump_ml_per_sec[1],
            c.pump_ml_per_sec[2],
            c.pump_ml_per_sec[3],
            c.relay_active_low
        )?;
        writeln!(
            out,
            "coarse_threshold={} fine_threshold={}",
            c.coarse_threshold, c.fine_threshold
        )?;
        writeln!(
            out,
            "pause_ms=[coarse={},fine={},fert={}]",
            c.coarse_pause_ms, c.fine_pause_ms, c.fert_pause_ms
        )?;
        writeln!(
            out,
            "max_ph_dose_per_pulse_per_l={} max_ph_total_per_l={}",
            c.max_ph_dose_per_pulse_per_l, c.max_ph_total_per_l
        )?;
        writeln!(
            out,
            "dose_gain_up={} dose_gain_down={} fine_dose_scale={}",
            c.dose_gain_up, c.dose_gain_down, c.fine_dose_scale
        )?;
        writeln!(
            out,
            "process_timeout_ms={} require_temperature={}",
            c.process_timeout_ms, c.require_temperature
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[derive(Default)]
    struct MemNvram {
        bytes: Vec<u8>,
    }

    impl nutrient_traits::NvramPort for MemNvram {
        fn read(&mut self, buf: &mut [u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
            let n = buf.len().min(self.bytes.len());
            buf[..n].copy_from_slice(&self.bytes[..n]);
            Ok(())
        }
        fn write(&mut self, buf: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.bytes = buf.to_vec();
            Ok(())
        }
    }

    #[test]
    fn defaults_are_already_sanitized() {
        let mut d = Config::default();
        let before = d.clone();
        d.sanitize();
        assert_eq!(d, before);
    }

    #[test]
    fn blank_nvram_yields_defaults() {
        let store = ConfigStore::load_or_defaults(MemNvram::default());
        assert_eq!(*store.get(), Config::default());
    }

    #[test]
    fn save_load_save_load_round_trips() {
        let mut store = ConfigStore::load_or_defaults(MemNvram::default());
        store.mutate(|c| {
            c.device_id = 42;
            c.coarse_threshold = 0.42;
        });
        let nvram = std::mem::replace(&mut store.nvram, MemNvram::default());
        let mut store2 = ConfigStore::load_or_defaults(nvram);
        assert_eq!(store2.get().device_id, 42);
        assert_eq!(store2.get().coarse_threshold, 0.42);
        store2.save();
        let nvram2 = std::mem::replace(&mut store2.nvram, MemNvram::default());
        let store3 = ConfigStore::load_or_defaults(nvram2);
        assert_eq!(*store3.get(), *store2.get());
    }

    #[test]
    fn flipped_byte_rejects_to_defaults() {
        let mut cfg = Config::default();
        cfg.device_id = 7;
        let mut record = encode_record(&cfg);
        record[10] ^= 0xFF;
        let nvram = MemNvram {
            bytes: record.to_vec(),
        };
        let store = ConfigStore::load_or_defaults(nvram);
        assert_eq!(*store.get(), Config::default());
    }

    #[test]
    fn sanitize_clamps_out_of_range_fields() {
        let mut c = Config::default();
        c.coarse_threshold = 100.0;
        c.fine_threshold = 100.0;
        c.dose_gain_up = 999.0;
        c.ec_alpha = f32::NAN;
        c.tds_factor = 0;
        c.process_timeout_ms = 10;
        c.sanitize();
        assert_eq!(c.coarse_threshold, 2.0);
        assert!(c.fine_threshold <= c.coarse_threshold);
        assert_eq!(c.dose_gain_up, 2.0);
        assert_eq!(c.ec_alpha, Config::default().ec_alpha);
        assert_eq!(c.tds_factor, Config::default().tds_factor);
        assert_eq!(c.process_timeout_ms, TIMEOUT_MIN_MS);
    }

    #[test]
    fn zero_process_timeout_stays_disabled() {
        let mut c = Config::default();
        c.process_timeout_ms = 0;
        c.sanitize();
        assert_eq!(c.process_timeout_ms, 0);
    }

    #[test]
    fn fine_threshold_never_exceeds_coarse() {
        let mut c = Config::default();
        c.coarse_threshold = 0.2;
        c.fine_threshold = 0.5;
        c.sanitize();
        assert!(c.fine_threshold <= c.coarse_threshold);
    }
}
