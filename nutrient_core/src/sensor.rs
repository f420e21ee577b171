//! The sensor pipeline: Vcc meter, pH sensor, EC/TDS sensor (§4.3).
//!
//! Each sub-sensor is tick-driven by a [`nutrient_traits::Clock`] and an
//! injectable [`nutrient_traits::SensorSource`]: raw ADC samples are pushed
//! into a fixed 5-element ring buffer every 100 ms, filtered (median, then
//! EMA with α=0.2), and re-exposed as an engineering-unit reading every
//! 500 ms.

use std::collections::VecDeque;

use nutrient_traits::{Clock, SensorSource};

use crate::config::Config;

const RING_LEN: usize = 5;
const SAMPLE_PERIOD_MS: u64 = 100;
const REPORT_PERIOD_MS: u64 = 500;
const VCC_PERIOD_MS: u64 = 1_000;
const EMA_ALPHA: f32 = 0.2;
/// 10-bit ADC, Vcc-referenced.
const ADC_MAX_COUNTS: f32 = 1023.0;

/// Median-then-EMA filter shared by every analog input.
#[derive(Debug, Default)]
struct RingFilter {
    ring: VecDeque<f32>,
    ema: Option<f32>,
}

impl RingFilter {
    fn push(&mut self, sample: f32) {
        if self.ring.len() == RING_LEN {
            self.ring.pop_front();
        }
        self.ring.push_back(sample);

        let mut sorted: Vec<f32> = self.ring.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = sorted[sorted.len() / 2];

        self.ema = Some(match self.ema {
            Some(prev) => EMA_ALPHA * median + (1.0 - EMA_ALPHA) * prev,
            None => median,
        });
    }

    fn filtered(&self) -> Option<f32> {
        self.ema
    }
}

/// Converts a 10-bit ADC count to a voltage given the current Vcc estimate.
fn counts_to_volts(counts: u16, vcc_volts: f32) -> f32 {
    (counts as f32 / ADC_MAX_COUNTS) * vcc_volts
}

/// Supply-voltage reference. Reports a fixed nominal 5000 mV until the first
/// real sample arrives (§4.3 Rust rework note), so tests that don't wire a
/// `SensorSource` specifically for Vcc need not simulate it.
#[derive(Debug)]
pub struct VccMeter {
    next_sample_due_ms: u64,
    mv: u32,
    volts: f32,
}

impl Default for VccMeter {
    fn default() -> Self {
        Self {
            next_sample_due_ms: 0,
            mv: 5000,
            volts: 5.0,
        }
    }
}

impl VccMeter {
    pub fn mv(&self) -> u32 {
        self.mv
    }

    pub fn volts(&self) -> f32 {
        self.volts
    }

    fn tick(&mut self, now_ms: u64, source: &mut impl SensorSource) {
        if now_ms < self.next_sample_due_ms {
            return;
        }
        self.next_sample_due_ms = now_ms + VCC_PERIOD_MS;
        if let Ok(counts) = source.read_vcc_raw() {
            // The internal 1.1V reference measured against Vcc: counts are
            // inversely proportional to Vcc, counts = 1023 * 1.1V / Vcc.
            if counts > 0 {
                let volts = 1023.0 * 1.1 / f32::from(counts);
                self.volts = volts;
                self.mv = (volts * 1000.0).round() as u32;
            }
        }
    }
}

/// pH calibration session state machine driven by `CAL_PH START|POINT|SAVE|ABORT`.
#[derive(Debug, Default)]
struct PhCalSession {
    active: bool,
    /// Working copy of captured voltages/mask, committed to `Config` only on
    /// `SAVE`.
    voltage: [f32; 3],
    valid_mask: u8,
}

/// Reference buffer pH values, in index order (§4.3).
const REFERENCE_PH: [f32; 3] = [4.01, 6.86, 9.18];
const REFERENCE_TOLERANCE: f32 = 0.05;

impl PhCalSession {
    fn start(&mut self) {
        self.active = true;
        self.voltage = [0.0; 3];
        self.valid_mask = 0;
    }

    fn abort(&mut self) {
        self.active = false;
        self.voltage = [0.0; 3];
        self.valid_mask = 0;
    }

    /// Record a capture for the reference point nearest `reference_ph`
    /// (within ±0.05); returns `false` if no reference matches.
    fn capture(&mut self, reference_ph: f32, filtered_voltage: f32) -> bool {
        let Some(idx) = REFERENCE_PH
            .iter()
            .position(|r| (r - reference_ph).abs() <= REFERENCE_TOLERANCE)
        else {
            return false;
        };
        self.voltage[idx] = filtered_voltage;
        self.valid_mask |= 1 << idx;
        true
    }

    fn all_captured(&self) -> bool {
        self.valid_mask == 0b111
    }
}

/// pH probe: linear fit over a filtered voltage, plus its calibration
/// session (§4.3).
#[derive(Debug, Default)]
pub struct PhSensor {
    filter: RingFilter,
    next_sample_due_ms: u64,
    next_report_due_ms: u64,
    voltage: Option<f32>,
    ph: Option<f32>,
    has_reading: bool,
    cal: PhCalSession,
}

impl PhSensor {
    pub fn has_reading(&self) -> bool {
        self.has_reading
    }

    pub fn ph(&self) -> Option<f32> {
        self.ph
    }

    pub fn filtered_voltage(&self) -> Option<f32> {
        self.voltage
    }

    pub fn tick(
        &mut self,
        now_ms: u64,
        config: &Config,
        source: &mut impl SensorSource,
        vcc_volts: f32,
    ) {
        if now_ms >= self.next_sample_due_ms {
            self.next_sample_due_ms = now_ms + SAMPLE_PERIOD_MS;
            if let Ok(counts) = source.read_ph_raw() {
                self.filter.push(counts_to_volts(counts, vcc_volts));
            }
        }
        if now_ms >= self.next_report_due_ms {
            self.next_report_due_ms = now_ms + REPORT_PERIOD_MS;
            if let Some(v) = self.filter.filtered() {
                self.voltage = Some(v);
                self.ph = Some(config.ph_gain * v + config.ph_offset);
                self.has_reading = true;
            }
        }
    }

    /// `CAL_PH START` — begin a new capture session, discarding any prior
    /// in-progress captures.
    pub fn cal_start(&mut self) {
        self.cal.start();
    }

    /// `CAL_PH ABORT` — discard the in-progress session.
    pub fn cal_abort(&mut self) {
        self.cal.abort();
    }

    pub fn cal_active(&self) -> bool {
        self.cal.active
    }

    /// `CAL_PH POINT <ref>` — capture the current filtered voltage against
    /// the nearest reference buffer. Returns `false` if `reference_ph`
    /// doesn't match a known buffer or no filtered reading is available yet.
    pub fn cal_point(&mut self, reference_ph: f32) -> bool {
        let Some(v) = self.voltage else {
            return false;
        };
        self.cal.capture(reference_ph, v)
    }

    /// `CAL_PH SAVE` — least-squares fit over the three captured points.
    /// Rejects unless all three are captured; if the regression denominator
    /// `n*Σx² - (Σx)²` is degenerate (< 1e-6), the save is a silent no-op:
    /// gain/offset are left untouched and the captured points are retained
    /// so a retry can succeed once distinct voltages are present (§4.3).
    pub fn cal_save(&mut self, config: &mut Config) -> bool {
        if !self.cal.all_captured() {
            return false;
        }
        let xs = self.cal.voltage;
        let ys = REFERENCE_PH;
        let n = xs.len() as f64;
        let sum_x: f64 = xs.iter().map(|&x| x as f64).sum();
        let sum_y: f64 = ys.iter().map(|&y| y as f64).sum();
        let sum_xx: f64 = xs.iter().map(|&x| (x as f64) * (x as f64)).sum();
        let sum_xy: f64 = xs
            .iter()
            .zip(ys.iter())
            .map(|(&x, &y)| (x as f64) * (y as f64))
            .sum();

        let denom = n * sum_xx - sum_x * sum_x;
        if denom.abs() < 1e-6 {
            return false;
        }
        let gain = (n * sum_xy - sum_x * sum_y) / denom;
        let offset = (sum_y - gain * sum_x) / n;

        config.ph_gain = gain as f32;
        config.ph_offset = offset as f32;
        config.ph_cal_voltage = self.cal.voltage;
        config.ph_cal_valid_mask = self.cal.valid_mask;
        self.cal.active = false;
        true
    }
}

/// EC calibration: a pending cell-constant multiplier, committed on `SAVE`.
#[derive(Debug, Default)]
struct EcCalSession {
    active: bool,
    pending_k: f32,
}

/// EC/TDS probe: cubic raw-EC fit, temperature compensation, TDS scaling
/// (§4.3).
#[derive(Debug, Default)]
pub struct EcSensor {
    filter: RingFilter,
    next_sample_due_ms: u64,
    next_report_due_ms: u64,
    voltage: Option<f32>,
    ec_raw_ms: Option<f32>,
    ec25_ms: Option<f32>,
    tds_ppm: Option<f32>,
    has_reading: bool,
    temperature_c: Option<f32>,
    cal: EcCalSession,
}

impl EcSensor {
    pub fn has_reading(&self) -> bool {
        self.has_reading
    }

    pub fn ec25_ms(&self) -> Option<f32> {
        self.ec25_ms
    }

    pub fn ec_raw_ms(&self) -> Option<f32> {
        self.ec_raw_ms
    }

    pub fn tds_ppm(&self) -> Option<f32> {
        self.tds_ppm
    }

    pub fn temperature_c(&self) -> Option<f32> {
        self.temperature_c
    }

    pub fn temperature_valid(&self) -> bool {
        self.temperature_c.is_some()
    }

    /// Host `SET_T <celsius>`.
    pub fn set_temperature(&mut self, celsius: f32) {
        self.temperature_c = Some(celsius);
    }

    pub fn tick(
        &mut self,
        now_ms: u64,
        config: &Config,
        source: &mut impl SensorSource,
        vcc_volts: f32,
    ) {
        if now_ms >= self.next_sample_due_ms {
            self.next_sample_due_ms = now_ms + SAMPLE_PERIOD_MS;
            if let Ok(counts) = source.read_ec_raw() {
                self.filter.push(counts_to_volts(counts, vcc_volts));
            }
        }
        if now_ms >= self.next_report_due_ms {
            self.next_report_due_ms = now_ms + REPORT_PERIOD_MS;
            if let Some(v) = self.filter.filtered() {
                self.voltage = Some(v);
                let raw = (133.42 * v.powi(3) - 255.86 * v.powi(2) + 857.39 * v) * config.ec_k;
                self.ec_raw_ms = Some(raw);
                let divisor = match self.temperature_c {
                    Some(t) => 1.0 + config.ec_alpha * (t - 25.0),
                    None => 1.0,
                };
                let ec25 = raw / divisor;
                self.ec25_ms = Some(ec25);
                self.tds_ppm = Some(ec25 * f32::from(config.tds_factor));
                self.has_reading = true;
            }
        }
    }

    pub fn cal_start(&mut self) {
        self.cal.active = true;
        self.cal.pending_k = 1.0;
    }

    /// Discards the pending multiplier, resetting it back to the currently
    /// committed `ec_k` (§4.3 rework note).
    pub fn cal_abort(&mut self, config: &Config) {
        self.cal.active = false;
        self.cal.pending_k = config.ec_k;
    }

    pub fn cal_active(&self) -> bool {
        self.cal.active
    }

    /// `CAL_EC POINT <ref_mS>` — multiply the pending K by `ref / current_ec25`.
    pub fn cal_point(&mut self, reference_ms: f32) -> bool {
        if !self.cal.active {
            return false;
        }
        let Some(current) = self.ec25_ms else {
            return false;
        };
        if current <= 0.0 {
            return false;
        }
        self.cal.pending_k *= reference_ms / current;
        true
    }

    pub fn cal_save(&mut self, config: &mut Config) -> bool {
        if !self.cal.active {
            return false;
        }
        config.ec_k = self.cal.pending_k;
        self.cal.active = false;
        true
    }
}

/// Aggregates the three sub-sensors and advances them together each tick
/// (§2, §4.3).
#[derive(Debug, Default)]
pub struct SensorPipeline {
    pub vcc: VccMeter,
    pub ph: PhSensor,
    pub ec: EcSensor,
}

impl SensorPipeline {
    pub fn tick(
        &mut self,
        clock: &impl Clock,
        epoch: std::time::Instant,
        config: &Config,
        source: &mut impl SensorSource,
    ) {
        let now_ms = clock.ms_since(epoch);
        self.vcc.tick(now_ms, source);
        let vcc_volts = self.vcc.volts();
        self.ph.tick(now_ms, config, source, vcc_volts);
        self.ec.tick(now_ms, config, source, vcc_volts);
    }

    /// True when both chemistry sensors have produced at least one reading
    /// and the values satisfy the ranges ProcessEngine requires (§4.3,
    /// §8 invariant 6). Validation of *why* a reading is invalid (distinct
    /// fault reasons) lives in `process::ProcessEngine`; this is the coarse
    /// "is there anything to evaluate yet" gate.
    pub fn both_reporting(&self) -> bool {
        self.ph.has_reading() && self.ec.has_reading()
    }
}
