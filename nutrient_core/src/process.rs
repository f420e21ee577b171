//! `ProcessEngine` — the batch state machine (§4.4).
//!
//! Owns no hardware and no sensors: every tick is handed a `&Config`, a
//! `&SensorPipeline`/`&mut Config` snapshot, the current monotonic
//! millisecond, and a `&mut impl Actuators` to drive. This keeps the state
//! machine itself trivially testable against scripted sensor trajectories
//! and a `TestClock`, with no real I/O anywhere in the call graph.

use nutrient_traits::Actuators;

use crate::config::Config;
use crate::error::{EngineError, FaultKind};
use crate::model::{DoseLog, PumpChannel, PumpRunState, ProcessState, StatusFrame, TimerReason, TimerState};
use crate::sensor::SensorPipeline;

pub(crate) fn set_actuator(channel: PumpChannel, actuators: &mut impl Actuators, on: bool) {
    let result = match channel {
        PumpChannel::PhDown => actuators.set_ph_down(on),
        PumpChannel::PhUp => actuators.set_ph_up(on),
        PumpChannel::FertA => actuators.set_fert_a(on),
        PumpChannel::FertB => actuators.set_fert_b(on),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, channel = channel.wire_name(), on, "pump actuator write failed");
    }
}

/// The batch process state machine (§4.4).
#[derive(Debug)]
pub struct ProcessEngine {
    state: ProcessState,
    dose: DoseLog,
    timer: TimerState,
    pump: PumpRunState,

    /// Current batch settings. Not part of the persisted `Config` (§3); held
    /// here and mutated directly by `SET_TARGET_PH`/`SET_BATCH_L`/
    /// `SET_DOSE_A_ML_PER_L`/`SET_DOSE_B_ML_PER_L`, so `START` with no
    /// arguments means "begin a batch with current settings" (§6).
    target_ph: f32,
    batch_l: f32,
    dose_a_ml_per_l: f32,
    dose_b_ml_per_l: f32,

    deadline_ms: Option<u64>,
    fault: Option<FaultKind>,

    last_dose_reference_ph: f32,
    /// Signed `target - pH` at the moment the last pH-Up/Down pulse was
    /// started; its magnitude is the "expected" term in the adaptive gain
    /// ratio.
    last_requested_delta: f32,
    /// `+1.0` for PhUp, `-1.0` for PhDown.
    last_dose_direction: f32,
    awaiting_gain_update: bool,

    /// Working copies of `Config::dose_gain_up`/`dose_gain_down`, seeded from
    /// `Config` at `start()` and adapted in place by `apply_gain_update`
    /// (§4.4). Deliberately engine-owned rather than read from `&Config`
    /// directly: the adaptive update is documented as in-memory only, never
    /// written back to the persisted record unless an explicit setter is
    /// called, so `on_sensor_tick` only ever needs a shared `&Config`.
    gain_up: f32,
    gain_down: f32,
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self {
            state: ProcessState::Idle,
            dose: DoseLog::default(),
            timer: TimerState::default(),
            pump: PumpRunState::default(),
            target_ph: 6.0,
            batch_l: 10.0,
            dose_a_ml_per_l: 0.0,
            dose_b_ml_per_l: 0.0,
            deadline_ms: None,
            fault: None,
            last_dose_reference_ph: 0.0,
            last_requested_delta: 0.0,
            last_dose_direction: 1.0,
            awaiting_gain_update: false,
            gain_up: 0.2,
            gain_down: 0.2,
        }
    }
}

impl ProcessEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn dose_log(&self) -> DoseLog {
        self.dose
    }

    pub fn fault(&self) -> Option<&FaultKind> {
        self.fault.as_ref()
    }

    pub fn target_ph(&self) -> f32 {
        self.target_ph
    }

    pub fn batch_l(&self) -> f32 {
        self.batch_l
    }

    pub fn dose_a_ml_per_l(&self) -> f32 {
        self.dose_a_ml_per_l
    }

    pub fn dose_b_ml_per_l(&self) -> f32 {
        self.dose_b_ml_per_l
    }

    /// Current in-memory dose gains, possibly drifted from `Config` by the
    /// adaptive gain update (§4.4) since the last `start()`.
    pub fn dose_gain_up(&self) -> f32 {
        self.gain_up
    }

    pub fn dose_gain_down(&self) -> f32 {
        self.gain_down
    }

    /// `SET_TARGET_PH` (§6); clamped to `[2, 12]`. Rejects non-finite input
    /// rather than letting `f32::clamp` pass a NaN through unchanged.
    pub fn set_target_ph(&mut self, value: f32) -> Result<(), EngineError> {
        if !value.is_finite() {
            return Err(EngineError::InvalidTuning("target_ph must be finite"));
        }
        self.target_ph = value.clamp(2.0, 12.0);
        Ok(())
    }

    /// `SET_BATCH_L` (§6); clamped to `[1, 250]`.
    pub fn set_batch_l(&mut self, value: f32) -> Result<(), EngineError> {
        if !value.is_finite() {
            return Err(EngineError::InvalidTuning("batch_l must be finite"));
        }
        self.batch_l = value.clamp(1.0, 250.0);
        Ok(())
    }

    /// `SET_DOSE_A_ML_PER_L` (§6); clamped to `>= 0`.
    pub fn set_dose_a_ml_per_l(&mut self, value: f32) -> Result<(), EngineError> {
        if !value.is_finite() {
            return Err(EngineError::InvalidTuning("dose_a_ml_per_l must be finite"));
        }
        self.dose_a_ml_per_l = value.max(0.0);
        Ok(())
    }

    /// `SET_DOSE_B_ML_PER_L` (§6); clamped to `>= 0`.
    pub fn set_dose_b_ml_per_l(&mut self, value: f32) -> Result<(), EngineError> {
        if !value.is_finite() {
            return Err(EngineError::InvalidTuning("dose_b_ml_per_l must be finite"));
        }
        self.dose_b_ml_per_l = value.max(0.0);
        Ok(())
    }

    /// `start()` (§4.4): begin a batch with the currently configured
    /// target/batch/dose settings. Ignored while a batch is already running;
    /// returns whether the start was accepted.
    pub fn start(&mut self, config: &Config, now_ms: u64, actuators: &mut impl Actuators) -> bool {
        if self.state.is_active() {
            return false;
        }
        self.dose.reset();
        self.timer.clear();
        self.pump.clear();
        self.fault = None;
        self.deadline_ms = if config.process_timeout_ms != 0 {
            Some(now_ms.saturating_add(u64::from(config.process_timeout_ms)))
        } else {
            None
        };
        self.awaiting_gain_update = false;
        self.gain_up = config.dose_gain_up;
        self.gain_down = config.dose_gain_down;
        self.state = ProcessState::Mix;
        if let Err(e) = actuators.set_mix1(true) {
            tracing::warn!(error = %e, "set_mix1 failed on batch start");
        }
        if let Err(e) = actuators.set_mix2(true) {
            tracing::warn!(error = %e, "set_mix2 failed on batch start");
        }
        tracing::info!(target_ph = self.target_ph, batch_l = self.batch_l, "batch start");
        true
    }

    /// Synchronous, unconditional stop. `reason` becomes the Fault's
    /// message; an empty reason is reported as a generic user abort.
    pub fn abort(&mut self, reason: &str, actuators: &mut impl Actuators) {
        let reason = if reason.trim().is_empty() {
            "User abort: unknown".to_string()
        } else if reason.eq_ignore_ascii_case("user abort") || reason.starts_with("User abort") {
            reason.to_string()
        } else {
            format!("User abort: {reason}")
        };
        self.enter_fault(&reason, actuators);
    }

    fn enter_fault(&mut self, reason: &str, actuators: &mut impl Actuators) {
        if let Err(e) = actuators.all_off() {
            tracing::warn!(error = %e, "all_off failed entering fault");
        }
        self.timer.clear();
        self.pump.clear();
        let fault = FaultKind::from_reason(reason);
        tracing::error!(code = fault.fault_code(), reason, "batch fault");
        self.fault = Some(fault);
        self.state = ProcessState::Fault;
    }

    fn enter_done(&mut self, actuators: &mut impl Actuators) {
        if let Err(e) = actuators.all_off() {
            tracing::warn!(error = %e, "all_off failed entering done");
        }
        self.timer.clear();
        tracing::info!(dose = ?self.dose, "batch done");
        self.state = ProcessState::Done;
    }

    /// `on_sensor_tick()` (§4.4). Deadline and sensor-validity checks run
    /// even while a pump pulse is in flight; dosing decisions are deferred
    /// until the active pump finishes and any pause timer elapses.
    pub fn on_sensor_tick(
        &mut self,
        config: &Config,
        sensors: &SensorPipeline,
        now_ms: u64,
        actuators: &mut impl Actuators,
    ) {
        if !self.state.is_active() {
            return;
        }

        if let Some(deadline) = self.deadline_ms
            && (now_ms.wrapping_sub(deadline) as i64) >= 0
        {
            self.enter_fault("Process timeout", actuators);
            return;
        }

        if !sensors.both_reporting() {
            return;
        }

        let Some(ph) = sensors.ph.ph() else {
            return;
        };
        if !ph.is_finite() || !(2.0..=12.0).contains(&ph) {
            self.enter_fault("pH out of range", actuators);
            return;
        }
        match sensors.ec.ec25_ms() {
            Some(ec) if ec.is_finite() && ec > 0.0 => {}
            _ => {
                self.enter_fault("EC invalid", actuators);
                return;
            }
        }
        match sensors.ec.tds_ppm() {
            Some(tds) if tds.is_finite() && tds > 0.0 => {}
            _ => {
                self.enter_fault("TDS invalid", actuators);
                return;
            }
        }
        if config.require_temperature && !sensors.ec.temperature_valid() {
            self.enter_fault("Temperature missing", actuators);
            return;
        }

        if self.pump.active {
            return;
        }

        if self.awaiting_gain_update {
            self.apply_gain_update(ph);
        }

        if self.timer.is_pending() {
            return;
        }

        match self.state {
            ProcessState::Mix => {
                let magnitude = (self.target_ph - ph).abs();
                self.state = if magnitude > config.coarse_threshold {
                    ProcessState::PhCoarse
                } else {
                    ProcessState::PhFine
                };
            }
            ProcessState::PhCoarse => {
                let magnitude = (self.target_ph - ph).abs();
                if magnitude <= config.coarse_threshold {
                    self.state = ProcessState::PhFine;
                    return;
                }
                self.dose_ph(config, ph, now_ms, actuators);
            }
            ProcessState::PhFine => {
                let magnitude = (self.target_ph - ph).abs();
                if magnitude > config.coarse_threshold {
                    self.state = ProcessState::PhCoarse;
                    return;
                }
                if magnitude <= config.fine_threshold {
                    self.state = ProcessState::FertA;
                    self.begin_fert_stage(config, PumpChannel::FertA, self.dose_a_ml_per_l, now_ms, actuators);
                    return;
                }
                self.dose_ph(config, ph, now_ms, actuators);
            }
            ProcessState::FertA | ProcessState::FertB => {
                // Fert dosing is volume-driven (not pH-driven); nothing to
                // do here, everything happens in begin_fert_stage /
                // on_pump_finished / on_timer_tick.
            }
            ProcessState::Idle | ProcessState::Done | ProcessState::Fault => {}
        }
    }

    /// Dose computation shared by `PhCoarse`/`PhFine` (§4.4 steps 2-9).
    fn dose_ph(&mut self, config: &Config, ph: f32, now_ms: u64, actuators: &mut impl Actuators) {
        let delta = self.target_ph - ph;
        let magnitude = delta.abs();
        if magnitude < 0.01 {
            return;
        }

        let channel = if delta > 0.0 {
            PumpChannel::PhUp
        } else {
            PumpChannel::PhDown
        };
        let gain_dir = if delta > 0.0 { self.gain_up } else { self.gain_down };

        let requested = magnitude * self.batch_l * gain_dir;
        let mut ceiling = config.max_ph_dose_per_pulse_per_l * self.batch_l;
        if self.state == ProcessState::PhFine {
            ceiling *= config.fine_dose_scale;
        }
        let volume = requested.min(ceiling);

        let total_limit = config.max_ph_total_per_l * self.batch_l;
        if self.dose.field(channel) + volume > total_limit {
            self.enter_fault("pH dosing limit", actuators);
            return;
        }

        let rate = config.pump_rate(channel);
        if rate <= 0.0 {
            self.enter_fault("Pump calibration missing", actuators);
            return;
        }

        let duration_ms = ((volume / rate) * 1000.0).round().max(1.0) as u64;
        self.pump = PumpRunState {
            active: true,
            channel: Some(channel),
            volume_ml: volume,
            started_ms: now_ms,
            duration_ms,
        };
        self.timer.schedule(TimerReason::PumpRun, now_ms, duration_ms);
        self.last_dose_reference_ph = ph;
        self.last_requested_delta = delta;
        self.last_dose_direction = if delta > 0.0 { 1.0 } else { -1.0 };
        self.awaiting_gain_update = true;
        tracing::trace!(
            channel = channel.wire_name(),
            volume_ml = volume,
            duration_ms,
            "ph dose pulse"
        );
        set_actuator(channel, actuators, true);
    }

    /// Start (or skip, for a zero dose) a fertilizer pump run on entering
    /// `FertA`/`FertB`.
    fn begin_fert_stage(
        &mut self,
        config: &Config,
        channel: PumpChannel,
        dose_ml_per_l: f32,
        now_ms: u64,
        actuators: &mut impl Actuators,
    ) {
        let volume = dose_ml_per_l * self.batch_l;
        if volume <= 0.0 {
            self.timer
                .schedule(TimerReason::FertPause, now_ms, u64::from(config.fert_pause_ms));
            return;
        }
        let rate = config.pump_rate(channel);
        if rate <= 0.0 {
            self.enter_fault("Pump calibration missing", actuators);
            return;
        }
        let duration_ms = ((volume / rate) * 1000.0).round().max(1.0) as u64;
        self.pump = PumpRunState {
            active: true,
            channel: Some(channel),
            volume_ml: volume,
            started_ms: now_ms,
            duration_ms,
        };
        self.timer.schedule(TimerReason::PumpRun, now_ms, duration_ms);
        set_actuator(channel, actuators, true);
    }

    /// Adaptive gain update (§4.4): runs once per dose, on the first valid
    /// sensor tick after the pump finishes, regardless of whether a pause
    /// timer is still counting down. Updates the engine's own working gain,
    /// never the persisted `Config` — it is in-memory only until an explicit
    /// setter is called (§4.4).
    fn apply_gain_update(&mut self, current_ph: f32) {
        let expected = self.last_requested_delta.abs();
        let measured = (current_ph - self.last_dose_reference_ph) * self.last_dose_direction;
        // Open question (§9): 1.1 is used both as the clamp ceiling and as
        // the overshoot fallback when measured <= 0.0001; preserved as-is.
        let ratio = if measured > 0.0001 { expected / measured } else { 1.1 };
        let ratio = ratio.clamp(0.9, 1.1);
        if self.last_dose_direction > 0.0 {
            self.gain_up = (self.gain_up * ratio).clamp(0.02, 2.0);
        } else {
            self.gain_down = (self.gain_down * ratio).clamp(0.02, 2.0);
        }
        self.awaiting_gain_update = false;
    }

    /// `on_timer_tick()` (§4.4): fires whichever timer is due, if any.
    pub fn on_timer_tick(&mut self, config: &Config, now_ms: u64, actuators: &mut impl Actuators) {
        if !self.timer.is_due(now_ms) {
            return;
        }
        let reason = self.timer.reason;
        self.timer.clear();
        match reason {
            TimerReason::PumpRun => self.on_pump_finished(config, now_ms, actuators),
            TimerReason::FertPause => match self.state {
                ProcessState::FertA => {
                    self.state = ProcessState::FertB;
                    self.begin_fert_stage(config, PumpChannel::FertB, self.dose_b_ml_per_l, now_ms, actuators);
                }
                ProcessState::FertB => self.enter_done(actuators),
                _ => {}
            },
            TimerReason::CoarsePause | TimerReason::FinePause | TimerReason::ProcessTimeout | TimerReason::None => {}
        }
    }

    fn on_pump_finished(&mut self, config: &Config, now_ms: u64, actuators: &mut impl Actuators) {
        let Some(channel) = self.pump.channel else {
            return;
        };
        let volume = self.pump.volume_ml;
        set_actuator(channel, actuators, false);
        *self.dose.field_mut(channel) += volume;
        self.pump.clear();

        match channel {
            PumpChannel::PhUp | PumpChannel::PhDown => {
                let total = self.dose.field(channel);
                let limit = config.max_ph_total_per_l * self.batch_l;
                if total > limit + 1e-3 {
                    self.enter_fault("pH total limit", actuators);
                    return;
                }
                let (reason, pause_ms) = match self.state {
                    ProcessState::PhFine => (TimerReason::FinePause, config.fine_pause_ms),
                    _ => (TimerReason::CoarsePause, config.coarse_pause_ms),
                };
                self.timer.schedule(reason, now_ms, u64::from(pause_ms));
            }
            PumpChannel::FertA | PumpChannel::FertB => {
                self.timer
                    .schedule(TimerReason::FertPause, now_ms, u64::from(config.fert_pause_ms));
            }
        }
    }

    /// Snapshot for a STATUS/DONE/FAULT emission (§4.5, §6).
    pub fn status_frame(&self, sensors: &SensorPipeline, now_ms: u64) -> StatusFrame {
        let ph = sensors.ph.ph();
        StatusFrame {
            now_ms,
            ph,
            target_ph: self.target_ph,
            delta_ph: ph.map(|p| self.target_ph - p),
            ec_ms: sensors.ec.ec_raw_ms(),
            ec25_ms: sensors.ec.ec25_ms(),
            tds_ppm: sensors.ec.tds_ppm(),
            temperature_c: sensors.ec.temperature_c(),
            vcc_mv: Some(sensors.vcc.mv()),
            state: Some(self.state),
            dose: self.dose,
            fault_code: self.fault.as_ref().map(FaultKind::fault_code),
            fault_message: self.fault.as_ref().map(ToString::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SensorPipeline;
    use nutrient_traits::test_clock::TestClock;
    use nutrient_traits::{Clock, SensorSource};
    use rstest::rstest;

    #[derive(Default)]
    struct SimActuators {
        mix1: bool,
        mix2: bool,
        ph_down: bool,
        ph_up: bool,
        fert_a: bool,
        fert_b: bool,
    }

    impl Actuators for SimActuators {
        fn set_mix1(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.mix1 = on;
            Ok(())
        }
        fn set_mix2(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.mix2 = on;
            Ok(())
        }
        fn set_ph_down(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.ph_down = on;
            Ok(())
        }
        fn set_ph_up(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.ph_up = on;
            Ok(())
        }
        fn set_fert_a(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.fert_a = on;
            Ok(())
        }
        fn set_fert_b(&mut self, on: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.fert_b = on;
            Ok(())
        }
    }

    impl SimActuators {
        fn energized_count(&self) -> u32 {
            [self.ph_down, self.ph_up, self.fert_a, self.fert_b]
                .iter()
                .filter(|&&x| x)
                .count() as u32
        }
    }

    /// Drives pH/EC from a simple constant/step trajectory so scenarios read
    /// like §8's S1-S4.
    struct ScriptedSource {
        ph_volts: f32,
        ec_raw: u16,
    }

    impl SensorSource for ScriptedSource {
        fn read_ph_raw(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
            Ok(((self.ph_volts / 5.0) * 1023.0).round() as u16)
        }
        fn read_ec_raw(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
            Ok(self.ec_raw)
        }
        fn read_vcc_raw(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
            Ok(0)
        }
    }

    fn volts_for_ph(config: &Config, ph: f32) -> f32 {
        (ph - config.ph_offset) / config.ph_gain
    }

    fn run_ticks(
        engine: &mut ProcessEngine,
        config: &mut Config,
        sensors: &mut SensorPipeline,
        source: &mut ScriptedSource,
        clock: &TestClock,
        epoch: std::time::Instant,
        actuators: &mut SimActuators,
        ticks: u32,
    ) {
        for _ in 0..ticks {
            clock.advance(std::time::Duration::from_millis(100));
            sensors.tick(clock, epoch, config, source);
            let now_ms = clock.ms_since(epoch);
            engine.on_sensor_tick(config, sensors, now_ms, actuators);
            engine.on_timer_tick(config, now_ms, actuators);
            assert!(actuators.energized_count() <= 1, "at most one dosing pump energized");
            assert!(!(actuators.ph_up && actuators.ph_down), "ph up/down mutually exclusive");
        }
    }

    #[test]
    fn s1_happy_path_small_delta() {
        let mut config = Config::default();
        config.coarse_threshold = 0.3;
        config.fine_threshold = 0.1;
        let mut engine = ProcessEngine::new();
        let mut sensors = SensorPipeline::default();
        let clock = TestClock::new();
        let epoch = clock.now();
        let mut actuators = SimActuators::default();
        let mut source = ScriptedSource {
            ph_volts: volts_for_ph(&config, 6.05),
            ec_raw: 400,
        };

        engine.set_batch_l(10.0).unwrap();
        engine.set_target_ph(6.00).unwrap();
        engine.set_dose_a_ml_per_l(1.0).unwrap();
        engine.set_dose_b_ml_per_l(1.0).unwrap();
        assert!(engine.start(&config, 0, &mut actuators));
        assert_eq!(engine.state(), ProcessState::Mix);

        run_ticks(
            &mut engine, &mut config, &mut sensors, &mut source, &clock, epoch, &mut actuators, 400,
        );

        assert_eq!(engine.state(), ProcessState::Done);
        let dose = engine.dose_log();
        assert!((dose.fert_a_ml - 10.0).abs() < 1e-3);
        assert!((dose.fert_b_ml - 10.0).abs() < 1e-3);
        assert_eq!(dose.ph_up_ml, 0.0);
        assert_eq!(dose.ph_down_ml, 0.0);
    }

    #[test]
    fn s2_coarse_correction_updates_adaptive_gain() {
        // §8 S2: a large initial delta drives a PhCoarse pulse; once the
        // sensor settles at the post-pulse reading, the gain update (§4.4,
        // §9 open question) adjusts `gain_down` by the expected/measured
        // ratio, clamped to [0.9, 1.1].
        let mut config = Config::default();
        config.coarse_threshold = 0.3;
        config.fine_threshold = 0.1;
        let mut engine = ProcessEngine::new();
        let mut sensors = SensorPipeline::default();
        let clock = TestClock::new();
        let epoch = clock.now();
        let mut actuators = SimActuators::default();
        let mut source = ScriptedSource {
            ph_volts: volts_for_ph(&config, 7.50),
            ec_raw: 400,
        };

        // Large enough batch that the pump run lasts long enough for the
        // median+EMA filter to fully settle on the post-pulse reading before
        // the pump-finished tick consumes it for the gain update.
        engine.set_batch_l(50.0).unwrap();
        engine.set_target_ph(6.00).unwrap();
        assert!(engine.start(&config, 0, &mut actuators));

        // Run through Mix and into the first PhCoarse pulse.
        while !actuators.ph_down {
            clock.advance(std::time::Duration::from_millis(100));
            sensors.tick(&clock, epoch, &config, &mut source);
            let now_ms = clock.ms_since(epoch);
            engine.on_sensor_tick(&config, &sensors, now_ms, &mut actuators);
            engine.on_timer_tick(&config, now_ms, &mut actuators);
        }
        assert_eq!(engine.state(), ProcessState::PhCoarse);

        // The pH drifts to its post-pulse value while the pump is running;
        // `last_dose_reference_ph` was already captured at 7.50.
        source.ph_volts = volts_for_ph(&config, 6.80);

        while actuators.ph_down {
            clock.advance(std::time::Duration::from_millis(100));
            sensors.tick(&clock, epoch, &config, &mut source);
            let now_ms = clock.ms_since(epoch);
            engine.on_sensor_tick(&config, &sensors, now_ms, &mut actuators);
            engine.on_timer_tick(&config, now_ms, &mut actuators);
        }

        // One more tick: `on_sensor_tick` observes the pump has stopped and
        // applies the gain update before the just-scheduled CoarsePause timer
        // causes any further pulse.
        clock.advance(std::time::Duration::from_millis(100));
        sensors.tick(&clock, epoch, &config, &mut source);
        let now_ms = clock.ms_since(epoch);
        engine.on_sensor_tick(&config, &sensors, now_ms, &mut actuators);
        engine.on_timer_tick(&config, now_ms, &mut actuators);

        assert!((engine.dose_gain_down() - 0.22).abs() < 1e-3);
    }

    #[test]
    fn s3_ph_total_limit_faults() {
        let mut config = Config::default();
        config.max_ph_total_per_l = 0.2;
        config.coarse_pause_ms = 1_000;
        config.fine_pause_ms = 1_000;
        let mut engine = ProcessEngine::new();
        let mut sensors = SensorPipeline::default();
        let clock = TestClock::new();
        let epoch = clock.now();
        let mut actuators = SimActuators::default();
        let mut source = ScriptedSource {
            ph_volts: volts_for_ph(&config, 7.50),
            ec_raw: 400,
        };

        engine.set_batch_l(10.0).unwrap();
        engine.set_target_ph(6.00).unwrap();
        assert!(engine.start(&config, 0, &mut actuators));
        run_ticks(
            &mut engine, &mut config, &mut sensors, &mut source, &clock, epoch, &mut actuators, 2000,
        );

        assert_eq!(engine.state(), ProcessState::Fault);
        assert_eq!(engine.fault(), Some(&FaultKind::PhDosingLimit));
        assert_eq!(engine.fault().unwrap().fault_code(), 6);
    }

    #[test]
    fn s4_process_timeout_faults_with_code_5() {
        let mut config = Config::default();
        config.process_timeout_ms = 60_000;
        // Large enough that the dosing-limit fault never preempts the
        // timeout this test is actually exercising.
        config.max_ph_total_per_l = 1000.0;
        let mut engine = ProcessEngine::new();
        let mut sensors = SensorPipeline::default();
        let clock = TestClock::new();
        let epoch = clock.now();
        let mut actuators = SimActuators::default();
        let mut source = ScriptedSource {
            ph_volts: volts_for_ph(&config, 7.50),
            ec_raw: 400,
        };

        engine.set_batch_l(10.0).unwrap();
        engine.set_target_ph(6.00).unwrap();
        assert!(engine.start(&config, 0, &mut actuators));
        run_ticks(
            &mut engine, &mut config, &mut sensors, &mut source, &clock, epoch, &mut actuators, 601,
        );

        assert_eq!(engine.state(), ProcessState::Fault);
        assert_eq!(engine.fault(), Some(&FaultKind::ProcessTimeout));
        assert_eq!(engine.fault().unwrap().fault_code(), 5);
    }

    #[test]
    fn abort_then_start_is_accepted() {
        let config = Config::default();
        let mut engine = ProcessEngine::new();
        let mut actuators = SimActuators::default();
        assert!(engine.start(&config, 0, &mut actuators));
        engine.abort("operator requested stop", &mut actuators);
        assert_eq!(engine.state(), ProcessState::Fault);
        assert!(!actuators.mix1 && !actuators.mix2);
        assert!(engine.start(&config, 1000, &mut actuators));
        assert_eq!(engine.state(), ProcessState::Mix);
    }

    #[test]
    fn start_ignored_while_batch_active() {
        let config = Config::default();
        let mut engine = ProcessEngine::new();
        let mut actuators = SimActuators::default();
        assert!(engine.start(&config, 0, &mut actuators));
        assert!(!engine.start(&config, 0, &mut actuators));
    }

    #[test]
    fn dose_log_resets_on_start() {
        let config = Config::default();
        let mut engine = ProcessEngine::new();
        let mut actuators = SimActuators::default();
        engine.set_dose_a_ml_per_l(1.0).unwrap();
        engine.set_dose_b_ml_per_l(1.0).unwrap();
        engine.start(&config, 0, &mut actuators);
        engine.abort("stop", &mut actuators);
        assert!(engine.start(&config, 100, &mut actuators));
        assert_eq!(engine.dose_log(), DoseLog::default());
    }

    #[rstest]
    #[case::nan(f32::NAN)]
    #[case::pos_inf(f32::INFINITY)]
    #[case::neg_inf(f32::NEG_INFINITY)]
    fn tuning_setters_reject_non_finite_input(#[case] value: f32) {
        let mut engine = ProcessEngine::new();
        let before = (
            engine.target_ph(),
            engine.batch_l(),
            engine.dose_a_ml_per_l(),
            engine.dose_b_ml_per_l(),
        );

        assert_eq!(engine.set_target_ph(value), Err(EngineError::InvalidTuning("target_ph must be finite")));
        assert_eq!(engine.set_batch_l(value), Err(EngineError::InvalidTuning("batch_l must be finite")));
        assert_eq!(
            engine.set_dose_a_ml_per_l(value),
            Err(EngineError::InvalidTuning("dose_a_ml_per_l must be finite"))
        );
        assert_eq!(
            engine.set_dose_b_ml_per_l(value),
            Err(EngineError::InvalidTuning("dose_b_ml_per_l must be finite"))
        );

        // A rejected setter must leave the prior value untouched.
        assert_eq!(
            (engine.target_ph(), engine.batch_l(), engine.dose_a_ml_per_l(), engine.dose_b_ml_per_l()),
            before
        );
    }
}
