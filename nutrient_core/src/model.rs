//! Shared data-model types used across the config store, sensor pipeline,
//! process engine and serial protocol.

use std::fmt;

/// Batch process state. `Done` and `Fault` are terminal; every other variant
/// is mid-batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Mix,
    PhCoarse,
    PhFine,
    FertA,
    FertB,
    Done,
    Fault,
}

impl ProcessState {
    /// True for every state other than `Idle`, `Done`, `Fault` — i.e. a batch
    /// is actively running and a new `start()` must be rejected.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Mix | Self::PhCoarse | Self::PhFine | Self::FertA | Self::FertB
        )
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Mix => "MIX",
            Self::PhCoarse => "PH_COARSE",
            Self::PhFine => "PH_FINE",
            Self::FertA => "FERT_A",
            Self::FertB => "FERT_B",
            Self::Done => "DONE",
            Self::Fault => "FAULT",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// One of the four dosing pump channels (mixing pumps have no channel index;
/// they are always driven together).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpChannel {
    PhDown,
    PhUp,
    FertA,
    FertB,
}

impl PumpChannel {
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::PhDown => "PH_DOWN",
            Self::PhUp => "PH_UP",
            Self::FertA => "A",
            Self::FertB => "B",
        }
    }

    /// Parse the wire token used by `TEST_PUMP`/`SET_PUMP_RATE`. Case-insensitive.
    /// Fertilizer channels are addressed by bare letter, not `FERT_A`/`FERT_B`.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_uppercase().as_str() {
            "PH_DOWN" => Some(Self::PhDown),
            "PH_UP" => Some(Self::PhUp),
            "A" => Some(Self::FertA),
            "B" => Some(Self::FertB),
            _ => None,
        }
    }

    /// Index into `Config::pump_ml_per_sec`.
    pub fn index(self) -> usize {
        match self {
            Self::PhDown => 0,
            Self::PhUp => 1,
            Self::FertA => 2,
            Self::FertB => 3,
        }
    }
}

/// Running per-batch dosing totals, reset to zero at every `start()`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DoseLog {
    pub ph_down_ml: f32,
    pub ph_up_ml: f32,
    pub fert_a_ml: f32,
    pub fert_b_ml: f32,
}

impl DoseLog {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn field_mut(&mut self, channel: PumpChannel) -> &mut f32 {
        match channel {
            PumpChannel::PhDown => &mut self.ph_down_ml,
            PumpChannel::PhUp => &mut self.ph_up_ml,
            PumpChannel::FertA => &mut self.fert_a_ml,
            PumpChannel::FertB => &mut self.fert_b_ml,
        }
    }

    pub fn field(&self, channel: PumpChannel) -> f32 {
        match channel {
            PumpChannel::PhDown => self.ph_down_ml,
            PumpChannel::PhUp => self.ph_up_ml,
            PumpChannel::FertA => self.fert_a_ml,
            PumpChannel::FertB => self.fert_b_ml,
        }
    }
}

/// Single in-flight timer. At most one is ever pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerReason {
    None,
    CoarsePause,
    FinePause,
    FertPause,
    PumpRun,
    ProcessTimeout,
}

impl Default for TimerReason {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TimerState {
    pub reason: TimerReason,
    pub due_ms: u64,
}

impl TimerState {
    pub fn is_pending(&self) -> bool {
        self.reason != TimerReason::None
    }

    pub fn schedule(&mut self, reason: TimerReason, now_ms: u64, delay_ms: u64) {
        self.reason = reason;
        self.due_ms = now_ms.saturating_add(delay_ms);
    }

    pub fn clear(&mut self) {
        self.reason = TimerReason::None;
        self.due_ms = 0;
    }

    /// Wrap-tolerant "is this timer due" check, matching the firmware's
    /// `(long)(now - due) >= 0` signed-subtraction comparison.
    pub fn is_due(&self, now_ms: u64) -> bool {
        self.is_pending() && (now_ms.wrapping_sub(self.due_ms) as i64) >= 0
    }
}

/// State of the single pump that may be running at any given moment.
#[derive(Debug, Clone, Copy, Default)]
pub struct PumpRunState {
    pub active: bool,
    pub channel: Option<PumpChannel>,
    pub volume_ml: f32,
    pub started_ms: u64,
    pub duration_ms: u64,
}

impl PumpRunState {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Transient status snapshot published on each STATUS/DONE/FAULT emission.
#[derive(Debug, Clone, Default)]
pub struct StatusFrame {
    pub now_ms: u64,
    pub ph: Option<f32>,
    pub target_ph: f32,
    pub delta_ph: Option<f32>,
    pub ec_ms: Option<f32>,
    pub ec25_ms: Option<f32>,
    pub tds_ppm: Option<f32>,
    pub temperature_c: Option<f32>,
    pub vcc_mv: Option<u32>,
    pub state: Option<ProcessState>,
    pub dose: DoseLog,
    pub fault_code: Option<u8>,
    pub fault_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("PH_DOWN", PumpChannel::PhDown)]
    #[case("ph_down", PumpChannel::PhDown)]
    #[case("PH_UP", PumpChannel::PhUp)]
    #[case("a", PumpChannel::FertA)]
    #[case("B", PumpChannel::FertB)]
    fn pump_channel_parse_is_case_insensitive(#[case] token: &str, #[case] expect: PumpChannel) {
        assert_eq!(PumpChannel::parse(token), Some(expect));
    }

    #[rstest]
    #[case("")]
    #[case("FERT_A")]
    #[case("C")]
    fn pump_channel_parse_rejects_unknown_tokens(#[case] token: &str) {
        assert_eq!(PumpChannel::parse(token), None);
    }

    #[rstest]
    #[case(PumpChannel::PhDown)]
    #[case(PumpChannel::PhUp)]
    #[case(PumpChannel::FertA)]
    #[case(PumpChannel::FertB)]
    fn pump_channel_index_is_distinct_per_channel(#[case] channel: PumpChannel) {
        let others = [PumpChannel::PhDown, PumpChannel::PhUp, PumpChannel::FertA, PumpChannel::FertB];
        let matches = others.iter().filter(|c| c.index() == channel.index()).count();
        assert_eq!(matches, 1);
    }

    #[rstest]
    #[case(1_000, 500, false)]
    #[case(1_000, 1_000, true)]
    #[case(1_000, 1_500, true)]
    fn timer_is_due_at_and_after_deadline(#[case] due_ms: u64, #[case] now_ms: u64, #[case] expect_due: bool) {
        let mut timer = TimerState::default();
        timer.schedule(TimerReason::PumpRun, 0, due_ms);
        assert_eq!(timer.is_due(now_ms), expect_due);
    }

    #[test]
    fn timer_is_due_tolerates_wraparound() {
        // due scheduled just before the millisecond counter wraps; now has
        // wrapped a few ticks past it. The wrap-tolerant signed subtraction
        // must still report this as due rather than reading it as millions
        // of years in the future.
        let timer = TimerState {
            reason: TimerReason::PumpRun,
            due_ms: u64::MAX - 2,
        };
        assert!(timer.is_due(3));
    }
}
