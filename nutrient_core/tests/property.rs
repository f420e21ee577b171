//! Property-based sweeps over `Config::sanitize`, the persisted-record
//! codec, and the batch dose log, complementing the example-driven unit
//! tests inside each module (§8 round-trip/idempotence and invariants).

use proptest::prelude::*;

use nutrient_core::config::{decode_record, encode_record, Config};
use nutrient_core::{DoseLog, ProcessEngine, SensorPipeline};
use nutrient_traits::{Actuators, Clock, SensorSource};

/// Any f32, including NaN/+-inf, so `sanitize` is exercised against exactly
/// the kind of garbage a flipped NVRAM bit or an uninitialized field could
/// produce.
fn any_f32() -> impl Strategy<Value = f32> {
    prop_oneof![
        3 => any::<f32>(),
        1 => Just(f32::NAN),
        1 => Just(f32::INFINITY),
        1 => Just(f32::NEG_INFINITY),
    ]
}

prop_compose! {
    fn arbitrary_config()(
        ph_gain in any_f32(),
        ph_offset in any_f32(),
        ec_alpha in any_f32(),
        tds_factor in any::<u16>(),
        ec_k in any_f32(),
        pump_ml_per_sec in proptest::array::uniform4(any_f32()),
        coarse_threshold in any_f32(),
        fine_threshold in any_f32(),
        coarse_pause_ms in any::<u32>(),
        fine_pause_ms in any::<u32>(),
        fert_pause_ms in any::<u32>(),
        max_ph_dose_per_pulse_per_l in any_f32(),
        max_ph_total_per_l in any_f32(),
        dose_gain_up in any_f32(),
        dose_gain_down in any_f32(),
        fine_dose_scale in any_f32(),
        process_timeout_ms in any::<u32>(),
    ) -> Config {
        let mut c = Config::default();
        c.ph_gain = ph_gain;
        c.ph_offset = ph_offset;
        c.ec_alpha = ec_alpha;
        c.tds_factor = tds_factor;
        c.ec_k = ec_k;
        c.pump_ml_per_sec = pump_ml_per_sec;
        c.coarse_threshold = coarse_threshold;
        c.fine_threshold = fine_threshold;
        c.coarse_pause_ms = coarse_pause_ms;
        c.fine_pause_ms = fine_pause_ms;
        c.fert_pause_ms = fert_pause_ms;
        c.max_ph_dose_per_pulse_per_l = max_ph_dose_per_pulse_per_l;
        c.max_ph_total_per_l = max_ph_total_per_l;
        c.dose_gain_up = dose_gain_up;
        c.dose_gain_down = dose_gain_down;
        c.fine_dose_scale = fine_dose_scale;
        c.process_timeout_ms = process_timeout_ms;
        c
    }
}

proptest! {
    /// §4.1/§8 invariant 4: after sanitizing arbitrary (possibly non-finite,
    /// possibly out-of-order) field values, every documented range holds.
    #[test]
    fn sanitize_always_yields_in_range_config(mut c in arbitrary_config()) {
        c.sanitize();

        prop_assert!(c.ph_gain.is_finite());
        prop_assert!(c.ph_offset.is_finite());
        prop_assert!((0.0..=0.2).contains(&c.ec_alpha));
        prop_assert!(c.tds_factor > 0 && c.tds_factor <= 2000);
        prop_assert!(c.ec_k > 0.0 && c.ec_k <= 10.0 && c.ec_k.is_finite());
        for rate in c.pump_ml_per_sec {
            prop_assert!(rate > 0.0 && rate <= 100.0 && rate.is_finite());
        }
        prop_assert!((0.05..=2.0).contains(&c.coarse_threshold));
        prop_assert!(c.fine_threshold >= 0.01);
        prop_assert!(c.fine_threshold <= c.coarse_threshold);
        prop_assert!((1_000..=20 * 60 * 1000).contains(&c.coarse_pause_ms));
        prop_assert!((1_000..=20 * 60 * 1000).contains(&c.fine_pause_ms));
        prop_assert!((1_000..=20 * 60 * 1000).contains(&c.fert_pause_ms));
        prop_assert!(c.max_ph_dose_per_pulse_per_l > 0.0 && c.max_ph_dose_per_pulse_per_l.is_finite());
        prop_assert!(c.max_ph_total_per_l > 0.0 && c.max_ph_total_per_l.is_finite());
        prop_assert!((0.02..=2.0).contains(&c.dose_gain_up));
        prop_assert!((0.02..=2.0).contains(&c.dose_gain_down));
        prop_assert!(c.fine_dose_scale > 0.0 && c.fine_dose_scale <= 1.0);
        prop_assert!(c.process_timeout_ms == 0 || (60_000..=21_600_000).contains(&c.process_timeout_ms));

        // Idempotence: sanitizing an already-sanitized config is a no-op.
        let once = c.clone();
        c.sanitize();
        prop_assert_eq!(c, once);
    }

    /// §8 round-trip: `encode_record` followed by `decode_record` must
    /// reproduce a sanitized config exactly, since `sanitize` always runs
    /// before encoding.
    #[test]
    fn record_round_trips_through_encode_decode(mut c in arbitrary_config()) {
        c.sanitize();
        let record = encode_record(&c);
        let decoded = decode_record(&record).expect("a freshly-encoded record must decode");
        prop_assert_eq!(decoded, c);
    }

    /// §8 invariant 5: flipping any single byte of a valid record either
    /// leaves it decodable to the same config (a flip inside a field that
    /// sanitize independently clamps back) or is rejected outright — it must
    /// never panic and never silently yield a config violating an invariant.
    #[test]
    fn flipped_byte_never_panics_and_stays_in_range(mut c in arbitrary_config(), byte_index in 0usize..nutrient_core::config::RECORD_LEN, bit in 0u8..8) {
        c.sanitize();
        let mut record = encode_record(&c);
        record[byte_index] ^= 1 << bit;
        match decode_record(&record) {
            Ok(decoded) => {
                let mut resanitized = decoded.clone();
                resanitized.sanitize();
                prop_assert_eq!(decoded, resanitized);
            }
            Err(_) => {}
        }
    }
}

#[derive(Default)]
struct NoopActuators;
impl Actuators for NoopActuators {
    fn set_mix1(&mut self, _: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
    fn set_mix2(&mut self, _: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
    fn set_ph_down(&mut self, _: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
    fn set_ph_up(&mut self, _: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
    fn set_fert_a(&mut self, _: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
    fn set_fert_b(&mut self, _: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Replays a scripted, proptest-generated pH trajectory (EC/TDS held
/// constant and valid) against a fixed 100 ms tick.
struct TrajectorySource {
    ph_trajectory: Vec<f32>,
    index: usize,
    config_for_volts: Config,
}

impl SensorSource for TrajectorySource {
    fn read_ph_raw(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        let ph = self
            .ph_trajectory
            .get(self.index)
            .copied()
            .unwrap_or_else(|| *self.ph_trajectory.last().unwrap());
        self.index += 1;
        let volts = (ph - self.config_for_volts.ph_offset) / self.config_for_volts.ph_gain;
        let counts = ((volts / 5.0) * 1023.0).round().clamp(0.0, 1023.0) as u16;
        Ok(counts)
    }
    fn read_ec_raw(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        Ok(400)
    }
    fn read_vcc_raw(&mut self) -> Result<u16, Box<dyn std::error::Error + Send + Sync>> {
        Ok(0)
    }
}

proptest! {
    /// §8 invariant 3: across any pH trajectory in `[2, 12]`, DoseLog fields
    /// never go negative and never decrease within a batch.
    #[test]
    fn dose_log_is_nonnegative_and_monotonic(
        trajectory in proptest::collection::vec(2.0f32..12.0f32, 5..40),
        batch_l in 1.0f32..250.0,
        target_ph in 2.0f32..12.0,
    ) {
        let config = Config::default();
        let mut engine = ProcessEngine::new();
        let mut sensors = SensorPipeline::default();
        let mut actuators = NoopActuators::default();
        let mut source = TrajectorySource {
            ph_trajectory: trajectory,
            index: 0,
            config_for_volts: config.clone(),
        };

        engine.set_batch_l(batch_l).unwrap();
        engine.set_target_ph(target_ph).unwrap();
        engine.set_dose_a_ml_per_l(0.5).unwrap();
        engine.set_dose_b_ml_per_l(0.5).unwrap();
        prop_assert!(engine.start(&config, 0, &mut actuators));

        let clock = nutrient_traits::test_clock::TestClock::new();
        let epoch = clock.now();
        let mut prev = DoseLog::default();

        for step in 0..3_000u64 {
            clock.advance(std::time::Duration::from_millis(100));
            sensors.tick(&clock, epoch, &config, &mut source);
            let now_ms = step * 100 + 100;
            engine.on_sensor_tick(&config, &sensors, now_ms, &mut actuators);
            engine.on_timer_tick(&config, now_ms, &mut actuators);

            let dose = engine.dose_log();
            prop_assert!(dose.ph_up_ml >= 0.0 && dose.ph_down_ml >= 0.0);
            prop_assert!(dose.fert_a_ml >= 0.0 && dose.fert_b_ml >= 0.0);
            prop_assert!(dose.ph_up_ml >= prev.ph_up_ml);
            prop_assert!(dose.ph_down_ml >= prev.ph_down_ml);
            prop_assert!(dose.fert_a_ml >= prev.fert_a_ml);
            prop_assert!(dose.fert_b_ml >= prev.fert_b_ml);
            prev = dose;

            if matches!(engine.state(), nutrient_core::ProcessState::Done | nutrient_core::ProcessState::Fault) {
                break;
            }
        }
    }
}
