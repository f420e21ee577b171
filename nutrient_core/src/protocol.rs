//! `SerialProtocol` — the line-based ASCII command/status protocol (§4.5, §6).
//!
//! Mirrors the design note in §9: command dispatch is a chain of handlers
//! that each return `NotHandled` or `Handled(..)`, the first `Handled` wins.
//! `SerialProtocol` owns the input line buffer, the periodic/transition
//! status-emission clock, and the two mutually-exclusive manual service
//! operations (`MIX_ONLY`, `TEST_PUMP`) — these are independent of
//! `ProcessEngine`'s own batch state machine and carry their own deadlines.

use std::fmt::{self, Write as _};

use nutrient_traits::{Actuators, NvramPort};

use crate::config::ConfigStore;
use crate::error::ProtoError;
use crate::model::{PumpChannel, ProcessState, StatusFrame};
use crate::process::{set_actuator, ProcessEngine};
use crate::sensor::SensorPipeline;

/// Bounded input line buffer (§4.5, §5 resource ceiling).
const LINE_MAX: usize = 120;
/// `STATUS_INTERVAL_MS` (§4.5).
const STATUS_INTERVAL_MS: u64 = 5_000;
/// Command lines are tokenized on whitespace and capped at 4 tokens; any
/// further tokens are silently dropped rather than rejected.
const MAX_TOKENS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    Idle,
    Mixing { due_ms: u64 },
    TestPump { channel: PumpChannel, due_ms: u64 },
}

/// A handler in the dispatch chain either declines (`NotHandled`, so the
/// next stage gets a turn) or produces the final reply.
enum Dispatch {
    NotHandled,
    Handled(Result<String, ProtoError>),
}

fn fmt_num(value: Option<f32>, decimals: usize) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.decimals$}"),
        _ => "--".to_string(),
    }
}

/// Line-oriented command/status protocol. Generic over the `NvramPort`
/// backing the `ConfigStore` it's handed each call, so it carries no
/// hardware dependency of its own.
pub struct SerialProtocol {
    line_buf: String,
    next_status_due_ms: u64,
    prev_state: ProcessState,
    service: ServiceState,
}

impl SerialProtocol {
    pub fn new(now_ms: u64) -> Self {
        Self {
            line_buf: String::new(),
            next_status_due_ms: now_ms + STATUS_INTERVAL_MS,
            prev_state: ProcessState::Idle,
            service: ServiceState::Idle,
        }
    }

    /// Feed one incoming byte. Returns the completed line (without the
    /// newline) once `\n` arrives; `\r` is skipped; an over-length line is
    /// silently truncated by dropping further bytes until the newline resets
    /// the buffer.
    pub fn feed_byte(&mut self, byte: u8) -> Option<String> {
        match byte {
            b'\n' => Some(std::mem::take(&mut self.line_buf)),
            b'\r' => None,
            _ => {
                if self.line_buf.len() < LINE_MAX {
                    self.line_buf.push(byte as char);
                }
                None
            }
        }
    }

    fn service_active(&self) -> bool {
        self.service != ServiceState::Idle
    }

    /// Whether a `MIX_ONLY`/`TEST_PUMP` service op is still running. Lets a
    /// harness poll a one-shot command to completion instead of driving the
    /// cooperative loop on a fixed sleep.
    pub fn is_busy(&self) -> bool {
        self.service_active()
    }

    /// Advance any in-flight `MIX_ONLY`/`TEST_PUMP` deadline, turning the
    /// driven output(s) off once due.
    fn poll_service(&mut self, actuators: &mut impl Actuators, now_ms: u64) {
        match self.service {
            ServiceState::Mixing { due_ms } if (now_ms.wrapping_sub(due_ms) as i64) >= 0 => {
                let _ = actuators.set_mix1(false);
                let _ = actuators.set_mix2(false);
                self.service = ServiceState::Idle;
            }
            ServiceState::TestPump { channel, due_ms } if (now_ms.wrapping_sub(due_ms) as i64) >= 0 => {
                set_actuator(channel, actuators, false);
                self.service = ServiceState::Idle;
            }
            _ => {}
        }
    }

    /// One cooperative-loop iteration (§5): advance service-op deadlines and
    /// emit STATUS/DONE/FAULT if a state transition happened since the last
    /// call, else a periodic STATUS once `STATUS_INTERVAL_MS` has elapsed.
    pub fn update(
        &mut self,
        engine: &ProcessEngine,
        sensors: &SensorPipeline,
        actuators: &mut impl Actuators,
        now_ms: u64,
        out: &mut impl fmt::Write,
    ) -> fmt::Result {
        self.poll_service(actuators, now_ms);

        let state = engine.state();
        if state != self.prev_state {
            self.prev_state = state;
            let frame = engine.status_frame(sensors, now_ms);
            return match state {
                ProcessState::Done => write_done(&frame, out),
                ProcessState::Fault => write_fault(&frame, out),
                _ => write_status_block("STATUS", &frame, out),
            };
        }

        if now_ms >= self.next_status_due_ms {
            self.next_status_due_ms = now_ms + STATUS_INTERVAL_MS;
            let frame = engine.status_frame(sensors, now_ms);
            write_status_block("STATUS", &frame, out)?;
        }
        Ok(())
    }

    /// Dispatch one already-delimited command line, returning the full
    /// reply text (newline-terminated, possibly multi-line).
    pub fn dispatch_line<N: NvramPort>(
        &mut self,
        line: &str,
        store: &mut ConfigStore<N>,
        engine: &mut ProcessEngine,
        sensors: &mut SensorPipeline,
        actuators: &mut impl Actuators,
        now_ms: u64,
    ) -> String {
        let tokens: Vec<&str> = line.split_whitespace().take(MAX_TOKENS).collect();
        let Some(&cmd) = tokens.first() else {
            return String::new();
        };
        let cmd = cmd.to_ascii_uppercase();

        if let Dispatch::Handled(result) = dispatch_ph(&cmd, &tokens, sensors, store) {
            return render(result);
        }
        if let Dispatch::Handled(result) = dispatch_ec(&cmd, &tokens, sensors, store) {
            return render(result);
        }

        render(self.dispatch_builtin(&cmd, &tokens, store, engine, sensors, actuators, now_ms))
    }

    fn dispatch_builtin<N: NvramPort>(
        &mut self,
        cmd: &str,
        tokens: &[&str],
        store: &mut ConfigStore<N>,
        engine: &mut ProcessEngine,
        sensors: &SensorPipeline,
        actuators: &mut impl Actuators,
        now_ms: u64,
    ) -> Result<String, ProtoError> {
        match cmd {
            "START" => {
                if engine.state().is_active() {
                    return Err(ProtoError::ProcessBusy);
                }
                if self.service_active() {
                    return Err(ProtoError::PumpBusy);
                }
                engine.start(store.get(), now_ms, actuators);
                Ok(String::new())
            }
            "ABORT" => {
                if engine.state() == ProcessState::Idle {
                    Ok("IDLE".to_string())
                } else {
                    let reason = tokens[1..].join(" ");
                    engine.abort(&reason, actuators);
                    Ok("ABORTED".to_string())
                }
            }
            "MIX_ONLY" => {
                if engine.state().is_active() {
                    return Err(ProtoError::ProcessBusy);
                }
                if self.service_active() {
                    return Err(ProtoError::PumpBusy);
                }
                let ms = parse_arg::<u64>(tokens, 1)?;
                let _ = actuators.set_mix1(true);
                let _ = actuators.set_mix2(true);
                self.service = ServiceState::Mixing {
                    due_ms: now_ms.saturating_add(ms),
                };
                Ok(String::new())
            }
            "TEST_PUMP" => {
                if engine.state().is_active() {
                    return Err(ProtoError::ProcessBusy);
                }
                if self.service_active() {
                    return Err(ProtoError::PumpBusy);
                }
                let channel = tokens
                    .get(1)
                    .and_then(|t| PumpChannel::parse(t))
                    .ok_or(ProtoError::InvalidArgument)?;
                let ml = parse_arg::<f32>(tokens, 2)?;
                let rate = store.get().pump_rate(channel);
                if rate <= 0.0 {
                    return Err(ProtoError::SensorError);
                }
                let duration_ms = ((ml / rate) * 1000.0).round().max(1.0) as u64;
                set_actuator(channel, actuators, true);
                self.service = ServiceState::TestPump {
                    channel,
                    due_ms: now_ms.saturating_add(duration_ms),
                };
                Ok(String::new())
            }
            "SET_PUMP_RATE" => {
                let channel = tokens
                    .get(1)
                    .and_then(|t| PumpChannel::parse(t))
                    .ok_or(ProtoError::InvalidArgument)?;
                let rate = parse_arg::<f32>(tokens, 2)?;
                store.mutate(|c| c.pump_ml_per_sec[channel.index()] = rate);
                Ok(String::new())
            }
            "SET_TARGET_PH" => {
                engine
                    .set_target_ph(parse_arg::<f32>(tokens, 1)?)
                    .map_err(|_| ProtoError::InvalidArgument)?;
                Ok(String::new())
            }
            "SET_BATCH_L" => {
                engine
                    .set_batch_l(parse_arg::<f32>(tokens, 1)?)
                    .map_err(|_| ProtoError::InvalidArgument)?;
                Ok(String::new())
            }
            "SET_DOSE_A_ML_PER_L" => {
                engine
                    .set_dose_a_ml_per_l(parse_arg::<f32>(tokens, 1)?)
                    .map_err(|_| ProtoError::InvalidArgument)?;
                Ok(String::new())
            }
            "SET_DOSE_B_ML_PER_L" => {
                engine
                    .set_dose_b_ml_per_l(parse_arg::<f32>(tokens, 1)?)
                    .map_err(|_| ProtoError::InvalidArgument)?;
                Ok(String::new())
            }
            "SET_ID" => {
                let id = parse_arg::<u16>(tokens, 1)?;
                store.mutate(|c| c.device_id = id);
                Ok(String::new())
            }
            "GET_ID" => Ok(store.get().device_id.to_string()),
            "CONFIG_DUMP" => {
                let mut s = String::new();
                store.dump(&mut s).map_err(|_| ProtoError::OperationFailed)?;
                Ok(s)
            }
            "READ_NOW" => {
                self.next_status_due_ms = now_ms + STATUS_INTERVAL_MS;
                let frame = engine.status_frame(sensors, now_ms);
                let mut s = String::new();
                write_status_block("STATUS", &frame, &mut s).map_err(|_| ProtoError::OperationFailed)?;
                Ok(s)
            }
            _ => Err(ProtoError::UnknownCommand),
        }
    }
}

fn parse_arg<T: std::str::FromStr>(tokens: &[&str], index: usize) -> Result<T, ProtoError> {
    tokens
        .get(index)
        .and_then(|s| s.parse::<T>().ok())
        .ok_or(ProtoError::InvalidArgument)
}

fn render(result: Result<String, ProtoError>) -> String {
    match result {
        Ok(msg) if msg.is_empty() => "OK\n".to_string(),
        Ok(msg) if msg.contains('\n') => msg,
        Ok(msg) => format!("OK {msg}\n"),
        Err(e) => format!("ERR {} {}\n", e.code(), e),
    }
}

fn dispatch_ph<N: NvramPort>(
    cmd: &str,
    tokens: &[&str],
    sensors: &mut SensorPipeline,
    store: &mut ConfigStore<N>,
) -> Dispatch {
    if cmd != "CAL_PH" {
        return Dispatch::NotHandled;
    }
    let Some(sub) = tokens.get(1).map(|s| s.to_ascii_uppercase()) else {
        return Dispatch::Handled(Err(ProtoError::InvalidArgument));
    };
    let result = match sub.as_str() {
        "START" => {
            sensors.ph.cal_start();
            Ok(String::new())
        }
        "ABORT" => {
            sensors.ph.cal_abort();
            Ok(String::new())
        }
        "READ" => {
            let c = store.get();
            Ok(format!("GAIN:{} OFFSET:{}", c.ph_gain, c.ph_offset))
        }
        "POINT" => match tokens.get(2).and_then(|s| s.parse::<f32>().ok()) {
            Some(reference) if sensors.ph.cal_point(reference) => Ok(String::new()),
            Some(_) => Err(ProtoError::CalibrationError),
            None => Err(ProtoError::InvalidArgument),
        },
        "SAVE" => {
            let mut saved = false;
            store.mutate(|c| saved = sensors.ph.cal_save(c));
            if saved {
                Ok(String::new())
            } else {
                Err(ProtoError::CalibrationError)
            }
        }
        _ => Err(ProtoError::InvalidArgument),
    };
    Dispatch::Handled(result)
}

fn dispatch_ec<N: NvramPort>(
    cmd: &str,
    tokens: &[&str],
    sensors: &mut SensorPipeline,
    store: &mut ConfigStore<N>,
) -> Dispatch {
    let result = match cmd {
        "CAL_EC" => {
            let Some(sub) = tokens.get(1).map(|s| s.to_ascii_uppercase()) else {
                return Dispatch::Handled(Err(ProtoError::InvalidArgument));
            };
            match sub.as_str() {
                "START" => {
                    sensors.ec.cal_start();
                    Ok(String::new())
                }
                "ABORT" => {
                    sensors.ec.cal_abort(store.get());
                    Ok(String::new())
                }
                "READ" => Ok(format!("K:{}", store.get().ec_k)),
                "POINT" => match tokens.get(2).and_then(|s| s.parse::<f32>().ok()) {
                    Some(reference) if sensors.ec.cal_point(reference) => Ok(String::new()),
                    Some(_) => Err(ProtoError::CalibrationError),
                    None => Err(ProtoError::InvalidArgument),
                },
                "SAVE" => {
                    let mut saved = false;
                    store.mutate(|c| saved = sensors.ec.cal_save(c));
                    if saved {
                        Ok(String::new())
                    } else {
                        Err(ProtoError::CalibrationError)
                    }
                }
                _ => Err(ProtoError::InvalidArgument),
            }
        }
        "SET_T" => match tokens.get(1).and_then(|s| s.parse::<f32>().ok()) {
            Some(c) => {
                sensors.ec.set_temperature(c);
                Ok(String::new())
            }
            None => Err(ProtoError::InvalidArgument),
        },
        "SET_EC_ALPHA" => match tokens.get(1).and_then(|s| s.parse::<f32>().ok()) {
            Some(a) => {
                store.mutate(|c| c.ec_alpha = a);
                Ok(String::new())
            }
            None => Err(ProtoError::InvalidArgument),
        },
        "SET_K" => match tokens.get(1).and_then(|s| s.parse::<f32>().ok()) {
            Some(k) => {
                store.mutate(|c| c.ec_k = k);
                Ok(String::new())
            }
            None => Err(ProtoError::InvalidArgument),
        },
        "SET_TDSFACTOR" => match tokens.get(1).and_then(|s| s.parse::<u16>().ok()) {
            Some(f) => {
                store.mutate(|c| c.tds_factor = f);
                Ok(String::new())
            }
            None => Err(ProtoError::InvalidArgument),
        },
        _ => return Dispatch::NotHandled,
    };
    Dispatch::Handled(result)
}

fn write_status_block(prefix: &str, frame: &StatusFrame, out: &mut impl fmt::Write) -> fmt::Result {
    writeln!(
        out,
        "{prefix} PH:{} EC:{} T:{} TDS:{} VCC:{}",
        fmt_num(frame.ph, 2),
        fmt_num(frame.ec25_ms, 3),
        fmt_num(frame.temperature_c, 1),
        fmt_num(frame.tds_ppm, 0),
        frame.vcc_mv.map_or_else(|| "--".to_string(), |v| v.to_string()),
    )?;
    writeln!(
        out,
        "       STATE:{} TARGET_PH:{} DELTA_PH:{}",
        frame.state.map_or("--", ProcessState::wire_name),
        fmt_num(Some(frame.target_ph), 2),
        fmt_num(frame.delta_ph, 3),
    )?;
    writeln!(
        out,
        "       DOSE_A:{:.2} DOSE_B:{:.2} DOSE_UP:{:.2} DOSE_DOWN:{:.2}",
        frame.dose.fert_a_ml, frame.dose.fert_b_ml, frame.dose.ph_up_ml, frame.dose.ph_down_ml,
    )
}

fn write_done(frame: &StatusFrame, out: &mut impl fmt::Write) -> fmt::Result {
    write_status_block("DONE", frame, out)
}

fn write_fault(frame: &StatusFrame, out: &mut impl fmt::Write) -> fmt::Result {
    writeln!(
        out,
        "FAULT code:{} msg:\"{}\"",
        frame.fault_code.unwrap_or(0),
        frame.fault_message.as_deref().unwrap_or(""),
    )?;
    write_status_block("FAULT", frame, out)
}
