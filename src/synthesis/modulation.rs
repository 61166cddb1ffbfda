//! Duty-ratio evaluation.
//!
//! Evaluates a `DutyModulation` law at an arbitrary elapsed time. The
//! synthesizer samples once per switching period, but nothing here assumes
//! period boundaries.

use crate::ir::DutyModulation;

/// Duty ratio in [0, 1] commanded at `elapsed` seconds into the run.
///
/// Negative `elapsed` (a channel leading channel 0) evaluates as t = 0.
pub fn duty_at(law: &DutyModulation, elapsed: f64) -> f64 {
    match *law {
        DutyModulation::Fixed { value } => value,
        DutyModulation::Linear { start, stop, rate } => eval_linear(start, stop, rate, elapsed),
    }
}

fn eval_linear(start: f64, stop: f64, rate: f64, elapsed: f64) -> f64 {
    let duty = start + rate * elapsed.max(0.0);
    // Hold at `stop` once the ramp gets there.
    if rate >= 0.0 {
        duty.min(stop)
    } else {
        duty.max(stop)
    }
}
