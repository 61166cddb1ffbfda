//! PWM waveform synthesizer.
//!
//! Walks each channel across its switching periods and emits the PWL
//! breakpoints of the commanded waveform. Every period is split into four
//! segments whose durations add up to T:
//!
//! ```text
//! on    = T*duty - t_fall              held at v_on
//! fall  = t_fall                       ramp to v_off
//! off   = T*(1 - duty) - t_rise        held at v_off (includes deadtime)
//! rise  = t_rise                       ramp to v_on
//! ```
//!
//! A period ends at the level it started from, so a channel keeps one
//! orientation for the whole run: low-first when `v_initial == v_off`,
//! high-first otherwise. The first period therefore continues from
//! `v_initial` without an edge at t = 0.
//!
//! Channels share no state and are synthesized in parallel.

use std::collections::BTreeMap;

use rayon::prelude::*;

use super::modulation::duty_at;
use super::{floor_time, round_time, round_voltage, Breakpoint, ChannelWaveform};
use crate::error::{PwlError, Result};
use crate::ir::{ChannelConfig, EdgePolicy, RunConfig};

/// Negative segment durations smaller than this fraction of T are float noise.
const EDGE_TOLERANCE: f64 = 1e-9;

/// Upper bound on the up-front breakpoint reservation.
const MAX_RESERVE: usize = 1 << 20;

/// Synthesize every channel of `run`.
///
/// Fails with the error of the lowest-indexed failing channel. Use
/// [`synthesize_all`] to keep the channels that succeeded.
pub fn synthesize(run: &RunConfig) -> Result<BTreeMap<usize, Vec<Breakpoint>>> {
    run.validate()?;
    let _span =
        tracing::info_span!("synthesize", name = %run.name, channels = run.pwm.channels).entered();
    synthesize_all(run)
        .into_iter()
        .map(|result| result.map(|w| (w.channel, w.breakpoints)))
        .collect()
}

/// Synthesize every channel independently, in parallel, in channel order.
pub fn synthesize_all(run: &RunConfig) -> Vec<Result<ChannelWaveform>> {
    (0..run.pwm.channels)
        .into_par_iter()
        .map(|channel| synthesize_channel(run, channel))
        .collect()
}

/// Synthesize one channel of `run`.
pub fn synthesize_channel(run: &RunConfig, channel: usize) -> Result<ChannelWaveform> {
    run.validate()?;
    let cfg = &run.pwm;
    if channel >= cfg.channels {
        return Err(PwlError::Config(format!(
            "channel {} out of range for {} channels",
            channel, cfg.channels
        )));
    }

    let _span = tracing::info_span!("synthesize_channel", channel).entered();
    let period = cfg.period();
    let phase = cfg.phase.seconds_for(channel, cfg.channels, period);
    let expected = ((run.duration - phase) / period).ceil().max(0.0);
    tracing::info!(periods = expected, phase, "channel timing");

    let mut trace = Trace::new(run.duration, cfg.v_initial, expected as usize);
    let polarity = Polarity::from_config(cfg);
    let mut periods = 0;

    // A lagging channel holds its initial level until its first period.
    if phase > 0.0 && !trace.push(phase, cfg.v_initial) {
        return Ok(trace.finish(channel, phase, periods));
    }

    for index in 0usize.. {
        let start = phase + index as f64 * period;
        if round_time(start) >= run.duration {
            break;
        }
        let duty = duty_at(&cfg.modulation, start.max(0.0));
        let timing = PeriodTiming::new(cfg, duty).map_err(|reason| PwlError::Period {
            channel,
            period: index,
            time: start,
            duty,
            reason,
        })?;
        if timing.clamped {
            tracing::warn!(period = index, duty, "edges clamped to fit the period");
        }
        periods += 1;

        let next_start = phase + (index + 1) as f64 * period;
        let mut end = start;
        let mut truncated = false;
        let mut level_at_zero = None;
        for (i, segment) in timing.segments(polarity, cfg).iter().enumerate() {
            end = if i == 3 { next_start } else { end + segment.duration };
            // Segments finishing by t = 0 are never seen, but the last one
            // sets the level the waveform holds at t = 0.
            if end <= 0.0 {
                level_at_zero = Some(segment.level);
                continue;
            }
            if let Some(level) = level_at_zero.take() {
                trace.switch_at_zero(level);
            }
            if !trace.push(end, segment.level) {
                truncated = true;
                break;
            }
        }
        if truncated {
            tracing::debug!(period = index, "final period truncated by run duration");
            break;
        }
    }

    Ok(trace.finish(channel, phase, periods))
}

/// Which half of the period comes first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Polarity {
    HighFirst,
    LowFirst,
}

impl Polarity {
    fn from_config(cfg: &ChannelConfig) -> Self {
        if cfg.v_initial == cfg.v_off {
            Polarity::LowFirst
        } else {
            Polarity::HighFirst
        }
    }
}

/// A piece of a period ending `duration` after the previous one at `level`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    duration: f64,
    level: f64,
}

/// Segment durations of one switching period.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PeriodTiming {
    on: f64,
    fall: f64,
    off: f64,
    deadtime: f64,
    rise: f64,
    clamped: bool,
}

impl PeriodTiming {
    /// Split a period at `duty`, checking that both edges fit.
    ///
    /// The error string names the violated constraint; the caller adds
    /// channel and period context.
    fn new(cfg: &ChannelConfig, duty: f64) -> std::result::Result<Self, String> {
        let period = cfg.period();
        let tolerance = period * EDGE_TOLERANCE;
        let high = high_time(cfg, duty, period);
        let low = period - high;

        match cfg.edge_policy {
            EdgePolicy::Reject => {
                let on = high - cfg.t_fall;
                let off = low - cfg.t_rise - cfg.deadtime;
                if on < -tolerance {
                    return Err(format!(
                        "on-time {}s is negative (high side {}s, t_fall {}s)",
                        on, high, cfg.t_fall
                    ));
                }
                if off < -tolerance {
                    return Err(format!(
                        "off-time {}s is negative (low side {}s, t_rise {}s, deadtime {}s)",
                        off, low, cfg.t_rise, cfg.deadtime
                    ));
                }
                Ok(Self {
                    on: on.max(0.0),
                    fall: cfg.t_fall,
                    off: off.max(0.0),
                    deadtime: cfg.deadtime,
                    rise: cfg.t_rise,
                    clamped: false,
                })
            }
            EdgePolicy::Clamp => {
                let fall = cfg.t_fall.min(high);
                let deadtime = cfg.deadtime.min(low);
                let rise = cfg.t_rise.min(low - deadtime);
                let clamped = fall < cfg.t_fall - tolerance
                    || deadtime < cfg.deadtime - tolerance
                    || rise < cfg.t_rise - tolerance;
                Ok(Self {
                    on: high - fall,
                    fall,
                    off: low - deadtime - rise,
                    deadtime,
                    rise,
                    clamped,
                })
            }
        }
    }

    fn segments(&self, polarity: Polarity, cfg: &ChannelConfig) -> [Segment; 4] {
        let on = Segment {
            duration: self.on,
            level: cfg.v_on,
        };
        let fall = Segment {
            duration: self.fall,
            level: cfg.v_off,
        };
        let off = Segment {
            duration: self.off + self.deadtime,
            level: cfg.v_off,
        };
        let rise = Segment {
            duration: self.rise,
            level: cfg.v_on,
        };
        match polarity {
            Polarity::HighFirst => [on, fall, off, rise],
            Polarity::LowFirst => [off, rise, on, fall],
        }
    }
}

/// Time spent on the high side (on + fall), snapped to timer ticks when `f_clk` is set.
fn high_time(cfg: &ChannelConfig, duty: f64, period: f64) -> f64 {
    let high = period * duty;
    match cfg.f_clk {
        Some(f_clk) => ((high * f_clk).round() / f_clk).clamp(0.0, period),
        None => high,
    }
}

/// Breakpoint accumulator for one channel.
///
/// Keeps the unrounded position of the last breakpoint so a truncated
/// segment can be closed on the line the simulator would draw.
struct Trace {
    duration: f64,
    points: Vec<Breakpoint>,
    last_time: f64,
    last_level: f64,
}

impl Trace {
    fn new(duration: f64, v_initial: f64, periods: usize) -> Self {
        let mut points =
            Vec::with_capacity(periods.saturating_mul(4).saturating_add(1).min(MAX_RESERVE));
        points.push(Breakpoint::new(0.0, round_voltage(v_initial)));
        Self {
            duration,
            points,
            last_time: 0.0,
            last_level: v_initial,
        }
    }

    /// Append the end of a segment. Returns `false`, after closing the
    /// trace at the run duration, when the segment ends past it.
    fn push(&mut self, time: f64, level: f64) -> bool {
        let rounded = round_time(time);
        if rounded > self.duration {
            self.close(time, level);
            return false;
        }
        self.emit(rounded, level);
        self.last_time = time;
        self.last_level = level;
        true
    }

    /// Step from `v_initial` to `level` at t = 0 when they differ.
    fn switch_at_zero(&mut self, level: f64) {
        if round_voltage(level) != round_voltage(self.last_level) {
            self.emit(0.0, level);
        }
        self.last_time = 0.0;
        self.last_level = level;
    }

    fn close(&mut self, end: f64, level: f64) {
        let time = floor_time(self.duration);
        if time <= self.last_emitted() {
            return;
        }
        let span = end - self.last_time;
        let frac = if span > 0.0 {
            ((self.duration - self.last_time) / span).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let voltage = self.last_level + (level - self.last_level) * frac;
        self.emit(time, voltage);
    }

    fn emit(&mut self, time: f64, voltage: f64) {
        // Rounding is monotone but the last edge of a period is pinned to the
        // next period start, so guard against a one-grid-step reversal.
        let time = time.max(self.last_emitted());
        let bp = Breakpoint::new(time, round_voltage(voltage));
        tracing::trace!(t = bp.time, v = bp.voltage, "breakpoint");
        self.points.push(bp);
    }

    fn last_emitted(&self) -> f64 {
        self.points.last().map_or(0.0, |bp| bp.time)
    }

    fn finish(self, channel: usize, phase: f64, periods: usize) -> ChannelWaveform {
        ChannelWaveform {
            channel,
            phase,
            periods,
            breakpoints: self.points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{DutyModulation, PhaseOffset};
    use approx::assert_abs_diff_eq;

    fn run(f_sw: f64, duty: f64, v_initial: f64, duration: f64) -> RunConfig {
        RunConfig {
            name: "test".into(),
            duration,
            pwm: ChannelConfig {
                modulation: DutyModulation::Fixed { value: duty },
                v_initial,
                v_on: 5.0,
                v_off: 0.0,
                f_sw,
                ..ChannelConfig::default()
            },
        }
    }

    fn assert_points(actual: &[Breakpoint], expected: &[(f64, f64)]) {
        assert_eq!(
            actual.len(),
            expected.len(),
            "breakpoint count mismatch: {:?}",
            actual
        );
        for (i, (bp, &(t, v))) in actual.iter().zip(expected).enumerate() {
            assert!(
                (bp.time - t).abs() < 1e-15 && (bp.voltage - v).abs() < 1e-12,
                "breakpoint {}: expected ({}, {}), got ({}, {})",
                i,
                t,
                v,
                bp.time,
                bp.voltage
            );
        }
    }

    #[test]
    fn high_first_square_wave() {
        let w = synthesize_channel(&run(100e3, 0.5, 5.0, 20e-6), 0).unwrap();
        assert_eq!(w.periods, 2);
        assert_points(
            &w.breakpoints,
            &[
                (0.0, 5.0),
                (5e-6, 5.0),
                (5e-6, 0.0),
                (10e-6, 0.0),
                (10e-6, 5.0),
                (15e-6, 5.0),
                (15e-6, 0.0),
                (20e-6, 0.0),
                (20e-6, 5.0),
            ],
        );
    }

    #[test]
    fn low_first_when_starting_at_v_off() {
        let w = synthesize_channel(&run(1e3, 0.25, 0.0, 1e-3), 0).unwrap();
        assert_points(
            &w.breakpoints,
            &[
                (0.0, 0.0),
                (0.75e-3, 0.0),
                (0.75e-3, 5.0),
                (1e-3, 5.0),
                (1e-3, 0.0),
            ],
        );
    }

    #[test]
    fn edges_take_time() {
        let mut cfg = run(1e3, 0.5, 0.0, 1e-3);
        cfg.pwm.t_rise = 100e-6;
        cfg.pwm.t_fall = 50e-6;
        let w = synthesize_channel(&cfg, 0).unwrap();
        assert_points(
            &w.breakpoints,
            &[
                (0.0, 0.0),
                (0.4e-3, 0.0),
                (0.5e-3, 5.0),
                (0.95e-3, 5.0),
                (1e-3, 0.0),
            ],
        );
    }

    #[test]
    fn deadtime_extends_the_low_hold() {
        let mut cfg = run(1e3, 0.5, 0.0, 1e-3);
        cfg.pwm.t_rise = 50e-6;
        cfg.pwm.deadtime = 50e-6;
        let w = synthesize_channel(&cfg, 0).unwrap();
        // Rising edge starts after off + deadtime and the high side stays T*duty.
        assert_abs_diff_eq!(w.breakpoints[1].time, 0.45e-3, epsilon = 1e-15);
        assert_abs_diff_eq!(w.breakpoints[2].time, 0.5e-3, epsilon = 1e-15);
        assert_abs_diff_eq!(w.breakpoints[4].time, 1e-3, epsilon = 1e-15);
    }

    #[test]
    fn truncated_period_closes_at_duration() {
        let mut cfg = run(1e3, 0.5, 0.0, 0.45e-3);
        cfg.pwm.t_rise = 100e-6;
        cfg.pwm.t_fall = 100e-6;
        let w = synthesize_channel(&cfg, 0).unwrap();
        assert_eq!(w.periods, 1);
        // Halfway up the rising edge when the run ends.
        assert_points(&w.breakpoints, &[(0.0, 0.0), (0.4e-3, 0.0), (0.45e-3, 2.5)]);
    }

    #[test]
    fn no_closing_point_when_run_ends_on_an_edge() {
        let w = synthesize_channel(&run(1e3, 0.5, 5.0, 0.5e-3), 0).unwrap();
        assert_points(&w.breakpoints, &[(0.0, 5.0), (0.5e-3, 5.0), (0.5e-3, 0.0)]);
    }

    #[test]
    fn rejects_edge_longer_than_high_side() {
        let mut cfg = run(1e3, 0.05, 5.0, 2e-3);
        cfg.pwm.t_fall = 100e-6;
        match synthesize_channel(&cfg, 0) {
            Err(PwlError::Period {
                channel,
                period,
                duty,
                ..
            }) => {
                assert_eq!(channel, 0);
                assert_eq!(period, 0);
                assert_eq!(duty, 0.05);
            }
            other => panic!("expected Period error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_deadtime_that_does_not_fit() {
        let mut cfg = run(1e3, 0.9, 5.0, 2e-3);
        cfg.pwm.t_rise = 60e-6;
        cfg.pwm.deadtime = 60e-6;
        assert!(matches!(
            synthesize_channel(&cfg, 0),
            Err(PwlError::Period { period: 0, .. })
        ));
    }

    #[test]
    fn error_names_the_period_where_ramp_breaks_the_edges() {
        // Duty drops 0.1 per period; t_fall needs duty >= 0.1.
        let mut cfg = run(1e3, 0.5, 5.0, 10e-3);
        cfg.pwm.modulation = DutyModulation::Linear {
            start: 0.5,
            stop: 0.0,
            rate: -100.0,
        };
        cfg.pwm.t_fall = 100e-6;
        match synthesize_channel(&cfg, 0) {
            Err(PwlError::Period {
                period, time, duty, ..
            }) => {
                assert_eq!(period, 5);
                assert_abs_diff_eq!(time, 5e-3, epsilon = 1e-12);
                assert_abs_diff_eq!(duty, 0.0, epsilon = 1e-12);
            }
            other => panic!("expected Period error, got {:?}", other),
        }
    }

    #[test]
    fn clamp_policy_shortens_edges() {
        let mut cfg = run(1e3, 0.05, 5.0, 1e-3);
        cfg.pwm.t_fall = 100e-6;
        cfg.pwm.edge_policy = EdgePolicy::Clamp;
        let w = synthesize_channel(&cfg, 0).unwrap();
        // The fall edge uses the whole 50us high side; the period still ends at T.
        assert_points(
            &w.breakpoints,
            &[(0.0, 5.0), (50e-6, 0.0), (1e-3, 0.0), (1e-3, 5.0)],
        );
    }

    #[test]
    fn duty_extremes_collapse_segments() {
        let full = synthesize_channel(&run(1e3, 1.0, 5.0, 1e-3), 0).unwrap();
        assert!(full.breakpoints.iter().all(|bp| bp.voltage == 5.0 || bp.time == 1e-3));
        let empty = synthesize_channel(&run(1e3, 0.0, 0.0, 1e-3), 0).unwrap();
        assert!(empty.breakpoints.iter().all(|bp| bp.voltage == 0.0 || bp.time == 1e-3));
    }

    #[test]
    fn lagging_channel_holds_initial_level() {
        let mut cfg = run(1e3, 0.5, 5.0, 2e-3);
        cfg.pwm.channels = 2;
        cfg.pwm.phase = PhaseOffset::Interleaved;
        let w = synthesize_channel(&cfg, 1).unwrap();
        assert_abs_diff_eq!(w.phase, 0.5e-3, epsilon = 1e-15);
        assert_points(
            &w.breakpoints,
            &[
                (0.0, 5.0),
                (0.5e-3, 5.0),
                (1e-3, 5.0),
                (1e-3, 0.0),
                (1.5e-3, 0.0),
                (1.5e-3, 5.0),
                (2e-3, 5.0),
                (2e-3, 0.0),
            ],
        );
    }

    #[test]
    fn leading_channel_starts_mid_period() {
        let mut cfg = run(1e3, 0.5, 5.0, 1e-3);
        cfg.pwm.channels = 2;
        cfg.pwm.phase = PhaseOffset::Stepped { degrees: -90.0 };
        let w = synthesize_channel(&cfg, 1).unwrap();
        assert!(w.breakpoints.iter().all(|bp| bp.time >= 0.0));
        assert_points(
            &w.breakpoints[..5],
            &[
                (0.0, 5.0),
                (0.25e-3, 5.0),
                (0.25e-3, 0.0),
                (0.75e-3, 0.0),
                (0.75e-3, 5.0),
            ],
        );
    }

    #[test]
    fn leading_channel_switches_at_zero_when_already_low() {
        let mut cfg = run(1e3, 0.5, 5.0, 1e-3);
        cfg.pwm.channels = 2;
        cfg.pwm.phase = PhaseOffset::Stepped { degrees: -270.0 };
        let w = synthesize_channel(&cfg, 1).unwrap();
        assert_abs_diff_eq!(w.phase, -0.75e-3, epsilon = 1e-15);
        assert_points(
            &w.breakpoints,
            &[
                (0.0, 5.0),
                (0.0, 0.0),
                (0.25e-3, 0.0),
                (0.25e-3, 5.0),
                (0.75e-3, 5.0),
                (0.75e-3, 0.0),
                (1e-3, 0.0),
            ],
        );
    }

    #[test]
    fn zero_duty_from_high_steps_down_at_zero() {
        let w = synthesize_channel(&run(1e3, 0.0, 5.0, 2e-3), 0).unwrap();
        assert_points(
            &w.breakpoints[..3],
            &[(0.0, 5.0), (0.0, 0.0), (1e-3, 0.0)],
        );
        // No ramp anywhere: every segment with width holds a level.
        for pair in w.breakpoints.windows(2) {
            if pair[1].time > pair[0].time {
                assert_eq!(pair[0].voltage, pair[1].voltage, "ramp at {:?}", pair);
            }
        }
    }

    #[test]
    fn leading_edge_after_zero_still_ramps() {
        // The fall edge straddles t = 0, so the first breakpoint after the
        // start lies on it rather than stepping.
        let mut cfg = run(1e3, 0.5, 5.0, 1e-3);
        cfg.pwm.channels = 2;
        cfg.pwm.t_fall = 100e-6;
        cfg.pwm.phase = PhaseOffset::Stepped { degrees: -162.0 };
        let w = synthesize_channel(&cfg, 1).unwrap();
        assert_eq!(w.breakpoints[0], Breakpoint::new(0.0, 5.0));
        assert_abs_diff_eq!(w.breakpoints[1].time, 50e-6, epsilon = 1e-15);
        assert_eq!(w.breakpoints[1].voltage, 0.0);
    }

    #[test]
    fn timer_clock_quantizes_high_time() {
        let mut cfg = run(1e3, 0.3337, 5.0, 1e-3);
        cfg.pwm.f_clk = Some(10e3);
        let w = synthesize_channel(&cfg, 0).unwrap();
        assert_abs_diff_eq!(w.breakpoints[1].time, 0.3e-3, epsilon = 1e-15);
        assert_abs_diff_eq!(w.breakpoints[2].time, 0.3e-3, epsilon = 1e-15);
    }

    #[test]
    fn channel_index_out_of_range() {
        assert!(matches!(
            synthesize_channel(&run(1e3, 0.5, 5.0, 1e-3), 1),
            Err(PwlError::Config(_))
        ));
    }

    #[test]
    fn synthesize_maps_every_channel() {
        let mut cfg = run(10e3, 0.5, 5.0, 1e-3);
        cfg.pwm.channels = 3;
        let out = synthesize(&cfg).unwrap();
        assert_eq!(out.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(out[&0], out[&2]);
    }
}
