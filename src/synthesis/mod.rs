//! Waveform synthesis: duty-law evaluation and PWM breakpoint generation.

pub mod modulation;
pub mod pwm;

/// Timestamp resolution: breakpoints sit on a 1 ns grid.
const TIME_SCALE: f64 = 1e9;
/// Voltage resolution: 10 mV.
const VOLTAGE_SCALE: f64 = 1e2;

/// One (time, voltage) corner of a piecewise-linear source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Breakpoint {
    /// Seconds since the start of the run.
    pub time: f64,
    /// Volts.
    pub voltage: f64,
}

impl Breakpoint {
    pub fn new(time: f64, voltage: f64) -> Self {
        Self { time, voltage }
    }
}

/// Synthesized output of a single channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelWaveform {
    pub channel: usize,
    /// Phase shift applied to this channel (s). Negative values lead channel 0.
    pub phase: f64,
    /// Switching periods started before the end of the run, including a truncated last one.
    pub periods: usize,
    /// Ordered breakpoints, first at t = 0, none past the run duration.
    pub breakpoints: Vec<Breakpoint>,
}

/// Round a timestamp to the nanosecond grid.
pub fn round_time(t: f64) -> f64 {
    (t * TIME_SCALE).round() / TIME_SCALE
}

/// Largest nanosecond-grid timestamp not after `t`.
pub fn floor_time(t: f64) -> f64 {
    let ticks = (t * TIME_SCALE).round();
    if ticks / TIME_SCALE > t {
        (ticks - 1.0) / TIME_SCALE
    } else {
        ticks / TIME_SCALE
    }
}

/// Round a voltage to two decimals, folding -0 into 0.
pub fn round_voltage(v: f64) -> f64 {
    let r = (v * VOLTAGE_SCALE).round() / VOLTAGE_SCALE;
    if r == 0.0 {
        0.0
    } else {
        r
    }
}
