//! Run description: the value types the synthesizer consumes.
//!
//! Everything here is an immutable value built once from a run file or the
//! command line. `RunConfig::validate` checks the static invariants; the
//! per-period edge invariants depend on the duty law and are checked during
//! synthesis.

use serde::{Deserialize, Serialize};

use crate::error::{PwlError, Result};

/// Duty-ratio law evaluated at each switching period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "law", rename_all = "snake_case")]
pub enum DutyModulation {
    /// Constant duty ratio for the whole run.
    Fixed { value: f64 },
    /// Linear ramp from `start` toward `stop` at `rate` (ratio per second),
    /// holding at `stop` once reached.
    Linear { start: f64, stop: f64, rate: f64 },
}

impl DutyModulation {
    pub fn fixed(value: f64) -> Result<Self> {
        let law = DutyModulation::Fixed { value };
        law.validate()?;
        Ok(law)
    }

    pub fn linear(start: f64, stop: f64, rate: f64) -> Result<Self> {
        let law = DutyModulation::Linear { start, stop, rate };
        law.validate()?;
        Ok(law)
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            DutyModulation::Fixed { value } => check_ratio("fixed duty", value),
            DutyModulation::Linear { start, stop, rate } => {
                check_ratio("linear start duty", start)?;
                check_ratio("linear stop duty", stop)?;
                if !rate.is_finite() {
                    return Err(PwlError::Config(format!(
                        "linear duty rate must be finite, got {}",
                        rate
                    )));
                }
                let direction = stop - start;
                if direction != 0.0 && rate == 0.0 {
                    return Err(PwlError::Config(format!(
                        "linear duty rate is zero but start {} differs from stop {}",
                        start, stop
                    )));
                }
                if direction * rate < 0.0 {
                    return Err(PwlError::Config(format!(
                        "linear duty rate {} moves away from stop {} (start {})",
                        rate, stop, start
                    )));
                }
                Ok(())
            }
        }
    }
}

impl Default for DutyModulation {
    fn default() -> Self {
        DutyModulation::Fixed { value: 0.5 }
    }
}

fn check_ratio(what: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(PwlError::Config(format!(
            "{} must lie in [0, 1], got {}",
            what, value
        )));
    }
    Ok(())
}

/// How channels are staggered relative to channel 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PhaseOffset {
    /// Channel c is shifted by `c * degrees`.
    Stepped { degrees: f64 },
    /// Channels evenly spread over one period: channel c is shifted by `c * 360 / channels`.
    Interleaved,
    /// One shift per channel, in degrees.
    Explicit { degrees: Vec<f64> },
}

impl Default for PhaseOffset {
    fn default() -> Self {
        PhaseOffset::Stepped { degrees: 0.0 }
    }
}

impl PhaseOffset {
    /// Phase shift of `channel` in degrees, reduced into (-360, 360).
    pub fn degrees_for(&self, channel: usize, channels: usize) -> f64 {
        let raw = match self {
            PhaseOffset::Stepped { degrees } => channel as f64 * degrees,
            PhaseOffset::Interleaved => channel as f64 * 360.0 / channels.max(1) as f64,
            PhaseOffset::Explicit { degrees } => degrees.get(channel).copied().unwrap_or(0.0),
        };
        raw % 360.0
    }

    /// Phase shift of `channel` in seconds for a switching period `period`.
    pub fn seconds_for(&self, channel: usize, channels: usize, period: f64) -> f64 {
        self.degrees_for(channel, channels) / 360.0 * period
    }

    fn validate(&self, channels: usize) -> Result<()> {
        match self {
            PhaseOffset::Stepped { degrees } if !degrees.is_finite() => Err(PwlError::Config(
                format!("phase step must be finite, got {}", degrees),
            )),
            PhaseOffset::Explicit { degrees } => {
                if degrees.len() != channels {
                    return Err(PwlError::Config(format!(
                        "explicit phase list has {} entries for {} channels",
                        degrees.len(),
                        channels
                    )));
                }
                if let Some((channel, d)) = degrees.iter().enumerate().find(|(_, d)| !d.is_finite()) {
                    return Err(PwlError::Config(format!(
                        "phase of channel {} must be finite, got {}",
                        channel, d
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// What to do when an edge does not fit inside its half of the period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgePolicy {
    /// Fail the channel with `PwlError::Period`.
    #[default]
    Reject,
    /// Shorten the offending edge so the period still lasts exactly T.
    Clamp,
}

/// Electrical and timing parameters shared by every channel of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    pub modulation: DutyModulation,
    /// Level at t = 0 (V).
    pub v_initial: f64,
    pub v_on: f64,
    pub v_off: f64,
    /// Edge transition times (s).
    pub t_rise: f64,
    pub t_fall: f64,
    /// Switching frequency (Hz).
    pub f_sw: f64,
    /// Timer clock (Hz). When set, the high-side time snaps to whole ticks.
    pub f_clk: Option<f64>,
    /// Hold at `v_off` inserted before each rising edge (s).
    pub deadtime: f64,
    pub phase: PhaseOffset,
    pub channels: usize,
    pub edge_policy: EdgePolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            modulation: DutyModulation::default(),
            v_initial: 0.0,
            v_on: 5.0,
            v_off: 0.0,
            t_rise: 0.0,
            t_fall: 0.0,
            f_sw: 1.0,
            f_clk: None,
            deadtime: 0.0,
            phase: PhaseOffset::default(),
            channels: 1,
            edge_policy: EdgePolicy::Reject,
        }
    }
}

impl ChannelConfig {
    /// Switching period T = 1 / f_sw.
    pub fn period(&self) -> f64 {
        1.0 / self.f_sw
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.f_sw.is_finite() && self.f_sw > 0.0) {
            return Err(PwlError::Config(format!(
                "switching frequency must be positive, got {}",
                self.f_sw
            )));
        }
        if let Some(f_clk) = self.f_clk {
            if !(f_clk.is_finite() && f_clk > 0.0) {
                return Err(PwlError::Config(format!(
                    "timer clock must be positive, got {}",
                    f_clk
                )));
            }
        }
        for (what, v) in [
            ("v_initial", self.v_initial),
            ("v_on", self.v_on),
            ("v_off", self.v_off),
        ] {
            if !v.is_finite() {
                return Err(PwlError::Config(format!("{} must be finite, got {}", what, v)));
            }
        }
        for (what, t) in [
            ("t_rise", self.t_rise),
            ("t_fall", self.t_fall),
            ("deadtime", self.deadtime),
        ] {
            if !(t.is_finite() && t >= 0.0) {
                return Err(PwlError::Config(format!(
                    "{} must be non-negative, got {}",
                    what, t
                )));
            }
        }
        if self.channels == 0 {
            return Err(PwlError::Config("channel count must be at least 1".into()));
        }
        self.modulation.validate()?;
        self.phase.validate(self.channels)
    }
}

/// A complete synthesis request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Label used to name output files.
    pub name: String,
    /// Total duration (s).
    pub duration: f64,
    pub pwm: ChannelConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            name: "pwl".into(),
            duration: 0.0,
            pwm: ChannelConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(PwlError::Config(format!(
                "run name must be a non-empty file stem, got {:?}",
                self.name
            )));
        }
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(PwlError::Config(format!(
                "duration must be positive, got {}",
                self.duration
            )));
        }
        self.pwm.validate()
    }
}
