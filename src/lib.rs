//! Piecewise-linear PWM waveform synthesis.
//!
//! Turns switching frequency, voltage levels, edge times and a duty law into
//! per-channel `(time, voltage)` breakpoint tables that a circuit simulator
//! can load as PWL sources.

pub mod error;
pub mod ir;
pub mod output;
pub mod parser;
pub mod stats;
pub mod synthesis;
