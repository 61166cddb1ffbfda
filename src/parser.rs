//! Input parsing: engineering-notation values and TOML run files.
//!
//! Values accept SPICE engineering suffixes T, G, MEG, K, M, U, N, P, F
//! (case-insensitive) followed by an optional unit word that is ignored:
//! `100k`, `100kHz`, `4.7u`, `10ns`, `1MEG`, `-3.3V`, `1e-6`.
//!
//! A run file is the TOML form of [`RunConfig`]:
//!
//! ```toml
//! name = "buck"
//! duration = 1.0
//!
//! [pwm]
//! v_initial = 5.0
//! v_on = 5.0
//! v_off = 0.0
//! f_sw = 100e3
//! channels = 2
//!
//! [pwm.modulation]
//! law = "linear"
//! start = 0.01
//! stop = 0.90
//! rate = 10.0
//!
//! [pwm.phase]
//! mode = "interleaved"
//! ```

use std::path::Path;

use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_while};
use nom::combinator::{map, opt};
use nom::number::complete::double;
use nom::IResult;
use nom::Parser;

use crate::error::{PwlError, Result};
use crate::ir::RunConfig;

/// Parse a number with optional engineering suffix and unit, e.g. `100kHz`.
pub fn parse_value(input: &str) -> Result<f64> {
    let trimmed = input.trim();
    let (rest, value) = eng_value(trimmed)
        .map_err(|_| PwlError::Parse(format!("invalid value: {:?}", input)))?;
    if !rest.is_empty() {
        return Err(PwlError::Parse(format!(
            "unexpected {:?} after value in {:?}",
            rest, input
        )));
    }
    if !value.is_finite() {
        return Err(PwlError::Parse(format!("value must be finite: {:?}", input)));
    }
    Ok(value)
}

/// Parse a ratio, either plain (`0.5`) or as a percentage (`50%`).
pub fn parse_ratio(input: &str) -> Result<f64> {
    match input.trim().strip_suffix('%') {
        Some(percent) => Ok(parse_value(percent)? / 100.0),
        None => parse_value(input),
    }
}

/// Parse a TOML run file.
pub fn parse_run(input: &str) -> Result<RunConfig> {
    toml::from_str(input).map_err(|e| PwlError::Parse(format!("run file: {}", e)))
}

/// Read and parse a TOML run file from disk.
pub fn load_run(path: &Path) -> Result<RunConfig> {
    let input = std::fs::read_to_string(path)?;
    parse_run(&input).map_err(|e| match e {
        PwlError::Parse(detail) => PwlError::Parse(format!("{}: {}", path.display(), detail)),
        other => other,
    })
}

// ---------------------------------------------------------------------------
// Engineering suffix value parser
// ---------------------------------------------------------------------------

fn eng_value(input: &str) -> IResult<&str, f64> {
    let (rest, num) = double(input)?;
    let (rest, suffix) = opt(eng_suffix).parse(rest)?;
    let (rest, _unit) = take_while(|c: char| c.is_ascii_alphabetic()).parse(rest)?;
    Ok((rest, num * suffix.unwrap_or(1.0)))
}

/// Match an engineering suffix and return its multiplier.
fn eng_suffix(input: &str) -> IResult<&str, f64> {
    // MEG must be tried before M
    alt((
        map(tag_no_case("MEG"), |_: &str| 1e6),
        map(tag_no_case("T"), |_: &str| 1e12),
        map(tag_no_case("G"), |_: &str| 1e9),
        map(tag_no_case("K"), |_: &str| 1e3),
        map(tag_no_case("M"), |_: &str| 1e-3),
        map(tag_no_case("U"), |_: &str| 1e-6),
        map(tag_no_case("N"), |_: &str| 1e-9),
        map(tag_no_case("P"), |_: &str| 1e-12),
        map(tag_no_case("F"), |_: &str| 1e-15),
    ))
    .parse(input)
}
