//! PWL file output.
//!
//! One file per channel, named `<run_name>_ch<channel>.<ext>`, holding one
//! breakpoint per line with no header:
//!
//! ```text
//! 0,5
//! 0.000005,5
//! 0.000005,0
//! 0.00001,0
//! ```

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::synthesis::{round_time, round_voltage, Breakpoint, ChannelWaveform};

/// Default extension for PWL source files.
pub const DEFAULT_EXTENSION: &str = "pwl";

/// Write breakpoints as `<time>,<voltage>` lines.
pub fn write_pwl<W: Write>(breakpoints: &[Breakpoint], writer: &mut W) -> Result<()> {
    for bp in breakpoints {
        writeln!(writer, "{},{}", round_time(bp.time), round_voltage(bp.voltage))?;
    }
    Ok(())
}

/// File name for one channel of a run.
pub fn channel_file_name(run_name: &str, channel: usize, ext: &str) -> String {
    format!("{}_ch{}.{}", run_name, channel, ext)
}

/// Write one channel to `dir`, returning the path written.
pub fn write_channel_file(
    dir: &Path,
    run_name: &str,
    ext: &str,
    waveform: &ChannelWaveform,
) -> Result<PathBuf> {
    let path = dir.join(channel_file_name(run_name, waveform.channel, ext));
    let mut writer = BufWriter::new(File::create(&path)?);
    write_pwl(&waveform.breakpoints, &mut writer)?;
    writer.flush()?;
    tracing::info!(
        path = %path.display(),
        breakpoints = waveform.breakpoints.len(),
        "wrote channel"
    );
    Ok(path)
}
