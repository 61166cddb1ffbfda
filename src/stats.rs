//! Performance statistics collection for `--stats` output.

use std::time::{Duration, Instant};

use crate::synthesis::ChannelWaveform;

/// Collects phase timings and synthesis counters.
///
/// Created when `--stats` is passed; the CLI holds it as `Option<Stats>`.
pub struct Stats {
    total_start: Instant,
    phases: Vec<(&'static str, Duration)>,
    pub channels: u32,
    pub channels_failed: u32,
    pub periods: u64,
    pub breakpoints: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            phases: Vec::new(),
            channels: 0,
            channels_failed: 0,
            periods: 0,
            breakpoints: 0,
        }
    }

    /// Record a completed phase with its duration.
    pub fn add_phase(&mut self, name: &'static str, duration: Duration) {
        self.phases.push((name, duration));
    }

    /// Count a successfully synthesized channel.
    pub fn record_channel(&mut self, waveform: &ChannelWaveform) {
        self.channels += 1;
        self.periods += waveform.periods as u64;
        self.breakpoints += waveform.breakpoints.len() as u64;
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== pwlgen Stats ===");

        for (name, dur) in &self.phases {
            eprintln!("  {:<24} {:>8.3}s", name, dur.as_secs_f64());
        }

        eprintln!("  Channels:               {}", self.channels);
        if self.channels_failed > 0 {
            eprintln!("  Channels failed:        {}", self.channels_failed);
        }
        eprintln!("  Periods:                {}", self.periods);
        eprintln!("  Breakpoints:            {}", self.breakpoints);
        eprintln!("  ─────────────────────────────────");
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
    }
}
