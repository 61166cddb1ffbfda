use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use pwlgen::error::Result;
use pwlgen::ir::{DutyModulation, EdgePolicy, PhaseOffset, RunConfig};
use pwlgen::output;
use pwlgen::parser::{self, parse_ratio, parse_value};
use pwlgen::stats::Stats;
use pwlgen::synthesis::pwm;

/// PWM piecewise-linear source generator
///
/// Numeric options accept engineering suffixes (100k, 4.7u, 10ns, 1MEG).
#[derive(Parser)]
#[command(name = "pwlgen", version)]
struct Cli {
    /// TOML run file; options below override its fields
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run name, used as the output file stem
    #[arg(long)]
    name: Option<String>,

    /// Total duration (s)
    #[arg(long, value_parser = parse_value)]
    duration: Option<f64>,

    /// Switching frequency (Hz)
    #[arg(long, value_parser = parse_value)]
    f_sw: Option<f64>,

    /// Timer clock (Hz); snaps the high time to whole ticks
    #[arg(long, value_parser = parse_value)]
    f_clk: Option<f64>,

    /// Level at t = 0 (V)
    #[arg(long, value_parser = parse_value, allow_hyphen_values = true)]
    v_initial: Option<f64>,

    /// High level (V)
    #[arg(long, value_parser = parse_value, allow_hyphen_values = true)]
    v_on: Option<f64>,

    /// Low level (V)
    #[arg(long, value_parser = parse_value, allow_hyphen_values = true)]
    v_off: Option<f64>,

    /// Rising edge time (s)
    #[arg(long, value_parser = parse_value)]
    t_rise: Option<f64>,

    /// Falling edge time (s)
    #[arg(long, value_parser = parse_value)]
    t_fall: Option<f64>,

    /// Hold at the low level before each rising edge (s)
    #[arg(long, value_parser = parse_value)]
    deadtime: Option<f64>,

    /// Fixed duty ratio (0.5 or 50%)
    #[arg(long, value_parser = parse_ratio, conflicts_with = "duty_start")]
    duty: Option<f64>,

    /// Linear ramp: starting duty ratio
    #[arg(long, value_parser = parse_ratio, requires_all = ["duty_stop", "duty_rate"])]
    duty_start: Option<f64>,

    /// Linear ramp: final duty ratio
    #[arg(long, value_parser = parse_ratio, requires = "duty_start")]
    duty_stop: Option<f64>,

    /// Linear ramp: duty change per second (negative to ramp down)
    #[arg(long, value_parser = parse_value, allow_hyphen_values = true, requires = "duty_start")]
    duty_rate: Option<f64>,

    /// Number of channels
    #[arg(long)]
    channels: Option<usize>,

    /// Phase step between consecutive channels (degrees)
    #[arg(long, allow_hyphen_values = true, conflicts_with = "interleave")]
    phase: Option<f64>,

    /// Spread channels evenly over one switching period
    #[arg(long)]
    interleave: bool,

    /// Shorten edges that do not fit instead of failing
    #[arg(long)]
    clamp_edges: bool,

    /// Directory for the generated files
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Output file extension
    #[arg(long, default_value = output::DEFAULT_EXTENSION)]
    ext: String,

    /// Print performance stats to stderr
    #[arg(long)]
    stats: bool,
}

impl Cli {
    /// Run file (or defaults) with command-line overrides applied.
    fn run_config(&self) -> Result<RunConfig> {
        let mut run = match &self.config {
            Some(path) => parser::load_run(path)?,
            None => RunConfig::default(),
        };
        if let Some(name) = &self.name {
            run.name = name.clone();
        }
        override_with(&mut run.duration, self.duration);

        let pwm = &mut run.pwm;
        override_with(&mut pwm.f_sw, self.f_sw);
        override_with(&mut pwm.v_initial, self.v_initial);
        override_with(&mut pwm.v_on, self.v_on);
        override_with(&mut pwm.v_off, self.v_off);
        override_with(&mut pwm.t_rise, self.t_rise);
        override_with(&mut pwm.t_fall, self.t_fall);
        override_with(&mut pwm.deadtime, self.deadtime);
        override_with(&mut pwm.channels, self.channels);
        if self.f_clk.is_some() {
            pwm.f_clk = self.f_clk;
        }

        if let Some(value) = self.duty {
            pwm.modulation = DutyModulation::fixed(value)?;
        }
        if let (Some(start), Some(stop), Some(rate)) =
            (self.duty_start, self.duty_stop, self.duty_rate)
        {
            pwm.modulation = DutyModulation::linear(start, stop, rate)?;
        }

        if self.interleave {
            pwm.phase = PhaseOffset::Interleaved;
        } else if let Some(degrees) = self.phase {
            pwm.phase = PhaseOffset::Stepped { degrees };
        }
        if self.clamp_edges {
            pwm.edge_policy = EdgePolicy::Clamp;
        }

        run.validate()?;
        Ok(run)
    }
}

fn override_with<T>(field: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *field = value;
    }
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut stats = if cli.stats { Some(Stats::new()) } else { None };

    let run = cli.run_config().unwrap_or_else(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    });

    let start = Instant::now();
    let results = pwm::synthesize_all(&run);
    if let Some(ref mut s) = stats {
        s.add_phase("Synthesis", start.elapsed());
    }

    let start = Instant::now();
    let mut failed = false;
    for result in &results {
        match result {
            Ok(waveform) => {
                output::write_channel_file(&cli.out_dir, &run.name, &cli.ext, waveform)
                    .unwrap_or_else(|e| {
                        eprintln!("Output error: {}", e);
                        std::process::exit(1);
                    });
                if let Some(ref mut s) = stats {
                    s.record_channel(waveform);
                }
            }
            Err(e) => {
                eprintln!("Synthesis error: {}", e);
                failed = true;
                if let Some(ref mut s) = stats {
                    s.channels_failed += 1;
                }
            }
        }
    }
    if let Some(ref mut s) = stats {
        s.add_phase("Write", start.elapsed());
    }

    if let Some(ref stats) = stats {
        stats.display();
    }
    if failed {
        std::process::exit(1);
    }
}
