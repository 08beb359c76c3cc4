//! Shared plumbing for the `aedat_to_es` and `dat_to_es` binaries.

use aedat_core::convert::{ConversionReport, ConversionSummary};
use aedat_core::ConvertError;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

/// Long help of the OUTPUT argument shared by both binaries.
pub const OUTPUT_HELP: &str = "Output file path (.es, .bin or .csv)

The output format is determined by the file extension:
- .es / .bin: the compact AEDATES binary layout of these tools (24-byte header, \
16-byte records), not the Event Stream format
- .csv: one t,x,y,is_threshold_crossing,polarity row per event";

/// Installs the stderr logger.
///
/// `RUST_LOG` wins when set; otherwise `quiet` selects `warn` and each
/// `verbose` step raises the level from `info` to `debug` and `trace`.
pub fn init_logging(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Spinner reporting the last converted timestamp, hidden when `quiet`.
pub fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Converting...");
    pb
}

/// Shows a timestamp on the spinner.
pub fn report_timestamp(progress: &ProgressBar, timestamp: u64) {
    progress.set_message(format!("{} microseconds converted", separate_thousands(timestamp)));
}

/// Renders a number with `.` between groups of three digits.
pub fn separate_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut separated = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, digit) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            separated.push('.');
        }
        separated.push(digit);
    }
    separated
}

/// Prints the end-of-run summary to stderr.
pub fn print_summary(summary: &ConversionSummary, elapsed: Duration) {
    let seconds = elapsed.as_secs_f64();
    eprintln!();
    eprintln!("Summary:");
    eprintln!("  Sensor:       {}x{}", summary.geometry.width, summary.geometry.height);
    eprintln!("  Events:       {}", summary.events_written);
    match &summary.report {
        ConversionReport::Aedat {
            header,
            dialect,
            stats,
        } => {
            eprintln!("  Version:      {}.{}", header.major_version, header.minor_version);
            eprintln!("  Dialect:      {}", dialect);
            eprintln!("  Unsupported:  {}", stats.unsupported);
            eprintln!("  Out of order: {}", stats.out_of_order);
            eprintln!("  Out of range: {}", stats.out_of_bounds);
        }
        ConversionReport::Dat(stats) => {
            eprintln!("  td events:    {} ({} discarded)", stats.td.admitted, stats.td.discarded());
            eprintln!("  aps events:   {} ({} discarded)", stats.aps.admitted, stats.aps.discarded());
            eprintln!("  Stale aps:    {}", stats.aps.stale_thresholds);
        }
    }
    eprintln!("  Duration:     {:.3}s", seconds);
    if seconds > 0.0 {
        eprintln!("  Throughput:   {:.0} events/s", summary.events_written as f64 / seconds);
    }
}

/// True when the error comes from bad arguments, which warrants the help text.
pub fn is_usage_error(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<ConvertError>()
        .is_some_and(ConvertError::is_config)
        || error.downcast_ref::<aedat_core::ConfigError>().is_some()
}
