//! Converts an AEDAT recording into an ordered event stream.

use aedat_cli::{
    init_logging, is_usage_error, print_summary, progress_bar, report_timestamp, OUTPUT_HELP,
};
use aedat_core::convert::{convert_aedat, AedatPaths};
use aedat_core::Dialect;
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, ValueEnum};
use std::process::ExitCode;
use std::time::Instant;

/// AEDAT to event stream converter.
///
/// Reads a DVS128 (AEDAT 1.0) or DAVIS (AEDAT 2.0) recording and writes its
/// polarity events in timestamp order.
#[derive(Parser, Debug)]
#[command(name = "aedat_to_es")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input AEDAT file path
    #[arg(value_name = "INPUT")]
    input: String,

    /// Output file path (.es, .bin or .csv)
    #[arg(value_name = "OUTPUT", long_help = OUTPUT_HELP)]
    output: String,

    /// Record layout of the input.
    ///
    /// `auto` derives it from the file header. Headers never announce
    /// AEDAT 1.0 reliably, so DVS128 recordings need `dvs128`.
    #[arg(short, long, value_enum, default_value_t = DialectArg::Auto)]
    dialect: DialectArg,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DialectArg {
    Auto,
    Dvs128,
    Davis,
}

impl DialectArg {
    fn dialect(self) -> Option<Dialect> {
        match self {
            Self::Auto => None,
            Self::Dvs128 => Some(Dialect::Dvs128),
            Self::Davis => Some(Dialect::Davis),
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let paths = AedatPaths::parse(&args.input, &args.output)?;

    let progress = progress_bar(args.quiet);
    let start_time = Instant::now();

    let summary = convert_aedat(&paths, args.dialect.dialect(), |timestamp| {
        report_timestamp(&progress, timestamp)
    })
    .with_context(|| format!("Failed to convert {}", args.input))?;

    progress.finish_with_message("The conversion has successfully completed");

    if !args.quiet {
        print_summary(&summary, start_time.elapsed());
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{:#}", error);
            if is_usage_error(&error) {
                let _ = Args::command().print_help();
            }
            ExitCode::FAILURE
        }
    }
}
