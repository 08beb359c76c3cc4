//! Merges the td and aps files of a legacy ATIS recording into one ordered
//! event stream.

use aedat_cli::{
    init_logging, is_usage_error, print_summary, progress_bar, report_timestamp, OUTPUT_HELP,
};
use aedat_core::convert::{convert_dat, DatPaths};
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use std::process::ExitCode;
use std::time::Instant;

/// ATIS td/aps to event stream converter.
///
/// If `null` is given for the td or the aps file, the output is built from
/// the other file only.
#[derive(Parser, Debug)]
#[command(name = "dat_to_es")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Input td file path, or null
    #[arg(value_name = "TD")]
    td: String,

    /// Input aps file path, or null
    #[arg(value_name = "APS")]
    aps: String,

    /// Output file path (.es, .bin or .csv)
    #[arg(value_name = "OUTPUT", long_help = OUTPUT_HELP)]
    output: String,

    /// Suppress progress output
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn run(args: &Args) -> Result<()> {
    let paths = DatPaths::parse(&args.td, &args.aps, &args.output)?;

    let progress = progress_bar(args.quiet);
    let start_time = Instant::now();

    let summary = convert_dat(&paths, |timestamp| report_timestamp(&progress, timestamp))
        .context("Failed to merge the td and aps files")?;

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
