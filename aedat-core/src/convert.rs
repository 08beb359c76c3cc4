//! End-to-end conversions from input files to an output sink.
//!
//! Configuration is validated before the filesystem is touched, so a rejected
//! command never leaves a partial output behind.

use crate::decoder::{DecodeError, Dialect};
use crate::filter::FilterStats;
use crate::header::read_header;
use crate::merge::{DualStreamMerger, MergeStats, ThresholdTable};
use crate::observable::dvs_observable;
use crate::output::{create_sink, EventSink, OutputError, OutputFormat};
use crate::types::{AtisEvent, Geometry, Header};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Channel argument that disables a td or aps input.
pub const NULL_CHANNEL: &str = "null";

/// Number of events between two progress callbacks.
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Invalid combinations of command arguments.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("The td and aps inputs must be different files")]
    SameTdAndAps,

    #[error("The {input} input and the output must be different files")]
    SameInputAndOutput { input: &'static str },

    #[error("null cannot be used for both the td file and the aps file")]
    BothChannelsDisabled,

    #[error("Unsupported output format: {0}. Use .es, .bin or .csv")]
    UnsupportedOutput(String),
}

/// Errors that abort a conversion.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cannot read {}: {source}", path.display())]
    UnreadableInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot create {}: {source}", path.display())]
    UnwritableOutput {
        path: PathBuf,
        #[source]
        source: OutputError,
    },

    #[error("Decoding failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("Writing failed: {0}")]
    Output(#[from] OutputError),
}

impl ConvertError {
    /// True for errors caused by the arguments rather than the files.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// What a conversion produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionSummary {
    pub geometry: Geometry,
    pub events_written: u64,
    pub report: ConversionReport,
}

/// Per-pipeline statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionReport {
    Aedat {
        header: Header,
        dialect: Dialect,
        stats: FilterStats,
    },
    Dat(MergeStats),
}

/// Validated arguments of a td/aps conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatPaths {
    pub td: Option<PathBuf>,
    pub aps: Option<PathBuf>,
    pub output: PathBuf,
    pub format: OutputFormat,
}

impl DatPaths {
    /// Checks the raw arguments; [`NULL_CHANNEL`] disables a channel.
    pub fn parse(td: &str, aps: &str, output: &str) -> Result<Self, ConfigError> {
        if td == NULL_CHANNEL && aps == NULL_CHANNEL {
            return Err(ConfigError::BothChannelsDisabled);
        }
        if td == aps {
            return Err(ConfigError::SameTdAndAps);
        }
        if td == output {
            return Err(ConfigError::SameInputAndOutput { input: "td" });
        }
        if aps == output {
            return Err(ConfigError::SameInputAndOutput { input: "aps" });
        }
        let output = PathBuf::from(output);
        let format = output_format(&output)?;

        let channel = |argument: &str| (argument != NULL_CHANNEL).then(|| PathBuf::from(argument));
        Ok(Self {
            td: channel(td),
            aps: channel(aps),
            output,
            format,
        })
    }
}

/// Validated arguments of an AEDAT conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AedatPaths {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
}

impl AedatPaths {
    pub fn parse(input: &str, output: &str) -> Result<Self, ConfigError> {
        if input == output {
            return Err(ConfigError::SameInputAndOutput { input: "aedat" });
        }
        let output = PathBuf::from(output);
        let format = output_format(&output)?;
        Ok(Self {
            input: PathBuf::from(input),
            output,
            format,
        })
    }
}

fn output_format(path: &Path) -> Result<OutputFormat, ConfigError> {
    OutputFormat::from_path(path).map_err(|e| match e {
        OutputError::UnsupportedFormat(extension) => ConfigError::UnsupportedOutput(extension),
        OutputError::Io(e) => ConfigError::UnsupportedOutput(e.to_string()),
    })
}

fn open_input(path: &Path) -> Result<BufReader<File>, ConvertError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ConvertError::UnreadableInput {
            path: path.to_path_buf(),
            source,
        })
}

fn open_output(path: &Path, format: OutputFormat, geometry: Geometry) -> Result<Box<dyn EventSink>, ConvertError> {
    create_sink(path, format, geometry).map_err(|source| ConvertError::UnwritableOutput {
        path: path.to_path_buf(),
        source,
    })
}

/// Wraps a sink so that `on_progress` sees every [`PROGRESS_INTERVAL`]th timestamp.
struct ProgressSink<'s, F> {
    sink: &'s mut dyn EventSink,
    on_progress: F,
    written: u64,
}

impl<F: FnMut(u64)> ProgressSink<'_, F> {
    fn write(&mut self, event: AtisEvent) -> Result<(), ConvertError> {
        if self.written % PROGRESS_INTERVAL == 0 {
            (self.on_progress)(event.timestamp);
        }
        self.sink.write_event(&event)?;
        self.written += 1;
        Ok(())
    }
}

/// Converts an AEDAT file.
///
/// The dialect is derived from the header unless `dialect` overrides it.
/// `on_progress` receives a timestamp every [`PROGRESS_INTERVAL`] events.
pub fn convert_aedat<F: FnMut(u64)>(
    paths: &AedatPaths,
    dialect: Option<Dialect>,
    on_progress: F,
) -> Result<ConversionSummary, ConvertError> {
    let mut reader = open_input(&paths.input)?;
    let header = read_header(&mut reader).map_err(|source| ConvertError::UnreadableInput {
        path: paths.input.clone(),
        source,
    })?;
    let dialect = dialect.unwrap_or_else(|| Dialect::for_header(&header));
    let geometry = dialect.geometry(&header);
    tracing::info!(
        input = %paths.input.display(),
        %dialect,
        width = geometry.width,
        height = geometry.height,
        "converting AEDAT file"
    );

    let mut sink = open_output(&paths.output, paths.format, geometry)?;
    let mut progress = ProgressSink {
        sink: sink.as_mut(),
        on_progress,
        written: 0,
    };
    let stats = dvs_observable(reader, header, dialect, |event| {
        progress.write(AtisEvent::change_detection(event))
    })?;
    let events_written = progress.written;
    sink.finish()?;

    Ok(ConversionSummary {
        geometry,
        events_written,
        report: ConversionReport::Aedat {
            header,
            dialect,
            stats,
        },
    })
}

/// Merges a td file and an aps file.
///
/// `on_progress` receives a timestamp every [`PROGRESS_INTERVAL`] events.
pub fn convert_dat<F: FnMut(u64)>(
    paths: &DatPaths,
    on_progress: F,
) -> Result<ConversionSummary, ConvertError> {
    if paths.td.is_none() && paths.aps.is_none() {
        return Err(ConfigError::BothChannelsDisabled.into());
    }
    let td = paths.td.as_deref().map(open_input).transpose()?;
    let aps = paths.aps.as_deref().map(open_input).transpose()?;
    tracing::info!(
        td = ?paths.td,
        aps = ?paths.aps,
        "merging td and aps files"
    );

    // Empty channels are rejected before the output exists
    let geometry = Geometry::ATIS;
    let mut thresholds = ThresholdTable::new(geometry);
    let merger = DualStreamMerger::new(td, aps, &mut thresholds)?;

    let mut sink = open_output(&paths.output, paths.format, geometry)?;
    let mut progress = ProgressSink {
        sink: sink.as_mut(),
        on_progress,
        written: 0,
    };
    let stats = merger.run(|event| progress.write(event))?;
    let events_written = progress.written;
    sink.finish()?;

    Ok(ConversionSummary {
        geometry,
        events_written,
        report: ConversionReport::Dat(stats),
    })
}
