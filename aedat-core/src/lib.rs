//! Decoders for legacy event camera recordings.
//!
//! This crate reads the historical AEDAT dialects (DVS128 and DAVIS) and the
//! legacy ATIS td/aps pair of `.dat` dumps, and turns them into a single
//! timestamp-ordered sequence of events ready for an event stream writer.
//!
//! # Example
//!
//! ```no_run
//! use aedat_core::convert::{convert_dat, ConversionReport, DatPaths};
//!
//! let paths = DatPaths::parse("recording_td.dat", "recording_aps.dat", "recording.es").unwrap();
//! let summary = convert_dat(&paths, |_timestamp| {}).unwrap();
//!
//! println!("Wrote {} events", summary.events_written);
//! if let ConversionReport::Dat(stats) = summary.report {
//!     println!("Dropped {} stale threshold crossings", stats.aps.stale_thresholds);
//! }
//! ```
//!
//! # Features
//!
//! - Header parsing with a safe fallback for unreadable or missing headers
//! - DVS128 (6-byte), DAVIS (8-byte) and ATIS td/aps (8-byte) record layouts
//! - Per-channel monotonicity and bounds filtering
//! - Lookahead merge of the td and aps channels with per-pixel deduplication
//!   of threshold crossings
//! - CSV and binary output sinks

pub mod convert;
pub mod decoder;
pub mod filter;
pub mod header;
pub mod merge;
pub mod observable;
pub mod output;
pub mod parser;
pub mod types;

// Re-export commonly used types
pub use convert::{ConfigError, ConversionSummary, ConvertError};
pub use decoder::{DecodeError, Dialect};
pub use filter::MonotonicFilter;
pub use header::read_header;
pub use merge::{DualStreamMerger, MergeState, ThresholdTable};
pub use observable::dvs_observable;
pub use output::{EventSink, OutputError, OutputFormat};
pub use types::{AtisEvent, Channel, DvsEvent, Geometry, Header};
