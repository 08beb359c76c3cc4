//! Single-channel monotonicity and bounds filtering.

use crate::decoder::{read_record, DecodeError, Dialect, MAX_RECORD_SIZE};
use crate::types::{DvsEvent, Geometry, Header};
use std::io::Read;

/// Counters describing what a filter kept and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Events yielded downstream
    pub accepted: u64,
    /// Records the dialect could not decode
    pub unsupported: u64,
    /// Events older than the previously accepted one
    pub out_of_order: u64,
    /// Events outside the sensor geometry
    pub out_of_bounds: u64,
}

impl FilterStats {
    /// Total number of records read.
    pub fn records(&self) -> u64 {
        self.accepted + self.discarded()
    }

    pub fn discarded(&self) -> u64 {
        self.unsupported + self.out_of_order + self.out_of_bounds
    }
}

/// Lazy sequence of decoded events with non-decreasing timestamps and
/// in-bounds coordinates.
///
/// The reader must already be positioned past the header. Iteration ends at
/// end of input or at the first I/O error.
pub struct MonotonicFilter<R> {
    reader: R,
    dialect: Dialect,
    header: Header,
    geometry: Geometry,
    previous_timestamp: u64,
    buffer: [u8; MAX_RECORD_SIZE],
    stats: FilterStats,
    done: bool,
}

impl<R: Read> MonotonicFilter<R> {
    pub fn new(reader: R, dialect: Dialect, header: Header) -> Self {
        Self {
            reader,
            dialect,
            header,
            geometry: dialect.geometry(&header),
            previous_timestamp: 0,
            buffer: [0; MAX_RECORD_SIZE],
            stats: FilterStats::default(),
            done: false,
        }
    }

    /// Geometry the events are bounded by.
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn stats(&self) -> FilterStats {
        self.stats
    }

    /// Reads records until one is accepted or the input ends.
    pub fn next_event(&mut self) -> Result<Option<DvsEvent>, DecodeError> {
        let record_size = self.dialect.record_size();
        while read_record(&mut self.reader, &mut self.buffer[..record_size])? {
            let Some(event) = self.dialect.decode(&self.buffer, &self.header) else {
                self.stats.unsupported += 1;
                continue;
            };
            if event.timestamp < self.previous_timestamp {
                tracing::trace!(
                    timestamp = event.timestamp,
                    previous = self.previous_timestamp,
                    "discarding out of order event"
                );
                self.stats.out_of_order += 1;
                continue;
            }
            if !self.geometry.contains(event.x, event.y) {
                tracing::trace!(x = event.x, y = event.y, "discarding out of bounds event");
                self.stats.out_of_bounds += 1;
                continue;
            }
            self.previous_timestamp = event.timestamp;
            self.stats.accepted += 1;
            return Ok(Some(event));
        }
        Ok(None)
    }
}

impl<R: Read> Iterator for MonotonicFilter<R> {
    type Item = Result<DvsEvent, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_event() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
