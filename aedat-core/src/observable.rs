//! Push-style driving of a single AEDAT channel.

use crate::decoder::{DecodeError, Dialect};
use crate::filter::{FilterStats, MonotonicFilter};
use crate::types::{DvsEvent, Header};
use std::io::Read;

/// Decodes and filters every record of `reader`, handing each accepted event
/// to `handle_event` before the next record is read.
///
/// The header must already have been read from the stream. Stops at the end
/// of input or at the first error, from either the reader or the handler.
pub fn dvs_observable<R, F, E>(
    reader: R,
    header: Header,
    dialect: Dialect,
    mut handle_event: F,
) -> Result<FilterStats, E>
where
    R: Read,
    F: FnMut(DvsEvent) -> Result<(), E>,
    E: From<DecodeError>,
{
    let mut filter = MonotonicFilter::new(reader, dialect, header);
    while let Some(event) = filter.next_event()? {
        handle_event(event)?;
    }

    let stats = filter.stats();
    tracing::debug!(
        %dialect,
        accepted = stats.accepted,
        unsupported = stats.unsupported,
        out_of_order = stats.out_of_order,
        out_of_bounds = stats.out_of_bounds,
        "observable complete"
    );
    Ok(stats)
}
