//! Per-dialect record decoding.
//!
//! A [`Dialect`] is selected once per input and turns one fixed-size raw
//! record into a [`DvsEvent`]. Records the dialect does not support (frames,
//! IMU samples, unknown versions, rows that cannot be flipped) decode to
//! `None` and must be discarded by the caller.

use crate::parser;
use crate::types::{Channel, DvsEvent, Geometry, Header};
use std::io::{ErrorKind, Read};
use thiserror::Error;

/// Errors that can occur while reading and decoding records.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("At least one of the td and aps channels must be enabled")]
    NoEnabledChannel,

    #[error("The {0} file is empty")]
    EmptyChannel(Channel),

    #[error("Both the td file and the aps file are empty")]
    EmptyChannels,
}

/// Largest record size over all dialects.
pub const MAX_RECORD_SIZE: usize = 8;

/// Hardware byte layout of one event record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// 6-byte AEDAT 1.0 records from a DVS128.
    Dvs128,
    /// 8-byte AEDAT 2.0 records from a DAVIS camera.
    Davis,
    /// 8-byte records from legacy ATIS td/aps dumps, fixed 304x240 geometry.
    Atis,
}

impl Dialect {
    /// Picks the AEDAT dialect matching a parsed header.
    pub fn for_header(header: &Header) -> Self {
        if header.major_version == 1 {
            Self::Dvs128
        } else {
            Self::Davis
        }
    }

    /// Size in bytes of one raw record.
    #[inline]
    pub fn record_size(&self) -> usize {
        match self {
            Self::Dvs128 => parser::DVS128_RECORD_SIZE,
            Self::Davis => parser::DAVIS_RECORD_SIZE,
            Self::Atis => parser::ATIS_RECORD_SIZE,
        }
    }

    /// Geometry that decoded events are bounded by.
    pub fn geometry(&self, header: &Header) -> Geometry {
        match self {
            Self::Dvs128 | Self::Davis => header.geometry(),
            Self::Atis => Geometry::ATIS,
        }
    }

    /// Decodes one raw record.
    ///
    /// `bytes` must hold at least [`Dialect::record_size`] bytes; extra bytes
    /// are ignored.
    #[inline]
    pub fn decode(&self, bytes: &[u8], header: &Header) -> Option<DvsEvent> {
        match self {
            Self::Dvs128 => decode_dvs128(bytes.get(..parser::DVS128_RECORD_SIZE)?.try_into().ok()?, header),
            Self::Davis => decode_davis(bytes.get(..parser::DAVIS_RECORD_SIZE)?.try_into().ok()?, header),
            Self::Atis => decode_atis(bytes.get(..parser::ATIS_RECORD_SIZE)?.try_into().ok()?),
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dvs128 => f.write_str("DVS128 (AEDAT 1.0)"),
            Self::Davis => f.write_str("DAVIS (AEDAT 2.0)"),
            Self::Atis => f.write_str("ATIS td/aps"),
        }
    }
}

/// Decodes a DVS128 record. Rows are flipped so that y grows upwards.
#[inline]
pub fn decode_dvs128(bytes: &[u8; parser::DVS128_RECORD_SIZE], header: &Header) -> Option<DvsEvent> {
    let y = header
        .height
        .checked_sub(1)?
        .checked_sub(parser::dvs128_get_row(bytes))?;
    Some(DvsEvent::new(
        parser::dvs128_get_x(bytes),
        y,
        parser::dvs128_get_polarity(bytes),
        parser::dvs128_get_timestamp(bytes) as u64,
    ))
}

/// Decodes an AEDAT 2.0 DAVIS record.
///
/// Only DVS records of major version 2 are supported. A zero timestamp marks
/// an unusable record and is discarded as well.
#[inline]
pub fn decode_davis(bytes: &[u8; parser::DAVIS_RECORD_SIZE], header: &Header) -> Option<DvsEvent> {
    if header.major_version != 2 || !parser::davis_is_dvs(bytes) {
        return None;
    }
    let timestamp = parser::davis_get_timestamp(bytes) as u64;
    if timestamp == 0 {
        return None;
    }
    Some(DvsEvent::new(
        parser::davis_get_x(bytes),
        parser::davis_get_y(bytes),
        parser::davis_get_polarity(bytes),
        timestamp,
    ))
}

/// Decodes a legacy ATIS td/aps record. The header plays no part here.
#[inline]
pub fn decode_atis(bytes: &[u8; parser::ATIS_RECORD_SIZE]) -> Option<DvsEvent> {
    let y = (Geometry::ATIS.height - 1).checked_sub(parser::atis_get_row(bytes))?;
    Some(DvsEvent::new(
        parser::atis_get_x(bytes),
        y,
        parser::atis_get_direction(bytes),
        parser::atis_get_timestamp(bytes) as u64,
    ))
}

/// Reads one full record into `buffer`.
///
/// Returns `Ok(false)` at end of input. A trailing partial record also ends
/// the input; its bytes are dropped.
pub(crate) fn read_record<R: Read>(reader: &mut R, buffer: &mut [u8]) -> Result<bool, DecodeError> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    if filled == buffer.len() {
        return Ok(true);
    }
    if filled > 0 {
        tracing::warn!(
            bytes = filled,
            record_size = buffer.len(),
            "dropping trailing partial record"
        );
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode_dvs128(event: &DvsEvent, header: &Header) -> [u8; 6] {
        let t = (event.timestamp as u32).to_le_bytes();
        let row = header.height - 1 - event.y;
        [
            t[0],
            t[1],
            t[2],
            t[3],
            ((event.x as u8) << 1) | event.polarity as u8,
            row as u8,
        ]
    }

    fn encode_davis(event: &DvsEvent) -> [u8; 8] {
        let t = (event.timestamp as u32).to_be_bytes();
        [
            (event.y >> 2) as u8 & 0b0111_1111,
            (((event.y & 0b11) as u8) << 6) | (event.x >> 4) as u8 & 0b0011_1111,
            (((event.x & 0b1111) as u8) << 4) | ((event.polarity as u8) << 3),
            0,
            t[0],
            t[1],
            t[2],
            t[3],
        ]
    }

    fn encode_atis(event: &DvsEvent) -> [u8; 8] {
        let t = (event.timestamp as u32).to_le_bytes();
        let row = 239 - event.y;
        [
            t[0],
            t[1],
            t[2],
            t[3],
            event.x as u8,
            ((row as u8 & 0b0111_1111) << 1) | (event.x >> 8) as u8,
            ((event.polarity as u8) << 1) | (row >> 7) as u8,
            0,
        ]
    }

    #[test]
    fn test_dialect_for_header() {
        let mut header = Header::DEFAULT;
        assert_eq!(Dialect::for_header(&header), Dialect::Davis);
        header.major_version = 1;
        assert_eq!(Dialect::for_header(&header), Dialect::Dvs128);
        header.major_version = 3;
        assert_eq!(Dialect::for_header(&header), Dialect::Davis);
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(Dialect::Dvs128.record_size(), 6);
        assert_eq!(Dialect::Davis.record_size(), 8);
        assert_eq!(Dialect::Atis.record_size(), 8);
    }

    #[test]
    fn test_dvs128_round_trip() {
        let header = Header {
            major_version: 1,
            minor_version: 0,
            width: 128,
            height: 128,
        };
        for event in [
            DvsEvent::new(0, 127, false, 0),
            DvsEvent::new(127, 64, true, 5_000),
            DvsEvent::new(42, 100, true, u32::MAX as u64),
        ] {
            let bytes = encode_dvs128(&event, &header);
            assert_eq!(Dialect::Dvs128.decode(&bytes, &header), Some(event));
        }
    }

    #[test]
    fn test_dvs128_row_flip_underflow() {
        // A 32-row header cannot flip row 40
        let header = Header {
            major_version: 1,
            minor_version: 0,
            width: 32,
            height: 32,
        };
        let bytes = [1, 0, 0, 0, 0, 40];
        assert_eq!(Dialect::Dvs128.decode(&bytes, &header), None);
    }

    #[test]
    fn test_davis_round_trip() {
        let header = Header::DEFAULT;
        for event in [
            DvsEvent::new(0, 0, false, 1),
            DvsEvent::new(239, 179, true, 123_456),
            DvsEvent::new(1023, 511, true, u32::MAX as u64),
        ] {
            let bytes = encode_davis(&event);
            assert_eq!(Dialect::Davis.decode(&bytes, &header), Some(event));
        }
    }

    #[test]
    fn test_davis_rejects_frame_records() {
        let header = Header::DEFAULT;
        let mut bytes = encode_davis(&DvsEvent::new(10, 10, true, 99));
        bytes[0] |= 0b1000_0000;
        assert_eq!(Dialect::Davis.decode(&bytes, &header), None);
    }

    #[test]
    fn test_davis_rejects_zero_timestamp() {
        let bytes = encode_davis(&DvsEvent::new(10, 10, true, 0));
        assert_eq!(Dialect::Davis.decode(&bytes, &Header::DEFAULT), None);
    }

    #[test]
    fn test_davis_requires_version_two() {
        let header = Header {
            major_version: 3,
            ..Header::DEFAULT
        };
        let bytes = encode_davis(&DvsEvent::new(10, 10, true, 99));
        assert_eq!(Dialect::Davis.decode(&bytes, &header), None);
    }

    #[test]
    fn test_atis_round_trip() {
        for event in [
            DvsEvent::new(0, 0, false, 0),
            DvsEvent::new(303, 239, true, 77),
            DvsEvent::new(256, 111, true, u32::MAX as u64),
        ] {
            let bytes = encode_atis(&event);
            // The header is irrelevant for this dialect
            assert_eq!(Dialect::Atis.decode(&bytes, &Header::DEFAULT), Some(event));
        }
    }

    #[test]
    fn test_atis_rejects_rows_beyond_sensor() {
        // row = 0b1_1111111 = 255
        let bytes = [1, 0, 0, 0, 0, 0b1111_1110, 0b1, 0];
        assert_eq!(Dialect::Atis.decode(&bytes, &Header::DEFAULT), None);
    }

    #[test]
    fn test_decode_short_slice() {
        assert_eq!(Dialect::Davis.decode(&[0; 4], &Header::DEFAULT), None);
    }

    #[test]
    fn test_read_record() {
        let mut reader = Cursor::new(vec![1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let mut buffer = [0u8; 4];
        assert!(read_record(&mut reader, &mut buffer).unwrap());
        assert_eq!(buffer, [1, 2, 3, 4]);
        assert!(read_record(&mut reader, &mut buffer).unwrap());
        assert_eq!(buffer, [5, 6, 7, 8]);
        // Two trailing bytes do not make a record
        assert!(!read_record(&mut reader, &mut buffer).unwrap());
        assert!(!read_record(&mut reader, &mut buffer).unwrap());
    }
}
