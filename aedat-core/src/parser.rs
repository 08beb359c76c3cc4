#![allow(clippy::unusual_byte_groupings)]
//! Low-level field extraction from raw legacy records.
//!
//! Each dialect packs timestamp, address and polarity differently. The
//! functions below only pick bits out of a record; flipping rows and
//! validating addresses is left to the decoder.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Size in bytes of a DVS128 (AEDAT 1.0) record.
pub const DVS128_RECORD_SIZE: usize = 6;

/// Size in bytes of an AEDAT 2.0 DAVIS record.
pub const DAVIS_RECORD_SIZE: usize = 8;

/// Size in bytes of a legacy ATIS td/aps record.
pub const ATIS_RECORD_SIZE: usize = 8;

// ============================================================================
// DVS128 (6 bytes)
// Bytes: [0..4] timestamp (LE) | [4] x:7 pol:1 | [5] unused:2 row:6
// ============================================================================

/// Extracts the timestamp from a DVS128 record.
#[inline]
pub fn dvs128_get_timestamp(bytes: &[u8; DVS128_RECORD_SIZE]) -> u32 {
    LittleEndian::read_u32(&bytes[0..4])
}

/// Extracts the X coordinate from a DVS128 record.
#[inline]
pub fn dvs128_get_x(bytes: &[u8; DVS128_RECORD_SIZE]) -> u16 {
    (bytes[4] >> 1) as u16 // bits 7:1
}

/// Extracts the unflipped row (counted from the top) from a DVS128 record.
#[inline]
pub fn dvs128_get_row(bytes: &[u8; DVS128_RECORD_SIZE]) -> u16 {
    (bytes[5] & 0b0011_1111) as u16 // bits 5:0
}

/// Extracts the polarity from a DVS128 record.
#[inline]
pub fn dvs128_get_polarity(bytes: &[u8; DVS128_RECORD_SIZE]) -> bool {
    bytes[4] & 0b1 == 0b1
}

// ============================================================================
// DAVIS (AEDAT 2.0, 8 bytes)
// Bytes: [0] kind:1 y_high:7 | [1] y_low:2 x_high:6 | [2] x_low:4 pol:1 unused:3
//        [3] unused | [4..8] timestamp (BE)
// ============================================================================

/// Returns true if the record is a DVS event rather than a frame or IMU sample.
#[inline]
pub fn davis_is_dvs(bytes: &[u8; DAVIS_RECORD_SIZE]) -> bool {
    bytes[0] & 0b1000_0000 == 0
}

/// Extracts the timestamp from a DAVIS record.
#[inline]
pub fn davis_get_timestamp(bytes: &[u8; DAVIS_RECORD_SIZE]) -> u32 {
    BigEndian::read_u32(&bytes[4..8])
}

/// Extracts the X coordinate from a DAVIS record.
#[inline]
pub fn davis_get_x(bytes: &[u8; DAVIS_RECORD_SIZE]) -> u16 {
    (((bytes[1] & 0b0011_1111) as u16) << 4) | (bytes[2] >> 4) as u16
}

/// Extracts the Y coordinate from a DAVIS record.
#[inline]
pub fn davis_get_y(bytes: &[u8; DAVIS_RECORD_SIZE]) -> u16 {
    (((bytes[0] & 0b0111_1111) as u16) << 2) | (bytes[1] >> 6) as u16
}

/// Extracts the polarity from a DAVIS record.
#[inline]
pub fn davis_get_polarity(bytes: &[u8; DAVIS_RECORD_SIZE]) -> bool {
    bytes[2] & 0b1000 == 0b1000
}

// ============================================================================
// ATIS td/aps (8 bytes)
// Bytes: [0..4] timestamp (LE) | [4] x_low:8 | [5] row_low:7 x_high:1
//        [6] unused:6 direction:1 row_high:1 | [7] unused
// ============================================================================

/// Extracts the timestamp from an ATIS record.
#[inline]
pub fn atis_get_timestamp(bytes: &[u8; ATIS_RECORD_SIZE]) -> u32 {
    LittleEndian::read_u32(&bytes[0..4])
}

/// Extracts the X coordinate from an ATIS record.
#[inline]
pub fn atis_get_x(bytes: &[u8; ATIS_RECORD_SIZE]) -> u16 {
    (((bytes[5] & 0b1) as u16) << 8) | bytes[4] as u16
}

/// Extracts the unflipped row (counted from the top) from an ATIS record.
#[inline]
pub fn atis_get_row(bytes: &[u8; ATIS_RECORD_SIZE]) -> u16 {
    (((bytes[6] & 0b1) as u16) << 7) | (bytes[5] >> 1) as u16
}

/// Extracts the polarity / threshold direction bit from an ATIS record.
#[inline]
pub fn atis_get_direction(bytes: &[u8; ATIS_RECORD_SIZE]) -> bool {
    bytes[6] & 0b10 == 0b10
}
