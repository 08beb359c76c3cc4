//! Core types for legacy event camera recordings.
//!
//! This module defines the decoded event structures, the file header and the
//! sensor geometry shared by every dialect.

/// A decoded polarity event from a single channel.
///
/// For the legacy ATIS dialect the `polarity` field carries the raw
/// direction bit of the record, whatever channel it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DvsEvent {
    /// X coordinate of the pixel
    pub x: u16,
    /// Y coordinate of the pixel, origin at the bottom row
    pub y: u16,
    /// Event polarity: false = OFF (decrease), true = ON (increase in brightness)
    pub polarity: bool,
    /// Timestamp in microseconds
    pub timestamp: u64,
}

impl DvsEvent {
    /// Creates a new polarity event.
    #[inline]
    pub fn new(x: u16, y: u16, polarity: bool, timestamp: u64) -> Self {
        Self {
            x,
            y,
            polarity,
            timestamp,
        }
    }
}

/// An event as handed to an output sink.
///
/// Change detection events have `is_threshold_crossing == false`. Events from
/// the aps channel of a td/aps pair are threshold crossings; their `polarity`
/// is the raw direction bit, passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtisEvent {
    pub x: u16,
    pub y: u16,
    pub timestamp: u64,
    pub is_threshold_crossing: bool,
    pub polarity: bool,
}

impl AtisEvent {
    #[inline]
    pub fn change_detection(event: DvsEvent) -> Self {
        Self {
            x: event.x,
            y: event.y,
            timestamp: event.timestamp,
            is_threshold_crossing: false,
            polarity: event.polarity,
        }
    }

    #[inline]
    pub fn threshold_crossing(event: DvsEvent) -> Self {
        Self {
            is_threshold_crossing: true,
            ..Self::change_detection(event)
        }
    }
}

impl From<DvsEvent> for AtisEvent {
    fn from(event: DvsEvent) -> Self {
        Self::change_detection(event)
    }
}

/// Sensor geometry in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub width: u16,
    pub height: u16,
}

impl Geometry {
    /// Fixed geometry of the ATIS sensor behind legacy td/aps files.
    pub const ATIS: Self = Self {
        width: 304,
        height: 240,
    };

    #[inline]
    pub const fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Returns true if the pixel lies inside `[0, width) x [0, height)`.
    #[inline]
    pub fn contains(&self, x: u16, y: u16) -> bool {
        x < self.width && y < self.height
    }

    /// Number of pixels on the sensor.
    #[inline]
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Information recovered from an AEDAT comment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub major_version: u8,
    pub minor_version: u8,
    pub width: u16,
    pub height: u16,
}

impl Header {
    /// Header used whenever the comment block is missing or unusable
    /// (AEDAT 2.0 from a 240x180 DAVIS sensor).
    pub const DEFAULT: Self = Self {
        major_version: 2,
        minor_version: 0,
        width: 240,
        height: 180,
    };

    #[inline]
    pub fn geometry(&self) -> Geometry {
        Geometry::new(self.width, self.height)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// The two channels of a legacy ATIS recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Temporal difference (change detection) events
    Td,
    /// Exposure measurement (threshold crossing) events
    Aps,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Td => "td",
            Self::Aps => "aps",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
