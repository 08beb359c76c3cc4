//! Output sinks for ordered events.
//!
//! The canonical event stream encoding lives outside this crate; the sinks
//! here are the local stand-ins: a CSV writer for inspection and a compact
//! binary writer. Both receive events one at a time, already ordered.

use crate::types::{AtisEvent, Geometry};
use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during output writing.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported output format: {0}. Use .es, .bin or .csv")]
    UnsupportedFormat(String),
}

/// Receiver of ordered events.
pub trait EventSink {
    fn write_event(&mut self, event: &AtisEvent) -> Result<(), OutputError>;

    /// Flushes buffered data. Must be called once after the last event.
    fn finish(&mut self) -> Result<(), OutputError>;
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn write_event(&mut self, event: &AtisEvent) -> Result<(), OutputError> {
        (**self).write_event(event)
    }

    fn finish(&mut self) -> Result<(), OutputError> {
        (**self).finish()
    }
}

/// Output encodings, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// `.es` or `.bin`
    Binary,
    /// `.csv`
    Csv,
}

impl OutputFormat {
    pub fn from_path(path: &Path) -> Result<Self, OutputError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();
        match extension.as_str() {
            "es" | "bin" => Ok(Self::Binary),
            "csv" => Ok(Self::Csv),
            _ => Err(OutputError::UnsupportedFormat(format!(".{}", extension))),
        }
    }
}

/// CSV output writer.
///
/// Starts with a `%geometry:W,H` line and a column header, then one
/// `t,x,y,is_threshold_crossing,polarity` line per event.
pub struct CsvWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(writer: W, geometry: Geometry) -> Result<Self, OutputError> {
        let mut writer = BufWriter::new(writer);
        writeln!(writer, "%geometry:{},{}", geometry.width, geometry.height)?;
        writeln!(writer, "t,x,y,is_threshold_crossing,polarity")?;
        Ok(Self { writer })
    }
}

impl<W: Write> EventSink for CsvWriter<W> {
    #[inline]
    fn write_event(&mut self, event: &AtisEvent) -> Result<(), OutputError> {
        writeln!(
            self.writer,
            "{},{},{},{},{}",
            event.timestamp,
            event.x,
            event.y,
            event.is_threshold_crossing as u8,
            event.polarity as u8
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Magic bytes opening a binary output file.
pub const BINARY_MAGIC: &[u8; 8] = b"AEDATES\0";

/// Version of the binary layout.
pub const BINARY_VERSION: u32 = 1;

/// Offset of the event count within the binary header.
const EVENT_COUNT_OFFSET: u64 = 16;

/// Binary output writer.
///
/// Header (24 bytes, little-endian):
/// - magic: 8 bytes
/// - version: u32
/// - width: u16
/// - height: u16
/// - event count: u64, patched by [`EventSink::finish`]
///
/// Each event takes 16 bytes:
/// - timestamp: u64
/// - x: u16
/// - y: u16
/// - flags: u8 (bit 0 polarity, bit 1 threshold crossing)
/// - padding: 3 bytes
pub struct BinaryWriter<W: Write + Seek> {
    writer: BufWriter<W>,
    event_count: u64,
}

impl<W: Write + Seek> BinaryWriter<W> {
    pub fn new(writer: W, geometry: Geometry) -> Result<Self, OutputError> {
        let mut writer = BufWriter::new(writer);
        writer.write_all(BINARY_MAGIC)?;
        writer.write_all(&BINARY_VERSION.to_le_bytes())?;
        writer.write_all(&geometry.width.to_le_bytes())?;
        writer.write_all(&geometry.height.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;
        Ok(Self {
            writer,
            event_count: 0,
        })
    }

    pub fn event_count(&self) -> u64 {
        self.event_count
    }
}

impl<W: Write + Seek> EventSink for BinaryWriter<W> {
    #[inline]
    fn write_event(&mut self, event: &AtisEvent) -> Result<(), OutputError> {
        let flags = event.polarity as u8 | ((event.is_threshold_crossing as u8) << 1);
        self.writer.write_all(&event.timestamp.to_le_bytes())?;
        self.writer.write_all(&event.x.to_le_bytes())?;
        self.writer.write_all(&event.y.to_le_bytes())?;
        self.writer.write_all(&[flags, 0, 0, 0])?;
        self.event_count += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), OutputError> {
        let end = self.writer.stream_position()?;
        self.writer.seek(SeekFrom::Start(EVENT_COUNT_OFFSET))?;
        self.writer.write_all(&self.event_count.to_le_bytes())?;
        self.writer.seek(SeekFrom::Start(end))?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Creates the output file and a sink of the requested format.
pub fn create_sink<P: AsRef<Path>>(
    path: P,
    format: OutputFormat,
    geometry: Geometry,
) -> Result<Box<dyn EventSink>, OutputError> {
    let file = File::create(path)?;
    Ok(match format {
        OutputFormat::Binary => Box::new(BinaryWriter::new(file, geometry)?),
        OutputFormat::Csv => Box::new(CsvWriter::new(file, geometry)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn events() -> [AtisEvent; 2] {
        [
            AtisEvent {
                x: 100,
                y: 200,
                timestamp: 12345,
                is_threshold_crossing: false,
                polarity: true,
            },
            AtisEvent {
                x: 101,
                y: 201,
                timestamp: 12346,
                is_threshold_crossing: true,
                polarity: false,
            },
        ]
    }

    #[test]
    fn test_output_format_from_path() {
        assert_eq!(OutputFormat::from_path(Path::new("out.es")).unwrap(), OutputFormat::Binary);
        assert_eq!(OutputFormat::from_path(Path::new("out.BIN")).unwrap(), OutputFormat::Binary);
        assert_eq!(OutputFormat::from_path(Path::new("out.csv")).unwrap(), OutputFormat::Csv);
        assert!(OutputFormat::from_path(Path::new("out.txt")).is_err());
        assert!(OutputFormat::from_path(Path::new("out")).is_err());
    }

    #[test]
    fn test_csv_writer() {
        let mut output = Vec::new();
        {
            let mut writer = CsvWriter::new(&mut output, Geometry::new(304, 240)).unwrap();
            for event in &events() {
                writer.write_event(event).unwrap();
            }
            writer.finish().unwrap();
        }

        let output_str = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = output_str.lines().collect();
        assert_eq!(
            lines,
            vec![
                "%geometry:304,240",
                "t,x,y,is_threshold_crossing,polarity",
                "12345,100,200,0,1",
                "12346,101,201,1,0",
            ]
        );
    }

    #[test]
    fn test_binary_writer() {
        let mut output = Cursor::new(Vec::new());
        {
            let mut writer = BinaryWriter::new(&mut output, Geometry::new(240, 180)).unwrap();
            for event in &events() {
                writer.write_event(event).unwrap();
            }
            writer.finish().unwrap();
            assert_eq!(writer.event_count(), 2);
        }

        let data = output.into_inner();
        assert_eq!(data.len(), 24 + 2 * 16);
        assert_eq!(&data[0..8], BINARY_MAGIC);
        assert_eq!(u32::from_le_bytes(data[8..12].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes([data[12], data[13]]), 240);
        assert_eq!(u16::from_le_bytes([data[14], data[15]]), 180);
        assert_eq!(u64::from_le_bytes(data[16..24].try_into().unwrap()), 2);

        let first = &data[24..40];
        assert_eq!(u64::from_le_bytes(first[0..8].try_into().unwrap()), 12345);
        assert_eq!(u16::from_le_bytes([first[8], first[9]]), 100);
        assert_eq!(u16::from_le_bytes([first[10], first[11]]), 200);
        assert_eq!(first[12], 0b01);
        assert_eq!(data[24 + 16 + 12], 0b10);
    }
}
