//! Comment headers of AEDAT and legacy `.dat` files.
//!
//! AEDAT files start with lines introduced by `#`; ATIS td/aps dumps start
//! with lines introduced by `%` followed by a two-byte preamble. Both are read
//! by peeking at the buffered reader so that the first raw record is never
//! consumed.

use crate::types::Header;
use std::io::{self, BufRead, ErrorKind, Read, Seek, SeekFrom};

/// Comment marker of AEDAT headers.
pub const AEDAT_COMMENT_MARKER: u8 = b'#';

/// Comment marker of legacy ATIS `.dat` headers.
pub const DAT_COMMENT_MARKER: u8 = b'%';

/// Character offsets of the version digits in a `!AER-DATM.N` token.
const MAJOR_VERSION_OFFSET: usize = 8;
const MINOR_VERSION_OFFSET: usize = 10;

/// Geometry implied by the known hardware keywords.
const KEYWORD_WIDTH: u16 = 240;
const KEYWORD_HEIGHT: u16 = 180;

/// Event type and event size bytes following a `.dat` comment block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatPreamble {
    pub event_type: u8,
    pub event_size: u8,
}

/// Reads the AEDAT comment header.
///
/// Never fails on malformed content: if there is no comment line, or any
/// comment line holds a byte that is neither printable nor whitespace, the
/// reader is rewound to where it started and [`Header::DEFAULT`] is returned.
/// Either way the reader is left at the first raw record.
pub fn read_header<R: BufRead + Seek>(reader: &mut R) -> io::Result<Header> {
    let start = reader.stream_position()?;
    let lines = read_comment_lines(reader, AEDAT_COMMENT_MARKER)?;

    if lines.is_empty() || !lines.iter().all(|line| line.iter().copied().all(is_header_byte)) {
        tracing::debug!(
            comment_lines = lines.len(),
            "no usable AEDAT header, rewinding and using default"
        );
        reader.seek(SeekFrom::Start(start))?;
        return Ok(Header::DEFAULT);
    }

    let header = parse_header_lines(&lines);
    tracing::debug!(
        major = header.major_version,
        minor = header.minor_version,
        width = header.width,
        height = header.height,
        "parsed AEDAT header"
    );
    Ok(header)
}

/// Extracts version and geometry from comment lines (markers stripped).
///
/// Falls back to [`Header::DEFAULT`] unless a major version of at least 2 and
/// a non-empty geometry were found.
pub fn parse_header_lines<L: AsRef<[u8]>>(lines: &[L]) -> Header {
    let mut header = Header {
        major_version: 0,
        minor_version: 0,
        width: 0,
        height: 0,
    };

    for line in lines {
        for token in tokens(line.as_ref()) {
            if token.first() == Some(&b'!') {
                if let Some((major, minor)) = parse_version_token(token) {
                    header.major_version = major;
                    header.minor_version = minor;
                }
            } else if token == b"HardwareInterface:" || token == b"AEChip:" {
                header.width = KEYWORD_WIDTH;
                header.height = KEYWORD_HEIGHT;
            }
        }
    }

    if header.major_version >= 2 && header.width > 0 && header.height > 0 {
        header
    } else {
        Header::DEFAULT
    }
}

/// Skips the `%` comment block of a legacy `.dat` file.
///
/// When at least one comment line was present, the two preamble bytes that
/// follow it are consumed and returned. A file without comment lines is left
/// untouched: its first byte already belongs to a record.
pub fn skip_dat_header<R: BufRead>(reader: &mut R) -> io::Result<Option<DatPreamble>> {
    let lines = read_comment_lines(reader, DAT_COMMENT_MARKER)?;
    if lines.is_empty() {
        return Ok(None);
    }

    let mut preamble = [0u8; 2];
    match reader.read_exact(&mut preamble) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let preamble = DatPreamble {
        event_type: preamble[0],
        event_size: preamble[1],
    };
    tracing::debug!(
        comment_lines = lines.len(),
        event_type = preamble.event_type,
        event_size = preamble.event_size,
        "skipped dat header"
    );
    Ok(Some(preamble))
}

/// Consumes consecutive lines starting with `marker`, returning their
/// contents without the marker and the line feed.
fn read_comment_lines<R: BufRead>(reader: &mut R, marker: u8) -> io::Result<Vec<Vec<u8>>> {
    let mut lines = Vec::new();
    loop {
        let bytes_peeked = reader.fill_buf()?;
        if bytes_peeked.first() != Some(&marker) {
            break;
        }
        reader.consume(1);

        let mut line = Vec::new();
        reader.read_until(b'\n', &mut line)?;
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        lines.push(line);
    }
    Ok(lines)
}

/// Parses the major and minor digits of a `!AER-DATM.N` token.
fn parse_version_token(token: &[u8]) -> Option<(u8, u8)> {
    let major = *token.get(MAJOR_VERSION_OFFSET)?;
    let minor = *token.get(MINOR_VERSION_OFFSET)?;
    if major.is_ascii_digit() && minor.is_ascii_digit() {
        Some((major - b'0', minor - b'0'))
    } else {
        None
    }
}

fn tokens(line: &[u8]) -> impl Iterator<Item = &[u8]> {
    line.split(|&b| is_space(b)).filter(|token| !token.is_empty())
}

/// Whitespace as understood by the C locale (includes vertical tab).
#[inline]
fn is_space(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | 0x0b | 0x0c | b'\r')
}

#[inline]
fn is_header_byte(byte: u8) -> bool {
    byte.is_ascii_graphic() || is_space(byte)
}
