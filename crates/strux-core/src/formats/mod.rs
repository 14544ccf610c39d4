//! Readers for on-disk formats, declared as records.

pub mod cab;
pub mod iso9660;

use std::fmt;
use std::io::{Read, Seek, SeekFrom};

use thiserror::Error;

use crate::error::MarshalError;

#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Marshal Error: {0}")]
    Marshal(#[from] MarshalError),
    #[error("Invalid {format}: signature mismatch")]
    BadSignature { format: &'static str },
    #[error("Invalid {format}: {reason}")]
    Malformed {
        format: &'static str,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormatKind {
    Cabinet,
    Iso9660,
}

impl FormatKind {
    pub fn name(self) -> &'static str {
        match self {
            FormatKind::Cabinet => "cabinet",
            FormatKind::Iso9660 => "iso9660",
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies a stream by its signature. The stream position is restored.
pub fn detect_format<S: Read + Seek>(stream: &mut S) -> Result<Option<FormatKind>, FormatError> {
    let start = stream.stream_position()?;
    let detected = probe(stream, start);
    stream.seek(SeekFrom::Start(start))?;
    detected
}

fn probe<S: Read + Seek>(stream: &mut S, start: u64) -> Result<Option<FormatKind>, FormatError> {
    if signature_at(stream, start, &cab::CAB_SIGNATURE)? {
        return Ok(Some(FormatKind::Cabinet));
    }
    let descriptor = start + iso9660::DESCRIPTOR_START * iso9660::SECTOR_SIZE + 1;
    if signature_at(stream, descriptor, iso9660::STANDARD_IDENTIFIER.as_bytes())? {
        return Ok(Some(FormatKind::Iso9660));
    }
    Ok(None)
}

fn signature_at<S: Read + Seek>(
    stream: &mut S,
    offset: u64,
    signature: &[u8],
) -> Result<bool, FormatError> {
    stream.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; signature.len()];
    match stream.read_exact(&mut buf) {
        Ok(()) => Ok(buf == signature),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e.into()),
    }
}
