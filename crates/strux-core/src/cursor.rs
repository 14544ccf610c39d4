//! Position-tracking views over byte buffers and streams.
//!
//! The record engine only ever talks to a [`ReadCursor`] or [`WriteCursor`].
//! Positions are absolute: for a stream they are stream offsets, for a
//! buffer they are indices into it. Any cursor can be repositioned, which is
//! what explicit (union) layouts need.

use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use crate::error::{MarshalError, Result};

pub trait Cursor {
    fn position(&self) -> u64;

    fn set_position(&mut self, position: u64) -> Result<()>;

    /// Bytes left before the end of the source, `None` when the source
    /// cannot tell (streams).
    fn remaining(&self) -> Option<u64>;
}

pub trait ReadCursor: Cursor {
    /// Fills `buf` completely or fails with `UnexpectedEndOfData`.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;

    fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        // refuse to allocate for lengths the source cannot satisfy
        if let Some(available) = self.remaining() {
            if available < len as u64 {
                return Err(MarshalError::UnexpectedEndOfData {
                    offset: self.position(),
                    needed: len as u64,
                    available,
                });
            }
        }
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

pub trait WriteCursor: Cursor {
    /// Writes all of `bytes` or fails with `WriteCapacity`.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    fn write_zeros(&mut self, len: usize) -> Result<()> {
        const ZEROS: [u8; 64] = [0; 64];
        let mut left = len;
        while left > 0 {
            let chunk = left.min(ZEROS.len());
            self.write_all(&ZEROS[..chunk])?;
            left -= chunk;
        }
        Ok(())
    }
}

impl<C: Cursor + ?Sized> Cursor for &mut C {
    fn position(&self) -> u64 {
        (**self).position()
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        (**self).set_position(position)
    }

    fn remaining(&self) -> Option<u64> {
        (**self).remaining()
    }
}

impl<C: ReadCursor + ?Sized> ReadCursor for &mut C {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read_exact(buf)
    }
}

impl<C: WriteCursor + ?Sized> WriteCursor for &mut C {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write_all(bytes)
    }
}

fn read_from_slice(data: &[u8], pos: &mut u64, buf: &mut [u8]) -> Result<()> {
    let available = (data.len() as u64).saturating_sub(*pos);
    if available < buf.len() as u64 {
        return Err(MarshalError::UnexpectedEndOfData {
            offset: *pos,
            needed: buf.len() as u64,
            available,
        });
    }
    let start = *pos as usize;
    buf.copy_from_slice(&data[start..start + buf.len()]);
    *pos += buf.len() as u64;
    Ok(())
}

/// Read-only cursor over a borrowed buffer.
#[derive(Debug, Clone)]
pub struct SliceCursor<'a> {
    data: &'a [u8],
    pos: u64,
}

impl<'a> SliceCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a [u8], position: usize) -> Self {
        Self {
            data,
            pos: position as u64,
        }
    }

    pub fn get_ref(&self) -> &'a [u8] {
        self.data
    }
}

impl Cursor for SliceCursor<'_> {
    fn position(&self) -> u64 {
        self.pos
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.pos = position;
        Ok(())
    }

    fn remaining(&self) -> Option<u64> {
        Some((self.data.len() as u64).saturating_sub(self.pos))
    }
}

impl ReadCursor for SliceCursor<'_> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        read_from_slice(self.data, &mut self.pos, buf)
    }
}

/// Cursor over a fixed-capacity mutable buffer.
///
/// Writes past the end of the buffer fail; nothing is written in that case.
#[derive(Debug)]
pub struct SliceCursorMut<'a> {
    data: &'a mut [u8],
    pos: u64,
}

impl<'a> SliceCursorMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn at(data: &'a mut [u8], position: usize) -> Self {
        Self {
            data,
            pos: position as u64,
        }
    }
}

impl Cursor for SliceCursorMut<'_> {
    fn position(&self) -> u64 {
        self.pos
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.pos = position;
        Ok(())
    }

    fn remaining(&self) -> Option<u64> {
        Some((self.data.len() as u64).saturating_sub(self.pos))
    }
}

impl ReadCursor for SliceCursorMut<'_> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        read_from_slice(self.data, &mut self.pos, buf)
    }
}

impl WriteCursor for SliceCursorMut<'_> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let available = (self.data.len() as u64).saturating_sub(self.pos);
        if available < bytes.len() as u64 {
            return Err(MarshalError::WriteCapacity {
                offset: self.pos,
                needed: bytes.len() as u64,
            });
        }
        let start = self.pos as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len() as u64;
        Ok(())
    }
}

/// Growable in-memory cursor. Writing past the end zero-fills the gap.
#[derive(Debug, Clone, Default)]
pub struct VecCursor {
    data: Vec<u8>,
    pos: u64,
}

impl VecCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Cursor for VecCursor {
    fn position(&self) -> u64 {
        self.pos
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        self.pos = position;
        Ok(())
    }

    fn remaining(&self) -> Option<u64> {
        Some((self.data.len() as u64).saturating_sub(self.pos))
    }
}

impl ReadCursor for VecCursor {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        read_from_slice(&self.data, &mut self.pos, buf)
    }
}

impl WriteCursor for VecCursor {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let start = usize::try_from(self.pos).map_err(|_| MarshalError::WriteCapacity {
            offset: self.pos,
            needed: bytes.len() as u64,
        })?;
        let end = start + bytes.len();
        if self.data.len() < end {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(bytes);
        self.pos = end as u64;
        Ok(())
    }
}

/// Cursor over a seekable stream (a file, an `io::Cursor`, ...).
///
/// Reading requires `S: Read + Seek`, writing `S: Write + Seek`.
#[derive(Debug)]
pub struct StreamCursor<S> {
    inner: S,
    pos: u64,
}

impl<S: Seek> StreamCursor<S> {
    /// Wraps `inner`, starting at its current stream position.
    pub fn new(mut inner: S) -> Result<Self> {
        let pos = inner.stream_position()?;
        Ok(Self { inner, pos })
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Takes the position from the stream after an I/O error that may have
    /// moved it by a partial transfer.
    fn resync(&mut self) {
        if let Ok(pos) = self.inner.stream_position() {
            self.pos = pos;
        }
    }
}

impl<S: Seek> Cursor for StreamCursor<S> {
    fn position(&self) -> u64 {
        self.pos
    }

    fn set_position(&mut self, position: u64) -> Result<()> {
        if position != self.pos {
            self.pos = self.inner.seek(SeekFrom::Start(position))?;
        }
        Ok(())
    }

    fn remaining(&self) -> Option<u64> {
        None
    }
}

impl<S: Read + Seek> ReadCursor for StreamCursor<S> {
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    let offset = self.pos;
                    self.pos += filled as u64;
                    return Err(MarshalError::UnexpectedEndOfData {
                        offset,
                        needed: buf.len() as u64,
                        available: filled as u64,
                    });
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.resync();
                    return Err(e.into());
                }
            }
        }
        self.pos += filled as u64;
        Ok(())
    }
}

impl<S: Write + Seek> WriteCursor for StreamCursor<S> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match self.inner.write_all(bytes) {
            Ok(()) => {
                self.pos += bytes.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::WriteZero => {
                let offset = self.pos;
                self.resync();
                Err(MarshalError::WriteCapacity {
                    offset,
                    needed: bytes.len() as u64,
                })
            }
            Err(e) => {
                self.resync();
                Err(e.into())
            }
        }
    }
}
