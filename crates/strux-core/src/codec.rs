//! Endian-aware encoding of fixed-width scalars.
//!
//! Multi-byte scalars go through the `zerocopy::byteorder` wrappers, which
//! are plain byte arrays with a typed view on top. The slice helpers
//! (`read_le_at` and friends) are for hand-written format code; the record
//! engine uses the cursor helpers.

use std::fmt;
use std::mem::size_of;

use zerocopy::byteorder::{
    BigEndian, LittleEndian, F32, F64, I128, I16, I32, I64, U128, U16, U32, U64,
};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::cursor::{ReadCursor, WriteCursor};
use crate::error::{MarshalError, Result};

/// Byte order of a field. Little-endian unless a schema says otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endian::Little => f.write_str("le"),
            Endian::Big => f.write_str("be"),
        }
    }
}

/// A fixed-width scalar with a byte-order-dependent representation.
pub trait Primitive: Copy + Sized {
    const WIDTH: usize;

    /// Decodes from exactly `WIDTH` bytes; `None` for any other length.
    fn decode(bytes: &[u8], endian: Endian) -> Option<Self>;

    /// Encodes into exactly `WIDTH` bytes; `false` for any other length.
    fn encode(self, endian: Endian, out: &mut [u8]) -> bool;
}

macro_rules! impl_byte_primitive {
    ($($ty:ty),*) => {$(
        impl Primitive for $ty {
            const WIDTH: usize = 1;

            fn decode(bytes: &[u8], _endian: Endian) -> Option<Self> {
                <$ty>::read_from(bytes)
            }

            fn encode(self, _endian: Endian, out: &mut [u8]) -> bool {
                self.write_to(out).is_some()
            }
        }
    )*};
}

macro_rules! impl_primitive {
    ($($ty:ty => $wrapper:ident),*) => {$(
        impl Primitive for $ty {
            const WIDTH: usize = size_of::<$ty>();

            fn decode(bytes: &[u8], endian: Endian) -> Option<Self> {
                match endian {
                    Endian::Little => $wrapper::<LittleEndian>::read_from(bytes).map(|v| v.get()),
                    Endian::Big => $wrapper::<BigEndian>::read_from(bytes).map(|v| v.get()),
                }
            }

            fn encode(self, endian: Endian, out: &mut [u8]) -> bool {
                match endian {
                    Endian::Little => $wrapper::<LittleEndian>::new(self).write_to(out).is_some(),
                    Endian::Big => $wrapper::<BigEndian>::new(self).write_to(out).is_some(),
                }
            }
        }
    )*};
}

impl_byte_primitive!(u8, i8);

impl_primitive!(
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    u128 => U128,
    i128 => I128,
    f32 => F32,
    f64 => F64
);

fn decode_at<T: Primitive>(data: &[u8], offset: usize, endian: Endian) -> Result<T> {
    let available = data.len().saturating_sub(offset);
    let bytes = data
        .get(offset..offset.saturating_add(T::WIDTH))
        .ok_or(MarshalError::UnexpectedEndOfData {
            offset: offset as u64,
            needed: T::WIDTH as u64,
            available: available as u64,
        })?;
    T::decode(bytes, endian).ok_or(MarshalError::UnexpectedEndOfData {
        offset: offset as u64,
        needed: T::WIDTH as u64,
        available: available as u64,
    })
}

fn encode_at<T: Primitive>(data: &mut [u8], offset: usize, endian: Endian, value: T) -> Result<()> {
    let capacity = MarshalError::WriteCapacity {
        offset: offset as u64,
        needed: T::WIDTH as u64,
    };
    match data.get_mut(offset..offset.saturating_add(T::WIDTH)) {
        Some(out) => {
            if value.encode(endian, out) {
                Ok(())
            } else {
                Err(capacity)
            }
        }
        None => Err(capacity),
    }
}

/// Reads a little-endian `T` from the start of `data`.
pub fn read_le<T: Primitive>(data: &[u8]) -> Result<T> {
    decode_at(data, 0, Endian::Little)
}

/// Reads a big-endian `T` from the start of `data`.
pub fn read_be<T: Primitive>(data: &[u8]) -> Result<T> {
    decode_at(data, 0, Endian::Big)
}

/// Reads a little-endian `T` at `*offset` and advances the offset past it.
pub fn read_le_at<T: Primitive>(data: &[u8], offset: &mut usize) -> Result<T> {
    let value = decode_at(data, *offset, Endian::Little)?;
    *offset += T::WIDTH;
    Ok(value)
}

/// Reads a big-endian `T` at `*offset` and advances the offset past it.
pub fn read_be_at<T: Primitive>(data: &[u8], offset: &mut usize) -> Result<T> {
    let value = decode_at(data, *offset, Endian::Big)?;
    *offset += T::WIDTH;
    Ok(value)
}

pub fn write_le_at<T: Primitive>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    encode_at(data, *offset, Endian::Little, value)?;
    *offset += T::WIDTH;
    Ok(())
}

pub fn write_be_at<T: Primitive>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    encode_at(data, *offset, Endian::Big, value)?;
    *offset += T::WIDTH;
    Ok(())
}

/// Reads one scalar from the cursor.
pub fn read_scalar<T: Primitive, C: ReadCursor + ?Sized>(
    cursor: &mut C,
    endian: Endian,
) -> Result<T> {
    let mut buf = [0u8; 16];
    let bytes = &mut buf[..T::WIDTH];
    cursor.read_exact(bytes)?;
    T::decode(bytes, endian).ok_or_else(|| {
        MarshalError::InvalidValue(format!("cannot decode a {}-byte scalar", T::WIDTH))
    })
}

/// Writes one scalar to the cursor. A full destination is a `WriteCapacity`
/// error, so `write_scalar(..).is_ok()` doubles as a capacity check.
pub fn write_scalar<T: Primitive, C: WriteCursor + ?Sized>(
    cursor: &mut C,
    endian: Endian,
    value: T,
) -> Result<()> {
    let mut buf = [0u8; 16];
    let bytes = &mut buf[..T::WIDTH];
    if !value.encode(endian, bytes) {
        return Err(MarshalError::InvalidValue(format!(
            "cannot encode a {}-byte scalar",
            T::WIDTH
        )));
    }
    cursor.write_all(bytes)
}

/// Like [`write_scalar`], but a full destination is `Ok(false)` instead of
/// an error.
pub fn try_write_scalar<T: Primitive, C: WriteCursor + ?Sized>(
    cursor: &mut C,
    endian: Endian,
    value: T,
) -> Result<bool> {
    match write_scalar(cursor, endian, value) {
        Ok(()) => Ok(true),
        Err(e) if e.is_write_capacity() => Ok(false),
        Err(e) => Err(e),
    }
}

macro_rules! raw_guid {
    ($name:ident, $order:ty) => {
        #[repr(C)]
        #[derive(Debug, Clone, Copy, FromZeroes, FromBytes, AsBytes)]
        struct $name {
            data1: U32<$order>,
            data2: U16<$order>,
            data3: U16<$order>,
            data4: [u8; 8],
        }
    };
}

raw_guid!(RawGuidLe, LittleEndian);
raw_guid!(RawGuidBe, BigEndian);

/// A 128-bit identifier in the Windows `GUID` layout: three integer groups
/// in the field's byte order followed by eight raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Guid {
    pub const WIDTH: usize = 16;

    pub const NIL: Guid = Guid {
        data1: 0,
        data2: 0,
        data3: 0,
        data4: [0; 8],
    };

    pub fn decode(bytes: &[u8], endian: Endian) -> Option<Self> {
        match endian {
            Endian::Little => RawGuidLe::read_from(bytes).map(|raw| Guid {
                data1: raw.data1.get(),
                data2: raw.data2.get(),
                data3: raw.data3.get(),
                data4: raw.data4,
            }),
            Endian::Big => RawGuidBe::read_from(bytes).map(|raw| Guid {
                data1: raw.data1.get(),
                data2: raw.data2.get(),
                data3: raw.data3.get(),
                data4: raw.data4,
            }),
        }
    }

    pub fn to_bytes(&self, endian: Endian) -> [u8; 16] {
        let mut out = [0u8; 16];
        match endian {
            Endian::Little => out.copy_from_slice(
                RawGuidLe {
                    data1: U32::new(self.data1),
                    data2: U16::new(self.data2),
                    data3: U16::new(self.data3),
                    data4: self.data4,
                }
                .as_bytes(),
            ),
            Endian::Big => out.copy_from_slice(
                RawGuidBe {
                    data1: U32::new(self.data1),
                    data2: U16::new(self.data2),
                    data3: U16::new(self.data3),
                    data4: self.data4,
                }
                .as_bytes(),
            ),
        }
        out
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

pub fn read_guid<C: ReadCursor + ?Sized>(cursor: &mut C, endian: Endian) -> Result<Guid> {
    let mut buf = [0u8; Guid::WIDTH];
    cursor.read_exact(&mut buf)?;
    Guid::decode(&buf, endian)
        .ok_or_else(|| MarshalError::InvalidValue("cannot decode a guid".to_string()))
}

pub fn write_guid<C: WriteCursor + ?Sized>(
    cursor: &mut C,
    endian: Endian,
    value: &Guid,
) -> Result<()> {
    cursor.write_all(&value.to_bytes(endian))
}
