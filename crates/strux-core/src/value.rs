//! The dynamic form of a record: what the engine reads into and writes from.
//!
//! Typed records convert to and from [`RecordValue`] through the [`Record`]
//! trait; [`FromValue`] and [`IntoValue`] cover the field types.

use std::fmt;

use crate::both_endian::BothEndian;
use crate::codec::{read_guid, read_scalar, write_guid, write_scalar, Endian, Guid, Primitive};
use crate::cursor::{ReadCursor, WriteCursor};
use crate::error::{MarshalError, Result};
use crate::schema::{Record, ScalarType};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    U128(u128),
    I128(i128),
    F32(f32),
    F64(f64),
    Guid(Guid),
    BothU16(BothEndian<u16>),
    BothI16(BothEndian<i16>),
    BothU32(BothEndian<u32>),
    BothI32(BothEndian<i32>),
}

fn read_both<T: Primitive, C: ReadCursor + ?Sized>(cursor: &mut C) -> Result<BothEndian<T>> {
    let le = read_scalar::<T, C>(cursor, Endian::Little)?;
    let be = read_scalar::<T, C>(cursor, Endian::Big)?;
    Ok(BothEndian::from_parts(le, be))
}

fn write_both<T: Primitive, C: WriteCursor + ?Sized>(
    cursor: &mut C,
    value: BothEndian<T>,
) -> Result<()> {
    let mut buf = [0u8; 16];
    let bytes = &mut buf[..BothEndian::<T>::WIDTH];
    if !value.encode(bytes) {
        return Err(MarshalError::InvalidValue("cannot encode both-endian value".to_string()));
    }
    cursor.write_all(bytes)
}

impl Scalar {
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Scalar::U8(_) => ScalarType::U8,
            Scalar::I8(_) => ScalarType::I8,
            Scalar::U16(_) => ScalarType::U16,
            Scalar::I16(_) => ScalarType::I16,
            Scalar::U32(_) => ScalarType::U32,
            Scalar::I32(_) => ScalarType::I32,
            Scalar::U64(_) => ScalarType::U64,
            Scalar::I64(_) => ScalarType::I64,
            Scalar::U128(_) => ScalarType::U128,
            Scalar::I128(_) => ScalarType::I128,
            Scalar::F32(_) => ScalarType::F32,
            Scalar::F64(_) => ScalarType::F64,
            Scalar::Guid(_) => ScalarType::Guid,
            Scalar::BothU16(_) => ScalarType::BothU16,
            Scalar::BothI16(_) => ScalarType::BothI16,
            Scalar::BothU32(_) => ScalarType::BothU32,
            Scalar::BothI32(_) => ScalarType::BothI32,
        }
    }

    /// The value as an element count: non-negative plain integers only.
    pub fn as_count(&self) -> Option<u64> {
        match *self {
            Scalar::U8(v) => Some(v.into()),
            Scalar::I8(v) => u64::try_from(v).ok(),
            Scalar::U16(v) => Some(v.into()),
            Scalar::I16(v) => u64::try_from(v).ok(),
            Scalar::U32(v) => Some(v.into()),
            Scalar::I32(v) => u64::try_from(v).ok(),
            Scalar::U64(v) => Some(v),
            Scalar::I64(v) => u64::try_from(v).ok(),
            Scalar::U128(v) => u64::try_from(v).ok(),
            Scalar::I128(v) => u64::try_from(v).ok(),
            _ => None,
        }
    }

    /// An integer scalar of type `ty` holding `count`, if it fits.
    pub fn from_count(ty: ScalarType, count: u64) -> Option<Scalar> {
        Some(match ty {
            ScalarType::U8 => Scalar::U8(count.try_into().ok()?),
            ScalarType::I8 => Scalar::I8(count.try_into().ok()?),
            ScalarType::U16 => Scalar::U16(count.try_into().ok()?),
            ScalarType::I16 => Scalar::I16(count.try_into().ok()?),
            ScalarType::U32 => Scalar::U32(count.try_into().ok()?),
            ScalarType::I32 => Scalar::I32(count.try_into().ok()?),
            ScalarType::U64 => Scalar::U64(count),
            ScalarType::I64 => Scalar::I64(count.try_into().ok()?),
            ScalarType::U128 => Scalar::U128(count.into()),
            ScalarType::I128 => Scalar::I128(count.into()),
            _ => return None,
        })
    }

    pub fn read<C: ReadCursor + ?Sized>(
        cursor: &mut C,
        ty: ScalarType,
        endian: Endian,
    ) -> Result<Self> {
        Ok(match ty {
            ScalarType::U8 => Scalar::U8(read_scalar(cursor, endian)?),
            ScalarType::I8 => Scalar::I8(read_scalar(cursor, endian)?),
            ScalarType::U16 => Scalar::U16(read_scalar(cursor, endian)?),
            ScalarType::I16 => Scalar::I16(read_scalar(cursor, endian)?),
            ScalarType::U32 => Scalar::U32(read_scalar(cursor, endian)?),
            ScalarType::I32 => Scalar::I32(read_scalar(cursor, endian)?),
            ScalarType::U64 => Scalar::U64(read_scalar(cursor, endian)?),
            ScalarType::I64 => Scalar::I64(read_scalar(cursor, endian)?),
            ScalarType::U128 => Scalar::U128(read_scalar(cursor, endian)?),
            ScalarType::I128 => Scalar::I128(read_scalar(cursor, endian)?),
            ScalarType::F32 => Scalar::F32(read_scalar(cursor, endian)?),
            ScalarType::F64 => Scalar::F64(read_scalar(cursor, endian)?),
            ScalarType::Guid => Scalar::Guid(read_guid(cursor, endian)?),
            ScalarType::BothU16 => Scalar::BothU16(read_both(cursor)?),
            ScalarType::BothI16 => Scalar::BothI16(read_both(cursor)?),
            ScalarType::BothU32 => Scalar::BothU32(read_both(cursor)?),
            ScalarType::BothI32 => Scalar::BothI32(read_both(cursor)?),
        })
    }

    pub fn write<C: WriteCursor + ?Sized>(&self, cursor: &mut C, endian: Endian) -> Result<()> {
        match *self {
            Scalar::U8(v) => write_scalar(cursor, endian, v),
            Scalar::I8(v) => write_scalar(cursor, endian, v),
            Scalar::U16(v) => write_scalar(cursor, endian, v),
            Scalar::I16(v) => write_scalar(cursor, endian, v),
            Scalar::U32(v) => write_scalar(cursor, endian, v),
            Scalar::I32(v) => write_scalar(cursor, endian, v),
            Scalar::U64(v) => write_scalar(cursor, endian, v),
            Scalar::I64(v) => write_scalar(cursor, endian, v),
            Scalar::U128(v) => write_scalar(cursor, endian, v),
            Scalar::I128(v) => write_scalar(cursor, endian, v),
            Scalar::F32(v) => write_scalar(cursor, endian, v),
            Scalar::F64(v) => write_scalar(cursor, endian, v),
            Scalar::Guid(ref v) => write_guid(cursor, endian, v),
            Scalar::BothU16(v) => write_both(cursor, v),
            Scalar::BothI16(v) => write_both(cursor, v),
            Scalar::BothU32(v) => write_both(cursor, v),
            Scalar::BothI32(v) => write_both(cursor, v),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::U8(v) => write!(f, "{v}"),
            Scalar::I8(v) => write!(f, "{v}"),
            Scalar::U16(v) => write!(f, "{v}"),
            Scalar::I16(v) => write!(f, "{v}"),
            Scalar::U32(v) => write!(f, "{v}"),
            Scalar::I32(v) => write!(f, "{v}"),
            Scalar::U64(v) => write!(f, "{v}"),
            Scalar::I64(v) => write!(f, "{v}"),
            Scalar::U128(v) => write!(f, "{v}"),
            Scalar::I128(v) => write!(f, "{v}"),
            Scalar::F32(v) => write!(f, "{v}"),
            Scalar::F64(v) => write!(f, "{v}"),
            Scalar::Guid(v) => write!(f, "{{{v}}}"),
            Scalar::BothU16(v) => write!(f, "{v}"),
            Scalar::BothI16(v) => write!(f, "{v}"),
            Scalar::BothU32(v) => write!(f, "{v}"),
            Scalar::BothI32(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Record(RecordValue),
    Text(String),
}

impl Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Scalar(s) => s.scalar_type().name(),
            Value::Bytes(_) => "bytes",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
            Value::Text(_) => "text",
        }
    }

    /// Number of elements for arrays and byte arrays.
    pub fn element_count(&self) -> Option<usize> {
        match self {
            Value::Bytes(b) => Some(b.len()),
            Value::Array(a) => Some(a.len()),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Scalar(s) => write!(f, "{s}"),
            Value::Bytes(bytes) => {
                f.write_str("<")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{b:02x}")?;
                }
                f.write_str(">")
            }
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Record(record) => {
                f.write_str("{ ")?;
                for (i, (name, value)) in record.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                f.write_str(" }")
            }
            Value::Text(text) => write!(f, "{text:?}"),
        }
    }
}

/// A record's fields by name, in the order they were read or pushed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordValue {
    fields: Vec<(&'static str, Value)>,
}

impl RecordValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: Vec::with_capacity(capacity),
        }
    }

    /// Sets `name`, replacing an earlier value of the same name.
    pub fn push(&mut self, name: &'static str, value: impl IntoValue) {
        let value = value.into_value();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn with(mut self, name: &'static str, value: impl IntoValue) -> Self {
        self.push(name, value);
        self
    }

    pub fn push_record<T: Record>(&mut self, name: &'static str, record: &T) {
        self.push(name, record_to_value(record));
    }

    pub fn push_records<T: Record>(&mut self, name: &'static str, records: &[T]) {
        let items = records.iter().map(record_to_value).collect::<Vec<_>>();
        self.push(name, Value::Array(items));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(n, _)| *n == name)?;
        Some(self.fields.remove(index).1)
    }

    /// Removes `name` and converts it.
    pub fn take<T: FromValue>(&mut self, name: &str) -> Result<T> {
        let value = self
            .remove(name)
            .ok_or_else(|| MarshalError::MissingField(name.to_string()))?;
        T::from_value(value).map_err(|e| e.in_field(name))
    }

    /// Removes `name` and converts it through its integer representation `R`.
    pub fn take_enum<E, R>(&mut self, name: &str) -> Result<E>
    where
        R: FromValue + Copy + fmt::Display,
        E: TryFrom<R>,
    {
        let raw: R = self.take(name)?;
        E::try_from(raw).map_err(|_| {
            let kind = std::any::type_name::<E>();
            MarshalError::InvalidValue(format!("{raw} is not a known {kind}")).in_field(name)
        })
    }

    pub fn take_record<T: Record>(&mut self, name: &str) -> Result<T> {
        let value = self
            .remove(name)
            .ok_or_else(|| MarshalError::MissingField(name.to_string()))?;
        record_from_value(value).map_err(|e| e.in_field(name))
    }

    pub fn take_records<T: Record>(&mut self, name: &str) -> Result<Vec<T>> {
        let value = self
            .remove(name)
            .ok_or_else(|| MarshalError::MissingField(name.to_string()))?;
        let items = match value {
            Value::Array(items) => items,
            other => return Err(mismatch("array", &other).in_field(name)),
        };
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| record_from_value(item).map_err(|e| e.in_field(&format!("[{i}]"))))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| e.in_field(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for RecordValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.fields {
            writeln!(f, "{name} = {value}")?;
        }
        Ok(())
    }
}

pub fn record_to_value<T: Record>(record: &T) -> Value {
    let mut fields = RecordValue::new();
    record.to_fields(&mut fields);
    Value::Record(fields)
}

pub fn record_from_value<T: Record>(value: Value) -> Result<T> {
    match value {
        Value::Record(mut fields) => T::from_fields(&mut fields),
        other => Err(mismatch("record", &other)),
    }
}

fn mismatch(expected: &'static str, found: &Value) -> MarshalError {
    MarshalError::TypeMismatch {
        expected,
        found: found.kind_name(),
    }
}

pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self>;
}

pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for Scalar {
    fn into_value(self) -> Value {
        Value::Scalar(self)
    }
}

macro_rules! scalar_conversions {
    ($($ty:ty => $variant:ident),*) => {$(
        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Scalar(Scalar::$variant(v)) => Ok(v),
                    other => Err(mismatch(ScalarType::$variant.name(), &other)),
                }
            }
        }

        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::Scalar(Scalar::$variant(self))
            }
        }
    )*};
}

scalar_conversions!(
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    u128 => U128,
    i128 => I128,
    f32 => F32,
    f64 => F64,
    Guid => Guid,
    BothEndian<u16> => BothU16,
    BothEndian<i16> => BothI16,
    BothEndian<u32> => BothU32,
    BothEndian<i32> => BothI32
);

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Text(text) => Ok(text),
            other => Err(mismatch("text", &other)),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Text(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Text(self.to_string())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            // byte arrays convert element-wise like any other array
            Value::Bytes(bytes) => bytes
                .into_iter()
                .map(|b| Value::Scalar(Scalar::U8(b)))
                .collect(),
            other => return Err(mismatch("array", &other)),
        };
        items
            .into_iter()
            .enumerate()
            .map(|(i, item)| T::from_value(item).map_err(|e| e.in_field(&format!("[{i}]"))))
            .collect()
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: FromValue, const N: usize> FromValue for [T; N] {
    fn from_value(value: Value) -> Result<Self> {
        let items: Vec<T> = Vec::from_value(value)?;
        let len = items.len();
        items
            .try_into()
            .map_err(|_| MarshalError::InvalidValue(format!("expected {N} elements, found {len}")))
    }
}

impl<T: IntoValue, const N: usize> IntoValue for [T; N] {
    fn into_value(self) -> Value {
        Value::Array(self.into_iter().map(IntoValue::into_value).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_converts_and_removes() {
        let mut fields = RecordValue::new()
            .with("count", 3u16)
            .with("name", "abc")
            .with("data", Value::Bytes(vec![1, 2]));

        assert_eq!(fields.take::<u16>("count").unwrap(), 3);
        assert_eq!(fields.take::<[u8; 2]>("data").unwrap(), [1, 2]);
        assert_eq!(fields.len(), 1);

        let err = fields.take::<u32>("name").unwrap_err();
        assert_eq!(err.field_path(), Some("name"));
        assert!(matches!(
            err.root_cause(),
            MarshalError::TypeMismatch {
                expected: "u32",
                found: "text"
            }
        ));
        assert!(matches!(
            fields.take::<u8>("name").unwrap_err(),
            MarshalError::MissingField(_)
        ));
    }

    #[test]
    fn push_replaces_existing_names() {
        let mut fields = RecordValue::new().with("a", 1u8);
        fields.push("a", 2u8);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get("a"), Some(&Value::Scalar(Scalar::U8(2))));
    }

    #[test]
    fn counts_only_from_non_negative_integers() {
        assert_eq!(Scalar::I16(4).as_count(), Some(4));
        assert_eq!(Scalar::I16(-1).as_count(), None);
        assert_eq!(Scalar::F32(1.0).as_count(), None);
        assert_eq!(Scalar::from_count(ScalarType::U8, 255), Some(Scalar::U8(255)));
        assert_eq!(Scalar::from_count(ScalarType::U8, 256), None);
    }

    #[test]
    fn display_is_compact() {
        let value = Value::Record(
            RecordValue::new()
                .with("id", 7u32)
                .with("raw", Value::Bytes(vec![0xde, 0xad]))
                .with("list", vec![1u8, 2]),
        );
        assert_eq!(value.to_string(), "{ id: 7, raw: <de ad>, list: [1, 2] }");
    }
}
