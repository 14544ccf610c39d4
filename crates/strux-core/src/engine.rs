//! The record engine: a fold over a layout's fields.
//!
//! Each inheritance segment starts where everything before it ended. Inside
//! a segment, sequential fields follow one another and explicit fields are
//! placed at their declared offset from the segment start. The record ends
//! at the furthest byte any field reached, so overlapping explicit fields
//! are counted once.

use std::io::{Read, Seek, Write};

use crate::cursor::{
    Cursor, ReadCursor, SliceCursor, SliceCursorMut, StreamCursor, VecCursor, WriteCursor,
};
use crate::error::{MarshalError, Result};
use crate::layout::{layout_of, LayoutDescriptor, MarshalKind};
use crate::marshal::{read_field, write_field};
use crate::schema::{LayoutMode, Record};
use crate::value::{RecordValue, Scalar, Value};

/// Reads a record described by `layout` at the cursor.
///
/// On success the cursor is left at the record's end. On failure it is put
/// back where the record started and no partial record is returned.
pub fn read_value<C: ReadCursor + ?Sized>(
    cursor: &mut C,
    layout: &LayoutDescriptor,
) -> Result<RecordValue> {
    let origin = cursor.position();
    read_fields(cursor, layout, origin).map_err(|e| {
        let _ = cursor.set_position(origin);
        e
    })
}

fn read_fields<C: ReadCursor + ?Sized>(
    cursor: &mut C,
    layout: &LayoutDescriptor,
    origin: u64,
) -> Result<RecordValue> {
    let fields = layout.fields();
    let mut values: Vec<Value> = Vec::with_capacity(fields.len());
    let mut end = origin;

    for segment in layout.segments() {
        let start = end;
        cursor.set_position(start)?;
        for field in &fields[segment.fields()] {
            if segment.mode() == LayoutMode::Explicit {
                cursor.set_position(start + field.offset().unwrap_or_default())?;
            }
            let value = read_field(cursor, field, &values).map_err(|e| e.in_field(field.name()))?;
            end = end.max(cursor.position());
            values.push(value);
        }
    }
    cursor.set_position(end)?;

    let mut record = RecordValue::with_capacity(values.len());
    for (field, value) in fields.iter().zip(values) {
        record.push(field.name(), value);
    }
    Ok(record)
}

/// Writes `record` with the layout at the cursor.
///
/// Length fields of length-prefixed arrays are written from the arrays'
/// element counts; they may be left out of `record`. On failure the cursor is
/// put back where the record started, but bytes already written stay.
pub fn write_value<C: WriteCursor + ?Sized>(
    cursor: &mut C,
    layout: &LayoutDescriptor,
    record: &RecordValue,
) -> Result<()> {
    let origin = cursor.position();
    write_fields(cursor, layout, record, origin).map_err(|e| {
        let _ = cursor.set_position(origin);
        e
    })
}

fn write_fields<C: WriteCursor + ?Sized>(
    cursor: &mut C,
    layout: &LayoutDescriptor,
    record: &RecordValue,
    origin: u64,
) -> Result<()> {
    let fields = layout.fields();
    let counts = length_overrides(layout, record)?;
    let mut end = origin;

    for segment in layout.segments() {
        let start = end;
        cursor.set_position(start)?;
        for index in segment.fields() {
            let field = &fields[index];
            if segment.mode() == LayoutMode::Explicit {
                cursor.set_position(start + field.offset().unwrap_or_default())?;
            }
            let value = match &counts[index] {
                Some(count) => count,
                None => record
                    .get(field.name())
                    .ok_or_else(|| MarshalError::MissingField(field.name().to_string()))?,
            };
            write_field(cursor, field, value).map_err(|e| e.in_field(field.name()))?;
            end = end.max(cursor.position());
        }
    }
    cursor.set_position(end)
}

/// The value each length field must hold, derived from the arrays that
/// reference it.
fn length_overrides(layout: &LayoutDescriptor, record: &RecordValue) -> Result<Vec<Option<Value>>> {
    let fields = layout.fields();
    let mut counts: Vec<Option<Value>> = vec![None; fields.len()];

    for field in fields {
        let MarshalKind::LengthPrefixedArray { length_field, .. } = field.kind() else {
            continue;
        };
        let length = &fields[*length_field];
        let ty = match length.kind() {
            MarshalKind::Scalar(ty) => *ty,
            _ => continue,
        };
        let count = record
            .get(field.name())
            .and_then(Value::element_count)
            .ok_or_else(|| MarshalError::MissingField(field.name().to_string()))?;
        let value = Scalar::from_count(ty, count as u64).ok_or_else(|| {
            MarshalError::InvalidValue(format!("{count} elements do not fit a {ty} count"))
                .in_field(length.name())
        })?;
        match &counts[*length_field] {
            Some(Value::Scalar(existing)) if *existing != value => {
                return Err(MarshalError::InvalidValue(format!(
                    "arrays sharing `{}` disagree on their length ({existing} and {value})",
                    length.name()
                ))
                .in_field(field.name()));
            }
            _ => counts[*length_field] = Some(Value::Scalar(value)),
        }
    }
    Ok(counts)
}

/// Reads a `T` at the cursor.
pub fn read_record<T: Record, C: ReadCursor + ?Sized>(cursor: &mut C) -> Result<T> {
    let layout = layout_of::<T>()?;
    let origin = cursor.position();
    let mut fields = read_value(cursor, &layout).map_err(|e| e.in_field(layout.name()))?;
    T::from_fields(&mut fields).map_err(|e| {
        let _ = cursor.set_position(origin);
        e.in_field(layout.name())
    })
}

/// Writes `value` at the cursor.
pub fn write_record<T: Record, C: WriteCursor + ?Sized>(cursor: &mut C, value: &T) -> Result<()> {
    let layout = layout_of::<T>()?;
    let mut fields = RecordValue::new();
    value.to_fields(&mut fields);
    write_value(cursor, &layout, &fields).map_err(|e| e.in_field(layout.name()))
}

/// Reads a `T` from `data` at `*position`, advancing it past the record.
pub fn read_record_at<T: Record>(data: &[u8], position: &mut usize) -> Result<T> {
    let mut cursor = SliceCursor::at(data, *position);
    let record = read_record(&mut cursor)?;
    *position = cursor.position() as usize;
    Ok(record)
}

/// Writes `value` into `data` at `*position`, advancing it past the record.
///
/// Returns `Ok(false)`, with `data` and `*position` untouched, when the
/// record does not fit.
pub fn write_record_at<T: Record>(
    data: &mut [u8],
    position: &mut usize,
    value: &T,
) -> Result<bool> {
    let size = record_to_vec(value)?.len();
    if data.len().saturating_sub(*position) < size {
        return Ok(false);
    }
    let mut cursor = SliceCursorMut::at(data, *position);
    write_record(&mut cursor, value)?;
    *position = cursor.position() as usize;
    Ok(true)
}

/// Reads a `T` at the stream's current position.
pub fn read_record_from<T: Record, S: Read + Seek>(stream: &mut S) -> Result<T> {
    let mut cursor = StreamCursor::new(stream)?;
    read_record(&mut cursor)
}

/// Writes `value` at the stream's current position. Returns `Ok(false)` when
/// the stream refuses more bytes.
pub fn write_record_to<T: Record, S: Write + Seek>(stream: &mut S, value: &T) -> Result<bool> {
    let mut cursor = StreamCursor::new(stream)?;
    match write_record(&mut cursor, value) {
        Ok(()) => Ok(true),
        Err(e) if e.is_write_capacity() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Encodes `value` into a new buffer.
pub fn record_to_vec<T: Record>(value: &T) -> Result<Vec<u8>> {
    let mut cursor = VecCursor::new();
    write_record(&mut cursor, value)?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldDef, RecordSchema, ScalarType};

    fn union_layout() -> LayoutDescriptor {
        LayoutDescriptor::resolve(
            RecordSchema::explicit("Union")
                .field(FieldDef::u32("a").at(0))
                .field(FieldDef::u32("b").at(4))
                .field(FieldDef::u16("c").at(4)),
        )
        .unwrap()
    }

    #[test]
    fn explicit_record_ends_at_furthest_field() {
        let layout = union_layout();
        let data = hex::decode("0001020304050607ff").unwrap();
        let mut cursor = SliceCursor::new(&data);
        let record = read_value(&mut cursor, &layout).unwrap();
        assert_eq!(cursor.position(), 8);
        assert_eq!(record.get("c"), Some(&Value::Scalar(Scalar::U16(0x0504))));
    }

    #[test]
    fn failed_read_restores_position() {
        let layout = union_layout();
        let data = [0u8; 4];
        let mut cursor = SliceCursor::at(&data, 1);
        let err = read_value(&mut cursor, &layout).unwrap_err();
        assert!(err.is_end_of_data());
        assert_eq!(err.field_path(), Some("a"));
        assert_eq!(cursor.position(), 1);
    }

    #[test]
    fn length_field_comes_from_array() {
        let layout = LayoutDescriptor::resolve(
            RecordSchema::sequential("Counted")
                .field(FieldDef::u16("count"))
                .field(
                    FieldDef::prefixed_array("items", ScalarType::U8.into())
                        .length_from("count"),
                ),
        )
        .unwrap();
        let record = RecordValue::new().with("items", vec![9u8, 8, 7]);
        let mut cursor = VecCursor::new();
        write_value(&mut cursor, &layout, &record).unwrap();
        assert_eq!(cursor.into_inner(), [3, 0, 9, 8, 7]);
    }

    #[test]
    fn missing_field_is_reported() {
        let layout = union_layout();
        let record = RecordValue::new().with("a", 1u32).with("b", 2u32);
        let err = write_value(&mut VecCursor::new(), &layout, &record).unwrap_err();
        assert!(matches!(err, MarshalError::MissingField(ref name) if name == "c"));
    }
}
