//! Per-field read and write, dispatched on [`MarshalKind`].

use log::trace;

use crate::codec::{read_scalar, write_scalar, Endian};
use crate::cursor::{Cursor, ReadCursor, WriteCursor};
use crate::engine::{read_value, write_value};
use crate::error::{MarshalError, Result};
use crate::layout::{Element, FieldDescriptor, MarshalKind};
use crate::schema::{PrefixWidth, ScalarType};
use crate::text::TextEncoding;
use crate::value::{Scalar, Value};

/// Reads one field at the cursor. `earlier` holds the values of the fields
/// before it, indexed like the layout's field list.
pub(crate) fn read_field<C: ReadCursor + ?Sized>(
    cursor: &mut C,
    field: &FieldDescriptor,
    earlier: &[Value],
) -> Result<Value> {
    trace!(
        "read {} ({}) at {}",
        field.name(),
        field.kind(),
        cursor.position()
    );
    let endian = field.endian();
    match field.kind() {
        MarshalKind::Scalar(ty) | MarshalKind::Enum(ty) => {
            Ok(Value::Scalar(Scalar::read(cursor, *ty, endian)?))
        }
        MarshalKind::NestedRecordFixed(layout) => Ok(Value::Record(read_value(cursor, layout)?)),
        MarshalKind::FixedByteArray(len) => Ok(Value::Bytes(cursor.read_vec(*len)?)),
        MarshalKind::FixedPrimitiveArray { element, count } => {
            read_elements(cursor, &Element::Scalar(*element), *count, endian)
        }
        MarshalKind::FixedRecordArray { layout, count } => {
            read_elements(cursor, &Element::Record(layout.clone()), *count, endian)
        }
        MarshalKind::LengthPrefixedArray {
            element,
            length_field,
        } => {
            let count = match earlier.get(*length_field) {
                Some(Value::Scalar(scalar)) => scalar.as_count().ok_or_else(|| {
                    MarshalError::InvalidValue(format!("length {scalar} is not a valid count"))
                })?,
                _ => {
                    return Err(MarshalError::InvalidValue(
                        "length field has not been read".to_string(),
                    ))
                }
            };
            let count = usize::try_from(count)
                .map_err(|_| MarshalError::InvalidValue(format!("length {count} is too large")))?;
            // a count the source cannot possibly satisfy fails before allocating
            if let (Some(size), Some(available)) = (element.static_size(), cursor.remaining()) {
                let needed = size.saturating_mul(count as u64);
                if needed > available {
                    return Err(MarshalError::UnexpectedEndOfData {
                        offset: cursor.position(),
                        needed,
                        available,
                    });
                }
            }
            read_elements(cursor, element, count, endian)
        }
        MarshalKind::StringNullTerminated {
            encoding,
            max_chars,
        } => read_c_string(cursor, *encoding, *max_chars).map(Value::Text),
        MarshalKind::StringLengthPrefixed { width, encoding } => {
            let count = match width {
                PrefixWidth::Byte => read_scalar::<u8, C>(cursor, endian)? as usize,
                PrefixWidth::Word => read_scalar::<u16, C>(cursor, endian)? as usize,
            };
            let bytes = cursor.read_vec(count * encoding.unit_width())?;
            encoding.decode(&bytes).map(Value::Text)
        }
        MarshalKind::StringFixedLength { encoding, chars } => {
            let width = encoding.unit_width();
            let mut bytes = cursor.read_vec(chars * width)?;
            // trailing terminators are padding, not text
            while bytes.len() >= width && bytes[bytes.len() - width..].iter().all(|&b| b == 0) {
                bytes.truncate(bytes.len() - width);
            }
            encoding.decode(&bytes).map(Value::Text)
        }
    }
}

fn read_elements<C: ReadCursor + ?Sized>(
    cursor: &mut C,
    element: &Element,
    count: usize,
    endian: Endian,
) -> Result<Value> {
    let mut items = Vec::with_capacity(count.min(4096));
    for i in 0..count {
        let item = match element {
            Element::Scalar(ty) => Scalar::read(cursor, *ty, endian).map(Value::Scalar),
            Element::Record(layout) => read_value(cursor, layout).map(Value::Record),
        };
        items.push(item.map_err(|e| e.in_field(&format!("[{i}]")))?);
    }
    Ok(Value::Array(items))
}

/// Reads code units up to and including a terminator of the encoding's unit
/// width. With `max_chars`, the terminator must appear within that many units.
pub fn read_c_string<C: ReadCursor + ?Sized>(
    cursor: &mut C,
    encoding: TextEncoding,
    max_chars: Option<usize>,
) -> Result<String> {
    let width = encoding.unit_width();
    let mut unit = [0u8; 4];
    let unit = &mut unit[..width];
    let mut bytes = Vec::new();
    let mut chars = 0usize;
    loop {
        cursor.read_exact(unit)?;
        if unit.iter().all(|&b| b == 0) {
            break;
        }
        if max_chars.is_some_and(|max| chars >= max) {
            return Err(MarshalError::encoding(
                encoding.name(),
                format!("no terminator within {chars} characters"),
            ));
        }
        bytes.extend_from_slice(unit);
        chars += 1;
    }
    encoding.decode(&bytes)
}

/// Writes `text` followed by a terminator of the encoding's unit width.
pub fn write_c_string<C: WriteCursor + ?Sized>(
    cursor: &mut C,
    encoding: TextEncoding,
    text: &str,
) -> Result<()> {
    if text.contains('\0') {
        return Err(MarshalError::InvalidValue(
            "null-terminated string contains a NUL character".to_string(),
        ));
    }
    let bytes = encoding.encode(text)?;
    cursor.write_all(&bytes)?;
    cursor.write_zeros(encoding.unit_width())
}

/// Writes one field at the cursor.
pub(crate) fn write_field<C: WriteCursor + ?Sized>(
    cursor: &mut C,
    field: &FieldDescriptor,
    value: &Value,
) -> Result<()> {
    trace!(
        "write {} ({}) at {}",
        field.name(),
        field.kind(),
        cursor.position()
    );
    let endian = field.endian();
    match field.kind() {
        MarshalKind::Scalar(ty) | MarshalKind::Enum(ty) => {
            expect_scalar(value, *ty)?.write(cursor, endian)
        }
        MarshalKind::NestedRecordFixed(layout) => match value {
            Value::Record(record) => write_value(cursor, layout, record),
            other => Err(mismatch("record", other)),
        },
        MarshalKind::FixedByteArray(len) => {
            let bytes = byte_array(value)?;
            if bytes.len() != *len {
                return Err(MarshalError::InvalidValue(format!(
                    "expected exactly {len} bytes, found {}",
                    bytes.len()
                )));
            }
            cursor.write_all(&bytes)
        }
        MarshalKind::FixedPrimitiveArray { element, count } => {
            write_elements(cursor, &Element::Scalar(*element), Some(*count), value, endian)
        }
        MarshalKind::FixedRecordArray { layout, count } => write_elements(
            cursor,
            &Element::Record(layout.clone()),
            Some(*count),
            value,
            endian,
        ),
        MarshalKind::LengthPrefixedArray { element, .. } => {
            write_elements(cursor, element, None, value, endian)
        }
        MarshalKind::StringNullTerminated {
            encoding,
            max_chars,
        } => {
            let text = expect_text(value)?;
            if let Some(max) = max_chars {
                let chars = encoding.encode(text)?.len() / encoding.unit_width();
                if chars > *max {
                    return Err(MarshalError::InvalidValue(format!(
                        "{chars} characters exceed the limit of {max}"
                    )));
                }
            }
            write_c_string(cursor, *encoding, text)
        }
        MarshalKind::StringLengthPrefixed { width, encoding } => {
            let bytes = encoding.encode(expect_text(value)?)?;
            let count = bytes.len() / encoding.unit_width();
            if count > width.max_count() {
                return Err(MarshalError::InvalidValue(format!(
                    "{count} characters do not fit a {}-byte count",
                    width.width()
                )));
            }
            match width {
                PrefixWidth::Byte => write_scalar(cursor, endian, count as u8)?,
                PrefixWidth::Word => write_scalar(cursor, endian, count as u16)?,
            }
            cursor.write_all(&bytes)
        }
        MarshalKind::StringFixedLength { encoding, chars } => {
            let bytes = encoding.encode(expect_text(value)?)?;
            let width = encoding.unit_width();
            let slot = chars * width;
            if bytes.len() > slot {
                return Err(MarshalError::InvalidValue(format!(
                    "{} characters do not fit in {chars}",
                    bytes.len() / width
                )));
            }
            cursor.write_all(&bytes)?;
            cursor.write_zeros(slot - bytes.len())
        }
    }
}

fn write_elements<C: WriteCursor + ?Sized>(
    cursor: &mut C,
    element: &Element,
    count: Option<usize>,
    value: &Value,
    endian: Endian,
) -> Result<()> {
    // byte arrays are accepted for u8 elements
    if let (Value::Bytes(bytes), Element::Scalar(ScalarType::U8)) = (value, element) {
        check_count(count, bytes.len())?;
        return cursor.write_all(bytes);
    }
    let items = match value {
        Value::Array(items) => items,
        other => return Err(mismatch("array", other)),
    };
    check_count(count, items.len())?;
    for (i, item) in items.iter().enumerate() {
        let written = match (element, item) {
            (Element::Scalar(ty), item) => {
                expect_scalar(item, *ty).and_then(|scalar| scalar.write(cursor, endian))
            }
            (Element::Record(layout), Value::Record(record)) => write_value(cursor, layout, record),
            (Element::Record(_), other) => Err(mismatch("record", other)),
        };
        written.map_err(|e| e.in_field(&format!("[{i}]")))?;
    }
    Ok(())
}

fn check_count(expected: Option<usize>, found: usize) -> Result<()> {
    match expected {
        Some(expected) if expected != found => Err(MarshalError::InvalidValue(format!(
            "expected {expected} elements, found {found}"
        ))),
        _ => Ok(()),
    }
}

fn expect_scalar(value: &Value, ty: ScalarType) -> Result<&Scalar> {
    match value {
        Value::Scalar(scalar) if scalar.scalar_type() == ty => Ok(scalar),
        other => Err(mismatch(ty.name(), other)),
    }
}

fn expect_text(value: &Value) -> Result<&str> {
    match value {
        Value::Text(text) => Ok(text),
        other => Err(mismatch("text", other)),
    }
}

fn byte_array(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Bytes(bytes) => Ok(bytes.clone()),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Scalar(Scalar::U8(b)) => Ok(*b),
                other => Err(mismatch("u8", other)),
            })
            .collect(),
        other => Err(mismatch("bytes", other)),
    }
}

fn mismatch(expected: &'static str, found: &Value) -> MarshalError {
    MarshalError::TypeMismatch {
        expected,
        found: found.kind_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{SliceCursor, VecCursor};

    #[test]
    fn c_string_terminator_matches_unit_width() {
        let bytes = hex::decode("4100420043000000").unwrap();
        let mut cursor = SliceCursor::new(&bytes);
        let text = read_c_string(&mut cursor, TextEncoding::Utf16Le, None).unwrap();
        assert_eq!(text, "ABC");
        assert_eq!(cursor.position(), 8);

        let mut out = VecCursor::new();
        write_c_string(&mut out, TextEncoding::Utf16Le, "ABC").unwrap();
        assert_eq!(out.into_inner(), bytes);
    }

    #[test]
    fn c_string_utf32_needs_four_zero_bytes() {
        // a zero byte inside a UTF-32 unit is not a terminator
        let bytes = hex::decode("410000000000000042").unwrap();
        let mut cursor = SliceCursor::new(&bytes);
        assert_eq!(
            read_c_string(&mut cursor, TextEncoding::Utf32Le, None).unwrap(),
            "A"
        );
        assert_eq!(cursor.position(), 8);
    }

    #[test]
    fn c_string_cap_and_exhaustion() {
        let mut cursor = SliceCursor::new(b"abcdef\0");
        let err = read_c_string(&mut cursor, TextEncoding::Ascii, Some(3)).unwrap_err();
        assert!(matches!(err, MarshalError::Encoding { .. }));

        let mut cursor = SliceCursor::new(b"abc");
        let err = read_c_string(&mut cursor, TextEncoding::Ascii, None).unwrap_err();
        assert!(err.is_end_of_data());
    }

    #[test]
    fn c_string_rejects_embedded_nul() {
        let mut out = VecCursor::new();
        assert!(write_c_string(&mut out, TextEncoding::Utf8, "a\0b").is_err());
    }
}
