//! Layout resolution and the process-wide layout cache.
//!
//! A [`LayoutDescriptor`] is the flat, resolved form of a [`RecordSchema`]:
//! base record fields first, then the record's own fields, grouped into
//! segments that each keep the placement mode of the type that declared
//! them. Offsets and sizes are computed here wherever they are static;
//! everything that depends on data (length-prefixed arrays, terminated
//! strings) is left to the engine.

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;
use once_cell::sync::Lazy;

use crate::codec::Endian;
use crate::error::SchemaError;
use crate::schema::{
    ElementType, FieldDef, FieldShape, LayoutMode, PrefixWidth, Record, RecordSchema, ScalarType,
};
use crate::text::TextEncoding;

#[derive(Debug, Clone)]
pub enum Element {
    Scalar(ScalarType),
    Record(Arc<LayoutDescriptor>),
}

impl Element {
    pub fn static_size(&self) -> Option<u64> {
        match self {
            Element::Scalar(ty) => Some(ty.width() as u64),
            Element::Record(layout) => layout.static_size(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum MarshalKind {
    Scalar(ScalarType),
    Enum(ScalarType),
    NestedRecordFixed(Arc<LayoutDescriptor>),
    FixedByteArray(usize),
    FixedPrimitiveArray {
        element: ScalarType,
        count: usize,
    },
    FixedRecordArray {
        layout: Arc<LayoutDescriptor>,
        count: usize,
    },
    LengthPrefixedArray {
        element: Element,
        /// Index of the count field in [`LayoutDescriptor::fields`].
        length_field: usize,
    },
    StringNullTerminated {
        encoding: TextEncoding,
        max_chars: Option<usize>,
    },
    StringLengthPrefixed {
        width: PrefixWidth,
        encoding: TextEncoding,
    },
    StringFixedLength {
        encoding: TextEncoding,
        chars: usize,
    },
}

impl MarshalKind {
    /// Size in bytes when it does not depend on the data.
    pub fn static_size(&self) -> Option<u64> {
        match self {
            MarshalKind::Scalar(ty) | MarshalKind::Enum(ty) => Some(ty.width() as u64),
            MarshalKind::NestedRecordFixed(layout) => layout.static_size(),
            MarshalKind::FixedByteArray(len) => Some(*len as u64),
            MarshalKind::FixedPrimitiveArray { element, count } => {
                Some(element.width() as u64 * *count as u64)
            }
            MarshalKind::FixedRecordArray { layout, count } => {
                layout.static_size().map(|size| size * *count as u64)
            }
            MarshalKind::StringFixedLength { encoding, chars } => {
                Some(encoding.unit_width() as u64 * *chars as u64)
            }
            MarshalKind::LengthPrefixedArray { .. }
            | MarshalKind::StringNullTerminated { .. }
            | MarshalKind::StringLengthPrefixed { .. } => None,
        }
    }
}

impl fmt::Display for MarshalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarshalKind::Scalar(ty) => write!(f, "{ty}"),
            MarshalKind::Enum(ty) => write!(f, "enum({ty})"),
            MarshalKind::NestedRecordFixed(layout) => write!(f, "{}", layout.name()),
            MarshalKind::FixedByteArray(len) => write!(f, "bytes[{len}]"),
            MarshalKind::FixedPrimitiveArray { element, count } => write!(f, "{element}[{count}]"),
            MarshalKind::FixedRecordArray { layout, count } => {
                write!(f, "{}[{count}]", layout.name())
            }
            MarshalKind::LengthPrefixedArray { element, .. } => match element {
                Element::Scalar(ty) => write!(f, "{ty}[..]"),
                Element::Record(layout) => write!(f, "{}[..]", layout.name()),
            },
            MarshalKind::StringNullTerminated { encoding, .. } => write!(f, "cstr({encoding})"),
            MarshalKind::StringLengthPrefixed { width, encoding } => match width {
                PrefixWidth::Byte => write!(f, "ansi-bstr({encoding})"),
                PrefixWidth::Word => write!(f, "bstr({encoding})"),
            },
            MarshalKind::StringFixedLength { encoding, chars } => {
                write!(f, "str[{chars}]({encoding})")
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    name: &'static str,
    kind: MarshalKind,
    endian: Endian,
    offset: Option<u64>,
    static_offset: Option<u64>,
    segment: usize,
}

impl FieldDescriptor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> &MarshalKind {
        &self.kind
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Declared offset from the start of the field's segment (explicit
    /// layouts only).
    pub fn offset(&self) -> Option<u64> {
        self.offset
    }

    /// Offset from the start of the record, when no variable-size field
    /// comes before this one.
    pub fn static_offset(&self) -> Option<u64> {
        self.static_offset
    }

    pub fn static_size(&self) -> Option<u64> {
        self.kind.static_size()
    }

    /// Index of the segment (inheritance level) the field belongs to.
    pub fn segment(&self) -> usize {
        self.segment
    }
}

/// The fields one type in an inheritance chain contributes.
#[derive(Debug, Clone)]
pub struct Segment {
    record: &'static str,
    mode: LayoutMode,
    fields: Range<usize>,
    static_size: Option<u64>,
}

impl Segment {
    pub fn record(&self) -> &'static str {
        self.record
    }

    pub fn mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn fields(&self) -> Range<usize> {
        self.fields.clone()
    }

    pub fn static_size(&self) -> Option<u64> {
        self.static_size
    }
}

#[derive(Debug, Clone)]
pub struct LayoutDescriptor {
    name: &'static str,
    mode: LayoutMode,
    segments: Vec<Segment>,
    fields: Vec<FieldDescriptor>,
    static_size: Option<u64>,
}

impl LayoutDescriptor {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Placement mode of the record's own fields.
    pub fn mode(&self) -> LayoutMode {
        self.mode
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// All fields, base record fields first, in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// The record size when every field has a fixed size: what `sizeof`
    /// gives for the equivalent packed C struct.
    pub fn static_size(&self) -> Option<u64> {
        self.static_size
    }

    /// Resolves a declaration that is not tied to a Rust type. Nested record
    /// references still go through the layout cache.
    pub fn resolve(schema: RecordSchema) -> Result<Self, SchemaError> {
        let RecordSchema {
            name,
            mode,
            base,
            endian,
            fields: defs,
        } = schema;

        let (mut segments, mut fields, base_size) = match base {
            Some(base) => {
                let base = base.resolve()?;
                (base.segments.clone(), base.fields.clone(), base.static_size)
            }
            None => (Vec::new(), Vec::new(), Some(0)),
        };

        let segment = segments.len();
        let first = fields.len();
        let mut running = Some(0u64);
        let mut extent = Some(0u64);

        for (i, def) in defs.iter().enumerate() {
            if fields.iter().any(|f| f.name == def.name) {
                return Err(SchemaError::DuplicateField {
                    record: name,
                    field: def.name,
                });
            }

            let kind = resolve_kind(name, def, &fields, &defs[i + 1..])?;
            let size = kind.static_size();

            let start = match (mode, def.offset) {
                (LayoutMode::Explicit, Some(offset)) => Some(offset),
                (LayoutMode::Explicit, None) => {
                    return Err(SchemaError::MissingOffset {
                        record: name,
                        field: def.name,
                    })
                }
                (LayoutMode::Sequential, Some(_)) => {
                    return Err(SchemaError::UnexpectedOffset {
                        record: name,
                        field: def.name,
                    })
                }
                (LayoutMode::Sequential, None) => running,
            };

            let end = start.zip(size).map(|(start, size)| start + size);
            match mode {
                LayoutMode::Sequential => running = end,
                LayoutMode::Explicit => extent = extent.zip(end).map(|(a, b)| a.max(b)),
            }

            fields.push(FieldDescriptor {
                name: def.name,
                kind,
                endian: def.endian.unwrap_or(endian),
                offset: def.offset,
                static_offset: base_size.zip(start).map(|(origin, start)| origin + start),
                segment,
            });
        }

        let own_size = match mode {
            LayoutMode::Sequential => running,
            LayoutMode::Explicit => extent,
        };
        segments.push(Segment {
            record: name,
            mode,
            fields: first..fields.len(),
            static_size: own_size,
        });

        Ok(Self {
            name,
            mode,
            segments,
            fields,
            static_size: base_size.zip(own_size).map(|(a, b)| a + b),
        })
    }
}

fn resolve_kind(
    record: &'static str,
    def: &FieldDef,
    earlier: &[FieldDescriptor],
    later: &[FieldDef],
) -> Result<MarshalKind, SchemaError> {
    let field = def.name;
    let non_zero = |count: usize| {
        if count == 0 {
            Err(SchemaError::ZeroCount { record, field })
        } else {
            Ok(count)
        }
    };

    let kind = match &def.shape {
        FieldShape::Scalar(ty) => MarshalKind::Scalar(*ty),
        FieldShape::Enum(ty) => {
            if !ty.is_integer() {
                return Err(SchemaError::EnumNotInteger { record, field });
            }
            MarshalKind::Enum(*ty)
        }
        FieldShape::Record(r) => MarshalKind::NestedRecordFixed(r.resolve()?),
        FieldShape::Bytes(len) => MarshalKind::FixedByteArray(non_zero(*len)?),
        FieldShape::Array(element, count) => MarshalKind::FixedPrimitiveArray {
            element: *element,
            count: non_zero(*count)?,
        },
        FieldShape::RecordArray(r, count) => MarshalKind::FixedRecordArray {
            layout: r.resolve()?,
            count: non_zero(*count)?,
        },
        FieldShape::PrefixedArray {
            element,
            length_field,
        } => {
            let length_field =
                length_field.ok_or(SchemaError::MissingLengthField { record, field })?;
            let index = match earlier.iter().position(|f| f.name == length_field) {
                Some(index) => index,
                None if later.iter().any(|f| f.name == length_field) => {
                    return Err(SchemaError::LengthFieldAfterArray {
                        record,
                        field,
                        length_field,
                    })
                }
                None => {
                    return Err(SchemaError::UnknownLengthField {
                        record,
                        field,
                        length_field,
                    })
                }
            };
            match earlier[index].kind {
                MarshalKind::Scalar(ty) if ty.is_integer() => {}
                _ => {
                    return Err(SchemaError::LengthFieldNotInteger {
                        record,
                        field,
                        length_field,
                    })
                }
            }
            let element = match element {
                ElementType::Scalar(ty) => Element::Scalar(*ty),
                ElementType::Record(r) => Element::Record(r.resolve()?),
            };
            MarshalKind::LengthPrefixedArray {
                element,
                length_field: index,
            }
        }
        FieldShape::NullTerminated {
            encoding,
            max_chars,
        } => MarshalKind::StringNullTerminated {
            encoding: *encoding,
            max_chars: *max_chars,
        },
        FieldShape::LengthPrefixed { width, encoding } => MarshalKind::StringLengthPrefixed {
            width: *width,
            encoding: *encoding,
        },
        FieldShape::FixedLength { encoding, chars } => MarshalKind::StringFixedLength {
            encoding: *encoding,
            chars: non_zero(*chars)?,
        },
    };
    Ok(kind)
}

type Resolved = Result<Arc<LayoutDescriptor>, SchemaError>;

/// Resolved layouts (and resolution failures) by record type. Entries are
/// inserted once and never removed.
static LAYOUTS: Lazy<RwLock<HashMap<TypeId, Resolved>>> = Lazy::new(Default::default);

thread_local! {
    /// Record types whose resolution is in progress on this thread.
    static RESOLVING: RefCell<Vec<TypeId>> = const { RefCell::new(Vec::new()) };
}

struct ResolveGuard(TypeId);

impl ResolveGuard {
    fn enter(key: TypeId) -> Option<Self> {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.contains(&key) {
                None
            } else {
                stack.push(key);
                Some(ResolveGuard(key))
            }
        })
    }
}

impl Drop for ResolveGuard {
    fn drop(&mut self) {
        RESOLVING.with(|stack| {
            let mut stack = stack.borrow_mut();
            if let Some(i) = stack.iter().rposition(|k| *k == self.0) {
                stack.remove(i);
            }
        });
    }
}

/// The resolved layout of `T`, resolving and caching it on first use.
///
/// Concurrent first calls may both resolve; the first insert wins and every
/// caller gets the cached entry.
pub fn layout_of<T: Record>() -> Result<Arc<LayoutDescriptor>, SchemaError> {
    let key = TypeId::of::<T>();
    if let Some(hit) = LAYOUTS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&key)
    {
        return hit.clone();
    }

    let schema = T::schema();
    let record = schema.name;
    let resolved = {
        let Some(_guard) = ResolveGuard::enter(key) else {
            // the outer resolution of `T` reports and caches this
            return Err(SchemaError::RecursiveLayout { record });
        };
        LayoutDescriptor::resolve(schema).map(Arc::new)
    };

    match &resolved {
        Ok(layout) => debug!(
            "resolved layout {record}: {} fields, static size {:?}",
            layout.fields.len(),
            layout.static_size
        ),
        Err(e) => debug!("layout {record} failed to resolve: {e}"),
    }

    LAYOUTS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(key)
        .or_insert(resolved)
        .clone()
}

/// Static size of `T`'s layout, if it has one.
pub fn size_of_record<T: Record>() -> Result<Option<u64>, SchemaError> {
    Ok(layout_of::<T>()?.static_size())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarshalError;
    use crate::value::RecordValue;

    fn resolve(schema: RecordSchema) -> Result<LayoutDescriptor, SchemaError> {
        LayoutDescriptor::resolve(schema)
    }

    struct Base;

    impl Record for Base {
        fn schema() -> RecordSchema {
            RecordSchema::sequential("Base")
                .field(FieldDef::u32("a"))
                .field(FieldDef::u32("b"))
        }

        fn from_fields(_: &mut RecordValue) -> Result<Self, MarshalError> {
            Ok(Base)
        }

        fn to_fields(&self, _: &mut RecordValue) {}
    }

    struct Loop;

    impl Record for Loop {
        fn schema() -> RecordSchema {
            RecordSchema::sequential("Loop")
                .field(FieldDef::u8("tag"))
                .field(FieldDef::record::<Loop>("next"))
        }

        fn from_fields(_: &mut RecordValue) -> Result<Self, MarshalError> {
            Ok(Loop)
        }

        fn to_fields(&self, _: &mut RecordValue) {}
    }

    #[test]
    fn sequential_offsets_and_size() {
        let layout = resolve(
            RecordSchema::sequential("Seq")
                .field(FieldDef::u32("a"))
                .field(FieldDef::u16("b"))
                .field(FieldDef::array("c", ScalarType::U16, 3))
                .field(FieldDef::fixed_string("d", TextEncoding::Utf16Le, 4)),
        )
        .unwrap();
        let offsets: Vec<_> = layout.fields().iter().map(|f| f.static_offset()).collect();
        assert_eq!(offsets, [Some(0), Some(4), Some(6), Some(12)]);
        assert_eq!(layout.static_size(), Some(20));
        assert_eq!(layout.field_index("c"), Some(2));
    }

    #[test]
    fn explicit_size_is_furthest_end() {
        let layout = resolve(
            RecordSchema::explicit("Union")
                .field(FieldDef::u32("a").at(0))
                .field(FieldDef::u32("b").at(4))
                .field(FieldDef::u16("c").at(4)),
        )
        .unwrap();
        assert_eq!(layout.static_size(), Some(8));
        assert_eq!(layout.field("c").unwrap().offset(), Some(4));
    }

    #[test]
    fn variable_fields_end_static_offsets() {
        let layout = resolve(
            RecordSchema::sequential("Var")
                .field(FieldDef::c_string("name", TextEncoding::Utf8))
                .field(FieldDef::u8("after")),
        )
        .unwrap();
        assert_eq!(layout.field("name").unwrap().static_offset(), Some(0));
        assert_eq!(layout.field("after").unwrap().static_offset(), None);
        assert_eq!(layout.static_size(), None);
    }

    #[test]
    fn inherited_fields_come_first() {
        let layout = resolve(
            RecordSchema::explicit("Derived")
                .inherits::<Base>()
                .field(FieldDef::u32("c").at(0))
                .field(FieldDef::u32("d").at(4)),
        )
        .unwrap();
        let names: Vec<_> = layout.fields().iter().map(|f| f.name()).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
        assert_eq!(layout.segments().len(), 2);
        assert_eq!(layout.segments()[0].mode(), LayoutMode::Sequential);
        assert_eq!(layout.segments()[1].fields(), 2..4);
        assert_eq!(layout.field("c").unwrap().static_offset(), Some(8));
        assert_eq!(layout.static_size(), Some(16));
    }

    #[test]
    fn default_and_field_byte_order() {
        let layout = resolve(
            RecordSchema::sequential("Order")
                .default_endian(Endian::Big)
                .field(FieldDef::u16("a"))
                .field(FieldDef::u16("b").little_endian()),
        )
        .unwrap();
        assert_eq!(layout.field("a").unwrap().endian(), Endian::Big);
        assert_eq!(layout.field("b").unwrap().endian(), Endian::Little);
    }

    #[test]
    fn schema_errors() {
        let missing_offset = resolve(RecordSchema::explicit("E").field(FieldDef::u8("a")));
        assert_eq!(
            missing_offset.unwrap_err(),
            SchemaError::MissingOffset { record: "E", field: "a" }
        );

        let unexpected = resolve(RecordSchema::sequential("S").field(FieldDef::u8("a").at(3)));
        assert!(matches!(unexpected, Err(SchemaError::UnexpectedOffset { .. })));

        let no_length = resolve(
            RecordSchema::sequential("S")
                .field(FieldDef::prefixed_array("items", ScalarType::U8.into())),
        );
        assert!(matches!(no_length, Err(SchemaError::MissingLengthField { .. })));

        let unknown = resolve(
            RecordSchema::sequential("S")
                .field(
                    FieldDef::prefixed_array("items", ScalarType::U8.into())
                        .length_from("count"),
                ),
        );
        assert!(matches!(unknown, Err(SchemaError::UnknownLengthField { .. })));

        let after = resolve(
            RecordSchema::sequential("S")
                .field(
                    FieldDef::prefixed_array("items", ScalarType::U8.into())
                        .length_from("count"),
                )
                .field(FieldDef::u8("count")),
        );
        assert!(matches!(after, Err(SchemaError::LengthFieldAfterArray { .. })));

        let not_integer = resolve(
            RecordSchema::sequential("S")
                .field(FieldDef::f32("count"))
                .field(
                    FieldDef::prefixed_array("items", ScalarType::U8.into())
                        .length_from("count"),
                ),
        );
        assert!(matches!(not_integer, Err(SchemaError::LengthFieldNotInteger { .. })));

        let float_enum = resolve(
            RecordSchema::sequential("S").field(FieldDef::enumeration("kind", ScalarType::F64)),
        );
        assert!(matches!(float_enum, Err(SchemaError::EnumNotInteger { .. })));

        let duplicate = resolve(
            RecordSchema::sequential("S")
                .field(FieldDef::u8("a"))
                .field(FieldDef::u16("a")),
        );
        assert!(matches!(duplicate, Err(SchemaError::DuplicateField { .. })));

        let zero = resolve(RecordSchema::sequential("S").field(FieldDef::bytes("pad", 0)));
        assert!(matches!(zero, Err(SchemaError::ZeroCount { .. })));
    }

    #[test]
    fn cache_returns_shared_layout() {
        let first = layout_of::<Base>().unwrap();
        let second = layout_of::<Base>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(size_of_record::<Base>().unwrap(), Some(8));
    }

    #[test]
    fn recursive_layout_fails_and_stays_failed() {
        let err = layout_of::<Loop>().unwrap_err();
        assert_eq!(err, SchemaError::RecursiveLayout { record: "Loop" });
        assert_eq!(layout_of::<Loop>().unwrap_err(), err);
    }
}
