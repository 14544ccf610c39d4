//! Record declarations.
//!
//! A record type describes itself once, through [`Record::schema`], with the
//! builder types in this module. The declaration is resolved into a
//! [`LayoutDescriptor`](crate::layout::LayoutDescriptor) on first use and
//! cached for the lifetime of the process.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use crate::codec::Endian;
use crate::error::{MarshalError, SchemaError};
use crate::layout::{layout_of, LayoutDescriptor};
use crate::text::TextEncoding;
use crate::value::RecordValue;

/// A Rust type with a binary record layout.
///
/// `from_fields` consumes the fields it owns from the flat field list (base
/// record fields included) and `to_fields` appends them in any order; the
/// engine looks fields up by name.
pub trait Record: Sized + 'static {
    fn schema() -> RecordSchema;

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError>;

    fn to_fields(&self, fields: &mut RecordValue);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutMode {
    /// Every field starts where the previous one ended.
    #[default]
    Sequential,
    /// Every field sits at its own declared offset; fields may overlap.
    Explicit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    U128,
    I128,
    F32,
    F64,
    Guid,
    BothU16,
    BothI16,
    BothU32,
    BothI32,
}

impl ScalarType {
    pub fn width(self) -> usize {
        match self {
            ScalarType::U8 | ScalarType::I8 => 1,
            ScalarType::U16 | ScalarType::I16 => 2,
            ScalarType::U32 | ScalarType::I32 | ScalarType::F32 => 4,
            ScalarType::BothU16 | ScalarType::BothI16 => 4,
            ScalarType::U64 | ScalarType::I64 | ScalarType::F64 => 8,
            ScalarType::BothU32 | ScalarType::BothI32 => 8,
            ScalarType::U128 | ScalarType::I128 | ScalarType::Guid => 16,
        }
    }

    /// Plain integers: usable as enum representations and length fields.
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ScalarType::U8
                | ScalarType::I8
                | ScalarType::U16
                | ScalarType::I16
                | ScalarType::U32
                | ScalarType::I32
                | ScalarType::U64
                | ScalarType::I64
                | ScalarType::U128
                | ScalarType::I128
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::U8 => "u8",
            ScalarType::I8 => "i8",
            ScalarType::U16 => "u16",
            ScalarType::I16 => "i16",
            ScalarType::U32 => "u32",
            ScalarType::I32 => "i32",
            ScalarType::U64 => "u64",
            ScalarType::I64 => "i64",
            ScalarType::U128 => "u128",
            ScalarType::I128 => "i128",
            ScalarType::F32 => "f32",
            ScalarType::F64 => "f64",
            ScalarType::Guid => "guid",
            ScalarType::BothU16 => "both-u16",
            ScalarType::BothI16 => "both-i16",
            ScalarType::BothU32 => "both-u32",
            ScalarType::BothI32 => "both-i32",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A reference to another record type, resolved when the referring layout is.
#[derive(Clone, Copy)]
pub struct RecordRef {
    name: &'static str,
    type_id: fn() -> TypeId,
    resolve: fn() -> Result<Arc<LayoutDescriptor>, SchemaError>,
}

impl RecordRef {
    pub fn of<T: Record>() -> Self {
        Self {
            name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>,
            resolve: layout_of::<T>,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        (self.type_id)()
    }

    pub fn resolve(&self) -> Result<Arc<LayoutDescriptor>, SchemaError> {
        (self.resolve)()
    }
}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RecordRef").field(&self.name).finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ElementType {
    Scalar(ScalarType),
    Record(RecordRef),
}

impl From<ScalarType> for ElementType {
    fn from(ty: ScalarType) -> Self {
        ElementType::Scalar(ty)
    }
}

impl ElementType {
    pub fn record<T: Record>() -> Self {
        ElementType::Record(RecordRef::of::<T>())
    }
}

/// Width of the count in front of a length-prefixed string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefixWidth {
    /// One-byte count ("AnsiBStr").
    Byte,
    /// Two-byte count ("BStr").
    Word,
}

impl PrefixWidth {
    pub fn width(self) -> usize {
        match self {
            PrefixWidth::Byte => 1,
            PrefixWidth::Word => 2,
        }
    }

    pub fn max_count(self) -> usize {
        match self {
            PrefixWidth::Byte => u8::MAX as usize,
            PrefixWidth::Word => u16::MAX as usize,
        }
    }
}

/// The declared shape of a field, before resolution.
#[derive(Debug, Clone)]
pub enum FieldShape {
    Scalar(ScalarType),
    Enum(ScalarType),
    Record(RecordRef),
    Bytes(usize),
    Array(ScalarType, usize),
    RecordArray(RecordRef, usize),
    PrefixedArray {
        element: ElementType,
        length_field: Option<&'static str>,
    },
    NullTerminated {
        encoding: TextEncoding,
        max_chars: Option<usize>,
    },
    LengthPrefixed {
        width: PrefixWidth,
        encoding: TextEncoding,
    },
    FixedLength {
        encoding: TextEncoding,
        chars: usize,
    },
}

/// One field declaration.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub(crate) name: &'static str,
    pub(crate) shape: FieldShape,
    pub(crate) offset: Option<u64>,
    pub(crate) endian: Option<Endian>,
}

macro_rules! scalar_constructors {
    ($($name:ident $name_be:ident => $ty:ident),*) => {$(
        pub fn $name(name: &'static str) -> Self {
            Self::scalar(name, ScalarType::$ty)
        }

        pub fn $name_be(name: &'static str) -> Self {
            Self::scalar(name, ScalarType::$ty).big_endian()
        }
    )*};
}

impl FieldDef {
    pub fn new(name: &'static str, shape: FieldShape) -> Self {
        Self {
            name,
            shape,
            offset: None,
            endian: None,
        }
    }

    pub fn scalar(name: &'static str, ty: ScalarType) -> Self {
        Self::new(name, FieldShape::Scalar(ty))
    }

    scalar_constructors!(
        u8 u8_be => U8,
        i8 i8_be => I8,
        u16 u16_be => U16,
        i16 i16_be => I16,
        u32 u32_be => U32,
        i32 i32_be => I32,
        u64 u64_be => U64,
        i64 i64_be => I64,
        u128 u128_be => U128,
        i128 i128_be => I128,
        f32 f32_be => F32,
        f64 f64_be => F64,
        guid guid_be => Guid
    );

    pub fn both_u16(name: &'static str) -> Self {
        Self::scalar(name, ScalarType::BothU16)
    }

    pub fn both_i16(name: &'static str) -> Self {
        Self::scalar(name, ScalarType::BothI16)
    }

    pub fn both_u32(name: &'static str) -> Self {
        Self::scalar(name, ScalarType::BothU32)
    }

    pub fn both_i32(name: &'static str) -> Self {
        Self::scalar(name, ScalarType::BothI32)
    }

    /// An enumeration stored as the integer `repr`.
    pub fn enumeration(name: &'static str, repr: ScalarType) -> Self {
        Self::new(name, FieldShape::Enum(repr))
    }

    pub fn record<T: Record>(name: &'static str) -> Self {
        Self::new(name, FieldShape::Record(RecordRef::of::<T>()))
    }

    pub fn bytes(name: &'static str, len: usize) -> Self {
        Self::new(name, FieldShape::Bytes(len))
    }

    pub fn array(name: &'static str, element: ScalarType, count: usize) -> Self {
        Self::new(name, FieldShape::Array(element, count))
    }

    pub fn record_array<T: Record>(name: &'static str, count: usize) -> Self {
        Self::new(name, FieldShape::RecordArray(RecordRef::of::<T>(), count))
    }

    /// An array whose element count lives in an earlier integer field.
    /// The count field is linked with [`FieldDef::length_from`].
    pub fn prefixed_array(name: &'static str, element: ElementType) -> Self {
        Self::new(
            name,
            FieldShape::PrefixedArray {
                element,
                length_field: None,
            },
        )
    }

    pub fn length_from(mut self, length_field: &'static str) -> Self {
        if let FieldShape::PrefixedArray {
            length_field: ref mut linked,
            ..
        } = self.shape
        {
            *linked = Some(length_field);
        }
        self
    }

    pub fn c_string(name: &'static str, encoding: TextEncoding) -> Self {
        Self::new(
            name,
            FieldShape::NullTerminated {
                encoding,
                max_chars: None,
            },
        )
    }

    /// A null-terminated string whose terminator must appear within
    /// `max_chars` code units.
    pub fn c_string_max(name: &'static str, encoding: TextEncoding, max_chars: usize) -> Self {
        Self::new(
            name,
            FieldShape::NullTerminated {
                encoding,
                max_chars: Some(max_chars),
            },
        )
    }

    /// One-byte character count followed by the characters.
    pub fn ansi_bstr(name: &'static str, encoding: TextEncoding) -> Self {
        Self::new(
            name,
            FieldShape::LengthPrefixed {
                width: PrefixWidth::Byte,
                encoding,
            },
        )
    }

    /// Two-byte character count followed by UTF-16 characters.
    pub fn bstr(name: &'static str) -> Self {
        Self::new(
            name,
            FieldShape::LengthPrefixed {
                width: PrefixWidth::Word,
                encoding: TextEncoding::Utf16Le,
            },
        )
    }

    pub fn prefixed_string(name: &'static str, width: PrefixWidth, encoding: TextEncoding) -> Self {
        Self::new(name, FieldShape::LengthPrefixed { width, encoding })
    }

    pub fn fixed_string(name: &'static str, encoding: TextEncoding, chars: usize) -> Self {
        Self::new(name, FieldShape::FixedLength { encoding, chars })
    }

    /// Places the field at `offset` bytes from the start of its record
    /// (explicit layouts only).
    pub fn at(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn big_endian(mut self) -> Self {
        self.endian = Some(Endian::Big);
        self
    }

    pub fn little_endian(mut self) -> Self {
        self.endian = Some(Endian::Little);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn shape(&self) -> &FieldShape {
        &self.shape
    }
}

/// The declaration of one record type.
#[derive(Debug, Clone)]
pub struct RecordSchema {
    pub(crate) name: &'static str,
    pub(crate) mode: LayoutMode,
    pub(crate) base: Option<RecordRef>,
    pub(crate) endian: Endian,
    pub(crate) fields: Vec<FieldDef>,
}

impl RecordSchema {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            mode: LayoutMode::default(),
            base: None,
            endian: Endian::default(),
            fields: Vec::new(),
        }
    }

    pub fn sequential(name: &'static str) -> Self {
        Self::new(name)
    }

    pub fn explicit(name: &'static str) -> Self {
        Self::new(name).mode(LayoutMode::Explicit)
    }

    pub fn mode(mut self, mode: LayoutMode) -> Self {
        self.mode = mode;
        self
    }

    /// Prepends the fields of `T`; they keep `T`'s own placement rules.
    pub fn inherits<T: Record>(mut self) -> Self {
        self.base = Some(RecordRef::of::<T>());
        self
    }

    /// Byte order for every field that does not set its own.
    pub fn default_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }
}
