//! Declarative binary record marshaling.
//!
//! A type implements [`Record`] by declaring its layout once with
//! [`RecordSchema`]; the engine resolves the declaration into a cached
//! [`LayoutDescriptor`] and reads or writes the type over any cursor.
//!
//! ```
//! use strux_core::{
//!     read_record_at, record_to_vec, FieldDef, MarshalError, Record, RecordSchema, RecordValue,
//! };
//!
//! struct Pair {
//!     a: u32,
//!     b: u16,
//! }
//!
//! impl Record for Pair {
//!     fn schema() -> RecordSchema {
//!         RecordSchema::sequential("Pair")
//!             .field(FieldDef::u32("a"))
//!             .field(FieldDef::u16("b"))
//!     }
//!
//!     fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
//!         Ok(Pair { a: fields.take("a")?, b: fields.take("b")? })
//!     }
//!
//!     fn to_fields(&self, fields: &mut RecordValue) {
//!         fields.push("a", self.a);
//!         fields.push("b", self.b);
//!     }
//! }
//!
//! let data = [0x00, 0x01, 0x02, 0x03, 0x04, 0x05];
//! let mut pos = 0;
//! let pair: Pair = read_record_at(&data, &mut pos).unwrap();
//! assert_eq!((pair.a, pair.b, pos), (0x03020100, 0x0504, 6));
//! assert_eq!(record_to_vec(&pair).unwrap(), data);
//! ```

pub mod both_endian;
pub mod codec;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod formats;
pub mod layout;
pub mod marshal;
pub mod schema;
pub mod text;
pub mod value;

pub use both_endian::BothEndian;
pub use codec::{Endian, Guid, Primitive};
pub use cursor::{
    Cursor, ReadCursor, SliceCursor, SliceCursorMut, StreamCursor, VecCursor, WriteCursor,
};
pub use engine::{
    read_record, read_record_at, read_record_from, read_value, record_to_vec, write_record,
    write_record_at, write_record_to, write_value,
};
pub use error::{MarshalError, Result, SchemaError};
pub use layout::{
    layout_of, size_of_record, Element, FieldDescriptor, LayoutDescriptor, MarshalKind, Segment,
};
pub use schema::{
    ElementType, FieldDef, FieldShape, LayoutMode, PrefixWidth, Record, RecordRef, RecordSchema,
    ScalarType,
};
pub use text::TextEncoding;
pub use value::{
    record_from_value, record_to_value, FromValue, IntoValue, RecordValue, Scalar, Value,
};
