use std::io::{Seek, SeekFrom};
use std::sync::Arc;

use encoding_rs::SHIFT_JIS;
use pretty_assertions::assert_eq;
use strux_core::{
    layout_of, read_record_at, read_record_from, record_to_vec, write_record_at, write_record_to,
    BothEndian, ElementType, FieldDef, Guid, MarshalError, PrefixWidth, Record, RecordSchema,
    RecordValue, ScalarType, TextEncoding,
};

#[derive(Debug, Clone, PartialEq)]
struct Union {
    a: u32,
    b: u32,
    c: u16,
}

impl Record for Union {
    fn schema() -> RecordSchema {
        RecordSchema::explicit("Union")
            .field(FieldDef::u32("a").at(0))
            .field(FieldDef::u32("b").at(4))
            .field(FieldDef::u16("c").at(4))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(Union {
            a: fields.take("a")?,
            b: fields.take("b")?,
            c: fields.take("c")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("a", self.a);
        fields.push("b", self.b);
        fields.push("c", self.c);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Halves {
    a: u32,
    b: u32,
}

impl Record for Halves {
    fn schema() -> RecordSchema {
        RecordSchema::explicit("Halves")
            .field(FieldDef::u32("a").at(0))
            .field(FieldDef::u32("b").at(4))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(Halves {
            a: fields.take("a")?,
            b: fields.take("b")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("a", self.a);
        fields.push("b", self.b);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Pair {
    a: u32,
    b: u16,
}

impl Record for Pair {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("Pair")
            .field(FieldDef::u32("a"))
            .field(FieldDef::u16("b"))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(Pair {
            a: fields.take("a")?,
            b: fields.take("b")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("a", self.a);
        fields.push("b", self.b);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Counted {
    items: Vec<u8>,
}

impl Record for Counted {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("Counted")
            .field(FieldDef::u32("count"))
            .field(FieldDef::prefixed_array("items", ScalarType::U8.into()).length_from("count"))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(Counted {
            items: fields.take("items")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("items", self.items.clone());
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Wide {
    text: String,
}

impl Record for Wide {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("Wide").field(FieldDef::c_string("text", TextEncoding::Utf16Le))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(Wide {
            text: fields.take("text")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("text", self.text.as_str());
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Base {
    a: u32,
    b: u32,
}

impl Record for Base {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("Base")
            .field(FieldDef::u32("a"))
            .field(FieldDef::u32("b"))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(Base {
            a: fields.take("a")?,
            b: fields.take("b")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("a", self.a);
        fields.push("b", self.b);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ExplicitDerived {
    base: Base,
    c: u32,
    d: u32,
}

impl Record for ExplicitDerived {
    fn schema() -> RecordSchema {
        RecordSchema::explicit("ExplicitDerived")
            .inherits::<Base>()
            .field(FieldDef::u32("c").at(0))
            .field(FieldDef::u32("d").at(4))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(ExplicitDerived {
            base: Base::from_fields(fields)?,
            c: fields.take("c")?,
            d: fields.take("d")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        self.base.to_fields(fields);
        fields.push("c", self.c);
        fields.push("d", self.d);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct SequentialDerived {
    base: Base,
    c: u32,
    d: u32,
}

impl Record for SequentialDerived {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("SequentialDerived")
            .inherits::<Base>()
            .field(FieldDef::u32("c"))
            .field(FieldDef::u32("d"))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(SequentialDerived {
            base: Base::from_fields(fields)?,
            c: fields.take("c")?,
            d: fields.take("d")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        self.base.to_fields(fields);
        fields.push("c", self.c);
        fields.push("d", self.d);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    File = 1,
    Directory = 2,
}

impl TryFrom<u16> for Kind {
    type Error = u16;

    fn try_from(value: u16) -> Result<Self, u16> {
        match value {
            1 => Ok(Kind::File),
            2 => Ok(Kind::Directory),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Point {
    x: i16,
    y: i16,
}

impl Record for Point {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("Point")
            .field(FieldDef::i16("x"))
            .field(FieldDef::i16("y"))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(Point {
            x: fields.take("x")?,
            y: fields.take("y")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("x", self.x);
        fields.push("y", self.y);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Entry {
    id: u8,
    name: String,
}

impl Record for Entry {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("Entry")
            .field(FieldDef::u8("id"))
            .field(FieldDef::c_string("name", TextEncoding::Utf8))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(Entry {
            id: fields.take("id")?,
            name: fields.take("name")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("id", self.id);
        fields.push("name", self.name.as_str());
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Everything {
    magic: [u8; 4],
    kind: Kind,
    id: Guid,
    size: BothEndian<u32>,
    stamp: u64,
    ratio: f64,
    wide: i128,
    origin: Point,
    corners: [Point; 2],
    samples: [u16; 3],
    entries: Vec<Entry>,
    title: String,
    label: String,
    tag: String,
    code: String,
}

impl Record for Everything {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("Everything")
            .field(FieldDef::bytes("magic", 4))
            .field(FieldDef::enumeration("kind", ScalarType::U16))
            .field(FieldDef::guid("id"))
            .field(FieldDef::both_u32("size"))
            .field(FieldDef::u64_be("stamp"))
            .field(FieldDef::f64("ratio"))
            .field(FieldDef::i128("wide"))
            .field(FieldDef::record::<Point>("origin"))
            .field(FieldDef::record_array::<Point>("corners", 2))
            .field(FieldDef::array("samples", ScalarType::U16, 3))
            .field(FieldDef::u16("entry_count"))
            .field(
                FieldDef::prefixed_array("entries", ElementType::record::<Entry>())
                    .length_from("entry_count"),
            )
            .field(FieldDef::c_string("title", TextEncoding::Utf16Be))
            .field(FieldDef::bstr("label"))
            .field(FieldDef::ansi_bstr("tag", TextEncoding::CodePage(SHIFT_JIS)))
            .field(FieldDef::fixed_string("code", TextEncoding::Ascii, 6))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        let corners: Vec<Point> = fields.take_records("corners")?;
        Ok(Everything {
            magic: fields.take("magic")?,
            kind: fields.take_enum::<Kind, u16>("kind")?,
            id: fields.take("id")?,
            size: fields.take("size")?,
            stamp: fields.take("stamp")?,
            ratio: fields.take("ratio")?,
            wide: fields.take("wide")?,
            origin: fields.take_record("origin")?,
            corners: corners
                .try_into()
                .map_err(|_| MarshalError::InvalidValue("expected two corners".to_string()))?,
            samples: fields.take("samples")?,
            entries: fields.take_records("entries")?,
            title: fields.take("title")?,
            label: fields.take("label")?,
            tag: fields.take("tag")?,
            code: fields.take("code")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("magic", self.magic);
        fields.push("kind", self.kind as u16);
        fields.push("id", self.id);
        fields.push("size", self.size);
        fields.push("stamp", self.stamp);
        fields.push("ratio", self.ratio);
        fields.push("wide", self.wide);
        fields.push_record("origin", &self.origin);
        fields.push_records("corners", &self.corners);
        fields.push("samples", self.samples);
        fields.push_records("entries", &self.entries);
        fields.push("title", self.title.as_str());
        fields.push("label", self.label.as_str());
        fields.push("tag", self.tag.as_str());
        fields.push("code", self.code.as_str());
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Outer {
    entries: Vec<Entry>,
}

impl Record for Outer {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("Outer")
            .field(FieldDef::u8("count"))
            .field(
                FieldDef::prefixed_array("entries", ElementType::record::<Entry>())
                    .length_from("count"),
            )
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(Outer {
            entries: fields.take_records("entries")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push_records("entries", &self.entries);
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Slot {
    name: String,
}

impl Record for Slot {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("Slot")
            .field(FieldDef::fixed_string("name", TextEncoding::Utf8, 4))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self, MarshalError> {
        Ok(Slot {
            name: fields.take("name")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("name", self.name.as_str());
    }
}

fn everything() -> Everything {
    Everything {
        magic: *b"STRX",
        kind: Kind::Directory,
        id: Guid {
            data1: 0x0011_2233,
            data2: 0x4455,
            data3: 0x6677,
            data4: [0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF],
        },
        size: BothEndian::new(0x1234_5678),
        stamp: 0x0102_0304_0506_0708,
        ratio: -0.25,
        wide: -(1i128 << 100),
        origin: Point { x: -1, y: 2 },
        corners: [Point { x: 0, y: 0 }, Point { x: 640, y: -480 }],
        samples: [1, 2, 0xFFFF],
        entries: vec![
            Entry {
                id: 1,
                name: "first".to_string(),
            },
            Entry {
                id: 2,
                name: "zw\u{e4}ite".to_string(),
            },
        ],
        title: "\u{3a9}".to_string(),
        label: "hi".to_string(),
        tag: "\u{30c6}\u{30b9}\u{30c8}".to_string(),
        code: "ABC".to_string(),
    }
}

#[test]
fn explicit_overlap_reads_shared_bytes() {
    let mut buf = [0u8; 8];
    let mut pos = 0;
    let halves = Halves {
        a: 0x0302_0100,
        b: 0x0706_0504,
    };
    assert!(write_record_at(&mut buf, &mut pos, &halves).unwrap());
    assert_eq!(pos, 8);

    let mut pos = 0;
    let union: Union = read_record_at(&buf, &mut pos).unwrap();
    assert_eq!(union.c, 0x0504);
    assert_eq!(union.a, 0x0302_0100);
    assert_eq!(pos, 8);
    assert_eq!(layout_of::<Union>().unwrap().static_size(), Some(8));
}

#[test]
fn sequential_fields_follow_each_other() {
    let data = hex::decode("000102030405").unwrap();
    let mut pos = 0;
    let pair: Pair = read_record_at(&data, &mut pos).unwrap();
    assert_eq!(pair, Pair { a: 0x0302_0100, b: 0x0504 });
    assert_eq!(pos, 6);
}

#[test]
fn length_prefixed_array_uses_earlier_field() {
    let data = hex::decode("0400000000010203").unwrap();
    let mut pos = 0;
    let counted: Counted = read_record_at(&data, &mut pos).unwrap();
    assert_eq!(counted.items, [0, 1, 2, 3]);
    assert_eq!(pos, 8);
    assert_eq!(record_to_vec(&counted).unwrap(), data);
}

#[test]
fn wide_null_terminated_string() {
    let data = hex::decode("4100420043000000").unwrap();
    let mut pos = 0;
    let wide: Wide = read_record_at(&data, &mut pos).unwrap();
    assert_eq!(wide.text, "ABC");
    assert_eq!(pos, 8);
    assert_eq!(record_to_vec(&wide).unwrap(), data);
}

#[test]
fn inherited_fields_read_first_in_both_modes() {
    let data = hex::decode("01000000020000000300000004000000").unwrap();
    let base = Base { a: 1, b: 2 };

    let mut pos = 0;
    let explicit: ExplicitDerived = read_record_at(&data, &mut pos).unwrap();
    assert_eq!(
        explicit,
        ExplicitDerived {
            base: base.clone(),
            c: 3,
            d: 4
        }
    );
    assert_eq!(pos, 16);

    let mut pos = 0;
    let sequential: SequentialDerived = read_record_at(&data, &mut pos).unwrap();
    assert_eq!(
        sequential,
        SequentialDerived {
            base,
            c: 3,
            d: 4
        }
    );
    assert_eq!(pos, 16);

    assert_eq!(record_to_vec(&explicit).unwrap(), data);
    assert_eq!(record_to_vec(&sequential).unwrap(), data);
}

#[test]
fn exhausted_source_returns_nothing() {
    let data = [0xAA, 0xBB];
    let mut pos = 0;
    let err = read_record_at::<Halves>(&data, &mut pos).unwrap_err();
    assert!(err.is_end_of_data());
    assert!(matches!(
        err.root_cause(),
        MarshalError::UnexpectedEndOfData {
            offset: 0,
            needed: 4,
            available: 2
        }
    ));
    assert_eq!(pos, 0);
}

#[test]
fn every_kind_round_trips() {
    let value = everything();
    let bytes = record_to_vec(&value).unwrap();

    let mut pos = 0;
    let back: Everything = read_record_at(&bytes, &mut pos).unwrap();
    assert_eq!(back, value);
    assert_eq!(pos, bytes.len());

    assert_eq!(&bytes[..4], b"STRX");
    // kind, then the guid in mixed byte order
    assert_eq!(hex::encode(&bytes[4..22]), "020033221100554477668899aabbccddeeff");
    // both-endian size: little-endian copy first
    assert_eq!(hex::encode(&bytes[22..30]), "7856341212345678");
    assert_eq!(hex::encode(&bytes[30..38]), "0102030405060708");
    // bstr "hi", ansi bstr in Shift_JIS, fixed-length code
    assert!(hex::encode(&bytes).ends_with("02006800690006836583588367414243000000"));
}

#[test]
fn fixed_length_strings_trim_on_read() {
    let slot = Slot {
        name: "ab".to_string(),
    };
    let bytes = record_to_vec(&slot).unwrap();
    assert_eq!(bytes, b"ab\0\0");

    let mut pos = 0;
    let back: Slot = read_record_at(&bytes, &mut pos).unwrap();
    assert_eq!(back, slot);

    // trailing NULs in the value do not survive
    let padded = Slot {
        name: "ab\0".to_string(),
    };
    let mut pos = 0;
    let back: Slot = read_record_at(&record_to_vec(&padded).unwrap(), &mut pos).unwrap();
    assert_eq!(back.name, "ab");
    assert_ne!(back, padded);

    let long = Slot {
        name: "abcde".to_string(),
    };
    assert!(matches!(
        record_to_vec(&long).unwrap_err().root_cause(),
        MarshalError::InvalidValue(_)
    ));
}

#[test]
fn short_destination_is_not_written() {
    let pair = Pair { a: 1, b: 2 };
    let mut buf = [0xEEu8; 5];
    let mut pos = 0;
    assert!(!write_record_at(&mut buf, &mut pos, &pair).unwrap());
    assert_eq!(buf, [0xEE; 5]);
    assert_eq!(pos, 0);

    let mut buf = [0xEEu8; 8];
    let mut pos = 2;
    assert!(write_record_at(&mut buf, &mut pos, &pair).unwrap());
    assert_eq!(pos, 8);
    assert_eq!(buf, [0xEE, 0xEE, 1, 0, 0, 0, 2, 0]);
}

#[test]
fn full_stream_is_reported_and_rewound() {
    let pair = Pair { a: 0xAABB_CCDD, b: 2 };
    let mut backing = [0u8; 6];
    let mut stream = std::io::Cursor::new(&mut backing[..]);
    stream.seek(SeekFrom::Start(4)).unwrap();

    assert!(!write_record_to(&mut stream, &pair).unwrap());
    assert_eq!(stream.stream_position().unwrap(), 4);

    stream.seek(SeekFrom::Start(0)).unwrap();
    assert!(write_record_to(&mut stream, &pair).unwrap());
    assert_eq!(stream.stream_position().unwrap(), 6);
    assert_eq!(backing, [0xDD, 0xCC, 0xBB, 0xAA, 2, 0]);
}

#[test]
fn errors_name_the_failing_field() {
    // second entry's name is not UTF-8
    let data = hex::decode("020161000202ff00").unwrap();
    let mut pos = 0;
    let err = read_record_at::<Outer>(&data, &mut pos).unwrap_err();
    assert_eq!(err.field_path(), Some("Outer.entries[1].name"));
    assert!(matches!(err.root_cause(), MarshalError::Encoding { .. }));
    assert_eq!(pos, 0);
}

#[test]
fn length_prefix_counts_characters() {
    let schema = RecordSchema::sequential("Prefixed").field(FieldDef::prefixed_string(
        "name",
        PrefixWidth::Byte,
        TextEncoding::Utf16Le,
    ));
    let layout = strux_core::LayoutDescriptor::resolve(schema).unwrap();
    let record = RecordValue::new().with("name", "ok");
    let mut out = strux_core::VecCursor::new();
    strux_core::write_value(&mut out, &layout, &record).unwrap();
    assert_eq!(out.into_inner(), [2, b'o', 0, b'k', 0]);
}

#[test]
fn stream_round_trip() {
    let mut file = tempfile::tempfile().unwrap();
    let value = everything();
    assert!(write_record_to(&mut file, &value).unwrap());
    let pair = Pair { a: 7, b: 8 };
    assert!(write_record_to(&mut file, &pair).unwrap());

    file.seek(SeekFrom::Start(0)).unwrap();
    let back: Everything = read_record_from(&mut file).unwrap();
    assert_eq!(back, value);
    let next: Pair = read_record_from(&mut file).unwrap();
    assert_eq!(next, pair);

    let err = read_record_from::<Pair, _>(&mut file).unwrap_err();
    assert!(err.is_end_of_data());
}

#[test]
fn concurrent_resolution_converges() {
    #[derive(Debug)]
    struct Fresh;

    impl Record for Fresh {
        fn schema() -> RecordSchema {
            RecordSchema::sequential("Fresh")
                .field(FieldDef::u64("a"))
                .field(FieldDef::array("b", ScalarType::U8, 8))
        }

        fn from_fields(_: &mut RecordValue) -> Result<Self, MarshalError> {
            Ok(Fresh)
        }

        fn to_fields(&self, _: &mut RecordValue) {}
    }

    let layouts: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| layout_of::<Fresh>().unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let cached = layout_of::<Fresh>().unwrap();
    for layout in &layouts {
        assert_eq!(layout.static_size(), Some(16));
    }
    assert!(layouts.iter().all(|layout| Arc::ptr_eq(layout, &cached)));
}
