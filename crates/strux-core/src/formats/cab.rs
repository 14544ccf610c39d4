//! Microsoft Cabinet (`.cab`) directory structures.
//!
//! A cabinet starts with a fixed 36-byte `CFHEADER`, optionally followed by a
//! reserve block and the names of the previous and next cabinets in a set.
//! Then come the `CFFOLDER` entries and, at `files_offset`, the `CFFILE`
//! entries with their names. Compressed data blocks are not decoded.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use encoding_rs::WINDOWS_1252;
use log::{debug, warn};

use super::FormatError;
use crate::cursor::{Cursor, ReadCursor, StreamCursor, VecCursor, WriteCursor};
use crate::engine::{read_record, write_record};
use crate::error::{MarshalError, Result};
use crate::marshal::{read_c_string, write_c_string};
use crate::schema::{FieldDef, Record, RecordSchema, ScalarType};
use crate::text::TextEncoding;
use crate::value::RecordValue;

pub const CAB_SIGNATURE: [u8; 4] = *b"MSCF";

/// `flags`: a previous cabinet is named after the header.
pub const FLAG_PREV_CABINET: u16 = 0x0001;
/// `flags`: a next cabinet is named after the header.
pub const FLAG_NEXT_CABINET: u16 = 0x0002;
/// `flags`: a reserve block follows the header.
pub const FLAG_RESERVE_PRESENT: u16 = 0x0004;

/// `attribs`: the file name is UTF-8 rather than the system code page.
pub const ATTRIB_NAME_IS_UTF: u16 = 0x0080;

const MAX_NAME: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CabHeader {
    pub signature: [u8; 4],
    pub reserved1: u32,
    pub cabinet_size: u32,
    pub reserved2: u32,
    pub files_offset: u32,
    pub reserved3: u32,
    pub version_minor: u8,
    pub version_major: u8,
    pub folder_count: u16,
    pub file_count: u16,
    pub flags: u16,
    pub set_id: u16,
    pub cabinet_index: u16,
}

impl Default for CabHeader {
    fn default() -> Self {
        Self {
            signature: CAB_SIGNATURE,
            reserved1: 0,
            cabinet_size: 0,
            reserved2: 0,
            files_offset: 0,
            reserved3: 0,
            version_minor: 3,
            version_major: 1,
            folder_count: 0,
            file_count: 0,
            flags: 0,
            set_id: 0,
            cabinet_index: 0,
        }
    }
}

impl Record for CabHeader {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("CabHeader")
            .field(FieldDef::bytes("signature", 4))
            .field(FieldDef::u32("reserved1"))
            .field(FieldDef::u32("cabinet_size"))
            .field(FieldDef::u32("reserved2"))
            .field(FieldDef::u32("files_offset"))
            .field(FieldDef::u32("reserved3"))
            .field(FieldDef::u8("version_minor"))
            .field(FieldDef::u8("version_major"))
            .field(FieldDef::u16("folder_count"))
            .field(FieldDef::u16("file_count"))
            .field(FieldDef::u16("flags"))
            .field(FieldDef::u16("set_id"))
            .field(FieldDef::u16("cabinet_index"))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self> {
        Ok(Self {
            signature: fields.take("signature")?,
            reserved1: fields.take("reserved1")?,
            cabinet_size: fields.take("cabinet_size")?,
            reserved2: fields.take("reserved2")?,
            files_offset: fields.take("files_offset")?,
            reserved3: fields.take("reserved3")?,
            version_minor: fields.take("version_minor")?,
            version_major: fields.take("version_major")?,
            folder_count: fields.take("folder_count")?,
            file_count: fields.take("file_count")?,
            flags: fields.take("flags")?,
            set_id: fields.take("set_id")?,
            cabinet_index: fields.take("cabinet_index")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("signature", self.signature);
        fields.push("reserved1", self.reserved1);
        fields.push("cabinet_size", self.cabinet_size);
        fields.push("reserved2", self.reserved2);
        fields.push("files_offset", self.files_offset);
        fields.push("reserved3", self.reserved3);
        fields.push("version_minor", self.version_minor);
        fields.push("version_major", self.version_major);
        fields.push("folder_count", self.folder_count);
        fields.push("file_count", self.file_count);
        fields.push("flags", self.flags);
        fields.push("set_id", self.set_id);
        fields.push("cabinet_index", self.cabinet_index);
    }
}

/// Sizes of the per-cabinet, per-folder and per-data-block reserved areas,
/// and the per-cabinet reserved bytes themselves.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CabReserve {
    pub folder_size: u8,
    pub data_size: u8,
    pub header_data: Vec<u8>,
}

impl Record for CabReserve {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("CabReserve")
            .field(FieldDef::u16("header_size"))
            .field(FieldDef::u8("folder_size"))
            .field(FieldDef::u8("data_size"))
            .field(
                FieldDef::prefixed_array("header_data", ScalarType::U8.into())
                    .length_from("header_size"),
            )
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self> {
        Ok(Self {
            folder_size: fields.take("folder_size")?,
            data_size: fields.take("data_size")?,
            header_data: fields.take("header_data")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("folder_size", self.folder_size);
        fields.push("data_size", self.data_size);
        fields.push("header_data", self.header_data.clone());
    }
}

/// Name of a neighbouring cabinet and of the disk it lives on.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CabinetLink {
    pub cabinet: String,
    pub disk: String,
}

impl Record for CabinetLink {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("CabinetLink")
            .field(FieldDef::c_string_max("cabinet", ansi(), MAX_NAME))
            .field(FieldDef::c_string_max("disk", ansi(), MAX_NAME))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self> {
        Ok(Self {
            cabinet: fields.take("cabinet")?,
            disk: fields.take("disk")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("cabinet", self.cabinet.as_str());
        fields.push("disk", self.disk.as_str());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CabFolder {
    pub data_offset: u32,
    pub data_blocks: u16,
    pub compression: u16,
    /// Per-folder reserved bytes, `CabReserve::folder_size` long.
    pub reserve: Vec<u8>,
}

impl CabFolder {
    pub fn compression_name(&self) -> &'static str {
        match self.compression & 0x000F {
            0 => "none",
            1 => "MSZIP",
            2 => "Quantum",
            3 => "LZX",
            _ => "unknown",
        }
    }
}

impl Record for CabFolder {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("CabFolder")
            .field(FieldDef::u32("data_offset"))
            .field(FieldDef::u16("data_blocks"))
            .field(FieldDef::u16("compression"))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self> {
        Ok(Self {
            data_offset: fields.take("data_offset")?,
            data_blocks: fields.take("data_blocks")?,
            compression: fields.take("compression")?,
            reserve: Vec::new(),
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("data_offset", self.data_offset);
        fields.push("data_blocks", self.data_blocks);
        fields.push("compression", self.compression);
    }
}

/// The fixed part of a `CFFILE` entry; the name follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CabFileHeader {
    pub size: u32,
    pub folder_offset: u32,
    pub folder_index: u16,
    pub date: u16,
    pub time: u16,
    pub attribs: u16,
}

/// Cabinet names without the UTF-8 attribute.
fn ansi() -> TextEncoding {
    TextEncoding::CodePage(WINDOWS_1252)
}

impl CabFileHeader {
    pub fn name_encoding(&self) -> TextEncoding {
        if self.attribs & ATTRIB_NAME_IS_UTF != 0 {
            TextEncoding::Utf8
        } else {
            ansi()
        }
    }

    /// `(year, month, day, hour, minute, second)` from the DOS date and time.
    pub fn modified(&self) -> (u16, u8, u8, u8, u8, u8) {
        (
            1980 + (self.date >> 9),
            ((self.date >> 5) & 0x0F) as u8,
            (self.date & 0x1F) as u8,
            (self.time >> 11) as u8,
            ((self.time >> 5) & 0x3F) as u8,
            ((self.time & 0x1F) * 2) as u8,
        )
    }
}

impl Record for CabFileHeader {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("CabFileHeader")
            .field(FieldDef::u32("size"))
            .field(FieldDef::u32("folder_offset"))
            .field(FieldDef::u16("folder_index"))
            .field(FieldDef::u16("date"))
            .field(FieldDef::u16("time"))
            .field(FieldDef::u16("attribs"))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self> {
        Ok(Self {
            size: fields.take("size")?,
            folder_offset: fields.take("folder_offset")?,
            folder_index: fields.take("folder_index")?,
            date: fields.take("date")?,
            time: fields.take("time")?,
            attribs: fields.take("attribs")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("size", self.size);
        fields.push("folder_offset", self.folder_offset);
        fields.push("folder_index", self.folder_index);
        fields.push("date", self.date);
        fields.push("time", self.time);
        fields.push("attribs", self.attribs);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CabFile {
    pub header: CabFileHeader,
    pub name: String,
}

/// The directory of a cabinet: everything but the compressed data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cabinet {
    pub header: CabHeader,
    pub reserve: Option<CabReserve>,
    pub prev: Option<CabinetLink>,
    pub next: Option<CabinetLink>,
    pub folders: Vec<CabFolder>,
    pub files: Vec<CabFile>,
}

impl Cabinet {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let mut file = BufReader::new(File::open(path)?);
        Self::read(&mut file)
    }

    /// Reads the directory of the cabinet starting at the stream position.
    pub fn read<S: Read + Seek>(stream: &mut S) -> Result<Self, FormatError> {
        let mut cursor = StreamCursor::new(stream)?;
        let start = cursor.position();

        let header: CabHeader = read_record(&mut cursor)?;
        if header.signature != CAB_SIGNATURE {
            return Err(FormatError::BadSignature { format: "cabinet" });
        }
        let known = FLAG_PREV_CABINET | FLAG_NEXT_CABINET | FLAG_RESERVE_PRESENT;
        let unknown = header.flags & !known;
        if unknown != 0 {
            warn!("ignoring unknown cabinet flags {unknown:#06x}");
        }

        let reserve = if header.flags & FLAG_RESERVE_PRESENT != 0 {
            Some(read_record::<CabReserve, _>(&mut cursor)?)
        } else {
            None
        };
        let prev = if header.flags & FLAG_PREV_CABINET != 0 {
            Some(read_record::<CabinetLink, _>(&mut cursor)?)
        } else {
            None
        };
        let next = if header.flags & FLAG_NEXT_CABINET != 0 {
            Some(read_record::<CabinetLink, _>(&mut cursor)?)
        } else {
            None
        };

        let folder_reserve = reserve.as_ref().map_or(0, |r| r.folder_size as usize);
        let mut folders = Vec::with_capacity(header.folder_count as usize);
        for i in 0..header.folder_count {
            let mut folder: CabFolder =
                read_record(&mut cursor).map_err(|e| e.in_field(&format!("folders[{i}]")))?;
            folder.reserve = cursor.read_vec(folder_reserve)?;
            folders.push(folder);
        }

        cursor.set_position(start + u64::from(header.files_offset))?;
        let mut files = Vec::with_capacity(header.file_count as usize);
        for i in 0..header.file_count {
            let file = read_file(&mut cursor).map_err(|e| e.in_field(&format!("files[{i}]")))?;
            files.push(file);
        }

        debug!(
            "cabinet set {} #{}: {} folders, {} files",
            header.set_id,
            header.cabinet_index,
            folders.len(),
            files.len()
        );
        Ok(Self {
            header,
            reserve,
            prev,
            next,
            folders,
            files,
        })
    }

    /// Encodes the directory. Counts, flags and offsets in the header are
    /// recomputed from the contents; `cabinet_size` covers the directory
    /// only, since data blocks are not carried.
    pub fn to_vec(&self) -> Result<Vec<u8>, FormatError> {
        let mut header = self.header.clone();
        header.folder_count = count(self.folders.len(), "folders")?;
        header.file_count = count(self.files.len(), "files")?;
        header.flags &= !(FLAG_PREV_CABINET | FLAG_NEXT_CABINET | FLAG_RESERVE_PRESENT);
        if self.reserve.is_some() {
            header.flags |= FLAG_RESERVE_PRESENT;
        }
        if self.prev.is_some() {
            header.flags |= FLAG_PREV_CABINET;
        }
        if self.next.is_some() {
            header.flags |= FLAG_NEXT_CABINET;
        }

        let mut out = VecCursor::new();
        write_record(&mut out, &header)?;
        if let Some(reserve) = &self.reserve {
            write_record(&mut out, reserve)?;
        }
        for link in [&self.prev, &self.next].into_iter().flatten() {
            write_record(&mut out, link)?;
        }

        let folder_reserve = self.reserve.as_ref().map_or(0, |r| r.folder_size as usize);
        for (i, folder) in self.folders.iter().enumerate() {
            if folder.reserve.len() != folder_reserve {
                return Err(FormatError::Malformed {
                    format: "cabinet",
                    reason: format!(
                        "folder {i} has {} reserved bytes, the header declares {folder_reserve}",
                        folder.reserve.len()
                    ),
                });
            }
            write_record(&mut out, folder)?;
            out.write_all(&folder.reserve)?;
        }

        header.files_offset = offset(out.position())?;
        for file in &self.files {
            write_record(&mut out, &file.header)?;
            write_c_string(&mut out, file.header.name_encoding(), &file.name)?;
        }
        header.cabinet_size = offset(out.position())?;

        out.set_position(0)?;
        write_record(&mut out, &header)?;
        Ok(out.into_inner())
    }
}

fn read_file<C: ReadCursor + ?Sized>(cursor: &mut C) -> Result<CabFile> {
    let header: CabFileHeader = read_record(cursor)?;
    let name = read_c_string(cursor, header.name_encoding(), Some(MAX_NAME))
        .map_err(|e| e.in_field("name"))?;
    Ok(CabFile { header, name })
}

fn count(len: usize, what: &str) -> Result<u16, FormatError> {
    u16::try_from(len).map_err(|_| FormatError::Malformed {
        format: "cabinet",
        reason: format!("{len} {what} do not fit in a cabinet"),
    })
}

fn offset(position: u64) -> Result<u32, FormatError> {
    u32::try_from(position).map_err(|_| {
        MarshalError::InvalidValue(format!("offset {position} exceeds 32 bits")).into()
    })
}
