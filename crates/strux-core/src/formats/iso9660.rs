//! ISO 9660 volume descriptors and directory records.
//!
//! Volume descriptors occupy whole sectors from sector 16 on and end with a
//! terminator. Most numeric fields are stored in both byte orders; the path
//! table locations come in separate little- and big-endian copies.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use log::{debug, warn};

use super::FormatError;
use crate::both_endian::BothEndian;
use crate::codec::{read_scalar, Endian};
use crate::cursor::{Cursor, StreamCursor};
use crate::engine::read_record;
use crate::error::Result;
use crate::schema::{FieldDef, Record, RecordSchema, ScalarType};
use crate::text::TextEncoding;
use crate::value::RecordValue;

pub const SECTOR_SIZE: u64 = 2048;
/// First sector of the volume descriptor set.
pub const DESCRIPTOR_START: u64 = 16;
pub const STANDARD_IDENTIFIER: &str = "CD001";

const MAX_DESCRIPTORS: u64 = 64;

/// Directory record `flags`: the entry is a directory.
pub const FLAG_DIRECTORY: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeDescriptorType {
    BootRecord,
    Primary,
    Supplementary,
    Partition,
    Terminator,
    Other(u8),
}

impl From<u8> for VolumeDescriptorType {
    fn from(value: u8) -> Self {
        match value {
            0 => VolumeDescriptorType::BootRecord,
            1 => VolumeDescriptorType::Primary,
            2 => VolumeDescriptorType::Supplementary,
            3 => VolumeDescriptorType::Partition,
            255 => VolumeDescriptorType::Terminator,
            other => VolumeDescriptorType::Other(other),
        }
    }
}

impl From<VolumeDescriptorType> for u8 {
    fn from(value: VolumeDescriptorType) -> Self {
        match value {
            VolumeDescriptorType::BootRecord => 0,
            VolumeDescriptorType::Primary => 1,
            VolumeDescriptorType::Supplementary => 2,
            VolumeDescriptorType::Partition => 3,
            VolumeDescriptorType::Terminator => 255,
            VolumeDescriptorType::Other(other) => other,
        }
    }
}

/// The seven bytes every volume descriptor starts with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorHeader {
    pub descriptor_type: VolumeDescriptorType,
    pub identifier: String,
    pub version: u8,
}

impl DescriptorHeader {
    pub fn new(descriptor_type: VolumeDescriptorType) -> Self {
        Self {
            descriptor_type,
            identifier: STANDARD_IDENTIFIER.to_string(),
            version: 1,
        }
    }
}

impl Record for DescriptorHeader {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("DescriptorHeader")
            .field(FieldDef::enumeration("descriptor_type", ScalarType::U8))
            .field(FieldDef::fixed_string("identifier", TextEncoding::Ascii, 5))
            .field(FieldDef::u8("version"))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self> {
        Ok(Self {
            descriptor_type: fields.take_enum::<VolumeDescriptorType, u8>("descriptor_type")?,
            identifier: fields.take("identifier")?,
            version: fields.take("version")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("descriptor_type", u8::from(self.descriptor_type));
        fields.push("identifier", self.identifier.as_str());
        fields.push("version", self.version);
    }
}

/// A directory entry. `length` covers the record including the identifier
/// and its padding byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub length: u8,
    pub extended_attribute_length: u8,
    pub extent: BothEndian<u32>,
    pub data_length: BothEndian<u32>,
    pub recorded: [u8; 7],
    pub flags: u8,
    pub file_unit_size: u8,
    pub interleave_gap: u8,
    pub volume_sequence_number: BothEndian<u16>,
    pub identifier: Vec<u8>,
}

impl DirectoryRecord {
    pub const FIXED_SIZE: usize = 33;

    /// Builds an entry, computing `length`. Fails when the identifier is too
    /// long for the one-byte record length.
    pub fn new(
        identifier: &[u8],
        extent: u32,
        data_length: u32,
        flags: u8,
    ) -> Result<Self, FormatError> {
        let padding = 1 - identifier.len() % 2;
        let length = u8::try_from(Self::FIXED_SIZE + identifier.len() + padding).map_err(|_| {
            FormatError::Malformed {
                format: "iso9660",
                reason: format!(
                    "identifier of {} bytes overflows a directory record",
                    identifier.len()
                ),
            }
        })?;
        Ok(Self {
            length,
            extended_attribute_length: 0,
            extent: extent.into(),
            data_length: data_length.into(),
            recorded: [0; 7],
            flags,
            file_unit_size: 0,
            interleave_gap: 0,
            volume_sequence_number: 1.into(),
            identifier: identifier.to_vec(),
        })
    }

    pub fn is_directory(&self) -> bool {
        self.flags & FLAG_DIRECTORY != 0
    }

    /// The identifier for display: `.` and `..` for the self and parent
    /// entries, file names without their `;1` version suffix.
    pub fn name(&self) -> String {
        match self.identifier.as_slice() {
            [0] => ".".to_string(),
            [1] => "..".to_string(),
            bytes => {
                let name: String = bytes.iter().map(|&b| b as char).collect();
                match name.rsplit_once(';') {
                    Some((base, _)) => base.trim_end_matches('.').to_string(),
                    None => name,
                }
            }
        }
    }
}

impl Record for DirectoryRecord {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("DirectoryRecord")
            .field(FieldDef::u8("length"))
            .field(FieldDef::u8("extended_attribute_length"))
            .field(FieldDef::both_u32("extent"))
            .field(FieldDef::both_u32("data_length"))
            .field(FieldDef::bytes("recorded", 7))
            .field(FieldDef::u8("flags"))
            .field(FieldDef::u8("file_unit_size"))
            .field(FieldDef::u8("interleave_gap"))
            .field(FieldDef::both_u16("volume_sequence_number"))
            .field(FieldDef::u8("identifier_length"))
            .field(
                FieldDef::prefixed_array("identifier", ScalarType::U8.into())
                    .length_from("identifier_length"),
            )
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self> {
        Ok(Self {
            length: fields.take("length")?,
            extended_attribute_length: fields.take("extended_attribute_length")?,
            extent: fields.take("extent")?,
            data_length: fields.take("data_length")?,
            recorded: fields.take("recorded")?,
            flags: fields.take("flags")?,
            file_unit_size: fields.take("file_unit_size")?,
            interleave_gap: fields.take("interleave_gap")?,
            volume_sequence_number: fields.take("volume_sequence_number")?,
            identifier: fields.take("identifier")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("length", self.length);
        fields.push("extended_attribute_length", self.extended_attribute_length);
        fields.push("extent", self.extent);
        fields.push("data_length", self.data_length);
        fields.push("recorded", self.recorded);
        fields.push("flags", self.flags);
        fields.push("file_unit_size", self.file_unit_size);
        fields.push("interleave_gap", self.interleave_gap);
        fields.push("volume_sequence_number", self.volume_sequence_number);
        fields.push("identifier", self.identifier.clone());
    }
}

/// The 17-byte `dec-datetime`: sixteen ASCII digits and a GMT offset in
/// 15-minute steps.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct VolumeDateTime {
    pub digits: String,
    pub gmt_offset: i8,
}

impl VolumeDateTime {
    /// All digits zero means "not specified".
    pub fn is_unset(&self) -> bool {
        self.digits.bytes().all(|b| b == b'0') || self.digits.is_empty()
    }
}

impl Record for VolumeDateTime {
    fn schema() -> RecordSchema {
        RecordSchema::sequential("VolumeDateTime")
            .field(FieldDef::fixed_string("digits", TextEncoding::Ascii, 16))
            .field(FieldDef::i8("gmt_offset"))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self> {
        Ok(Self {
            digits: fields.take("digits")?,
            gmt_offset: fields.take("gmt_offset")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push("digits", self.digits.as_str());
        fields.push("gmt_offset", self.gmt_offset);
    }
}

/// The primary volume descriptor, laid out by absolute offset within its
/// 2048-byte sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryVolumeDescriptor {
    pub header: DescriptorHeader,
    pub system_id: String,
    pub volume_id: String,
    pub volume_space_size: BothEndian<u32>,
    pub volume_set_size: BothEndian<u16>,
    pub volume_sequence_number: BothEndian<u16>,
    pub logical_block_size: BothEndian<u16>,
    pub path_table_size: BothEndian<u32>,
    pub path_table_le: u32,
    pub optional_path_table_le: u32,
    pub path_table_be: u32,
    pub optional_path_table_be: u32,
    pub root_directory: DirectoryRecord,
    pub volume_set_id: String,
    pub publisher_id: String,
    pub data_preparer_id: String,
    pub application_id: String,
    pub copyright_file_id: String,
    pub abstract_file_id: String,
    pub bibliographic_file_id: String,
    pub created: VolumeDateTime,
    pub modified: VolumeDateTime,
    pub expires: VolumeDateTime,
    pub effective: VolumeDateTime,
    pub file_structure_version: u8,
    pub application_use: Vec<u8>,
}

impl PrimaryVolumeDescriptor {
    pub const APPLICATION_USE_SIZE: usize = 512;

    pub fn new(volume_id: &str, volume_space_size: u32, root_directory: DirectoryRecord) -> Self {
        Self {
            header: DescriptorHeader::new(VolumeDescriptorType::Primary),
            system_id: String::new(),
            volume_id: volume_id.to_string(),
            volume_space_size: volume_space_size.into(),
            volume_set_size: 1.into(),
            volume_sequence_number: 1.into(),
            logical_block_size: (SECTOR_SIZE as u16).into(),
            path_table_size: 0.into(),
            path_table_le: 0,
            optional_path_table_le: 0,
            path_table_be: 0,
            optional_path_table_be: 0,
            root_directory,
            volume_set_id: String::new(),
            publisher_id: String::new(),
            data_preparer_id: String::new(),
            application_id: String::new(),
            copyright_file_id: String::new(),
            abstract_file_id: String::new(),
            bibliographic_file_id: String::new(),
            created: VolumeDateTime::default(),
            modified: VolumeDateTime::default(),
            expires: VolumeDateTime::default(),
            effective: VolumeDateTime::default(),
            file_structure_version: 1,
            application_use: vec![0; Self::APPLICATION_USE_SIZE],
        }
    }
}

const SHORT_ID: usize = 32;
const LONG_ID: usize = 128;
const FILE_ID: usize = 37;

fn identifier(name: &'static str, chars: usize) -> FieldDef {
    FieldDef::fixed_string(name, TextEncoding::Latin1, chars)
}

/// Identifiers are padded with spaces on disk.
fn take_identifier(fields: &mut RecordValue, name: &str) -> Result<String> {
    let text: String = fields.take(name)?;
    Ok(text.trim_end_matches(' ').to_string())
}

fn padded(text: &str, chars: usize) -> String {
    let mut out = text.to_string();
    let fill = chars.saturating_sub(text.chars().count());
    out.extend(std::iter::repeat(' ').take(fill));
    out
}

impl Record for PrimaryVolumeDescriptor {
    fn schema() -> RecordSchema {
        RecordSchema::explicit("PrimaryVolumeDescriptor")
            .field(FieldDef::record::<DescriptorHeader>("header").at(0))
            .field(identifier("system_id", SHORT_ID).at(8))
            .field(identifier("volume_id", SHORT_ID).at(40))
            .field(FieldDef::both_u32("volume_space_size").at(80))
            .field(FieldDef::both_u16("volume_set_size").at(120))
            .field(FieldDef::both_u16("volume_sequence_number").at(124))
            .field(FieldDef::both_u16("logical_block_size").at(128))
            .field(FieldDef::both_u32("path_table_size").at(132))
            .field(FieldDef::u32("path_table_le").at(140))
            .field(FieldDef::u32("optional_path_table_le").at(144))
            .field(FieldDef::u32_be("path_table_be").at(148))
            .field(FieldDef::u32_be("optional_path_table_be").at(152))
            .field(FieldDef::record::<DirectoryRecord>("root_directory").at(156))
            .field(identifier("volume_set_id", LONG_ID).at(190))
            .field(identifier("publisher_id", LONG_ID).at(318))
            .field(identifier("data_preparer_id", LONG_ID).at(446))
            .field(identifier("application_id", LONG_ID).at(574))
            .field(identifier("copyright_file_id", FILE_ID).at(702))
            .field(identifier("abstract_file_id", FILE_ID).at(739))
            .field(identifier("bibliographic_file_id", FILE_ID).at(776))
            .field(FieldDef::record::<VolumeDateTime>("created").at(813))
            .field(FieldDef::record::<VolumeDateTime>("modified").at(830))
            .field(FieldDef::record::<VolumeDateTime>("expires").at(847))
            .field(FieldDef::record::<VolumeDateTime>("effective").at(864))
            .field(FieldDef::u8("file_structure_version").at(881))
            .field(FieldDef::bytes("application_use", Self::APPLICATION_USE_SIZE).at(883))
            .field(FieldDef::bytes("reserved", 653).at(1395))
    }

    fn from_fields(fields: &mut RecordValue) -> Result<Self> {
        Ok(Self {
            header: fields.take_record("header")?,
            system_id: take_identifier(fields, "system_id")?,
            volume_id: take_identifier(fields, "volume_id")?,
            volume_space_size: fields.take("volume_space_size")?,
            volume_set_size: fields.take("volume_set_size")?,
            volume_sequence_number: fields.take("volume_sequence_number")?,
            logical_block_size: fields.take("logical_block_size")?,
            path_table_size: fields.take("path_table_size")?,
            path_table_le: fields.take("path_table_le")?,
            optional_path_table_le: fields.take("optional_path_table_le")?,
            path_table_be: fields.take("path_table_be")?,
            optional_path_table_be: fields.take("optional_path_table_be")?,
            root_directory: fields.take_record("root_directory")?,
            volume_set_id: take_identifier(fields, "volume_set_id")?,
            publisher_id: take_identifier(fields, "publisher_id")?,
            data_preparer_id: take_identifier(fields, "data_preparer_id")?,
            application_id: take_identifier(fields, "application_id")?,
            copyright_file_id: take_identifier(fields, "copyright_file_id")?,
            abstract_file_id: take_identifier(fields, "abstract_file_id")?,
            bibliographic_file_id: take_identifier(fields, "bibliographic_file_id")?,
            created: fields.take_record("created")?,
            modified: fields.take_record("modified")?,
            expires: fields.take_record("expires")?,
            effective: fields.take_record("effective")?,
            file_structure_version: fields.take("file_structure_version")?,
            application_use: fields.take("application_use")?,
        })
    }

    fn to_fields(&self, fields: &mut RecordValue) {
        fields.push_record("header", &self.header);
        fields.push("system_id", padded(&self.system_id, SHORT_ID));
        fields.push("volume_id", padded(&self.volume_id, SHORT_ID));
        fields.push("volume_space_size", self.volume_space_size);
        fields.push("volume_set_size", self.volume_set_size);
        fields.push("volume_sequence_number", self.volume_sequence_number);
        fields.push("logical_block_size", self.logical_block_size);
        fields.push("path_table_size", self.path_table_size);
        fields.push("path_table_le", self.path_table_le);
        fields.push("optional_path_table_le", self.optional_path_table_le);
        fields.push("path_table_be", self.path_table_be);
        fields.push("optional_path_table_be", self.optional_path_table_be);
        fields.push_record("root_directory", &self.root_directory);
        fields.push("volume_set_id", padded(&self.volume_set_id, LONG_ID));
        fields.push("publisher_id", padded(&self.publisher_id, LONG_ID));
        fields.push("data_preparer_id", padded(&self.data_preparer_id, LONG_ID));
        fields.push("application_id", padded(&self.application_id, LONG_ID));
        fields.push("copyright_file_id", padded(&self.copyright_file_id, FILE_ID));
        fields.push("abstract_file_id", padded(&self.abstract_file_id, FILE_ID));
        fields.push("bibliographic_file_id", padded(&self.bibliographic_file_id, FILE_ID));
        fields.push_record("created", &self.created);
        fields.push_record("modified", &self.modified);
        fields.push_record("expires", &self.expires);
        fields.push_record("effective", &self.effective);
        fields.push("file_structure_version", self.file_structure_version);
        fields.push("application_use", crate::value::Value::Bytes(self.application_use.clone()));
        fields.push("reserved", crate::value::Value::Bytes(vec![0; 653]));
    }
}

/// The volume descriptor set of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoImage {
    pub descriptors: Vec<VolumeDescriptorType>,
    pub primary: PrimaryVolumeDescriptor,
    origin: u64,
}

impl IsoImage {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, FormatError> {
        let mut file = BufReader::new(File::open(path)?);
        Self::read(&mut file)
    }

    /// Walks the descriptor set from sector 16 up to the terminator. Sectors
    /// count from the stream's current position, as in [`detect_format`].
    ///
    /// [`detect_format`]: crate::formats::detect_format
    pub fn read<S: Read + Seek>(stream: &mut S) -> Result<Self, FormatError> {
        let mut cursor = StreamCursor::new(stream)?;
        let origin = cursor.position();
        let mut descriptors = Vec::new();
        let mut primary = None;

        for sector in DESCRIPTOR_START..DESCRIPTOR_START + MAX_DESCRIPTORS {
            let start = origin + sector * SECTOR_SIZE;
            cursor.set_position(start)?;
            let header: DescriptorHeader = read_record(&mut cursor)?;
            if header.identifier != STANDARD_IDENTIFIER {
                return Err(FormatError::BadSignature { format: "iso9660" });
            }
            descriptors.push(header.descriptor_type);
            match header.descriptor_type {
                VolumeDescriptorType::Terminator => break,
                VolumeDescriptorType::Primary if primary.is_none() => {
                    cursor.set_position(start)?;
                    let pvd: PrimaryVolumeDescriptor = read_record(&mut cursor)?;
                    if !pvd.volume_space_size.is_consistent() {
                        warn!(
                            "volume space size differs between byte orders: {}",
                            pvd.volume_space_size
                        );
                    }
                    primary = Some(pvd);
                }
                other => debug!("skipping {other:?} volume descriptor at sector {sector}"),
            }
        }

        let primary = primary.ok_or_else(|| FormatError::Malformed {
            format: "iso9660",
            reason: "no primary volume descriptor".to_string(),
        })?;
        debug!(
            "volume {:?}: {} blocks of {} bytes",
            primary.volume_id,
            primary.volume_space_size,
            primary.logical_block_size
        );
        Ok(Self {
            descriptors,
            primary,
            origin,
        })
    }

    /// Stream offset of the start of the image.
    pub fn origin(&self) -> u64 {
        self.origin
    }

    /// Lists the entries of `directory`, including `.` and `..`.
    pub fn read_directory<S: Read + Seek>(
        &self,
        stream: &mut S,
        directory: &DirectoryRecord,
    ) -> Result<Vec<DirectoryRecord>, FormatError> {
        let block = u64::from(self.primary.logical_block_size.get());
        if block == 0 {
            return Err(FormatError::Malformed {
                format: "iso9660",
                reason: "logical block size is zero".to_string(),
            });
        }
        let start = self.origin + u64::from(directory.extent.get()) * block;
        let end = start + u64::from(directory.data_length.get());

        let mut cursor = StreamCursor::new(stream)?;
        let mut entries = Vec::new();
        let mut position = start;
        while position < end {
            cursor.set_position(position)?;
            let length = read_scalar::<u8, _>(&mut cursor, Endian::Little)?;
            if length == 0 {
                // records never cross a block boundary; the rest is padding
                position = self.origin + ((position - self.origin) / block + 1) * block;
                continue;
            }
            cursor.set_position(position)?;
            let entry: DirectoryRecord = read_record(&mut cursor)?;
            position += u64::from(length);
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn root_entries<S: Read + Seek>(
        &self,
        stream: &mut S,
    ) -> Result<Vec<DirectoryRecord>, FormatError> {
        self.read_directory(stream, &self.primary.root_directory)
    }
}
