//! NTFS MFT Record Decoder
//! Turns one fixed-size $MFT record buffer into a structured record

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use serde::Serialize;
use std::io::{Cursor, Seek, SeekFrom};

use crate::bitparse::{parse_little_endian_signed, parse_little_endian_unsigned};
use crate::error::{MftError, Result};

// NTFS Constants
const MFT_SIGNATURE: &[u8] = b"FILE";
const BAD_SIGNATURE: &[u8] = b"BAAD";
const MIN_HEADER_SIZE: usize = 48;
const MIN_ATTRIBUTE_SIZE: usize = 24;
const ATTRIBUTE_END: u32 = 0xFFFFFFFF;
const SECTOR_SIZE: usize = 512;
const RECORD_REFERENCE_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

// Attribute Types
const ATTRIBUTE_STANDARD_INFORMATION: u32 = 0x10;
const ATTRIBUTE_ATTRIBUTE_LIST: u32 = 0x20;
const ATTRIBUTE_FILE_NAME: u32 = 0x30;
const ATTRIBUTE_OBJECT_ID: u32 = 0x40;
const ATTRIBUTE_SECURITY_DESCRIPTOR: u32 = 0x50;
const ATTRIBUTE_VOLUME_NAME: u32 = 0x60;
const ATTRIBUTE_VOLUME_INFORMATION: u32 = 0x70;
const ATTRIBUTE_DATA: u32 = 0x80;
const ATTRIBUTE_INDEX_ROOT: u32 = 0x90;
const ATTRIBUTE_INDEX_ALLOCATION: u32 = 0xA0;
const ATTRIBUTE_BITMAP: u32 = 0xB0;
const ATTRIBUTE_REPARSE_POINT: u32 = 0xC0;
const ATTRIBUTE_EA_INFORMATION: u32 = 0xD0;
const ATTRIBUTE_EA: u32 = 0xE0;
const ATTRIBUTE_LOGGED_UTILITY_STREAM: u32 = 0x100;

// Record header flags
const RECORD_IN_USE: u16 = 0x01;
const RECORD_IS_DIRECTORY: u16 = 0x02;

// FILETIME epoch (1601-01-01) to Unix epoch, in seconds
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SECOND: i64 = 10_000_000;

/// Decodes raw record buffers for a session.
pub trait RecordDecoder {
    fn decode(&self, raw: &[u8], record_number: u64, debug: bool) -> Result<MftRecord>;
}

/// Decoder for on-disk NTFS 3.x records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NtfsRecordDecoder;

impl RecordDecoder for NtfsRecordDecoder {
    fn decode(&self, raw: &[u8], record_number: u64, debug: bool) -> Result<MftRecord> {
        parse_mft_record(raw, record_number, debug)
    }
}

/// FILE_NAME namespace code
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileNamespace {
    Posix,
    Win32,
    Dos,
    Win32AndDos,
    Unknown(u8),
}

impl FileNamespace {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => FileNamespace::Posix,
            1 => FileNamespace::Win32,
            2 => FileNamespace::Dos,
            3 => FileNamespace::Win32AndDos,
            other => FileNamespace::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            FileNamespace::Posix => 0,
            FileNamespace::Win32 => 1,
            FileNamespace::Dos => 2,
            FileNamespace::Win32AndDos => 3,
            FileNamespace::Unknown(code) => code,
        }
    }

    /// Codes 0x1 and 0x3 carry the long, human-readable name of a record.
    pub fn is_preferred(self) -> bool {
        matches!(self.code(), 0x1 | 0x3)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct FileNameAttribute {
    pub name: String,
    pub namespace: FileNamespace,
    pub parent_reference: u64,
    pub parent_sequence: u16,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub allocated_size: u64,
    pub real_size: u64,
    pub flags: u32,
}

impl FileNameAttribute {
    pub fn new(name: impl Into<String>, namespace: FileNamespace, parent_reference: u64) -> Self {
        FileNameAttribute {
            name: name.into(),
            namespace,
            parent_reference,
            parent_sequence: 0,
            created: None,
            modified: None,
            mft_modified: None,
            accessed: None,
            allocated_size: 0,
            real_size: 0,
            flags: 0,
        }
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct StandardInformation {
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub mft_modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub file_attributes: u32,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DataRun {
    /// Absolute starting cluster; meaningless for sparse runs.
    pub cluster_offset: i64,
    pub cluster_count: u64,
    pub sparse: bool,
}

/// Which attribute types were present in the record.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeFlags {
    pub standard_information: bool,
    pub attribute_list: bool,
    pub file_name: bool,
    pub object_id: bool,
    pub security_descriptor: bool,
    pub volume_name: bool,
    pub volume_information: bool,
    pub data: bool,
    pub index_root: bool,
    pub index_allocation: bool,
    pub bitmap: bool,
    pub reparse_point: bool,
    pub ea_information: bool,
    pub ea: bool,
    pub logged_utility_stream: bool,
}

impl AttributeFlags {
    fn mark(&mut self, attr_type: u32) {
        match attr_type {
            ATTRIBUTE_STANDARD_INFORMATION => self.standard_information = true,
            ATTRIBUTE_ATTRIBUTE_LIST => self.attribute_list = true,
            ATTRIBUTE_FILE_NAME => self.file_name = true,
            ATTRIBUTE_OBJECT_ID => self.object_id = true,
            ATTRIBUTE_SECURITY_DESCRIPTOR => self.security_descriptor = true,
            ATTRIBUTE_VOLUME_NAME => self.volume_name = true,
            ATTRIBUTE_VOLUME_INFORMATION => self.volume_information = true,
            ATTRIBUTE_DATA => self.data = true,
            ATTRIBUTE_INDEX_ROOT => self.index_root = true,
            ATTRIBUTE_INDEX_ALLOCATION => self.index_allocation = true,
            ATTRIBUTE_BITMAP => self.bitmap = true,
            ATTRIBUTE_REPARSE_POINT => self.reparse_point = true,
            ATTRIBUTE_EA_INFORMATION => self.ea_information = true,
            ATTRIBUTE_EA => self.ea = true,
            ATTRIBUTE_LOGGED_UTILITY_STREAM => self.logged_utility_stream = true,
            _ => {}
        }
    }
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct MftRecord {
    pub record_number: u64,
    pub lsn: u64,
    pub sequence: u16,
    pub link_count: u16,
    pub is_in_use: bool,
    pub is_directory: bool,
    pub used_size: u32,
    pub allocated_size: u32,
    pub base_reference: u64,
    pub base_sequence: u16,
    pub next_attribute_id: u16,
    /// A sector's trailing bytes did not match the update sequence number.
    pub torn_write: bool,
    pub standard_information: Option<StandardInformation>,
    pub file_names: Vec<FileNameAttribute>,
    pub ads_names: Vec<String>,
    pub data_size: u64,
    pub data_resident: Option<bool>,
    pub data_runs: Vec<DataRun>,
    pub attributes: AttributeFlags,
}

impl MftRecord {
    pub fn file_name_count(&self) -> usize {
        self.file_names.len()
    }

    pub fn ads_count(&self) -> usize {
        self.ads_names.len()
    }

    /// Parent record number from the first FILE_NAME, if any.
    pub fn parent_reference(&self) -> Option<u64> {
        self.file_names.first().map(|f| f.parent_reference)
    }

    pub fn is_extension(&self) -> bool {
        self.base_reference != 0
    }
}

/// Parse a single MFT record
pub fn parse_mft_record(data: &[u8], record_number: u64, debug: bool) -> Result<MftRecord> {
    if data.len() < MIN_HEADER_SIZE {
        return Err(MftError::corrupt(
            record_number,
            format!("buffer of {} bytes is shorter than a record header", data.len()),
        ));
    }

    // Check signature
    let signature = &data[0..4];
    if signature == BAD_SIGNATURE {
        return Err(MftError::corrupt(record_number, "record is marked BAAD"));
    }
    if signature != MFT_SIGNATURE {
        return Err(MftError::corrupt(
            record_number,
            format!("missing FILE signature (found 0x{})", hex::encode(signature)),
        ));
    }

    let header_err = |e: std::io::Error| MftError::corrupt(record_number, format!("header: {}", e));
    let mut cursor = Cursor::new(data);

    // Update sequence offset at 0x04
    cursor.seek(SeekFrom::Start(0x04)).map_err(header_err)?;
    let update_seq_offset = cursor.read_u16::<LittleEndian>().map_err(header_err)?;
    let update_seq_size = cursor.read_u16::<LittleEndian>().map_err(header_err)?;

    // Apply fixup array
    let mut fixed_data = data.to_vec();
    let torn_write = apply_fixup(
        &mut fixed_data,
        update_seq_offset as usize,
        update_seq_size as usize,
        record_number,
    )?;
    let mut cursor = Cursor::new(&fixed_data[..]);

    cursor.seek(SeekFrom::Start(0x08)).map_err(header_err)?;
    let lsn = cursor.read_u64::<LittleEndian>().map_err(header_err)?;
    let sequence = cursor.read_u16::<LittleEndian>().map_err(header_err)?;
    let link_count = cursor.read_u16::<LittleEndian>().map_err(header_err)?;
    let first_attr_offset = cursor.read_u16::<LittleEndian>().map_err(header_err)?;
    let flags = cursor.read_u16::<LittleEndian>().map_err(header_err)?;
    let used_size = cursor.read_u32::<LittleEndian>().map_err(header_err)?;
    let allocated_size = cursor.read_u32::<LittleEndian>().map_err(header_err)?;
    let base_raw = cursor.read_u64::<LittleEndian>().map_err(header_err)?;
    let next_attribute_id = cursor.read_u16::<LittleEndian>().map_err(header_err)?;

    let mut record = MftRecord {
        record_number,
        lsn,
        sequence,
        link_count,
        is_in_use: flags & RECORD_IN_USE != 0,
        is_directory: flags & RECORD_IS_DIRECTORY != 0,
        used_size,
        allocated_size,
        base_reference: base_raw & RECORD_REFERENCE_MASK,
        base_sequence: (base_raw >> 48) as u16,
        next_attribute_id,
        torn_write,
        ..MftRecord::default()
    };

    // Parse attributes
    let mut attr_offset = first_attr_offset as usize;

    while attr_offset + 8 <= fixed_data.len() {
        let attr_type = LittleEndian::read_u32(&fixed_data[attr_offset..]);
        if attr_type == ATTRIBUTE_END {
            break;
        }

        let attr_length = LittleEndian::read_u32(&fixed_data[attr_offset + 4..]) as usize;
        if attr_length == 0 {
            break;
        }
        if attr_length < MIN_ATTRIBUTE_SIZE || attr_offset + attr_length > fixed_data.len() {
            return Err(MftError::corrupt(
                record_number,
                format!(
                    "attribute 0x{:X} at offset {} claims {} bytes",
                    attr_type, attr_offset, attr_length
                ),
            ));
        }

        let attr = &fixed_data[attr_offset..attr_offset + attr_length];
        let non_resident = attr[8] != 0;
        record.attributes.mark(attr_type);

        if debug {
            debug!(
                "Record {}: attribute 0x{:X} at offset {}, {} bytes, {}",
                record_number,
                attr_type,
                attr_offset,
                attr_length,
                if non_resident { "non-resident" } else { "resident" }
            );
        }

        match attr_type {
            ATTRIBUTE_STANDARD_INFORMATION if !non_resident => {
                let value = resident_value(attr, record_number)?;
                record.standard_information = Some(parse_standard_info(value, record_number)?);
            }
            ATTRIBUTE_FILE_NAME if !non_resident => {
                let value = resident_value(attr, record_number)?;
                record.file_names.push(parse_file_name_attr(value, record_number)?);
            }
            ATTRIBUTE_DATA => {
                let stream_name = attribute_name(attr, record_number)?;
                if stream_name.is_empty() {
                    parse_data_attr(attr, &mut record)?;
                } else {
                    record.ads_names.push(stream_name);
                }
            }
            _ => {}
        }

        attr_offset += attr_length;
    }

    Ok(record)
}

/// Apply NTFS fixup array to correct sector boundaries.
/// Returns true when a sector did not carry the update sequence number.
fn apply_fixup(data: &mut [u8], offset: usize, count: usize, record_number: u64) -> Result<bool> {
    if count == 0 {
        return Ok(false);
    }
    if offset + count * 2 > data.len() {
        return Err(MftError::corrupt(
            record_number,
            format!("update sequence array ({} entries at {}) out of bounds", count, offset),
        ));
    }

    let signature = LittleEndian::read_u16(&data[offset..]);
    let mut torn = false;

    for i in 1..count {
        let sector_end = i * SECTOR_SIZE - 2;
        if sector_end + 2 > data.len() {
            break;
        }

        // Verify signature matches
        let current = LittleEndian::read_u16(&data[sector_end..]);
        if current != signature {
            torn = true;
            continue;
        }

        let fixup_value = LittleEndian::read_u16(&data[offset + i * 2..]);
        LittleEndian::write_u16(&mut data[sector_end..sector_end + 2], fixup_value);
    }

    Ok(torn)
}

fn resident_value<'a>(attr: &'a [u8], record_number: u64) -> Result<&'a [u8]> {
    let value_length = LittleEndian::read_u32(&attr[16..]) as usize;
    let value_offset = LittleEndian::read_u16(&attr[20..]) as usize;
    attr.get(value_offset..value_offset + value_length)
        .ok_or_else(|| {
            MftError::corrupt(
                record_number,
                format!(
                    "resident value ({} bytes at {}) overruns its attribute",
                    value_length, value_offset
                ),
            )
        })
}

fn attribute_name(attr: &[u8], record_number: u64) -> Result<String> {
    let name_length = attr[9] as usize;
    if name_length == 0 {
        return Ok(String::new());
    }
    let name_offset = LittleEndian::read_u16(&attr[10..]) as usize;
    let bytes = attr
        .get(name_offset..name_offset + name_length * 2)
        .ok_or_else(|| MftError::corrupt(record_number, "attribute name overruns its attribute"))?;
    Ok(decode_utf16(bytes))
}

fn parse_standard_info(data: &[u8], record_number: u64) -> Result<StandardInformation> {
    if data.len() < 36 {
        return Err(MftError::corrupt(
            record_number,
            format!("STANDARD_INFORMATION is only {} bytes", data.len()),
        ));
    }

    Ok(StandardInformation {
        created: filetime_to_datetime(LittleEndian::read_u64(&data[0..])),
        modified: filetime_to_datetime(LittleEndian::read_u64(&data[8..])),
        mft_modified: filetime_to_datetime(LittleEndian::read_u64(&data[16..])),
        accessed: filetime_to_datetime(LittleEndian::read_u64(&data[24..])),
        file_attributes: LittleEndian::read_u32(&data[32..]),
    })
}

fn parse_file_name_attr(content: &[u8], record_number: u64) -> Result<FileNameAttribute> {
    if content.len() < 66 {
        return Err(MftError::corrupt(
            record_number,
            format!("FILE_NAME is only {} bytes", content.len()),
        ));
    }

    // Parent directory reference: low 6 bytes record number, high 2 bytes sequence
    let parent_raw = LittleEndian::read_u64(&content[0..]);

    let name_length = content[64] as usize;
    let namespace = FileNamespace::from_code(content[65]);
    let name_bytes = content.get(66..66 + name_length * 2).ok_or_else(|| {
        MftError::corrupt(
            record_number,
            format!("FILE_NAME of {} characters overruns its value", name_length),
        )
    })?;

    Ok(FileNameAttribute {
        name: decode_utf16(name_bytes),
        namespace,
        parent_reference: parent_raw & RECORD_REFERENCE_MASK,
        parent_sequence: (parent_raw >> 48) as u16,
        created: filetime_to_datetime(LittleEndian::read_u64(&content[8..])),
        modified: filetime_to_datetime(LittleEndian::read_u64(&content[16..])),
        mft_modified: filetime_to_datetime(LittleEndian::read_u64(&content[24..])),
        accessed: filetime_to_datetime(LittleEndian::read_u64(&content[32..])),
        allocated_size: LittleEndian::read_u64(&content[40..]),
        real_size: LittleEndian::read_u64(&content[48..]),
        flags: LittleEndian::read_u32(&content[56..]),
    })
}

fn parse_data_attr(attr: &[u8], record: &mut MftRecord) -> Result<()> {
    if attr[8] == 0 {
        // Resident data
        record.data_resident = Some(true);
        record.data_size = LittleEndian::read_u32(&attr[16..]) as u64;
        return Ok(());
    }

    // Non-resident data
    if attr.len() < 64 {
        return Err(MftError::corrupt(
            record.record_number,
            format!("non-resident DATA header is only {} bytes", attr.len()),
        ));
    }

    record.data_resident = Some(false);
    record.data_size = LittleEndian::read_u64(&attr[48..]);

    let runs_offset = LittleEndian::read_u16(&attr[32..]) as usize;
    let runs = attr.get(runs_offset..).ok_or_else(|| {
        MftError::corrupt(record.record_number, "data run list starts past its attribute")
    })?;
    record.data_runs = parse_data_runs(runs, record.record_number)?;
    Ok(())
}

fn parse_data_runs(data: &[u8], record_number: u64) -> Result<Vec<DataRun>> {
    let mut runs = Vec::new();
    let mut offset = 0;
    let mut prev_cluster: i64 = 0;

    while offset < data.len() {
        let header = data[offset];
        if header == 0 {
            break;
        }

        let length_size = (header & 0x0F) as usize;
        let offset_size = ((header >> 4) & 0x0F) as usize;

        let length_start = offset + 1;
        let offset_start = length_start + length_size;
        let run_end = offset_start + offset_size;
        if length_size == 0 || run_end > data.len() {
            return Err(MftError::corrupt(
                record_number,
                format!("data run header 0x{:02X} at {} is truncated", header, offset),
            ));
        }

        let cluster_count = parse_little_endian_unsigned(&data[length_start..offset_start])?;
        let cluster_count = u64::try_from(cluster_count).map_err(|_| {
            MftError::corrupt(record_number, "data run length exceeds 64 bits")
        })?;

        let sparse = offset_size == 0;
        let cluster_offset = if sparse {
            0
        } else {
            // Run offsets are signed and relative to the previous run
            let delta = parse_little_endian_signed(&data[offset_start..run_end])?;
            let absolute = i64::try_from(delta)
                .ok()
                .and_then(|d| prev_cluster.checked_add(d))
                .ok_or_else(|| MftError::corrupt(record_number, "data run offset overflows"))?;
            prev_cluster = absolute;
            absolute
        };

        runs.push(DataRun {
            cluster_offset,
            cluster_count,
            sparse,
        });

        offset = run_end;
    }

    Ok(runs)
}

/// Convert a Windows FILETIME to UTC; zero and out-of-range values become None.
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let ticks = i64::try_from(filetime).ok()?;
    let secs = ticks / FILETIME_TICKS_PER_SECOND - FILETIME_UNIX_OFFSET;
    let nanos = (ticks % FILETIME_TICKS_PER_SECOND) as u32 * 100;
    Utc.timestamp_opt(secs, nanos).single()
}

fn decode_utf16(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(LittleEndian::read_u16)
        .collect();
    String::from_utf16_lossy(&units)
}
