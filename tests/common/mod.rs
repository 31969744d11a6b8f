//! Builders for synthetic $MFT images.
//!
//! Records are laid out the way NTFS writes them: a 0x38-byte header, an
//! update sequence array at 0x30 covering both 512-byte sectors, attributes
//! aligned to 8 bytes, and a 0xFFFFFFFF end marker.

#![allow(dead_code)]

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};
use tempfile::NamedTempFile;

pub const RECORD_SIZE: usize = 1024;
pub const ROOT: u64 = 5;

pub const NS_POSIX: u8 = 0;
pub const NS_WIN32: u8 = 1;
pub const NS_DOS: u8 = 2;
pub const NS_WIN32_AND_DOS: u8 = 3;

/// 2020-01-01T00:00:00Z as a FILETIME.
pub const FILETIME_2020: u64 = 132_223_104_000_000_000;

const FIRST_ATTRIBUTE: usize = 0x38;
const USA_OFFSET: usize = 0x30;
const USA_COUNT: u16 = 3;
const UPDATE_SEQUENCE: u16 = 0x0007;

pub struct RecordBuilder {
    sequence: u16,
    flags: u16,
    attributes: Vec<Vec<u8>>,
    next_id: u16,
    torn: bool,
    base_record: u64,
}

impl RecordBuilder {
    pub fn file() -> Self {
        RecordBuilder {
            sequence: 1,
            flags: 0x01,
            attributes: Vec::new(),
            next_id: 0,
            torn: false,
            base_record: 0,
        }
    }

    pub fn directory() -> Self {
        let mut builder = RecordBuilder::file();
        builder.flags |= 0x02;
        builder
    }

    pub fn sequence(mut self, sequence: u16) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn deleted(mut self) -> Self {
        self.flags &= !0x01;
        self
    }

    /// Mark this record as an extension holding attributes of `base`.
    pub fn extension_of(mut self, base: u64) -> Self {
        self.base_record = base;
        self
    }

    /// Leave the last sector without the update sequence number.
    pub fn torn(mut self) -> Self {
        self.torn = true;
        self
    }

    pub fn standard_information(mut self, filetime: u64) -> Self {
        let mut value = vec![0u8; 48];
        for i in 0..4 {
            LittleEndian::write_u64(&mut value[i * 8..], filetime + i as u64 * 10_000_000);
        }
        LittleEndian::write_u32(&mut value[32..], 0x20);
        let attr = self.resident(0x10, "", &value);
        self.attributes.push(attr);
        self
    }

    pub fn file_name(mut self, name: &str, namespace: u8, parent: u64) -> Self {
        let utf16: Vec<u16> = name.encode_utf16().collect();
        let mut value = vec![0u8; 66 + utf16.len() * 2];
        LittleEndian::write_u64(&mut value[0..], (1u64 << 48) | parent);
        for i in 0..4 {
            LittleEndian::write_u64(&mut value[8 + i * 8..], FILETIME_2020);
        }
        value[64] = utf16.len() as u8;
        value[65] = namespace;
        for (i, unit) in utf16.iter().enumerate() {
            LittleEndian::write_u16(&mut value[66 + i * 2..], *unit);
        }
        let attr = self.resident(0x30, "", &value);
        self.attributes.push(attr);
        self
    }

    pub fn resident_data(mut self, content: &[u8]) -> Self {
        let attr = self.resident(0x80, "", content);
        self.attributes.push(attr);
        self
    }

    /// Named DATA attribute, i.e. an alternate data stream.
    pub fn stream(mut self, name: &str, content: &[u8]) -> Self {
        let attr = self.resident(0x80, name, content);
        self.attributes.push(attr);
        self
    }

    pub fn non_resident_data(mut self, real_size: u64, runs: &[u8]) -> Self {
        let mut attr = vec![0u8; align8(64 + runs.len() + 1)];
        let length = attr.len() as u32;
        LittleEndian::write_u32(&mut attr[0..], 0x80);
        LittleEndian::write_u32(&mut attr[4..], length);
        attr[8] = 1;
        LittleEndian::write_u16(&mut attr[10..], 64);
        LittleEndian::write_u16(&mut attr[14..], self.take_id());
        LittleEndian::write_u16(&mut attr[32..], 64);
        LittleEndian::write_u64(&mut attr[40..], align8(real_size as usize) as u64);
        LittleEndian::write_u64(&mut attr[48..], real_size);
        LittleEndian::write_u64(&mut attr[56..], real_size);
        attr[64..64 + runs.len()].copy_from_slice(runs);
        self.attributes.push(attr);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut record = vec![0u8; RECORD_SIZE];
        record[0..4].copy_from_slice(b"FILE");
        LittleEndian::write_u16(&mut record[0x04..], USA_OFFSET as u16);
        LittleEndian::write_u16(&mut record[0x06..], USA_COUNT);
        LittleEndian::write_u64(&mut record[0x08..], 0x1000);
        LittleEndian::write_u16(&mut record[0x10..], self.sequence);
        LittleEndian::write_u16(&mut record[0x12..], 1);
        LittleEndian::write_u16(&mut record[0x14..], FIRST_ATTRIBUTE as u16);
        LittleEndian::write_u16(&mut record[0x16..], self.flags);
        LittleEndian::write_u32(&mut record[0x1C..], RECORD_SIZE as u32);
        if self.base_record != 0 {
            LittleEndian::write_u64(&mut record[0x20..], (1u64 << 48) | self.base_record);
        }
        LittleEndian::write_u16(&mut record[0x28..], self.next_id);

        let mut offset = FIRST_ATTRIBUTE;
        for attr in &self.attributes {
            record[offset..offset + attr.len()].copy_from_slice(attr);
            offset += attr.len();
        }
        LittleEndian::write_u32(&mut record[offset..], 0xFFFF_FFFF);
        LittleEndian::write_u32(&mut record[0x18..], (offset + 8) as u32);
        assert!(offset + 8 <= RECORD_SIZE - 2, "attributes overflow the record");

        // Move each sector's last two bytes into the update sequence array
        LittleEndian::write_u16(&mut record[USA_OFFSET..], UPDATE_SEQUENCE);
        for sector in 1..USA_COUNT as usize {
            let end = sector * 512 - 2;
            let original = LittleEndian::read_u16(&record[end..]);
            LittleEndian::write_u16(&mut record[USA_OFFSET + sector * 2..], original);
            LittleEndian::write_u16(&mut record[end..], UPDATE_SEQUENCE);
        }
        if self.torn {
            LittleEndian::write_u16(&mut record[RECORD_SIZE - 2..], 0xBEEF);
        }
        record
    }

    fn resident(&mut self, attr_type: u32, name: &str, value: &[u8]) -> Vec<u8> {
        let name_utf16: Vec<u16> = name.encode_utf16().collect();
        let name_offset = 24;
        let value_offset = align8(name_offset + name_utf16.len() * 2);
        let mut attr = vec![0u8; align8(value_offset + value.len())];
        let length = attr.len() as u32;

        LittleEndian::write_u32(&mut attr[0..], attr_type);
        LittleEndian::write_u32(&mut attr[4..], length);
        attr[9] = name_utf16.len() as u8;
        LittleEndian::write_u16(&mut attr[10..], name_offset as u16);
        LittleEndian::write_u16(&mut attr[14..], self.take_id());
        LittleEndian::write_u32(&mut attr[16..], value.len() as u32);
        LittleEndian::write_u16(&mut attr[20..], value_offset as u16);
        for (i, unit) in name_utf16.iter().enumerate() {
            LittleEndian::write_u16(&mut attr[name_offset + i * 2..], *unit);
        }
        attr[value_offset..value_offset + value.len()].copy_from_slice(value);
        attr
    }

    fn take_id(&mut self) -> u16 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

fn align8(n: usize) -> usize {
    (n + 7) & !7
}

pub fn zeroed_record() -> Vec<u8> {
    vec![0u8; RECORD_SIZE]
}

pub fn baad_record() -> Vec<u8> {
    let mut record = RecordBuilder::file().file_name("gone.txt", NS_WIN32, ROOT).build();
    record[0..4].copy_from_slice(b"BAAD");
    record
}

/// A small volume:
///
/// ```text
///  0  $MFT                       /$MFT
///  1-4 zeroed                    NoFNRecord (undecodable)
///  5  .                          /
///  6  Users/                     /Users
///  7  report.docx (+ DOS name)   /Users/report.docx, plus :Zone.Identifier
///  8  lost.txt -> 200            Orphan/lost.txt
///  9  loop -> 9                  ORPHAN/loop
/// 10  BAAD                       NoFNRecord (undecodable)
/// 11  big.bin, non-resident      /Users/big.bin
/// 12  torn.txt, torn write       /torn.txt
/// ```
pub fn sample_volume() -> Vec<Vec<u8>> {
    let mut records = vec![RecordBuilder::file()
        .standard_information(FILETIME_2020)
        .file_name("$MFT", NS_WIN32_AND_DOS, ROOT)
        .non_resident_data(262_144, &[0x11, 0x40, 0x04, 0x00])
        .build()];
    records.extend((1..5).map(|_| zeroed_record()));
    records.push(
        RecordBuilder::directory()
            .sequence(5)
            .standard_information(FILETIME_2020)
            .file_name(".", NS_WIN32_AND_DOS, ROOT)
            .build(),
    );
    records.push(
        RecordBuilder::directory()
            .standard_information(FILETIME_2020)
            .file_name("Users", NS_WIN32_AND_DOS, ROOT)
            .build(),
    );
    records.push(
        RecordBuilder::file()
            .sequence(3)
            .standard_information(FILETIME_2020)
            .file_name("REPORT~1.DOC", NS_DOS, 6)
            .file_name("report.docx", NS_WIN32, 6)
            .resident_data(b"quarterly numbers")
            .stream("Zone.Identifier", b"[ZoneTransfer]\r\nZoneId=3\r\n")
            .build(),
    );
    records.push(
        RecordBuilder::file()
            .deleted()
            .standard_information(FILETIME_2020)
            .file_name("lost.txt", NS_WIN32_AND_DOS, 200)
            .resident_data(b"x")
            .build(),
    );
    records.push(
        RecordBuilder::directory()
            .standard_information(FILETIME_2020)
            .file_name("loop", NS_WIN32_AND_DOS, 9)
            .build(),
    );
    records.push(baad_record());
    records.push(
        RecordBuilder::file()
            .standard_information(FILETIME_2020)
            .file_name("big.bin", NS_WIN32_AND_DOS, 6)
            // 16 clusters at 256, then 8 clusters 16 back
            .non_resident_data(98_304, &[0x21, 0x10, 0x00, 0x01, 0x11, 0x08, 0xF0, 0x00])
            .build(),
    );
    records.push(
        RecordBuilder::file()
            .torn()
            .standard_information(FILETIME_2020)
            .file_name("torn.txt", NS_WIN32_AND_DOS, ROOT)
            .build(),
    );
    records
}

pub fn write_image(records: &[Vec<u8>]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp MFT");
    for record in records {
        file.write_all(record).expect("write record");
    }
    file.flush().expect("flush temp MFT");
    file
}
