//! Per-record index built by the first pass over the MFT

use serde::Serialize;

use crate::ntfs_parser::MftRecord;

/// Minimal per-record state needed to place a record in the directory tree.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexEntry {
    /// Resolved absolute path, empty until the resolver reaches this record.
    pub filename: String,
    pub file_name_count: usize,
    /// Record number of the containing directory; only meaningful when
    /// `file_name_count > 0`.
    pub parent_reference: u64,
    pub name: String,
}

impl IndexEntry {
    /// Pick the name and parent a record is filed under.
    ///
    /// The parent always comes from the first FILE_NAME. When there are several
    /// names, the last one in a preferred namespace (0x1 or 0x3) wins, falling
    /// back to the last FILE_NAME when none is preferred.
    pub fn from_record(record: &MftRecord) -> Self {
        let names = &record.file_names;
        let Some(first) = names.first() else {
            return IndexEntry::default();
        };

        let name = if names.len() == 1 {
            first.name.clone()
        } else {
            names
                .iter()
                .rev()
                .find(|fn_attr| fn_attr.namespace.is_preferred())
                .or(names.last())
                .map(|fn_attr| fn_attr.name.clone())
                .unwrap_or_default()
        };

        IndexEntry {
            filename: String::new(),
            file_name_count: names.len(),
            parent_reference: first.parent_reference,
            name,
        }
    }

    pub fn has_file_name(&self) -> bool {
        self.file_name_count > 0
    }

    pub fn is_resolved(&self) -> bool {
        !self.filename.is_empty()
    }
}

/// One entry per record number, in record-number order.
#[derive(Debug, Default, Clone)]
pub struct IndexTable {
    entries: Vec<IndexEntry>,
}

impl IndexTable {
    pub fn new() -> Self {
        IndexTable::default()
    }

    pub fn with_capacity(records: usize) -> Self {
        IndexTable {
            entries: Vec::with_capacity(records),
        }
    }

    /// Append the entry for the next record number and return that number.
    pub fn push(&mut self, entry: IndexEntry) -> u64 {
        self.entries.push(entry);
        (self.entries.len() - 1) as u64
    }

    pub fn get(&self, record_number: u64) -> Option<&IndexEntry> {
        usize::try_from(record_number)
            .ok()
            .and_then(|i| self.entries.get(i))
    }

    pub fn get_mut(&mut self, record_number: u64) -> Option<&mut IndexEntry> {
        usize::try_from(record_number)
            .ok()
            .and_then(|i| self.entries.get_mut(i))
    }

    pub fn contains(&self, record_number: u64) -> bool {
        self.get(record_number).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &IndexEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i as u64, entry))
    }

    pub fn filename(&self, record_number: u64) -> Option<&str> {
        self.get(record_number).map(|e| e.filename.as_str())
    }
}

impl FromIterator<IndexEntry> for IndexTable {
    fn from_iter<I: IntoIterator<Item = IndexEntry>>(iter: I) -> Self {
        IndexTable {
            entries: iter.into_iter().collect(),
        }
    }
}
