//! Absolute path resolution over the record index
//!
//! Parent references in a forensic image do not always form a tree: parents
//! can be missing, point at themselves, or loop through several records. Each
//! walk is iterative and keeps its own visited set, so every input terminates,
//! and resolved paths are written back into the table so no record is walked
//! twice.

use std::collections::HashSet;

use log::debug;
use serde::Serialize;

use crate::index::IndexTable;

/// Record number of the volume root directory.
pub const ROOT_RECORD: u64 = 5;

/// Path used when a parent reference points at a record that does not exist.
pub const ORPHAN: &str = "Orphan";
/// Prefix for records whose parent chain loops back on itself.
pub const ORPHAN_PREFIX: &str = "ORPHAN";
/// Path of a record that carries no FILE_NAME attribute.
pub const NO_FN_RECORD: &str = "NoFNRecord";

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    /// Records whose chain reached the root directory.
    pub rooted: u64,
    /// Walks that ended at a parent reference with no index entry.
    pub missing_parent: u64,
    pub self_referential: u64,
    /// Loops longer than one record.
    pub cycles: u64,
    pub no_file_name: u64,
    /// Records visited by upward walks; stays flat when results are memoized.
    pub walk_steps: u64,
}

enum WalkEnd {
    /// Path of the record the walk stopped at, already stored in the table.
    Resolved(String),
    /// Parent reference that has no entry.
    Missing,
}

pub struct PathResolver<'a> {
    table: &'a mut IndexTable,
    separator: char,
    debug: bool,
    stats: ResolutionStats,
}

impl<'a> PathResolver<'a> {
    pub fn new(table: &'a mut IndexTable, separator: char) -> Self {
        PathResolver {
            table,
            separator,
            debug: false,
            stats: ResolutionStats::default(),
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn stats(&self) -> ResolutionStats {
        self.stats
    }

    /// Resolve every entry in the table, then mark entries without a
    /// FILE_NAME as `NoFNRecord`.
    pub fn resolve_all(mut self) -> ResolutionStats {
        let records: Vec<u64> = self
            .table
            .iter()
            .filter(|(_, entry)| !entry.is_resolved() && entry.has_file_name())
            .map(|(number, _)| number)
            .collect();

        for record_number in records {
            let path = self.get_folder_path(record_number);
            if self.debug {
                debug!("Filename (with path) for record {}: {}", record_number, path);
            }
        }

        for number in 0..self.table.len() as u64 {
            if let Some(entry) = self.table.get_mut(number) {
                if !entry.is_resolved() {
                    entry.filename = NO_FN_RECORD.to_string();
                    self.stats.no_file_name += 1;
                }
            }
        }

        self.stats
    }

    /// Absolute path of `record_number`, computing and caching it on first use.
    ///
    /// A record number with no entry yields `Orphan` and leaves the table
    /// untouched.
    pub fn get_folder_path(&mut self, record_number: u64) -> String {
        if self.debug {
            debug!("Building folder for record number ({})", record_number);
        }

        let mut chain: Vec<u64> = Vec::new();
        let mut on_chain: HashSet<u64> = HashSet::new();
        let mut current = record_number;

        let end = loop {
            let Some(entry) = self.table.get_mut(current) else {
                break WalkEnd::Missing;
            };
            if entry.is_resolved() {
                break WalkEnd::Resolved(entry.filename.clone());
            }
            self.stats.walk_steps += 1;

            if !entry.has_file_name() {
                entry.filename = NO_FN_RECORD.to_string();
                self.stats.no_file_name += 1;
                break WalkEnd::Resolved(entry.filename.clone());
            }

            let parent = entry.parent_reference;
            if parent == ROOT_RECORD {
                entry.filename = root_path(&entry.name, self.separator);
                self.stats.rooted += 1;
                break WalkEnd::Resolved(entry.filename.clone());
            }

            if parent == current || on_chain.contains(&parent) {
                if parent == current {
                    self.stats.self_referential += 1;
                    if self.debug {
                        debug!(
                            "Self-referential parent while building path for record {}",
                            current
                        );
                    }
                } else {
                    self.stats.cycles += 1;
                    debug!("Parent cycle through records {:?} closed at {}", chain, current);
                }
                entry.filename = format!("{}{}{}", ORPHAN_PREFIX, self.separator, entry.name);
                break WalkEnd::Resolved(entry.filename.clone());
            }

            chain.push(current);
            on_chain.insert(current);
            current = parent;
        };

        let mut path = match end {
            WalkEnd::Resolved(path) => path,
            WalkEnd::Missing => {
                if chain.is_empty() {
                    return ORPHAN.to_string();
                }
                self.stats.missing_parent += 1;
                ORPHAN.to_string()
            }
        };

        for &number in chain.iter().rev() {
            if let Some(entry) = self.table.get_mut(number) {
                path = join_path(&path, &entry.name, self.separator);
                entry.filename = path.clone();
            }
        }

        path
    }
}

/// Path of a record that sits directly under the root directory.
///
/// The root's own FILE_NAME is "." and it lists itself as parent, so "." (or
/// a bare separator) names the root and maps to the separator alone.
fn root_path(name: &str, separator: char) -> String {
    if name.is_empty() || name == "." || name.chars().eq(std::iter::once(separator)) {
        separator.to_string()
    } else {
        format!("{}{}", separator, name)
    }
}

fn join_path(parent: &str, name: &str, separator: char) -> String {
    if parent.ends_with(separator) {
        format!("{}{}", parent, name)
    } else {
        format!("{}{}{}", parent, separator, name)
    }
}
