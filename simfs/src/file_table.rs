//! The fixed-capacity table of named files.
use crate::geometry::BlockIndex;
use std::fmt;
use thiserror::Error;

/// Maximum length of a file name in bytes. The name field on disk has one more byte for the terminating NUL.
pub const MAX_NAME_LENGTH: usize = 11;

/// Reasons why a string can not be used as a file name
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidFileNameError {
    #[error("The filename can not be empty")]
    Empty,
    #[error("The filename can not be longer than {} bytes", MAX_NAME_LENGTH)]
    TooLong,
    #[error("The filename can not contain NUL bytes")]
    ContainsNul,
}

/// A validated file name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileName(String);

impl FileName {
    pub fn new(name: &str) -> Result<Self, InvalidFileNameError> {
        if name.is_empty() {
            return Err(InvalidFileNameError::Empty);
        }
        if name.len() > MAX_NAME_LENGTH {
            return Err(InvalidFileNameError::TooLong);
        }
        if name.as_bytes().contains(&0) {
            return Err(InvalidFileNameError::ContainsNul);
        }
        Ok(FileName(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for FileName {
    type Error = InvalidFileNameError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        FileName::new(name)
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One slot of the file table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileEntry {
    /// Name of the file, `None` if the slot is unused
    pub name: Option<FileName>,
    /// Logical length of the file in bytes
    pub size: u32,
    /// First block of the chain, `None` until something is written
    pub first_block: Option<BlockIndex>,
}

impl FileEntry {
    pub fn is_used(&self) -> bool {
        self.name.is_some()
    }
}

/// Fixed-capacity array of [FileEntry] slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTable {
    slots: Vec<FileEntry>,
}

impl FileTable {
    /// A table where every slot is unused
    pub fn new(capacity: u32) -> Self {
        FileTable {
            slots: vec![FileEntry::default(); capacity as usize],
        }
    }

    pub(crate) fn from_slots(slots: Vec<FileEntry>) -> Self {
        FileTable { slots }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[FileEntry] {
        &self.slots
    }

    /// Slot index of the file with this name
    pub fn find(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|entry| entry.name.as_ref().is_some_and(|n| n.as_str() == name))
    }

    /// First slot that is not used by a file
    pub fn first_free(&self) -> Option<usize> {
        self.slots.iter().position(|entry| !entry.is_used())
    }

    pub fn get(&self, slot: usize) -> Option<&FileEntry> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut FileEntry> {
        self.slots.get_mut(slot)
    }

    /// Iterate over all slots that hold a file
    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.slots.iter().filter(|entry| entry.is_used())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_validated() {
        assert!(FileName::new("a").is_ok());
        assert!(FileName::new("elevenchars").is_ok());
        assert_eq!(FileName::new(""), Err(InvalidFileNameError::Empty));
        assert_eq!(
            FileName::new("twelve_chars"),
            Err(InvalidFileNameError::TooLong)
        );
        assert_eq!(FileName::new("a\0b"), Err(InvalidFileNameError::ContainsNul));
    }

    #[test]
    fn finding_files_only_matches_used_slots() {
        let mut table = FileTable::new(3);
        assert_eq!(table.find(""), None);
        assert_eq!(table.first_free(), Some(0));

        table.get_mut(1).unwrap().name = Some(FileName::new("notes").unwrap());
        assert_eq!(table.find("notes"), Some(1));
        assert_eq!(table.find("other"), None);
        assert_eq!(table.first_free(), Some(0));
        assert_eq!(table.files().count(), 1);
    }

    #[test]
    fn full_table_has_no_free_slot() {
        let mut table = FileTable::new(2);
        for (slot, name) in ["a", "b"].into_iter().enumerate() {
            table.get_mut(slot).unwrap().name = Some(FileName::new(name).unwrap());
        }
        assert_eq!(table.first_free(), None);
    }
}
