//! In-memory state of a filesystem and the operations on it.
//!
//! A [Volume] is what the codec loads from and stores to an image. All four file operations
//! work purely on this in-memory state. Persisting the result is the job of [crate::Image].
use crate::{
    allocator::{AllocationError, BlockPool, BlockSlot},
    file_table::{FileEntry, FileName, FileTable, InvalidFileNameError},
    geometry::{BlockIndex, Geometry},
};
use std::{collections::HashSet, fmt};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CreateFileError {
    #[error(transparent)]
    InvalidFileName(#[from] InvalidFileNameError),
    #[error("A file named {0} already exists")]
    AlreadyExists(String),
    #[error("The file table is full")]
    DirectoryFull,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeleteFileError {
    #[error("The file {0} does not exist")]
    FileNotFound(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WriteFileError {
    #[error("The file {0} does not exist")]
    FileNotFound(String),
    #[error("Did not receive any input")]
    EmptyInput,
    #[error("Expected {expected} bytes of input but only received {received}")]
    ShortInput { expected: u32, received: u32 },
    #[error("Writing {length} bytes at offset {start} exceeds the maximum file size")]
    TooLarge { start: u32, length: usize },
    #[error("Not enough free blocks")]
    OutOfSpace,
    #[error("Block {0} is not part of a chain")]
    BrokenChain(BlockIndex),
}

impl From<AllocationError> for WriteFileError {
    fn from(error: AllocationError) -> Self {
        match error {
            AllocationError::OutOfSpace => WriteFileError::OutOfSpace,
            AllocationError::NotInChain(index) => WriteFileError::BrokenChain(index),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadFileError {
    #[error("The file {0} does not exist")]
    FileNotFound(String),
    #[error("Reading {length} bytes at offset {start} is out of range for a file of {size} bytes")]
    OutOfRange { start: u32, length: u32, size: u32 },
}

/// Violations of the structural invariants of a volume
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("The name {0} is used by more than one file")]
    DuplicateName(String),
    #[error("The unused file slot {0} still has a size or blocks")]
    StrayEntry(usize),
    #[error("The chain of {file} refers to block {block}, which is out of range")]
    BlockOutOfRange { file: String, block: BlockIndex },
    #[error("The chain of {file} refers to block {block}, which is not in use")]
    UnusedBlockInChain { file: String, block: BlockIndex },
    #[error("Block {block} is reached twice, the chain of {file} is cyclic or shared")]
    SharedBlock { file: String, block: BlockIndex },
    #[error("The chain of {file} holds {capacity} bytes but the file is {size} bytes long")]
    ChainTooShort { file: String, capacity: u64, size: u32 },
    #[error("Block {0} is in use but not part of any file")]
    OrphanedBlock(BlockIndex),
}

/// File table, block table and block contents of a filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    geometry: Geometry,
    files: FileTable,
    blocks: BlockPool,
}

impl Volume {
    /// An empty volume where all file slots are unused and all blocks are free
    pub fn new(geometry: Geometry) -> Self {
        Volume {
            geometry,
            files: FileTable::new(geometry.max_files()),
            blocks: BlockPool::new(&geometry),
        }
    }

    pub(crate) fn from_parts(geometry: Geometry, files: FileTable, blocks: BlockPool) -> Self {
        Volume {
            geometry,
            files,
            blocks,
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn files(&self) -> &FileTable {
        &self.files
    }

    pub fn blocks(&self) -> &BlockPool {
        &self.blocks
    }

    /// Mark the first `count` blocks as covered by metadata
    pub fn reserve_prefix(&mut self, count: u32) {
        self.blocks.reserve_prefix(count);
    }

    /// Entry of the file with this name
    pub fn stat(&self, name: &str) -> Option<&FileEntry> {
        self.files.find(name).and_then(|slot| self.files.get(slot))
    }

    /// Claim the first unused file slot for a new, empty file
    pub fn create_file(&mut self, name: &str) -> Result<(), CreateFileError> {
        let name = FileName::new(name)?;
        if self.files.find(name.as_str()).is_some() {
            return Err(CreateFileError::AlreadyExists(name.to_string()));
        }
        let Some(slot) = self.files.first_free() else {
            return Err(CreateFileError::DirectoryFull);
        };
        let Some(entry) = self.files.get_mut(slot) else {
            return Err(CreateFileError::DirectoryFull);
        };
        *entry = FileEntry {
            name: Some(name),
            size: 0,
            first_block: None,
        };
        Ok(())
    }

    /// Remove a file and return its blocks to the pool
    ///
    /// Returns the number of freed blocks.
    pub fn delete_file(&mut self, name: &str) -> Result<usize, DeleteFileError> {
        let Some(entry) = self.files.find(name).and_then(|slot| self.files.get_mut(slot)) else {
            return Err(DeleteFileError::FileNotFound(name.into()));
        };
        let removed = std::mem::take(entry);
        Ok(self.blocks.free_chain(removed.first_block))
    }

    /// Write `data` into a file starting at byte offset `start`
    ///
    /// The chain is extended as needed. If the pool runs out of blocks the blocks that were
    /// already linked stay in the chain, but the size of the file is left unchanged.
    pub fn write_file(&mut self, name: &str, start: u32, data: &[u8]) -> Result<(), WriteFileError> {
        let Some(entry) = self.files.find(name).and_then(|slot| self.files.get_mut(slot)) else {
            return Err(WriteFileError::FileNotFound(name.into()));
        };
        if data.is_empty() {
            return Err(WriteFileError::EmptyInput);
        }
        let too_large = WriteFileError::TooLarge {
            start,
            length: data.len(),
        };
        let end = u32::try_from(data.len())
            .ok()
            .and_then(|length| start.checked_add(length))
            .ok_or(too_large)?;

        let first = match entry.first_block {
            Some(first) => first,
            None => {
                let first = self.blocks.allocate()?;
                entry.first_block = Some(first);
                first
            }
        };

        let (block_number, offset) = self.geometry.position(start);
        let mut current = first;
        for _ in 0..block_number {
            current = self.blocks.ensure_next(current)?;
        }

        let block_size = self.blocks.block_size();
        let mut offset = offset as usize;
        let mut written = 0;
        while written < data.len() {
            if offset == block_size {
                current = self.blocks.ensure_next(current)?;
                offset = 0;
            }
            let count = (block_size - offset).min(data.len() - written);
            self.blocks.block_mut(current)[offset..offset + count]
                .copy_from_slice(&data[written..written + count]);
            written += count;
            offset += count;
        }

        if end > entry.size {
            entry.size = end;
        }
        Ok(())
    }

    /// Read `length` bytes of a file starting at byte offset `start`
    ///
    /// Only existing blocks are visited. The whole range has to be inside the file.
    pub fn read_file(&self, name: &str, start: u32, length: u32) -> Result<Vec<u8>, ReadFileError> {
        let Some(entry) = self.stat(name) else {
            return Err(ReadFileError::FileNotFound(name.into()));
        };
        let out_of_range = ReadFileError::OutOfRange {
            start,
            length,
            size: entry.size,
        };
        match start.checked_add(length) {
            Some(end) if end <= entry.size => {}
            _ => return Err(out_of_range),
        }
        if length == 0 {
            return Ok(Vec::new());
        }

        let (block_number, offset) = self.geometry.position(start);
        let mut chain = self
            .blocks
            .chain(entry.first_block)
            .skip(block_number as usize);
        let mut current = chain.next().ok_or_else(|| out_of_range.clone())?;

        let block_size = self.blocks.block_size();
        let length = length as usize;
        let mut offset = offset as usize;
        let mut content = Vec::with_capacity(length);
        while content.len() < length {
            if offset == block_size {
                current = chain.next().ok_or_else(|| out_of_range.clone())?;
                offset = 0;
            }
            let count = (block_size - offset).min(length - content.len());
            content.extend_from_slice(&self.blocks.block(current)[offset..offset + count]);
            offset += count;
        }
        Ok(content)
    }

    /// Verify the invariants that tie the file table and the block table together
    pub fn check(&self) -> Result<(), ConsistencyError> {
        let mut names = HashSet::new();
        let mut reached = vec![false; self.blocks.len()];
        let block_size = self.blocks.block_size() as u64;

        for (slot, entry) in self.files.slots().iter().enumerate() {
            let Some(name) = &entry.name else {
                if entry.size != 0 || entry.first_block.is_some() {
                    return Err(ConsistencyError::StrayEntry(slot));
                }
                continue;
            };
            if !names.insert(name.as_str()) {
                return Err(ConsistencyError::DuplicateName(name.to_string()));
            }

            let mut length = 0u64;
            let mut current = entry.first_block;
            while let Some(block) = current {
                let file = || name.to_string();
                let Some(block_slot) = self.blocks.slot(block) else {
                    return Err(ConsistencyError::BlockOutOfRange { file: file(), block });
                };
                let BlockSlot::Used { next } = block_slot else {
                    return Err(ConsistencyError::UnusedBlockInChain { file: file(), block });
                };
                if std::mem::replace(&mut reached[block as usize], true) {
                    return Err(ConsistencyError::SharedBlock { file: file(), block });
                }
                length += 1;
                current = next;
            }
            if length * block_size < entry.size as u64 {
                return Err(ConsistencyError::ChainTooShort {
                    file: name.to_string(),
                    capacity: length * block_size,
                    size: entry.size,
                });
            }
        }

        for (index, slot) in self.blocks.slots().iter().enumerate() {
            if matches!(slot, BlockSlot::Used { .. }) && !reached[index] {
                return Err(ConsistencyError::OrphanedBlock(index as BlockIndex));
            }
        }
        Ok(())
    }
}

/// Human readable dump of the file table and the block map
///
/// The block map uses `R` for reserved, `#` for used and `.` for free blocks.
impl fmt::Display for Volume {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "geometry: {} files, {} blocks of {} bytes",
            self.geometry.max_files(),
            self.geometry.max_blocks(),
            self.geometry.block_size()
        )?;
        writeln!(
            f,
            "files: {} of {} slots used",
            self.files.files().count(),
            self.geometry.max_files()
        )?;
        for (slot, entry) in self.files.slots().iter().enumerate() {
            let Some(name) = &entry.name else {
                continue;
            };
            let chain = self
                .blocks
                .chain(entry.first_block)
                .map(|block| block.to_string())
                .collect::<Vec<_>>();
            writeln!(
                f,
                "  [{}] {:<11} {:>8} bytes  blocks: {}",
                slot,
                name,
                entry.size,
                if chain.is_empty() {
                    "-".to_string()
                } else {
                    chain.join(" -> ")
                }
            )?;
        }
        writeln!(f, "blocks: {} free", self.blocks.free_blocks())?;
        let map = self
            .blocks
            .slots()
            .iter()
            .map(|slot| match slot {
                BlockSlot::Free => '.',
                BlockSlot::Used { .. } => '#',
                BlockSlot::Reserved => 'R',
            })
            .collect::<String>();
        write!(f, "  {}", map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_volume() -> Volume {
        Volume::new(Geometry::new(4, 4, 8).unwrap())
    }

    fn bytes(length: usize) -> Vec<u8> {
        (0..length).map(|index| b'a' + (index % 26) as u8).collect()
    }

    #[test]
    fn worked_example_with_two_blocks() {
        let mut volume = small_volume();
        volume.create_file("a").unwrap();
        volume.write_file("a", 0, b"HELLOWORLD").unwrap();

        let entry = volume.stat("a").unwrap();
        assert_eq!(entry.size, 10);
        assert_eq!(volume.blocks().chain(entry.first_block).count(), 2);
        assert_eq!(volume.read_file("a", 0, 10).unwrap(), b"HELLOWORLD");

        assert_eq!(volume.delete_file("a").unwrap(), 2);
        assert_eq!(volume.blocks().free_blocks(), 4);
        assert!(volume.blocks().next_free_block().is_some());
        volume.check().unwrap();
    }

    #[test]
    fn created_files_are_empty() {
        let mut volume = small_volume();
        volume.create_file("notes").unwrap();
        let entry = volume.stat("notes").unwrap();
        assert_eq!(entry.size, 0);
        assert_eq!(entry.first_block, None);
        assert_eq!(volume.blocks().free_blocks(), 4);
    }

    #[test]
    fn creating_more_files_than_slots_fails() {
        let mut volume = small_volume();
        for name in ["a", "b", "c", "d"] {
            volume.create_file(name).unwrap();
        }
        let before = volume.clone();
        assert_eq!(volume.create_file("e"), Err(CreateFileError::DirectoryFull));
        assert_eq!(volume, before);
    }

    #[test]
    fn creating_a_duplicate_name_fails() {
        let mut volume = small_volume();
        volume.create_file("a").unwrap();
        let Err(CreateFileError::AlreadyExists(name)) = volume.create_file("a") else {
            panic!("Should not be able to create a file twice");
        };
        assert_eq!(name, "a");
    }

    #[test]
    fn creating_a_file_with_an_invalid_name_fails() {
        let mut volume = small_volume();
        let Err(CreateFileError::InvalidFileName(InvalidFileNameError::TooLong)) =
            volume.create_file("a_very_long_name")
        else {
            panic!("Should reject names that do not fit the name field");
        };
    }

    #[test]
    fn deleting_a_missing_file_fails() {
        let mut volume = small_volume();
        assert_eq!(
            volume.delete_file("ghost"),
            Err(DeleteFileError::FileNotFound("ghost".into()))
        );
    }

    #[test]
    fn deleted_files_can_not_be_read() {
        let mut volume = small_volume();
        volume.create_file("a").unwrap();
        volume.write_file("a", 0, b"abc").unwrap();
        volume.delete_file("a").unwrap();
        let Err(ReadFileError::FileNotFound(_)) = volume.read_file("a", 0, 1) else {
            panic!("Should not be able to read a deleted file");
        };
    }

    #[test]
    fn deleted_blocks_are_reused() {
        let geometry = Geometry::new(4, 8, 8).unwrap();
        let mut volume = Volume::new(geometry);
        volume.create_file("a").unwrap();
        volume.create_file("b").unwrap();
        volume.write_file("a", 0, &bytes(24)).unwrap();
        let freed: Vec<_> = volume
            .blocks()
            .chain(volume.stat("a").unwrap().first_block)
            .collect();
        volume.delete_file("a").unwrap();

        volume.write_file("b", 0, &bytes(24)).unwrap();
        let reused: Vec<_> = volume
            .blocks()
            .chain(volume.stat("b").unwrap().first_block)
            .collect();
        assert_eq!(freed, reused);
        volume.check().unwrap();
    }

    #[test]
    fn writing_across_two_block_boundaries_roundtrips() {
        let geometry = Geometry::new(4, 8, 8).unwrap();
        let mut volume = Volume::new(geometry);
        volume.create_file("f").unwrap();
        let content = bytes(2 * 8 + 5);
        volume.write_file("f", 0, &content).unwrap();
        assert_eq!(volume.read_file("f", 0, 21).unwrap(), content);
        assert_eq!(
            volume
                .blocks()
                .chain(volume.stat("f").unwrap().first_block)
                .count(),
            3
        );
        volume.check().unwrap();
    }

    #[test]
    fn writing_at_an_offset_fills_the_gap_with_zeroes() {
        let mut volume = small_volume();
        volume.create_file("f").unwrap();
        volume.write_file("f", 10, b"xy").unwrap();
        assert_eq!(volume.stat("f").unwrap().size, 12);
        let mut expected = vec![0u8; 10];
        expected.extend_from_slice(b"xy");
        assert_eq!(volume.read_file("f", 0, 12).unwrap(), expected);
    }

    #[test]
    fn overwriting_keeps_the_larger_size() {
        let mut volume = small_volume();
        volume.create_file("f").unwrap();
        volume.write_file("f", 0, b"HELLOWORLD").unwrap();
        volume.write_file("f", 5, b"THERE").unwrap();
        volume.write_file("f", 0, b"J").unwrap();
        assert_eq!(volume.stat("f").unwrap().size, 10);
        assert_eq!(volume.read_file("f", 0, 10).unwrap(), b"JELLOTHERE");
    }

    #[test]
    fn writing_exactly_one_block_does_not_allocate_a_successor() {
        let mut volume = small_volume();
        volume.create_file("f").unwrap();
        volume.write_file("f", 0, &bytes(8)).unwrap();
        assert_eq!(volume.blocks().free_blocks(), 3);
        // Appending at the boundary links the next block
        volume.write_file("f", 8, b"!").unwrap();
        assert_eq!(volume.blocks().free_blocks(), 2);
        assert_eq!(volume.read_file("f", 7, 2).unwrap(), vec![bytes(8)[7], b'!']);
    }

    #[test]
    fn writing_to_a_missing_file_fails() {
        let mut volume = small_volume();
        let before = volume.clone();
        assert_eq!(
            volume.write_file("ghost", 0, b"boo"),
            Err(WriteFileError::FileNotFound("ghost".into()))
        );
        assert_eq!(volume, before);
    }

    #[test]
    fn writing_nothing_fails() {
        let mut volume = small_volume();
        volume.create_file("f").unwrap();
        assert_eq!(volume.write_file("f", 0, b""), Err(WriteFileError::EmptyInput));
        assert_eq!(volume.blocks().free_blocks(), 4);
    }

    #[test]
    fn exhausting_the_pool_leaves_other_files_untouched() {
        let mut volume = small_volume();
        volume.create_file("keep").unwrap();
        volume.create_file("big").unwrap();
        volume.write_file("keep", 0, b"precious").unwrap();
        let kept_entry = volume.stat("keep").unwrap().clone();
        let kept_chain: Vec<_> = volume.blocks().chain(kept_entry.first_block).collect();

        assert_eq!(
            volume.write_file("big", 0, &bytes(4 * 8)),
            Err(WriteFileError::OutOfSpace)
        );

        assert_eq!(volume.stat("keep").unwrap(), &kept_entry);
        assert_eq!(
            volume
                .blocks()
                .chain(kept_entry.first_block)
                .collect::<Vec<_>>(),
            kept_chain
        );
        assert_eq!(volume.read_file("keep", 0, 8).unwrap(), b"precious");
        assert_eq!(volume.stat("big").unwrap().size, 0);
    }

    #[test]
    fn seeking_past_the_pool_fails_with_out_of_space() {
        let mut volume = small_volume();
        volume.create_file("f").unwrap();
        assert_eq!(
            volume.write_file("f", 40, b"x"),
            Err(WriteFileError::OutOfSpace)
        );
    }

    #[test]
    fn writes_that_overflow_the_size_field_are_rejected() {
        let mut volume = small_volume();
        volume.create_file("f").unwrap();
        let Err(WriteFileError::TooLarge { .. }) = volume.write_file("f", u32::MAX, b"xy") else {
            panic!("Should reject writes beyond the maximum file size");
        };
        assert_eq!(volume.blocks().free_blocks(), 4);
    }

    #[test]
    fn reading_at_the_end_of_a_file_fails_without_allocating() {
        let mut volume = small_volume();
        volume.create_file("f").unwrap();
        volume.write_file("f", 0, b"HELLOWORLD").unwrap();
        let before = volume.clone();
        let Err(ReadFileError::OutOfRange { size: 10, .. }) = volume.read_file("f", 10, 1) else {
            panic!("Should not be able to read past the end of the file");
        };
        assert_eq!(volume, before);
    }

    #[test]
    fn reading_an_empty_file_fails() {
        let mut volume = small_volume();
        volume.create_file("f").unwrap();
        let Err(ReadFileError::OutOfRange { .. }) = volume.read_file("f", 0, 1) else {
            panic!("An empty file has nothing to read");
        };
        assert_eq!(volume.read_file("f", 0, 0).unwrap(), Vec::<u8>::new());
        assert_eq!(volume.blocks().free_blocks(), 4);
    }

    #[test]
    fn reading_a_range_in_the_middle() {
        let mut volume = small_volume();
        volume.create_file("f").unwrap();
        volume.write_file("f", 0, b"HELLOWORLD").unwrap();
        assert_eq!(volume.read_file("f", 3, 6).unwrap(), b"LOWORL");
        assert_eq!(volume.read_file("f", 8, 2).unwrap(), b"LD");
    }

    #[test]
    fn check_detects_a_chain_shorter_than_the_size() {
        let mut volume = small_volume();
        volume.create_file("f").unwrap();
        volume.write_file("f", 0, b"abc").unwrap();
        let slot = volume.files.find("f").unwrap();
        volume.files.get_mut(slot).unwrap().size = 9;
        let Err(ConsistencyError::ChainTooShort { .. }) = volume.check() else {
            panic!("A size beyond the chain should be detected");
        };
    }

    #[test]
    fn check_detects_orphaned_blocks() {
        let mut volume = small_volume();
        volume.blocks.allocate().unwrap();
        assert_eq!(volume.check(), Err(ConsistencyError::OrphanedBlock(0)));
    }

    #[test]
    fn display_lists_files_and_the_block_map() {
        let mut volume = small_volume();
        volume.reserve_prefix(1);
        volume.create_file("a").unwrap();
        volume.write_file("a", 0, b"HELLOWORLD").unwrap();
        let dump = volume.to_string();
        assert!(dump.contains("files: 1 of 4 slots used"));
        assert!(dump.contains("blocks: 1 -> 2"));
        assert!(dump.ends_with("R##."));
    }

    #[test]
    fn single_byte_blocks_fill_up_without_dividing_by_zero() {
        assert_eq!(
            Geometry::new(1, 1, 0),
            Err(crate::geometry::GeometryError::ZeroBlockSize)
        );
        let mut volume = Volume::new(Geometry::new(1, 1, 1).unwrap());
        volume.create_file("a").unwrap();
        volume.write_file("a", 0, b"x").unwrap();
        assert_eq!(
            volume.write_file("a", 1, b"y"),
            Err(WriteFileError::OutOfSpace)
        );
        assert_eq!(volume.read_file("a", 0, 1).unwrap(), b"x");
    }
}
