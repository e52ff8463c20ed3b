//! Serialization of a [Volume] to and from the flat image format.
//!
//! All integers are little endian. The records are plain `zerocopy` structs so their size is
//! exactly what ends up on disk:
//!
//! | record            | bytes | fields                                                        |
//! |-------------------|-------|---------------------------------------------------------------|
//! | `FileEntryRecord` | 20    | name (NUL padded), size, first block (`u32::MAX` = none)      |
//! | `BlockSlotRecord` | 8     | state (0 free, 1 used, 2 reserved), padding, next block       |
//!
//! Only the blocks after the reserved prefix are written. When reading, an image that ends early
//! just leaves the remaining blocks zeroed.
use crate::{
    allocator::{BlockPool, BlockSlot},
    file_table::{FileEntry, FileName, FileTable, MAX_NAME_LENGTH},
    geometry::{BlockIndex, Layout},
    volume::{ConsistencyError, Volume},
};
use std::io::{self, ErrorKind, Read, Write};
use thiserror::Error;
use zerocopy::{
    byteorder::little_endian::{U16, U32},
    FromBytes, Immutable, IntoBytes, KnownLayout,
};

/// Size of a file entry on disk
pub const FILE_ENTRY_LEN: usize = size_of::<FileEntryRecord>();
/// Size of a block slot on disk
pub const BLOCK_SLOT_LEN: usize = size_of::<BlockSlotRecord>();

const NO_BLOCK: u32 = u32::MAX;

const STATE_FREE: u16 = 0;
const STATE_USED: u16 = 1;
const STATE_RESERVED: u16 = 2;

/// Errors that can occur while reading an image
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to read the image: {0}")]
    IoError(#[from] io::Error),
    #[error("The image ends inside the metadata region")]
    TruncatedMetadata,
    #[error("File entry {index} is invalid: {reason}")]
    InvalidFileEntry { index: usize, reason: String },
    #[error("Block slot {index} is invalid: {reason}")]
    InvalidBlockSlot { index: usize, reason: String },
    #[error(transparent)]
    Inconsistent(#[from] ConsistencyError),
}

#[derive(KnownLayout, FromBytes, IntoBytes, Immutable, Clone, Copy)]
#[repr(C)]
struct FileEntryRecord {
    /// Name of the file, null terminated. All zero for an unused slot
    name: [u8; MAX_NAME_LENGTH + 1],
    /// Length in bytes
    size: U32,
    first_block: U32,
}

#[derive(KnownLayout, FromBytes, IntoBytes, Immutable, Clone, Copy)]
#[repr(C)]
struct BlockSlotRecord {
    state: U16,
    _padding: [u8; 2],
    next: U32,
}

fn encode_block(block: Option<BlockIndex>) -> U32 {
    U32::new(block.unwrap_or(NO_BLOCK))
}

fn decode_block(block: U32) -> Option<BlockIndex> {
    match block.get() {
        NO_BLOCK => None,
        block => Some(block),
    }
}

impl From<&FileEntry> for FileEntryRecord {
    fn from(entry: &FileEntry) -> Self {
        let mut name = [0u8; MAX_NAME_LENGTH + 1];
        if let Some(entry_name) = &entry.name {
            let bytes = entry_name.as_str().as_bytes();
            name[..bytes.len()].copy_from_slice(bytes);
        }
        FileEntryRecord {
            name,
            size: U32::new(entry.size),
            first_block: encode_block(entry.first_block),
        }
    }
}

impl FileEntryRecord {
    fn to_entry(self) -> Result<FileEntry, String> {
        let name_length = self.name.iter().position(|&c| c == b'\0').unwrap_or(self.name.len());
        let name = match name_length {
            0 => None,
            length if length > MAX_NAME_LENGTH => {
                return Err("the name is not terminated".into());
            }
            length => {
                let name = std::str::from_utf8(&self.name[..length])
                    .map_err(|_| "the name is not valid UTF-8".to_string())?;
                Some(FileName::new(name).map_err(|error| error.to_string())?)
            }
        };
        Ok(FileEntry {
            name,
            size: self.size.get(),
            first_block: decode_block(self.first_block),
        })
    }
}

impl From<&BlockSlot> for BlockSlotRecord {
    fn from(slot: &BlockSlot) -> Self {
        let (state, next) = match slot {
            BlockSlot::Free => (STATE_FREE, None),
            BlockSlot::Used { next } => (STATE_USED, *next),
            BlockSlot::Reserved => (STATE_RESERVED, None),
        };
        BlockSlotRecord {
            state: U16::new(state),
            _padding: [0; 2],
            next: encode_block(next),
        }
    }
}

impl BlockSlotRecord {
    fn to_slot(self) -> Result<BlockSlot, String> {
        let next = decode_block(self.next);
        match (self.state.get(), next) {
            (STATE_FREE, None) => Ok(BlockSlot::Free),
            (STATE_USED, next) => Ok(BlockSlot::Used { next }),
            (STATE_RESERVED, None) => Ok(BlockSlot::Reserved),
            (STATE_FREE | STATE_RESERVED, Some(next)) => {
                Err(format!("a block that is not in use points to block {}", next))
            }
            (state, _) => Err(format!("unknown state {}", state)),
        }
    }
}

/// Read until `buffer` is full or the reader is exhausted
fn read_full(reader: &mut impl Read, buffer: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        match reader.read(&mut buffer[filled..]) {
            Ok(0) => break,
            Ok(count) => filled += count,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(error),
        }
    }
    Ok(filled)
}

fn read_metadata(reader: &mut impl Read, length: usize) -> Result<Vec<u8>, DecodeError> {
    let mut buffer = vec![0u8; length];
    reader.read_exact(&mut buffer).map_err(|error| match error.kind() {
        ErrorKind::UnexpectedEof => DecodeError::TruncatedMetadata,
        _ => DecodeError::IoError(error),
    })?;
    Ok(buffer)
}

/// Write a complete image of `volume`
///
/// The volume must have the geometry of `layout`.
pub fn encode(volume: &Volume, layout: &Layout, writer: &mut dyn Write) -> io::Result<()> {
    debug_assert_eq!(volume.geometry(), layout.geometry());

    for entry in volume.files().slots() {
        writer.write_all(FileEntryRecord::from(entry).as_bytes())?;
    }
    for slot in volume.blocks().slots() {
        writer.write_all(BlockSlotRecord::from(slot).as_bytes())?;
    }
    let padding = vec![0u8; layout.padding_len() as usize];
    writer.write_all(&padding)?;

    let block_size = volume.blocks().block_size();
    let data_start = layout.reserved_blocks() as usize * block_size;
    writer.write_all(&volume.blocks().data()[data_start..])?;
    Ok(())
}

/// Read a complete image
///
/// The metadata region has to be complete. The data region may be shorter than expected, missing
/// blocks are zeroed. The decoded volume is checked for consistency before it is returned.
pub fn decode(layout: &Layout, reader: &mut impl Read) -> Result<Volume, DecodeError> {
    let geometry = layout.geometry();

    let entries = read_metadata(reader, geometry.max_files() as usize * FILE_ENTRY_LEN)?;
    let slots = entries
        .chunks_exact(FILE_ENTRY_LEN)
        .enumerate()
        .map(|(index, chunk)| {
            FileEntryRecord::read_from_bytes(chunk)
                .map_err(|_| "the record has the wrong size".to_string())
                .and_then(FileEntryRecord::to_entry)
                .map_err(|reason| DecodeError::InvalidFileEntry { index, reason })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let files = FileTable::from_slots(slots);

    let block_slots = read_metadata(reader, geometry.max_blocks() as usize * BLOCK_SLOT_LEN)?;
    let reserved = layout.reserved_blocks() as usize;
    let block_slots = block_slots
        .chunks_exact(BLOCK_SLOT_LEN)
        .enumerate()
        .map(|(index, chunk)| {
            let slot = BlockSlotRecord::read_from_bytes(chunk)
                .map_err(|_| "the record has the wrong size".to_string())
                .and_then(BlockSlotRecord::to_slot)
                .map_err(|reason| DecodeError::InvalidBlockSlot { index, reason })?;
            let reason = match (index < reserved, slot) {
                (true, BlockSlot::Reserved) | (false, BlockSlot::Free | BlockSlot::Used { .. }) => {
                    return Ok(slot)
                }
                (true, _) => "the block is covered by the metadata region but not reserved",
                (false, _) => "the block is reserved but outside of the metadata region",
            };
            Err(DecodeError::InvalidBlockSlot {
                index,
                reason: reason.into(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    io::copy(&mut reader.by_ref().take(layout.padding_len()), &mut io::sink())?;

    let block_size = geometry.block_size() as usize;
    let mut data = vec![0u8; geometry.max_blocks() as usize * block_size];
    for block in data[reserved * block_size..].chunks_exact_mut(block_size) {
        if read_full(reader, block)? < block_size {
            log::debug!("The image ends before the last data block");
            break;
        }
    }

    let volume = Volume::from_parts(
        geometry,
        files,
        BlockPool::from_parts(block_size, block_slots, data),
    );
    volume.check()?;
    Ok(volume)
}
