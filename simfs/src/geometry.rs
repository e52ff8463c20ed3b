//! Capacities of a filesystem image and the byte layout derived from them.
//!
//! An image has no header. Every caller has to agree on the same [Geometry]
//! for the lifetime of an image, the [Layout] is then fully determined by it:
//!
//! ```text
//! [FileEntry x max_files][BlockSlot x max_blocks][zero padding][Block x (max_blocks - reserved)]
//! ```
//!
//! The padded metadata region covers the first `reserved_blocks` positions of the block array,
//! so those positions are never used to store file content.
use crate::codec::{BLOCK_SLOT_LEN, FILE_ENTRY_LEN};
use thiserror::Error;

/// Index of a block slot
pub type BlockIndex = u32;

/// Upper bound for `max_blocks * block_size`, a volume keeps all blocks in memory
pub const MAX_BLOCK_REGION_LEN: u64 = 1 << 30;

/// Errors that can occur when creating a [Geometry] or a [Layout]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GeometryError {
    #[error("The file table needs room for at least one file")]
    NoFileSlots,
    #[error("The block table needs at least one block")]
    NoBlocks,
    #[error("The block size can not be zero")]
    ZeroBlockSize,
    #[error("{0} blocks are more than a block index can address")]
    TooManyBlocks(u32),
    #[error("{bytes} bytes of blocks exceed the limit of {} bytes", MAX_BLOCK_REGION_LEN)]
    TooLarge { bytes: u64 },
    #[error("The metadata region occupies {reserved} of {max_blocks} blocks, no blocks are left for data")]
    NoDataBlocks { reserved: u64, max_blocks: u32 },
}

/// Fixed capacities of an image.
///
/// A geometry can only be built through [Geometry::new] or [Default], so every value is valid.
///
/// ```compile_fail
/// let geometry = simfs::Geometry {
///     max_files: 1,
///     max_blocks: 1,
///     block_size: 0,
/// };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    max_files: u32,
    max_blocks: u32,
    block_size: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Geometry {
            max_files: 8,
            max_blocks: 32,
            block_size: 128,
        }
    }
}

impl Geometry {
    pub fn new(max_files: u32, max_blocks: u32, block_size: u32) -> Result<Self, GeometryError> {
        if max_files == 0 {
            return Err(GeometryError::NoFileSlots);
        }
        if max_blocks == 0 {
            return Err(GeometryError::NoBlocks);
        }
        // u32::MAX is the on-disk marker for "no block"
        if max_blocks == u32::MAX {
            return Err(GeometryError::TooManyBlocks(max_blocks));
        }
        if block_size == 0 {
            return Err(GeometryError::ZeroBlockSize);
        }
        let bytes = max_blocks as u64 * block_size as u64;
        if bytes > MAX_BLOCK_REGION_LEN {
            return Err(GeometryError::TooLarge { bytes });
        }
        Ok(Geometry {
            max_files,
            max_blocks,
            block_size,
        })
    }

    /// Number of slots in the file table
    pub fn max_files(&self) -> u32 {
        self.max_files
    }

    /// Number of slots in the block table
    pub fn max_blocks(&self) -> u32 {
        self.max_blocks
    }

    /// Size of a single block in bytes
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Block index and offset inside that block for a byte offset in a file
    pub fn position(&self, offset: u32) -> (u32, u32) {
        (offset / self.block_size, offset % self.block_size)
    }
}

/// Byte layout of an image with a specific [Geometry]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    geometry: Geometry,
    metadata_len: u64,
    padding_len: u64,
    reserved_blocks: u32,
}

impl Layout {
    pub fn new(geometry: Geometry) -> Result<Self, GeometryError> {
        let block_size = geometry.block_size as u64;
        let metadata_len = geometry.max_files as u64 * FILE_ENTRY_LEN as u64
            + geometry.max_blocks as u64 * BLOCK_SLOT_LEN as u64;
        let padding_len = (block_size - metadata_len % block_size) % block_size;
        let reserved = metadata_len.div_ceil(block_size);
        if reserved >= geometry.max_blocks as u64 {
            return Err(GeometryError::NoDataBlocks {
                reserved,
                max_blocks: geometry.max_blocks,
            });
        }

        Ok(Layout {
            geometry,
            metadata_len,
            padding_len,
            reserved_blocks: reserved as u32,
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Length of the file table and the block table without padding
    pub fn metadata_len(&self) -> u64 {
        self.metadata_len
    }

    /// Zero bytes between the block table and the first data block
    pub fn padding_len(&self) -> u64 {
        self.padding_len
    }

    /// Number of block positions covered by the padded metadata region
    pub fn reserved_blocks(&self) -> u32 {
        self.reserved_blocks
    }

    /// Number of blocks that can hold file content
    pub fn data_blocks(&self) -> u32 {
        self.geometry.max_blocks - self.reserved_blocks
    }

    /// Total length of a complete image
    pub fn image_len(&self) -> u64 {
        self.metadata_len
            + self.padding_len
            + self.data_blocks() as u64 * self.geometry.block_size as u64
    }
}
