//! # simfs
//!
//! A minimal block based filesystem that lives in a single flat image.
//!
//! The image holds a fixed number of file slots and a fixed number of equally sized blocks. The
//! content of a file is stored in a chain of blocks, each block slot records the next block of its
//! chain. Capacities are chosen with a [Geometry] when the image is formatted and never change.
//!
//! Every operation on an [Image] loads the complete image into a [Volume], changes it in memory
//! and writes the complete image back. A rejected operation does not write anything. The new
//! image is written to a temporary file first and moved over the old one, so a failed write can
//! not leave a half written image behind.
//!
//! ```
//! use simfs::{storage::simulated::SimulatedStorage, Geometry, Image};
//!
//! let mut image = Image::format(SimulatedStorage::new(), Geometry::default()).unwrap();
//! image.create_file("hello").unwrap();
//! image.write_file("hello", 0, 5, &b"world"[..]).unwrap();
//!
//! let mut output = Vec::new();
//! image.read_file("hello", 0, 5, &mut output).unwrap();
//! assert_eq!(output, b"world");
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod allocator;
pub mod codec;
pub mod file_table;
pub mod geometry;
pub mod image;
pub mod storage;
pub mod volume;

pub use allocator::{AllocationError, BlockPool, BlockSlot};
pub use file_table::{FileEntry, FileName, FileTable, InvalidFileNameError, MAX_NAME_LENGTH};
pub use geometry::{BlockIndex, Geometry, GeometryError, Layout, MAX_BLOCK_REGION_LEN};
pub use image::{Image, ImageError, TransactionError};
pub use storage::{FileStorage, Storage, StorageError};
pub use volume::{
    ConsistencyError, CreateFileError, DeleteFileError, ReadFileError, Volume, WriteFileError,
};
