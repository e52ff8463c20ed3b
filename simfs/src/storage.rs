//! This module provides the `Storage` trait, the interface between an image and the medium it is
//! kept on. The filesystem never modifies an image in place: it reads the whole image and later
//! replaces it with a complete new one.

use std::io::{Read, Write};
use thiserror::Error;

mod file;
pub use file::FileStorage;

#[cfg(any(test, feature = "simulated"))]
#[cfg_attr(docsrs, doc(cfg(feature = "simulated")))]
pub mod simulated;

/// Some kind of error that can occur during a storage operation
#[derive(Error, Debug)]
pub enum StorageError {
    /// Failed to access the backing medium
    #[error("Failed to access the image: {0}")]
    IoError(#[from] std::io::Error),
    /// The new image was written but could not be moved over the old one
    #[error("Failed to replace the image: {0}")]
    PersistError(#[from] tempfile::PersistError),
    /// There is no image yet
    #[error("There is no image at {0}")]
    NotFound(String),
}

/// Backing medium of a single image
pub trait Storage {
    /// Reader over the current image
    type Reader<'a>: Read
    where
        Self: 'a;

    /// Open the current image for reading
    fn open(&self) -> Result<Self::Reader<'_>, StorageError>;

    /// Replace the whole image with what `write` produces
    ///
    /// Implementations must keep the previous image intact if `write` fails or the replacement can
    /// not be completed.
    fn replace<F>(&mut self, write: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut dyn Write) -> std::io::Result<()>;
}
