//! Transactions against a stored image.
//!
//! Every operation loads the complete image, applies the change to the in-memory [Volume] and
//! stores the complete image again. Nothing is stored if the operation fails, so a rejected
//! operation leaves the image exactly as it was.
//!
//! There is no locking. Two operations that run at the same time against the same image can
//! lose updates, the last store wins.
use crate::{
    codec::{self, DecodeError},
    geometry::{Geometry, GeometryError, Layout},
    storage::{Storage, StorageError},
    volume::{CreateFileError, DeleteFileError, ReadFileError, Volume, WriteFileError},
};
use std::io::{Read, Write};
use thiserror::Error;

/// Failures of the image itself. The image may be damaged or unreadable, the operation can not
/// continue.
#[derive(Error, Debug)]
pub enum ImageError {
    #[error(transparent)]
    StorageError(#[from] StorageError),
    #[error("The image is damaged: {0}")]
    DecodeError(#[from] DecodeError),
    #[error(transparent)]
    GeometryError(#[from] GeometryError),
    #[error("The volume has geometry {volume:?} but the image has {image:?}")]
    GeometryMismatch { volume: Geometry, image: Geometry },
}

/// Error of a single transaction
#[derive(Error, Debug)]
pub enum TransactionError<E: std::error::Error + 'static> {
    /// The operation was rejected, the image is unchanged
    #[error(transparent)]
    Operation(E),
    /// Loading or storing the image failed
    #[error(transparent)]
    Image(#[from] ImageError),
    /// Reading the input for a write failed
    #[error("Failed to read the input: {0}")]
    Input(std::io::Error),
    /// Writing the output of a read failed
    #[error("Failed to write the output: {0}")]
    Output(std::io::Error),
}

impl<E: std::error::Error + 'static> TransactionError<E> {
    /// Whether the image itself failed, as opposed to a rejected operation
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransactionError::Image(_))
    }

    /// The rejected operation, if that is what failed
    pub fn operation(&self) -> Option<&E> {
        match self {
            TransactionError::Operation(error) => Some(error),
            _ => None,
        }
    }
}

/// An image on a [Storage] with a known [Geometry]
pub struct Image<S: Storage> {
    storage: S,
    layout: Layout,
}

impl<S: Storage> Image<S> {
    /// Use an existing image
    pub fn new(storage: S, geometry: Geometry) -> Result<Self, ImageError> {
        Ok(Image {
            storage,
            layout: Layout::new(geometry)?,
        })
    }

    /// Write a fresh image where every file slot is unused and every data block is free
    ///
    /// Anything that was stored before is replaced.
    pub fn format(storage: S, geometry: Geometry) -> Result<Self, ImageError> {
        let mut image = Image::new(storage, geometry)?;
        let mut volume = Volume::new(geometry);
        volume.reserve_prefix(image.layout.reserved_blocks());
        image.store(&volume)?;
        log::info!(
            "Formatted image with {} file slots and {} data blocks of {} bytes",
            geometry.max_files(),
            image.layout.data_blocks(),
            geometry.block_size()
        );
        Ok(image)
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    /// Read the complete image
    pub fn load(&self) -> Result<Volume, ImageError> {
        let mut reader = self.storage.open()?;
        let volume = codec::decode(&self.layout, &mut reader)?;
        Ok(volume)
    }

    /// Replace the complete image with `volume`
    pub fn store(&mut self, volume: &Volume) -> Result<(), ImageError> {
        if volume.geometry() != self.layout.geometry() {
            return Err(ImageError::GeometryMismatch {
                volume: volume.geometry(),
                image: self.layout.geometry(),
            });
        }
        let layout = self.layout;
        self.storage
            .replace(|writer| codec::encode(volume, &layout, writer))?;
        Ok(())
    }

    /// Load, apply `operation` and store if it succeeded
    fn transaction<T, E>(
        &mut self,
        operation: impl FnOnce(&mut Volume) -> Result<T, TransactionError<E>>,
    ) -> Result<T, TransactionError<E>>
    where
        E: std::error::Error + 'static,
    {
        let mut volume = self.load()?;
        match operation(&mut volume) {
            Ok(result) => {
                self.store(&volume)?;
                Ok(result)
            }
            Err(error) => {
                log::debug!("Discarding changes: {}", error);
                Err(error)
            }
        }
    }

    /// Load the image for display, the stored image is left untouched
    pub fn inspect(&self) -> Result<Volume, ImageError> {
        let volume = self.load()?;
        log::debug!(
            "Inspected image with {} files and {} free blocks",
            volume.files().files().count(),
            volume.blocks().free_blocks()
        );
        Ok(volume)
    }

    /// Verify that the image can be loaded and is consistent
    pub fn check(&self) -> Result<(), ImageError> {
        self.load().map(|_| ())
    }

    pub fn create_file(&mut self, name: &str) -> Result<(), TransactionError<CreateFileError>> {
        self.transaction(|volume| {
            volume
                .create_file(name)
                .map_err(TransactionError::Operation)
        })?;
        log::info!("Created {}", name);
        Ok(())
    }

    /// Delete a file and free its blocks. Returns the number of freed blocks.
    pub fn delete_file(&mut self, name: &str) -> Result<usize, TransactionError<DeleteFileError>> {
        let freed = self.transaction(|volume| {
            volume
                .delete_file(name)
                .map_err(TransactionError::Operation)
        })?;
        log::info!("Deleted {} and freed {} blocks", name, freed);
        Ok(freed)
    }

    /// Write exactly `length` bytes from `input` into a file starting at `start`
    pub fn write_file(
        &mut self,
        name: &str,
        start: u32,
        length: u32,
        input: impl Read,
    ) -> Result<(), TransactionError<WriteFileError>> {
        self.transaction(|volume| {
            if volume.stat(name).is_none() {
                return Err(TransactionError::Operation(WriteFileError::FileNotFound(
                    name.into(),
                )));
            }

            let mut data = Vec::new();
            input
                .take(length as u64)
                .read_to_end(&mut data)
                .map_err(TransactionError::Input)?;
            if data.is_empty() {
                return Err(TransactionError::Operation(WriteFileError::EmptyInput));
            }
            if data.len() < length as usize {
                return Err(TransactionError::Operation(WriteFileError::ShortInput {
                    expected: length,
                    received: data.len() as u32,
                }));
            }

            volume
                .write_file(name, start, &data)
                .map_err(TransactionError::Operation)
        })?;
        log::info!("Wrote {} bytes to {} at offset {}", length, name, start);
        Ok(())
    }

    /// Copy `length` bytes of a file starting at `start` to `output`
    ///
    /// The image is never modified by a read.
    pub fn read_file(
        &self,
        name: &str,
        start: u32,
        length: u32,
        mut output: impl Write,
    ) -> Result<(), TransactionError<ReadFileError>> {
        let volume = self.load()?;
        let content = volume
            .read_file(name, start, length)
            .map_err(TransactionError::Operation)?;
        output
            .write_all(&content)
            .and_then(|_| output.flush())
            .map_err(TransactionError::Output)?;
        log::debug!("Read {} bytes from {} at offset {}", length, name, start);
        Ok(())
    }
}
