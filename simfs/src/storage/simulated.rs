//! A Storage for testing purposes that is backed by a heap allocated buffer

use super::{Storage, StorageError};
use std::io::{self, Write};

#[derive(Debug, Default, Clone)]
/// A storage that is backed by a heap allocated buffer
///
/// Like [super::FileStorage], a replacement only becomes visible once it was written completely.
///
/// ```
/// use simfs::storage::simulated::SimulatedStorage;
/// let storage = SimulatedStorage::new();
/// ```
pub struct SimulatedStorage {
    image: Option<Vec<u8>>,
    /// Fail every write after this many bytes
    write_limit: Option<usize>,
}

impl SimulatedStorage {
    /// Create an empty storage without an image
    pub fn new() -> SimulatedStorage {
        SimulatedStorage::default()
    }

    /// Create a storage that already contains an image
    pub fn with_image(image: Vec<u8>) -> SimulatedStorage {
        SimulatedStorage {
            image: Some(image),
            write_limit: None,
        }
    }

    /// Make every following replacement fail after `bytes` bytes have been written
    pub fn fail_writes_after(&mut self, bytes: usize) {
        self.write_limit = Some(bytes);
    }

    /// Current content of the storage
    pub fn image(&self) -> Option<&[u8]> {
        self.image.as_deref()
    }
}

/// Buffer that runs out of space after a fixed number of bytes
struct LimitedBuffer {
    buffer: Vec<u8>,
    limit: usize,
}

impl Write for LimitedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let remaining = self.limit.saturating_sub(self.buffer.len());
        if remaining == 0 && !buf.is_empty() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "simulated disk is full"));
        }
        let length = remaining.min(buf.len());
        self.buffer.extend_from_slice(&buf[..length]);
        Ok(length)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Storage for SimulatedStorage {
    type Reader<'a>
        = &'a [u8]
    where
        Self: 'a;

    fn open(&self) -> Result<Self::Reader<'_>, StorageError> {
        self.image
            .as_deref()
            .ok_or_else(|| StorageError::NotFound("simulated storage".into()))
    }

    fn replace<F>(&mut self, write: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut dyn Write) -> io::Result<()>,
    {
        let mut staging = LimitedBuffer {
            buffer: Vec::new(),
            limit: self.write_limit.unwrap_or(usize::MAX),
        };
        write(&mut staging)?;
        self.image = Some(staging.buffer);
        Ok(())
    }
}
