//! A Storage that keeps the image in a file on the host

use super::{Storage, StorageError};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

/// An image stored in a regular file
///
/// New images are written to a temporary file next to the target, synced, and then moved over the
/// old image. A crash or an error while writing leaves the previous image untouched.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStorage { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

impl Storage for FileStorage {
    type Reader<'a>
        = BufReader<File>
    where
        Self: 'a;

    fn open(&self) -> Result<Self::Reader<'_>, StorageError> {
        match File::open(&self.path) {
            Ok(file) => Ok(BufReader::new(file)),
            Err(error) if error.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(self.path.display().to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }

    fn replace<F>(&mut self, write: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut dyn Write) -> std::io::Result<()>,
    {
        let mut temporary = NamedTempFile::new_in(self.directory())?;
        {
            let mut writer = BufWriter::new(temporary.as_file_mut());
            write(&mut writer)?;
            writer.flush()?;
        }
        if let Ok(metadata) = fs::metadata(&self.path) {
            temporary.as_file().set_permissions(metadata.permissions())?;
        }
        temporary.as_file().sync_all()?;
        temporary.persist(&self.path)?;
        log::debug!("Replaced image {}", self.path.display());
        Ok(())
    }
}
