// SPDX-License-Identifier: Apache-2.0 OR MIT
// Log file ownership and size-bounded rotation
//
// The writer process is the only writer of the log file and its
// archives. Archives are numbered: `<path>.1` is the most recent,
// `<path>.K` the oldest; rotation shifts the chain and deletes `.K`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A write failure. Rotation errors abort the writer process; plain
/// I/O errors are diagnosed and the stream continues.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("rotation failed: {0}")]
    Rotate(io::Error),
    #[error(transparent)]
    Io(io::Error),
}

pub struct LogFile {
    path: PathBuf,
    file: Option<File>,
    size: u64,
    max_size: u64, // 0 disables rotation
    max_archives: u32,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>, max_size: u64, max_archives: u32) -> Self {
        Self {
            path: path.into(),
            file: None,
            size: 0,
            max_size,
            max_archives,
        }
    }

    /// Open (or re-open) the base file for appending. A no-op when it
    /// is already open.
    pub fn open(&mut self) -> io::Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.size = file.metadata()?.len();
            self.file = Some(file);
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
        self.size = 0;
    }

    /// Append `buf`, rotating first when the write would push the file
    /// past the size threshold.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), WriteError> {
        self.open().map_err(WriteError::Io)?;

        if self.max_size > 0 && self.size + buf.len() as u64 > self.max_size {
            self.rotate().map_err(WriteError::Rotate)?;
            self.open().map_err(WriteError::Io)?;
        }

        if buf.is_empty() {
            return Ok(());
        }

        if self.write_once(buf).is_err() {
            // A lost-and-restored network share leaves the descriptor
            // unusable; re-opening is the only recovery available.
            self.close();
            self.open().map_err(WriteError::Io)?;
            self.write_once(buf).map_err(WriteError::Io)?;
        }

        self.size += buf.len() as u64;
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }

    fn write_once(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(buf),
            None => Err(io::Error::new(io::ErrorKind::NotFound, "log file not open")),
        }
    }

    fn archive_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    /// Shift the archive chain and start a fresh base file. The caller
    /// re-opens afterwards.
    fn rotate(&mut self) -> io::Result<()> {
        self.close();

        if self.max_archives == 0 {
            // No archive slots: start the base file over.
            remove_if_exists(&self.path)?;
            return Ok(());
        }

        remove_if_exists(&self.archive_path(self.max_archives))?;
        for index in (1..self.max_archives).rev() {
            let from = self.archive_path(index);
            if from.exists() {
                rename_with_retry(&from, &self.archive_path(index + 1))?;
            }
        }
        rename_with_retry(&self.path, &self.archive_path(1))
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn rename_with_retry(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(first) => {
            eprintln!(
                "shmlog-writer: rename {} -> {} failed ({}), retrying",
                from.display(),
                to.display(),
                first
            );
            fs::rename(from, to)
        }
    }
}
