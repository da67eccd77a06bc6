// Append-only log of item keys that reached a terminal outcome.
//
// One key per line. Writers take an exclusive advisory lock on the log file
// for the duration of a single append; readers take a shared lock while
// consuming the tail. A line without its terminating newline is a crash
// artifact: readers skip it and the next writer truncates it away.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid checkpoint key {0:?}: keys must be non-empty and single-line")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Durable record of processed item keys, shared safely between processes.
pub struct CheckpointStore {
    path: PathBuf,
    seen: HashSet<String>,
    /// Byte offset just past the last complete line consumed.
    offset: u64,
}

impl CheckpointStore {
    /// Open (creating if needed) the log at `path` and load every committed key.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| io_err(&path, e))?;
        }

        let mut store = Self {
            path,
            seen: HashSet::new(),
            offset: 0,
        };
        store.refresh()?;
        info!(path = %store.path.display(), keys = store.seen.len(), "Loaded checkpoint");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Membership against what this process has read so far. No I/O.
    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    /// Pick up keys appended by other processes since the last read.
    pub fn refresh(&mut self) -> Result<()> {
        let mut file = self.open_file()?;
        file.lock_shared().map_err(|e| io_err(&self.path, e))?;
        let outcome = self.consume_tail(&mut file).map(|_| ());
        let _ = file.unlock();
        outcome
    }

    /// Refresh from disk, then check membership.
    pub fn is_processed(&mut self, key: &str) -> Result<bool> {
        self.refresh()?;
        Ok(self.contains(key))
    }

    /// Durably append `key` unless some process already recorded it.
    ///
    /// Returns `true` when this call wrote the entry. The entry is synced to
    /// disk before this returns.
    pub fn record(&mut self, key: &str) -> Result<bool> {
        if key.is_empty() || key.contains(['\n', '\r']) {
            return Err(CheckpointError::InvalidKey(key.to_string()));
        }

        let mut file = self.open_file()?;
        file.lock().map_err(|e| io_err(&self.path, e))?;
        let outcome = self.append_locked(&mut file, key);
        let _ = file.unlock();

        if let Ok(true) = outcome {
            debug!(key, "Checkpointed");
        }
        outcome
    }

    fn append_locked(&mut self, file: &mut File, key: &str) -> Result<bool> {
        let partial = self.consume_tail(file)?;
        if partial > 0 {
            // Only a crashed writer can leave a partial line: we hold the lock.
            warn!(
                path = %self.path.display(),
                bytes = partial,
                "Truncating partial checkpoint line"
            );
            file.set_len(self.offset).map_err(|e| io_err(&self.path, e))?;
        }

        if self.seen.contains(key) {
            return Ok(false);
        }

        let mut line = Vec::with_capacity(key.len() + 1);
        line.extend_from_slice(key.as_bytes());
        line.push(b'\n');

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| io_err(&self.path, e))?;
        file.write_all(&line).map_err(|e| io_err(&self.path, e))?;
        file.sync_data().map_err(|e| io_err(&self.path, e))?;

        self.offset += line.len() as u64;
        self.seen.insert(key.to_string());
        Ok(true)
    }

    /// Read complete lines past `offset` into `seen`. Returns the number of
    /// trailing bytes that belong to an unterminated line.
    fn consume_tail(&mut self, file: &mut File) -> Result<u64> {
        let len = file
            .metadata()
            .map_err(|e| io_err(&self.path, e))?
            .len();
        if len < self.offset {
            // Log was replaced or shrunk underneath us; rescan from the start.
            self.offset = 0;
        }

        file.seek(SeekFrom::Start(self.offset))
            .map_err(|e| io_err(&self.path, e))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)
            .map_err(|e| io_err(&self.path, e))?;

        let complete = match buf.iter().rposition(|&b| b == b'\n') {
            Some(idx) => idx + 1,
            None => 0,
        };

        for line in buf[..complete].split(|&b| b == b'\n') {
            let key = String::from_utf8_lossy(line);
            let key = key.trim_end_matches('\r');
            if !key.is_empty() {
                self.seen.insert(key.to_string());
            }
        }

        self.offset += complete as u64;
        Ok((buf.len() - complete) as u64)
    }

    fn open_file(&self) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|e| io_err(&self.path, e))
    }
}

fn io_err(path: &Path, source: std::io::Error) -> CheckpointError {
    CheckpointError::Io {
        path: path.to_path_buf(),
        source,
    }
}
