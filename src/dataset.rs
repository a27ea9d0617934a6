//! Line-addressable dataset store.
//!
//! A dataset is one NDJSON file read line by line at startup. Every line is
//! announced to a caller-supplied handler (which decides what, if anything,
//! to index) and then retained for later retrieval: either the line text
//! itself (in-memory mode) or the byte offset of its first byte (disk mode).

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// Dense per-file line number.
pub type LineId = u32;

/// Pointer to one dataset line; the meta payload the server indexes under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRef {
    /// Position of the owning dataset in load order.
    pub dataset: usize,
    pub line: LineId,
}

/// Where line payloads live after the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Lines are kept in memory; the file is closed after loading.
    #[default]
    Memory,
    /// Only byte offsets are kept; retrieval seeks back into the file.
    Disk,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageMode::Memory => f.write_str("memory"),
            StorageMode::Disk => f.write_str("disk"),
        }
    }
}

/// Failure modes of [`Dataset::open`].
#[derive(Debug)]
pub enum DatasetError {
    /// The file could not be opened; nothing was ingested.
    Open(io::Error),
    /// I/O failed mid-stream after `lines` lines were already handed to the
    /// handler.
    Read { lines: LineId, source: io::Error },
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetError::Open(err) => write!(f, "could not open dataset: {err}"),
            DatasetError::Read { lines, source } => {
                write!(f, "read failed after {lines} lines: {source}")
            }
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DatasetError::Open(err) | DatasetError::Read { source: err, .. } => Some(err),
        }
    }
}

/// One loaded NDJSON file.
pub struct Dataset {
    path: PathBuf,
    mode: StorageMode,
    lines: Vec<String>,
    offsets: Vec<u64>,
    /// Disk mode keeps the handle open for seek-and-read retrieval. Seeks
    /// share one file position, so access is serialized behind the lock.
    reader: Option<Mutex<BufReader<File>>>,
    ready: bool,
}

impl Dataset {
    /// Reads the file to EOF, invoking `handler` for every line (blank lines
    /// included) before retaining it.
    ///
    /// The abort flag is polled between lines; when it flips, the load stops
    /// and the dataset is returned not-[`ready`](Self::ready). Trailing
    /// `\r\n` / `\n` are stripped and invalid UTF-8 is replaced before the
    /// handler sees the text.
    pub fn open(
        path: impl Into<PathBuf>,
        mode: StorageMode,
        abort: &AtomicBool,
        mut handler: impl FnMut(LineId, &str),
    ) -> Result<Self, DatasetError> {
        let path = path.into();
        let file = File::open(&path).map_err(DatasetError::Open)?;
        let mut reader = BufReader::new(file);

        let mut dataset = Dataset {
            path,
            mode,
            lines: Vec::new(),
            offsets: Vec::new(),
            reader: None,
            ready: false,
        };

        let mut raw = Vec::new();
        let mut offset = 0u64;
        let mut line_id: LineId = 0;
        loop {
            if abort.load(Ordering::Relaxed) {
                break;
            }
            raw.clear();
            let read = reader
                .read_until(b'\n', &mut raw)
                .map_err(|source| DatasetError::Read {
                    lines: line_id,
                    source,
                })?;
            if read == 0 {
                dataset.ready = true;
                break;
            }
            let line_offset = offset;
            offset += read as u64;

            while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
                raw.pop();
            }
            let text = String::from_utf8_lossy(&raw);
            handler(line_id, &text);

            match mode {
                StorageMode::Memory => dataset.lines.push(text.into_owned()),
                StorageMode::Disk => dataset.offsets.push(line_offset),
            }
            line_id += 1;
        }

        if mode == StorageMode::Disk {
            dataset.reader = Some(Mutex::new(reader));
        }
        Ok(dataset)
    }

    /// Retrieves one line.
    ///
    /// In-memory mode returns the retained text; disk mode seeks to the
    /// recorded offset and re-reads the line, which matches the original
    /// bytes as long as the file is not mutated at runtime.
    pub fn line(&self, id: LineId) -> io::Result<String> {
        match self.mode {
            StorageMode::Memory => Ok(self.lines[id as usize].clone()),
            StorageMode::Disk => {
                let reader = self
                    .reader
                    .as_ref()
                    .expect("disk-mode dataset keeps its reader");
                let mut guard = reader.lock();
                guard.seek(SeekFrom::Start(self.offsets[id as usize]))?;
                let mut raw = Vec::new();
                guard.read_until(b'\n', &mut raw)?;
                while raw.last() == Some(&b'\n') || raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                Ok(String::from_utf8_lossy(&raw).into_owned())
            }
        }
    }

    /// Number of lines ingested.
    pub fn len(&self) -> usize {
        match self.mode {
            StorageMode::Memory => self.lines.len(),
            StorageMode::Disk => self.offsets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when the load reached EOF without error.
    pub fn ready(&self) -> bool {
        self.ready
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> StorageMode {
        self.mode
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("len", &self.len())
            .field("ready", &self.ready)
            .finish()
    }
}
