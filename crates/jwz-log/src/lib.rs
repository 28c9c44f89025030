//! Append-only JSONL log.
//!
//! The log file (`messages.jsonl`) is the store's source of truth. This
//! crate only moves bytes: one complete line in per append, a locked
//! suffix out per replay. It never parses records and never overwrites;
//! the only legal mutation is appending at the end.
//!
//! Concurrency is mediated by an advisory lock on the sibling `lock`
//! sentinel file, never on the log itself: appends take the exclusive
//! lock for the whole write-and-fsync, replay reads take the shared lock
//! for the whole read, so a reader can never observe a half-written
//! record that is still in flight. A record that was half-written by a
//! *crashed* appender is a different matter; it stays in the file and is
//! skipped by the replay layer.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use jwz_core::Result;

/// Byte range appended to the log by a single record.
///
/// `end` is the log length after the append; writers persist it as the new
/// index offset inside the same index transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendReceipt {
    pub start: u64,
    pub end: u64,
}

/// Handle on the log and its lock sentinel.
///
/// Holds the sentinel file open from construction to drop; individual
/// operations lock and unlock that descriptor around their critical
/// section.
pub struct LogFile {
    log_path: PathBuf,
    lock: File,
}

impl LogFile {
    /// Open the log under `root`, creating the lock sentinel (mode 0600)
    /// if it is missing. Does not create the log file itself; `init`
    /// does that, and `append` creates on demand.
    pub fn open(root: &Path, log_name: &str, lock_name: &str) -> Result<Self> {
        let lock = open_sentinel(&root.join(lock_name))?;
        Ok(Self {
            log_path: root.join(log_name),
            lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }

    /// Current byte length of the log. Zero when the file does not exist.
    pub fn size(&self) -> Result<u64> {
        match std::fs::metadata(&self.log_path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Append one record line.
    ///
    /// `line` must not contain a newline; the terminating `\n` is added
    /// here so record plus terminator land in a single `write_all`,
    /// followed by fsync, all under the exclusive lock. A torn write can
    /// thus only be the result of a crash mid-call, and shows up as a
    /// final line without a terminator.
    pub fn append(&self, line: &str) -> Result<AppendReceipt> {
        debug_assert!(!line.contains('\n'), "log records are single lines");

        self.lock.lock_exclusive()?;
        let result = self.append_locked(line);
        let _ = fs2::FileExt::unlock(&self.lock);
        result
    }

    fn append_locked(&self, line: &str) -> Result<AppendReceipt> {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&self.log_path)?;
        let start = file.seek(SeekFrom::End(0))?;

        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');

        file.write_all(&buf)?;
        file.sync_all()?;

        let end = start + buf.len() as u64;
        tracing::debug!(start, end, "appended log record");
        Ok(AppendReceipt { start, end })
    }

    /// Read everything from `offset` to the current end, under the shared
    /// lock so no append can interleave with the read. Returns raw bytes;
    /// line splitting and parsing belong to the replay layer.
    pub fn read_from(&self, offset: u64) -> Result<Vec<u8>> {
        self.lock.lock_shared()?;
        let result = self.read_from_locked(offset);
        let _ = fs2::FileExt::unlock(&self.lock);
        result
    }

    fn read_from_locked(&self, offset: u64) -> Result<Vec<u8>> {
        let mut file = match File::open(&self.log_path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Open (creating if absent) the advisory-lock sentinel with mode 0600.
fn open_sentinel(path: &Path) -> Result<File> {
    let mut options = OpenOptions::new();
    options.create(true).read(true).write(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    Ok(options.open(path)?)
}
