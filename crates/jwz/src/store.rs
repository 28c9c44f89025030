//! Store lifecycle: init, discover, open, close.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use jwz_core::{Clock, IdGenerator, Result, RetryPolicy, StoreError, SystemClock};
use jwz_log::LogFile;
use jwz_sqlite::{schema, Database};

use crate::replay;

/// Preferred directory name for new stores.
pub const STORE_DIR: &str = ".jwz";
/// Older stores used this name; discovery accepts both.
pub const LEGACY_STORE_DIR: &str = ".zawinski";

pub const LOG_FILE: &str = "messages.jsonl";
pub const INDEX_FILE: &str = "messages.db";
pub const LOCK_FILE: &str = "lock";

/// The index and its WAL artifacts are derived state; the log is the
/// source of truth and stays tracked.
const GITIGNORE: &str = "messages.db\nmessages.db-wal\nmessages.db-shm\nlock\n";

/// Open-time configuration. The defaults are the production contract;
/// tests swap in a pinned clock and a sleepless retry policy.
#[derive(Clone)]
pub struct StoreConfig {
    pub retry: RetryPolicy,
    /// Engine-level busy timeout pragma, milliseconds.
    pub busy_timeout_ms: u32,
    pub clock: Arc<dyn Clock>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            busy_timeout_ms: 300_000,
            clock: Arc::new(SystemClock),
        }
    }
}

impl StoreConfig {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_busy_timeout_ms(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Counters for `Store::stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Byte length of the append-only log.
    pub log_bytes: u64,
    /// Persisted byte offset the index has caught up to.
    pub index_offset: u64,
    pub topic_count: i64,
    pub message_count: i64,
    pub blob_count: i64,
}

/// An open message store.
///
/// Owns the index connection and the log lock handle; both are released
/// on [`close`](Store::close) or drop. One `Store` per process is the
/// intended shape; cross-process coordination happens through the log
/// lock and the engine's own locking, not through this handle.
pub struct Store {
    root: PathBuf,
    pub(crate) db: Database,
    pub(crate) log: LogFile,
    pub(crate) ids: IdGenerator,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Store {
    /// Create a new store directory under `parent` and return its path.
    ///
    /// Lays down the empty log, the ignore file, and the lock sentinel.
    /// The index is created lazily on first open. Fails with
    /// [`StoreError::StoreAlreadyExists`] if the directory is present.
    pub fn init(parent: &Path) -> Result<PathBuf> {
        let root = parent.join(STORE_DIR);
        if root.exists() {
            return Err(StoreError::StoreAlreadyExists(root));
        }
        fs::create_dir_all(parent)?;
        fs::create_dir(&root)?;

        fs::write(root.join(LOG_FILE), b"")?;
        fs::write(root.join(".gitignore"), GITIGNORE)?;
        // Creates the sentinel with mode 0600.
        LogFile::open(&root, LOG_FILE, LOCK_FILE)?;

        tracing::info!(root = %root.display(), "initialized message store");
        Ok(root)
    }

    /// Find a store root at or above `start`.
    ///
    /// Checks each directory on the real path from `start` to the
    /// filesystem root for a `.jwz` (or legacy `.zawinski`) child, and
    /// fails with [`StoreError::StoreNotFound`] when the walk runs out.
    pub fn discover(start: &Path) -> Result<PathBuf> {
        let mut dir = start.canonicalize()?;
        loop {
            for name in [STORE_DIR, LEGACY_STORE_DIR] {
                let candidate = dir.join(name);
                if candidate.is_dir() {
                    return Ok(candidate);
                }
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => return Err(StoreError::StoreNotFound),
            }
        }
    }

    /// Open the store at `root` with default configuration.
    pub fn open(root: &Path) -> Result<Self> {
        Self::open_with_config(root, StoreConfig::default())
    }

    /// Open the store at `root`.
    ///
    /// Applies the pragma contract, ensures the schema, runs the additive
    /// migration, acquires the lock handle, then replays any log suffix
    /// the index has not observed, all before the first query is served.
    /// If any step fails, everything acquired so far is released on the
    /// way out.
    pub fn open_with_config(root: &Path, config: StoreConfig) -> Result<Self> {
        let db = Database::open(
            &root.join(INDEX_FILE),
            config.retry,
            config.busy_timeout_ms,
        )?;
        schema::ensure(&db)?;
        schema::migrate_additive(&db)?;

        let log = LogFile::open(root, LOG_FILE, LOCK_FILE)?;
        let stats = replay::replay(&db, &log)?;
        if stats.records_applied > 0 || stats.rebuilt {
            tracing::info!(
                records = stats.records_applied,
                bytes = stats.bytes_consumed,
                rebuilt = stats.rebuilt,
                "replayed log into index"
            );
        }

        Ok(Self {
            root: root.to_path_buf(),
            db,
            log,
            ids: IdGenerator::new(config.clock.clone()),
            clock: config.clock,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The raw index connection, for ad-hoc read-only queries. Callers
    /// must not mutate the schema or write rows behind the repository's
    /// back.
    pub fn connection(&self) -> &rusqlite::Connection {
        self.db.conn()
    }

    /// Explicitly close the store, surfacing any engine error that a
    /// plain drop would swallow.
    pub fn close(self) -> Result<()> {
        let root = self.root.clone();
        self.db.close()?;
        tracing::info!(root = %root.display(), "closed message store");
        Ok(())
    }

    /// Bytes of log the index has not yet observed. Zero right after open.
    pub fn replay_lag(&self) -> Result<u64> {
        let offset = replay::read_offset(&self.db)?;
        Ok(self.log.size()?.saturating_sub(offset))
    }

    /// Throw away the indexed rows and re-ingest the entire log. Blob rows
    /// are kept: blobs are not recorded in the log.
    pub fn rebuild(&self) -> Result<replay::ReplayStats> {
        replay::rebuild(&self.db, &self.log)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let count = |sql: &str| -> Result<i64> {
            use jwz_sqlite::SqlExt;
            self.db.conn().query_row(sql, [], |r| r.get(0)).sql()
        };
        Ok(StoreStats {
            log_bytes: self.log.size()?,
            index_offset: replay::read_offset(&self.db)?,
            topic_count: count("SELECT COUNT(*) FROM topics")?,
            message_count: count("SELECT COUNT(*) FROM messages")?,
            blob_count: count("SELECT COUNT(*) FROM blobs")?,
        })
    }

    /// Every parsed record of the log, in append order.
    ///
    /// Reads under the shared log lock; skips torn or malformed lines the
    /// same way replay does. This is the export surface for external
    /// synchronization or inspection tooling.
    pub fn log_records(&self) -> Result<Vec<jwz_core::LogRecord>> {
        let content = self.log.read_from(0)?;
        let (records, _) = replay::parse_records(&content);
        Ok(records)
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }
}
