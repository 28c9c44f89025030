//! Connection management: pragmas, busy classification, retried boundaries.

use std::path::Path;
use std::thread;

use rusqlite::{Connection, OpenFlags};

use jwz_core::{Result, RetryPolicy, StoreError};

/// SQLITE_BUSY / SQLITE_LOCKED primary result codes. Extended codes carry
/// the primary code in their low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Whether an engine error is transient contention (busy or locked,
/// including extended codes such as SQLITE_BUSY_SNAPSHOT).
pub fn is_busy_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            let primary = e.extended_code & 0xff;
            primary == SQLITE_BUSY || primary == SQLITE_LOCKED
        }
        _ => false,
    }
}

/// Whether an engine error is a uniqueness/constraint violation, used by
/// write paths to turn a duplicate insert into a domain error.
pub fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Collapse an engine error into the two driver kinds: transient `Busy`
/// or permanent `Engine` (carrying the engine's own message).
pub fn classify(err: rusqlite::Error) -> StoreError {
    if is_busy_error(&err) {
        StoreError::Busy(err.to_string())
    } else {
        StoreError::Engine(err.to_string())
    }
}

/// Ergonomic classification for `?` on engine results.
pub trait SqlExt<T> {
    fn sql(self) -> Result<T>;
}

impl<T> SqlExt<T> for std::result::Result<T, rusqlite::Error> {
    fn sql(self) -> Result<T> {
        self.map_err(classify)
    }
}

/// Owned handle on the index file.
pub struct Database {
    conn: Connection,
    retry: RetryPolicy,
}

impl Database {
    /// Open (read-write, create if missing) and apply the pragma contract:
    /// WAL journaling, synchronous NORMAL, the busy timeout, in-memory
    /// temp store, enforced foreign keys. These are contracts callers may
    /// rely on, not tuning.
    pub fn open(path: &Path, retry: RetryPolicy, busy_timeout_ms: u32) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .sql()?;

        conn.pragma_update(None, "journal_mode", "WAL").sql()?;
        conn.pragma_update(None, "synchronous", "NORMAL").sql()?;
        conn.pragma_update(None, "busy_timeout", busy_timeout_ms).sql()?;
        conn.pragma_update(None, "temp_store", "MEMORY").sql()?;
        conn.pragma_update(None, "foreign_keys", "ON").sql()?;

        Ok(Self { conn, retry })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Close the underlying connection, surfacing any engine error.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_conn, e)| classify(e))
    }

    /// Rows changed by the most recent statement.
    pub fn changes(&self) -> u64 {
        self.conn.changes()
    }

    pub fn last_insert_rowid(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Begin an immediate transaction, retrying on busy per the policy,
    /// and return a guard that rolls back unless committed.
    pub fn immediate_txn(&self) -> Result<Txn<'_>> {
        self.boundary("BEGIN IMMEDIATE")?;
        Ok(Txn {
            db: self,
            done: false,
        })
    }

    /// Execute a boundary statement (`BEGIN IMMEDIATE` / `COMMIT`) with
    /// the busy-retry loop. Non-boundary statements never come through
    /// here; they surface busy immediately so the caller can roll back.
    fn boundary(&self, sql: &str) -> Result<()> {
        let mut attempts = 0u32;
        loop {
            match self.conn.execute_batch(sql) {
                Ok(()) => return Ok(()),
                Err(e) if is_busy_error(&e) => {
                    attempts += 1;
                    if attempts >= self.retry.max_attempts {
                        tracing::warn!(sql, attempts, "transaction boundary stayed busy");
                        return Err(StoreError::DatabaseBusy { attempts });
                    }
                    thread::sleep(self.retry.backoff());
                }
                Err(e) => return Err(classify(e)),
            }
        }
    }

    /// Read a value from the `meta` key-value table.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        use rusqlite::OptionalExtension;
        self.conn
            .query_row("SELECT value FROM meta WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()
            .sql()
    }

    /// Upsert a value into the `meta` key-value table.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
                [key, value],
            )
            .sql()?;
        Ok(())
    }
}

/// An open `BEGIN IMMEDIATE` transaction.
///
/// Commit consumes the guard; any other exit path (drop, early `?`)
/// rolls back, so the index can never keep state whose log append
/// failed.
pub struct Txn<'a> {
    db: &'a Database,
    done: bool,
}

impl Txn<'_> {
    /// Commit, retrying the boundary on busy per the policy.
    pub fn commit(mut self) -> Result<()> {
        self.db.boundary("COMMIT")?;
        self.done = true;
        Ok(())
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if !self.done {
            // Best-effort: a failed rollback leaves the engine to clean up
            // when the connection closes.
            let _ = self.db.conn.execute_batch("ROLLBACK");
        }
    }
}
