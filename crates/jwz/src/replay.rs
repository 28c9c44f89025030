//! Replay: reconcile the index with the log.
//!
//! The index carries a single cursor, `meta["jsonl_offset"]`: the byte
//! length of the log prefix it reflects. Replay reads everything past the
//! cursor (under the shared log lock, so no appender can interleave),
//! applies it inside one immediate transaction, and advances the cursor in
//! that same transaction. Re-running replay at the same cursor is a no-op
//! because both record kinds insert with OR IGNORE.
//!
//! Malformed lines (a torn final line without its terminator, or a
//! terminated line that fails to parse) are skipped, not fatal: a torn
//! tail is not counted into the cursor (a future append may still land
//! after it), while parsed-and-rejected complete lines are consumed for
//! good.

use jwz_core::{LogRecord, Result};
use jwz_log::LogFile;
use jwz_sqlite::{Database, SqlExt};

pub(crate) const OFFSET_KEY: &str = "jsonl_offset";

/// What one replay pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplayStats {
    pub records_applied: usize,
    pub bytes_consumed: u64,
    /// True when the indexed rows were cleared first (truncated log or
    /// explicit rebuild).
    pub rebuilt: bool,
}

/// Read the persisted cursor. Absent or unparseable values fall back to
/// zero, which at worst forces a harmless re-ingest of an idempotent log.
pub(crate) fn read_offset(db: &Database) -> Result<u64> {
    match db.get_meta(OFFSET_KEY)? {
        Some(value) => match value.parse::<u64>() {
            Ok(offset) => Ok(offset),
            Err(_) => {
                tracing::warn!(value = %value, "unparseable jsonl_offset, treating as 0");
                Ok(0)
            }
        },
        None => Ok(0),
    }
}

/// Bring the index up to date with the log.
pub(crate) fn replay(db: &Database, log: &LogFile) -> Result<ReplayStats> {
    let offset = read_offset(db)?;
    let size = log.size()?;

    if size == offset {
        return Ok(ReplayStats::default());
    }

    // A log shorter than the cursor means truncation or rotation by an
    // external actor: start over from byte zero with a cleared index.
    let clear_first = size < offset;
    if clear_first {
        tracing::warn!(offset, size, "log shorter than index cursor, rebuilding");
    }
    let start = if clear_first { 0 } else { offset };

    ingest(db, log, start, clear_first)
}

/// Clear the indexed rows and re-ingest the whole log, regardless of the
/// cursor. Blob rows are not log-backed and stay put; attachment rows go
/// down with their message rows (cascade) and are not reconstructed.
pub(crate) fn rebuild(db: &Database, log: &LogFile) -> Result<ReplayStats> {
    ingest(db, log, 0, true)
}

/// Parse every complete line of `content`, skipping malformed ones, and
/// report how many bytes the complete lines covered.
pub(crate) fn parse_records(content: &[u8]) -> (Vec<LogRecord>, u64) {
    let (lines, bytes_consumed) = split_complete_lines(content);
    let mut records = Vec::with_capacity(lines.len());
    for line in lines {
        match LogRecord::decode(line) {
            Ok(record) => records.push(record),
            Err(_) => {
                tracing::warn!(line, "skipping malformed log line");
            }
        }
    }
    (records, bytes_consumed)
}

fn ingest(db: &Database, log: &LogFile, start: u64, clear_first: bool) -> Result<ReplayStats> {
    // Shared lock for the whole read: an in-flight append cannot tear.
    let content = log.read_from(start)?;
    let (records, bytes_consumed) = parse_records(&content);

    let (topics, messages): (Vec<_>, Vec<_>) = records
        .into_iter()
        .partition(|r| matches!(r, LogRecord::Topic(_)));

    let txn = db.immediate_txn()?;

    if clear_first {
        // 'delete-all' is the engine's clear command for external-content
        // FTS tables; the plain deletes then honor foreign-key order.
        db.conn()
            .execute("INSERT INTO messages_fts(messages_fts) VALUES ('delete-all')", [])
            .sql()?;
        db.conn().execute("DELETE FROM messages", []).sql()?;
        db.conn().execute("DELETE FROM topics", []).sql()?;
    }

    // Topics strictly before messages: a message row's foreign key needs
    // its topic in place. Within each kind, log order is preserved, which
    // also puts every parent before its replies.
    let mut applied = 0usize;
    for record in topics.iter().chain(messages.iter()) {
        applied += apply(db, record)?;
    }

    let new_offset = start + bytes_consumed;
    db.set_meta(OFFSET_KEY, &new_offset.to_string())?;
    txn.commit()?;

    Ok(ReplayStats {
        records_applied: applied,
        bytes_consumed,
        rebuilt: clear_first,
    })
}

/// Apply one record idempotently. Returns 1 if a row was actually created.
fn apply(db: &Database, record: &LogRecord) -> Result<usize> {
    match record {
        LogRecord::Topic(t) => {
            db.conn()
                .execute(
                    "INSERT OR IGNORE INTO topics (id, name, description, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![t.id, t.name, t.description, t.created_at],
                )
                .sql()?;
            Ok(usize::from(db.changes() > 0))
        }
        LogRecord::Message(m) => {
            let (sender_id, sender_name, sender_model, sender_role) = match &m.sender {
                Some(s) => (
                    Some(s.id.as_str()),
                    Some(s.name.as_str()),
                    s.model.as_deref(),
                    s.role.as_deref(),
                ),
                None => (None, None, None, None),
            };
            let (git_oid, git_head, git_dirty, git_prefix) = match &m.git {
                Some(g) => (
                    Some(g.oid.as_str()),
                    Some(g.head.as_str()),
                    Some(g.dirty as i64),
                    g.prefix.as_deref(),
                ),
                None => (None, None, None, None),
            };

            db.conn()
                .execute(
                    "INSERT OR IGNORE INTO messages
                     (id, topic_id, parent_id, body, created_at,
                      sender_id, sender_name, sender_model, sender_role,
                      git_oid, git_head, git_dirty, git_prefix)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    rusqlite::params![
                        m.id, m.topic_id, m.parent_id, m.body, m.created_at,
                        sender_id, sender_name, sender_model, sender_role,
                        git_oid, git_head, git_dirty, git_prefix,
                    ],
                )
                .sql()?;

            // Only mirror into FTS when the insert took; on re-replay the
            // FTS row is already there and inserting again would duplicate.
            if db.changes() > 0 {
                db.conn()
                    .execute(
                        "INSERT INTO messages_fts (rowid, body) VALUES (?1, ?2)",
                        rusqlite::params![db.last_insert_rowid(), m.body],
                    )
                    .sql()?;
                Ok(1)
            } else {
                Ok(0)
            }
        }
    }
}

/// Split `content` into complete (newline-terminated) lines and the number
/// of bytes they cover. A trailing fragment without its terminator is a
/// torn write still in flight (or abandoned by a crash): it is neither
/// returned nor counted, so the cursor stops just before it.
fn split_complete_lines(content: &[u8]) -> (Vec<&str>, u64) {
    let terminated_len = match content.iter().rposition(|&b| b == b'\n') {
        Some(pos) => pos + 1,
        None => return (Vec::new(), 0),
    };

    let lines = content[..terminated_len]
        .split(|&b| b == b'\n')
        .filter(|l| !l.is_empty())
        .map(|l| std::str::from_utf8(l).unwrap_or(""))
        .collect();
    (lines, terminated_len as u64)
}
