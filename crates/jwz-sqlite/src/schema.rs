//! Index schema: provisioning and additive migration.
//!
//! `ensure` runs a fixed CREATE-IF-NOT-EXISTS batch on every open, so a
//! deleted index file is rebuilt from nothing. `migrate_additive` then
//! brings older `messages` tables up to the current column set; adding
//! nullable columns is the only supported migration; removal and retyping
//! are non-goals.

use jwz_core::Result;

use crate::connection::{Database, SqlExt};

/// Topics: stable identity, unique post-trim name, never mutated.
const CREATE_TOPICS: &str = "
CREATE TABLE IF NOT EXISTS topics (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL,
    created_at  INTEGER NOT NULL
)";

/// Messages: forest-shaped (roots have NULL parent). Cascades exist only
/// for index rebuild; no public operation deletes rows. Sender and git
/// columns are added by the additive migration, not here, so the base
/// table matches what the oldest stores on disk have.
const CREATE_MESSAGES: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id         TEXT PRIMARY KEY,
    topic_id   TEXT NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
    parent_id  TEXT REFERENCES messages(id) ON DELETE CASCADE,
    body       TEXT NOT NULL,
    created_at INTEGER NOT NULL
)";

const CREATE_MESSAGES_TOPIC_IDX: &str = "
CREATE INDEX IF NOT EXISTS idx_messages_topic_created
ON messages(topic_id, created_at)";

const CREATE_MESSAGES_PARENT_IDX: &str = "
CREATE INDEX IF NOT EXISTS idx_messages_parent
ON messages(parent_id)";

/// Key-value metadata; holds `jsonl_offset`.
const CREATE_META: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";

/// Content-addressed blobs. Identity is `sha256:<hex>`; bytes live inline.
const CREATE_BLOBS: &str = "
CREATE TABLE IF NOT EXISTS blobs (
    id         TEXT PRIMARY KEY,
    size       INTEGER NOT NULL,
    mime_type  TEXT,
    created_at INTEGER NOT NULL,
    content    BLOB NOT NULL
)";

const CREATE_ATTACHMENTS: &str = "
CREATE TABLE IF NOT EXISTS attachments (
    message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    blob_id    TEXT NOT NULL REFERENCES blobs(id) ON DELETE CASCADE,
    name       TEXT,
    PRIMARY KEY (message_id, blob_id)
)";

/// External-content FTS over message bodies. Rows are managed manually
/// (no triggers): the writer inserts at `last_insert_rowid()`, replay
/// inserts only when the message insert actually changed a row.
const CREATE_MESSAGES_FTS: &str = "
CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts
USING fts5(body, content='messages', content_rowid='rowid')";

/// Columns the additive migration guarantees on `messages`, with their
/// SQL types. All nullable.
const ADDITIVE_COLUMNS: [(&str, &str); 8] = [
    ("sender_id", "TEXT"),
    ("sender_name", "TEXT"),
    ("sender_model", "TEXT"),
    ("sender_role", "TEXT"),
    ("git_oid", "TEXT"),
    ("git_head", "TEXT"),
    ("git_dirty", "INTEGER"),
    ("git_prefix", "TEXT"),
];

const CREATE_MESSAGES_SENDER_IDX: &str = "
CREATE INDEX IF NOT EXISTS idx_messages_sender
ON messages(sender_id)";

/// Create every table, index and virtual table. Idempotent.
pub fn ensure(db: &Database) -> Result<()> {
    for ddl in [
        CREATE_TOPICS,
        CREATE_MESSAGES,
        CREATE_MESSAGES_TOPIC_IDX,
        CREATE_MESSAGES_PARENT_IDX,
        CREATE_META,
        CREATE_BLOBS,
        CREATE_ATTACHMENTS,
        CREATE_MESSAGES_FTS,
    ] {
        db.conn().execute_batch(ddl).sql()?;
    }
    Ok(())
}

/// Add any missing sender/git columns to `messages` and ensure the sender
/// index. Runs on every open; a no-op once the table is current.
pub fn migrate_additive(db: &Database) -> Result<()> {
    let existing = message_columns(db)?;

    for (column, sql_type) in ADDITIVE_COLUMNS {
        if !existing.iter().any(|c| c == column) {
            tracing::info!(column, "adding message column");
            db.conn()
                .execute_batch(&format!("ALTER TABLE messages ADD COLUMN {column} {sql_type}"))
                .sql()?;
        }
    }

    db.conn().execute_batch(CREATE_MESSAGES_SENDER_IDX).sql()?;
    Ok(())
}

fn message_columns(db: &Database) -> Result<Vec<String>> {
    let mut stmt = db.conn().prepare("PRAGMA table_info(messages)").sql()?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .sql()?
        .collect::<std::result::Result<Vec<_>, _>>()
        .sql()?;
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jwz_core::RetryPolicy;
    use tempfile::TempDir;

    fn open_test_db() -> (Database, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = Database::open(&dir.path().join("index.db"), RetryPolicy::default(), 300_000)
            .unwrap();
        (db, dir)
    }

    #[test]
    fn ensure_creates_all_tables() {
        let (db, _dir) = open_test_db();
        ensure(&db).unwrap();

        let mut stmt = db
            .conn()
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type IN ('table', 'index') AND name NOT LIKE 'sqlite_%'",
            )
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<std::result::Result<_, _>>()
            .unwrap();

        for expected in [
            "topics",
            "messages",
            "meta",
            "blobs",
            "attachments",
            "messages_fts",
            "idx_messages_topic_created",
            "idx_messages_parent",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[test]
    fn ensure_is_idempotent() {
        let (db, _dir) = open_test_db();
        ensure(&db).unwrap();
        ensure(&db).unwrap();
    }

    #[test]
    fn additive_migration_fills_in_missing_columns() {
        let (db, _dir) = open_test_db();
        ensure(&db).unwrap();

        let before = message_columns(&db).unwrap();
        assert!(!before.iter().any(|c| c == "sender_id"));

        migrate_additive(&db).unwrap();

        let after = message_columns(&db).unwrap();
        for (column, _) in ADDITIVE_COLUMNS {
            assert!(after.iter().any(|c| c == column), "missing {column}");
        }

        // Second run is a no-op.
        migrate_additive(&db).unwrap();
        assert_eq!(message_columns(&db).unwrap(), after);
    }

    #[test]
    fn sender_index_exists_after_migration() {
        let (db, _dir) = open_test_db();
        ensure(&db).unwrap();
        migrate_additive(&db).unwrap();

        let count: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master
                 WHERE type = 'index' AND name = 'idx_messages_sender'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn fts_table_is_external_content() {
        let (db, _dir) = open_test_db();
        ensure(&db).unwrap();

        let sql: String = db
            .conn()
            .query_row(
                "SELECT sql FROM sqlite_master WHERE name = 'messages_fts'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!(sql.contains("content='messages'"));
        assert!(sql.contains("content_rowid='rowid'"));
    }
}
