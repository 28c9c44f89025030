//! Index integrity checks.
//!
//! The write paths maintain these properties by construction; the checks
//! exist for the index file an external actor edited, a foreign tool
//! wrote, or a bug corrupted. `check_integrity` is structural and cheap.
//! `verify_blobs` re-hashes every blob and is priced accordingly.

use std::fmt;

use jwz_core::Result;
use jwz_sqlite::SqlExt;

use crate::blobs::blob_id_for;
use crate::replay;
use crate::store::Store;

/// One violated property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// A message whose topic row is gone.
    OrphanedMessage { id: String, topic_id: String },
    /// A message whose parent row is gone.
    MissingParent { id: String, parent_id: String },
    /// A message row with no full-text row.
    FtsMissing { rowid: i64 },
    /// A full-text row with no message row.
    FtsStale { rowid: i64 },
    /// The persisted cursor points past the end of the log. The next open
    /// treats this as truncation and rebuilds.
    OffsetBeyondLog { offset: u64, log_bytes: u64 },
    /// An attachment pointing at a missing message or blob.
    DanglingAttachment { message_id: String, blob_id: String },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrphanedMessage { id, topic_id } => {
                write!(f, "message {id} references missing topic {topic_id}")
            }
            Self::MissingParent { id, parent_id } => {
                write!(f, "message {id} references missing parent {parent_id}")
            }
            Self::FtsMissing { rowid } => write!(f, "message rowid {rowid} has no full-text row"),
            Self::FtsStale { rowid } => write!(f, "full-text rowid {rowid} has no message row"),
            Self::OffsetBeyondLog { offset, log_bytes } => {
                write!(f, "index cursor {offset} is past the log end {log_bytes}")
            }
            Self::DanglingAttachment {
                message_id,
                blob_id,
            } => write!(f, "attachment {message_id}/{blob_id} dangles"),
        }
    }
}

/// Outcome of [`Store::check_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

impl Store {
    /// Structural consistency of the index: foreign keys resolve, the
    /// full-text rows correspond one-to-one with message rows, the cursor
    /// lies inside the log, attachments point at live rows.
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        let mut issues = Vec::new();
        let conn = self.connection();

        let mut stmt = conn
            .prepare(
                "SELECT m.id, m.topic_id FROM messages m
                 LEFT JOIN topics t ON t.id = m.topic_id
                 WHERE t.id IS NULL",
            )
            .sql()?;
        let orphans = stmt
            .query_map([], |row| {
                Ok(IntegrityIssue::OrphanedMessage {
                    id: row.get(0)?,
                    topic_id: row.get(1)?,
                })
            })
            .sql()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .sql()?;
        issues.extend(orphans);

        let mut stmt = conn
            .prepare(
                "SELECT m.id, m.parent_id FROM messages m
                 WHERE m.parent_id IS NOT NULL
                   AND NOT EXISTS (SELECT 1 FROM messages p WHERE p.id = m.parent_id)",
            )
            .sql()?;
        let parentless = stmt
            .query_map([], |row| {
                Ok(IntegrityIssue::MissingParent {
                    id: row.get(0)?,
                    parent_id: row.get(1)?,
                })
            })
            .sql()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .sql()?;
        issues.extend(parentless);

        let mut stmt = conn
            .prepare("SELECT rowid FROM messages EXCEPT SELECT rowid FROM messages_fts")
            .sql()?;
        let missing = stmt
            .query_map([], |row| Ok(IntegrityIssue::FtsMissing { rowid: row.get(0)? }))
            .sql()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .sql()?;
        issues.extend(missing);

        let mut stmt = conn
            .prepare("SELECT rowid FROM messages_fts EXCEPT SELECT rowid FROM messages")
            .sql()?;
        let stale = stmt
            .query_map([], |row| Ok(IntegrityIssue::FtsStale { rowid: row.get(0)? }))
            .sql()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .sql()?;
        issues.extend(stale);

        let offset = replay::read_offset(&self.db)?;
        let log_bytes = self.log.size()?;
        if offset > log_bytes {
            issues.push(IntegrityIssue::OffsetBeyondLog { offset, log_bytes });
        }

        let mut stmt = conn
            .prepare(
                "SELECT a.message_id, a.blob_id FROM attachments a
                 WHERE NOT EXISTS (SELECT 1 FROM messages m WHERE m.id = a.message_id)
                    OR NOT EXISTS (SELECT 1 FROM blobs b WHERE b.id = a.blob_id)",
            )
            .sql()?;
        let dangling = stmt
            .query_map([], |row| {
                Ok(IntegrityIssue::DanglingAttachment {
                    message_id: row.get(0)?,
                    blob_id: row.get(1)?,
                })
            })
            .sql()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .sql()?;
        issues.extend(dangling);

        if !issues.is_empty() {
            tracing::warn!(count = issues.len(), "index integrity issues found");
        }
        Ok(IntegrityReport { issues })
    }

    /// Re-hash every blob and return the identities whose stored bytes no
    /// longer match. Empty means content addressing holds.
    pub fn verify_blobs(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .connection()
            .prepare("SELECT id, content FROM blobs ORDER BY id")
            .sql()?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })
            .sql()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .sql()?;

        let mismatched: Vec<String> = rows
            .into_iter()
            .filter(|(id, content)| blob_id_for(content) != *id)
            .map(|(id, _)| id)
            .collect();

        if !mismatched.is_empty() {
            tracing::warn!(count = mismatched.len(), "blob digest mismatches found");
        }
        Ok(mismatched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::NewMessage;
    use crate::store::{StoreConfig, INDEX_FILE};
    use jwz_core::FixedClock;
    use tempfile::TempDir;

    fn test_store() -> (Store, TempDir) {
        let dir = TempDir::new().unwrap();
        let root = Store::init(dir.path()).unwrap();
        let config = StoreConfig::default().with_clock(FixedClock::new(1_600_000_000_000));
        let store = Store::open_with_config(&root, config).unwrap();
        (store, dir)
    }

    /// A second connection with foreign keys off, for deliberate damage.
    fn tamper_conn(store: &Store) -> rusqlite::Connection {
        let conn = rusqlite::Connection::open(store.root().join(INDEX_FILE)).unwrap();
        conn.execute_batch("PRAGMA foreign_keys = OFF;").unwrap();
        conn
    }

    #[test]
    fn healthy_store_is_clean() {
        let (store, _dir) = test_store();
        store.create_topic("tasks", "").unwrap();
        let root = store.create_message(NewMessage::new("tasks", "root")).unwrap();
        store
            .create_message(NewMessage::new("tasks", "reply").with_parent(&root))
            .unwrap();
        store.put_blob(b"bytes", None).unwrap();

        assert!(store.check_integrity().unwrap().is_clean());
        assert!(store.verify_blobs().unwrap().is_empty());
    }

    #[test]
    fn stale_fts_row_is_reported() {
        let (store, _dir) = test_store();
        store.create_topic("tasks", "").unwrap();
        store.create_message(NewMessage::new("tasks", "real")).unwrap();

        tamper_conn(&store)
            .execute(
                "INSERT INTO messages_fts (rowid, body) VALUES (999, 'ghost')",
                [],
            )
            .unwrap();

        let report = store.check_integrity().unwrap();
        assert_eq!(report.issues, vec![IntegrityIssue::FtsStale { rowid: 999 }]);
    }

    #[test]
    fn orphaned_rows_are_reported() {
        let (store, _dir) = test_store();
        store.create_topic("tasks", "").unwrap();
        store.create_message(NewMessage::new("tasks", "ok")).unwrap();

        // rusqlite leaves foreign_keys off by default, so this insert is
        // exactly the kind of damage a foreign tool could do.
        let conn = tamper_conn(&store);
        conn.execute(
            "INSERT INTO messages (id, topic_id, parent_id, body, created_at)
             VALUES ('0MESSAGEID0000000000000000', 'missing-topic',
                     '0PARENTID00000000000000000', 'bad', 0)",
            [],
        )
        .unwrap();

        let report = store.check_integrity().unwrap();
        assert!(report
            .issues
            .contains(&IntegrityIssue::OrphanedMessage {
                id: "0MESSAGEID0000000000000000".into(),
                topic_id: "missing-topic".into(),
            }));
        assert!(report
            .issues
            .contains(&IntegrityIssue::MissingParent {
                id: "0MESSAGEID0000000000000000".into(),
                parent_id: "0PARENTID00000000000000000".into(),
            }));
        // The tampered row also never got a full-text row.
        assert!(report
            .issues
            .iter()
            .any(|i| matches!(i, IntegrityIssue::FtsMissing { .. })));
    }

    #[test]
    fn rewritten_blob_bytes_are_caught() {
        let (store, _dir) = test_store();
        let id = store.put_blob(b"original", None).unwrap();

        tamper_conn(&store)
            .execute("UPDATE blobs SET content = x'00' WHERE id = ?1", [&id])
            .unwrap();

        assert_eq!(store.verify_blobs().unwrap(), vec![id]);
    }

    #[test]
    fn issue_messages_read_well() {
        let issue = IntegrityIssue::OffsetBeyondLog {
            offset: 100,
            log_bytes: 40,
        };
        assert_eq!(issue.to_string(), "index cursor 100 is past the log end 40");
    }
}
