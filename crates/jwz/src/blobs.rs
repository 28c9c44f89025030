//! Content-addressed blob storage and attachments.
//!
//! Blobs live only in the index, never in the log: replay of topics and
//! messages is total without them, and encoding arbitrary binary into a
//! text log would bloat it for no query benefit. `rebuild` therefore
//! leaves blob rows alone.

use sha2::{Digest, Sha256};

use jwz_core::{Attachment, BlobInfo, Result, StoreError};
use jwz_sqlite::SqlExt;

use crate::store::Store;

/// Compute the identity of `bytes`: `"sha256:<lowercase hex>"`.
///
/// The algorithm prefix is part of the identity, not metadata: two
/// identities compare equal only as whole strings.
pub fn blob_id_for(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

impl Store {
    /// Store a blob, returning its content-derived identity.
    ///
    /// Idempotent: if the identity already exists the existing row wins,
    /// including its MIME label, and nothing is written.
    pub fn put_blob(&self, bytes: &[u8], mime_type: Option<&str>) -> Result<String> {
        use rusqlite::OptionalExtension;

        let id = blob_id_for(bytes);

        let existing: Option<String> = self
            .db
            .conn()
            .query_row("SELECT id FROM blobs WHERE id = ?1", [&id], |row| {
                row.get(0)
            })
            .optional()
            .sql()?;
        if let Some(existing) = existing {
            tracing::debug!(id = %existing, "blob already stored");
            return Ok(existing);
        }

        let created_at = self.now_ms();
        let txn = self.db.immediate_txn()?;
        // OR IGNORE covers the race with a concurrent writer storing the
        // same content between our probe and this insert.
        self.db
            .conn()
            .execute(
                "INSERT OR IGNORE INTO blobs (id, size, mime_type, created_at, content)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, bytes.len() as i64, mime_type, created_at, bytes],
            )
            .sql()?;
        txn.commit()?;

        tracing::debug!(id = %id, size = bytes.len(), "stored blob");
        Ok(id)
    }

    /// The bytes of a blob.
    pub fn get_blob(&self, id: &str) -> Result<Vec<u8>> {
        use rusqlite::OptionalExtension;

        self.db
            .conn()
            .query_row("SELECT content FROM blobs WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()
            .sql()?
            .ok_or_else(|| StoreError::BlobNotFound(id.to_string()))
    }

    /// Blob metadata without the bytes.
    pub fn fetch_blob(&self, id: &str) -> Result<BlobInfo> {
        use rusqlite::OptionalExtension;

        self.db
            .conn()
            .query_row(
                "SELECT id, size, mime_type, created_at FROM blobs WHERE id = ?1",
                [id],
                |row| {
                    Ok(BlobInfo {
                        id: row.get(0)?,
                        size: row.get(1)?,
                        mime_type: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .sql()?
            .ok_or_else(|| StoreError::BlobNotFound(id.to_string()))
    }

    /// Attach a blob to a message under an optional display name.
    ///
    /// Re-attaching the same pair replaces the name. The message may be
    /// given as a full identifier or unique prefix; the blob identity
    /// must be exact and present.
    pub fn attach_blob(
        &self,
        message_id_or_prefix: &str,
        blob_id: &str,
        name: Option<&str>,
    ) -> Result<()> {
        let message_id = self.resolve_message_id(message_id_or_prefix)?;
        // Surface a domain error instead of a bare FK violation.
        self.fetch_blob(blob_id)?;

        let txn = self.db.immediate_txn()?;
        self.db
            .conn()
            .execute(
                "INSERT OR REPLACE INTO attachments (message_id, blob_id, name)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![message_id, blob_id, name],
            )
            .sql()?;
        txn.commit()?;

        tracing::debug!(message = %message_id, blob = blob_id, "attached blob");
        Ok(())
    }

    /// All attachments of a message.
    pub fn list_attachments(&self, message_id_or_prefix: &str) -> Result<Vec<Attachment>> {
        let message_id = self.resolve_message_id(message_id_or_prefix)?;
        let mut stmt = self
            .db
            .conn()
            .prepare(
                "SELECT message_id, blob_id, name FROM attachments
                 WHERE message_id = ?1
                 ORDER BY blob_id",
            )
            .sql()?;
        let rows = stmt
            .query_map([&message_id], |row| {
                Ok(Attachment {
                    message_id: row.get(0)?,
                    blob_id: row.get(1)?,
                    name: row.get(2)?,
                })
            })
            .sql()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .sql()?;
        Ok(rows)
    }
}
