//! Short-prefix resolution of message identifiers.
//!
//! Identifiers sort in creation order (see `jwz_core::id`), so a prefix
//! that uniquely names a message keeps doing so as the corpus grows:
//! new identifiers are greater and can only collide with a prefix shorter
//! than the shared timestamp root.

use jwz_core::{validate_id_prefix, Result, StoreError, ID_LEN};
use jwz_sqlite::SqlExt;

use crate::store::Store;

impl Store {
    /// Resolve an identifier or prefix to the unique full identifier.
    ///
    /// An exact match wins outright, so a full identifier never becomes
    /// ambiguous just because it happens to prefix nothing or, in
    /// principle, something else. Otherwise up to two candidates are
    /// probed: none is [`StoreError::MessageNotFound`], two is
    /// [`StoreError::MessageIdAmbiguous`]. Input that cannot be a prefix
    /// of any identifier at all is [`StoreError::InvalidMessageId`].
    pub fn resolve_message_id(&self, input: &str) -> Result<String> {
        let prefix = validate_id_prefix(input)?;

        if prefix.len() == ID_LEN && self.message_id_exists(&prefix)? {
            return Ok(prefix);
        }

        // The prefix is validated Crockford base32, so it cannot smuggle
        // LIKE metacharacters.
        let mut stmt = self
            .db
            .conn()
            .prepare("SELECT id FROM messages WHERE id LIKE ?1 || '%' ORDER BY id LIMIT 2")
            .sql()?;
        let matches: Vec<String> = stmt
            .query_map([&prefix], |row| row.get(0))
            .sql()?
            .collect::<std::result::Result<_, _>>()
            .sql()?;

        match matches.as_slice() {
            [] => Err(StoreError::MessageNotFound(input.trim().to_string())),
            [only] => Ok(only.clone()),
            _ => Err(StoreError::MessageIdAmbiguous(input.trim().to_string())),
        }
    }

    fn message_id_exists(&self, id: &str) -> Result<bool> {
        use rusqlite::OptionalExtension;
        Ok(self
            .db
            .conn()
            .query_row("SELECT 1 FROM messages WHERE id = ?1", [id], |_| Ok(()))
            .optional()
            .sql()?
            .is_some())
    }
}
