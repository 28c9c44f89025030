//! Full-text search over message bodies.

use jwz_core::{Message, Result};
use jwz_sqlite::SqlExt;

use crate::repository::message_from_row;
use crate::store::Store;

/// Neutralize FTS query syntax by quoting the whole input as one phrase.
///
/// Embedded double quotes are doubled, which is the engine's own escape.
/// After this, `*`, parentheses, `:`, `NEAR`, `AND`, `OR`, `NOT` and
/// friends are ordinary characters to match, not operators.
pub(crate) fn sanitize_query(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

impl Store {
    /// Search message bodies, best match first.
    ///
    /// The user query matches verbatim as a single phrase. Ranking is the
    /// engine's BM25 score (lower is better), ties broken newest-first.
    /// An optional topic name narrows the scope.
    pub fn search(
        &self,
        query: &str,
        topic: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        let phrase = sanitize_query(query);

        let rows = match topic {
            Some(name) => {
                let topic_id = self.topic_id_by_name(name)?;
                let sql = format!(
                    "{select}
                     JOIN messages_fts ON messages_fts.rowid = m.rowid
                     WHERE messages_fts MATCH ?1 AND m.topic_id = ?2
                     ORDER BY bm25(messages_fts), m.created_at DESC
                     LIMIT ?3",
                    select = crate::repository::MESSAGE_SELECT,
                );
                let mut stmt = self.db.conn().prepare(&sql).sql()?;
                let mapped = stmt
                    .query_map(
                        rusqlite::params![phrase, topic_id, limit as i64],
                        message_from_row,
                    )
                    .sql()?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .sql()?;
                mapped
            }
            None => {
                let sql = format!(
                    "{select}
                     JOIN messages_fts ON messages_fts.rowid = m.rowid
                     WHERE messages_fts MATCH ?1
                     ORDER BY bm25(messages_fts), m.created_at DESC
                     LIMIT ?2",
                    select = crate::repository::MESSAGE_SELECT,
                );
                let mut stmt = self.db.conn().prepare(&sql).sql()?;
                let mapped = stmt
                    .query_map(rusqlite::params![phrase, limit as i64], message_from_row)
                    .sql()?
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .sql()?;
                mapped
            }
        };

        tracing::debug!(query, hits = rows.len(), "searched messages");
        Ok(rows)
    }
}
