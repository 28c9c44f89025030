//! The repository: topic and message writes, reads, threading.
//!
//! Every write follows the same shape: validate, mint an identifier, open
//! an immediate transaction, insert the relational and full-text rows,
//! append the record to the log, advance the index cursor, commit. The
//! transaction guard rolls back on every other exit path, so the index
//! never holds a row whose log line did not make it to disk.

use rusqlite::params;

use jwz_core::{
    LogRecord, Message, MessageRecord, Result, Sender, StoreError, Topic, TopicRecord,
    VersionContext,
};
use jwz_sqlite::{is_constraint_violation, classify, SqlExt};

use crate::replay::OFFSET_KEY;
use crate::store::Store;

/// Column list shared by every message query. The reply count is derived
/// here, per row, by a correlated subquery; it is never stored.
pub(crate) const MESSAGE_SELECT: &str = "
SELECT m.id, m.topic_id, m.parent_id, m.body, m.created_at,
       m.sender_id, m.sender_name, m.sender_model, m.sender_role,
       m.git_oid, m.git_head, m.git_dirty, m.git_prefix,
       (SELECT COUNT(*) FROM messages c WHERE c.parent_id = m.id) AS reply_count
FROM messages m";

/// Map one row of [`MESSAGE_SELECT`] into an owned [`Message`].
pub(crate) fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let sender_id: Option<String> = row.get(5)?;
    let sender_name: Option<String> = row.get(6)?;
    let sender = match (sender_id, sender_name) {
        (Some(id), Some(name)) => Some(Sender {
            id,
            name,
            model: row.get(7)?,
            role: row.get(8)?,
        }),
        _ => None,
    };

    let git_oid: Option<String> = row.get(9)?;
    let git_head: Option<String> = row.get(10)?;
    let git = match (git_oid, git_head) {
        (Some(oid), Some(head)) => Some(VersionContext {
            oid,
            head,
            dirty: row.get::<_, Option<i64>>(11)?.unwrap_or(0) != 0,
            prefix: row.get(12)?,
        }),
        _ => None,
    };

    Ok(Message {
        id: row.get(0)?,
        topic_id: row.get(1)?,
        parent_id: row.get(2)?,
        body: row.get(3)?,
        created_at: row.get(4)?,
        reply_count: row.get(13)?,
        sender,
        git,
    })
}

/// A message to be posted. Topic and body are required; the rest is
/// attached with the builder methods.
#[derive(Debug, Clone)]
pub struct NewMessage<'a> {
    pub topic: &'a str,
    pub parent: Option<&'a str>,
    pub body: &'a str,
    pub sender: Option<Sender>,
    pub git: Option<VersionContext>,
}

impl<'a> NewMessage<'a> {
    pub fn new(topic: &'a str, body: &'a str) -> Self {
        Self {
            topic,
            parent: None,
            body,
            sender: None,
            git: None,
        }
    }

    /// Reply to an existing message, given its full identifier or a
    /// unique prefix.
    pub fn with_parent(mut self, parent: &'a str) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_sender(mut self, sender: Sender) -> Self {
        self.sender = Some(sender);
        self
    }

    pub fn with_git(mut self, git: VersionContext) -> Self {
        self.git = Some(git);
        self
    }
}

impl Store {
    /// Create a topic and return its identifier.
    ///
    /// Name and description are trimmed; an empty trimmed name is
    /// [`StoreError::EmptyTopicName`], a duplicate name is
    /// [`StoreError::TopicExists`].
    pub fn create_topic(&self, name: &str, description: &str) -> Result<String> {
        let name = name.trim();
        let description = description.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyTopicName);
        }

        let id = self.ids.next();
        let created_at = self.now_ms();

        let txn = self.db.immediate_txn()?;
        match self.db.conn().execute(
            "INSERT INTO topics (id, name, description, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, name, description, created_at],
        ) {
            Ok(_) => {}
            // Duplicate name; the guard rolls the transaction back.
            Err(e) if is_constraint_violation(&e) => {
                return Err(StoreError::TopicExists(name.to_string()));
            }
            Err(e) => return Err(classify(e)),
        }

        let record = LogRecord::Topic(TopicRecord {
            id: id.clone(),
            name: name.to_string(),
            description: description.to_string(),
            created_at,
        });
        let receipt = self.log.append(&record.encode()?)?;
        self.db.set_meta(OFFSET_KEY, &receipt.end.to_string())?;
        txn.commit()?;

        tracing::debug!(topic = name, id = %id, "created topic");
        Ok(id)
    }

    /// Post a message and return its identifier.
    ///
    /// The body is trimmed ([`StoreError::EmptyMessageBody`] when nothing
    /// remains), the topic resolved by trimmed name
    /// ([`StoreError::TopicNotFound`]), and the parent (full identifier
    /// or unique prefix) must exist ([`StoreError::ParentNotFound`]).
    pub fn create_message(&self, new: NewMessage<'_>) -> Result<String> {
        let body = new.body.trim();
        if body.is_empty() {
            return Err(StoreError::EmptyMessageBody);
        }
        let topic_id = self.topic_id_by_name(new.topic)?;

        let parent_id = match new.parent {
            Some(parent) => Some(self.resolve_message_id(parent).map_err(|e| match e {
                StoreError::MessageNotFound(_) => StoreError::ParentNotFound(parent.to_string()),
                other => other,
            })?),
            None => None,
        };

        let id = self.ids.next();
        let created_at = self.now_ms();

        let (sender_id, sender_name, sender_model, sender_role) = match &new.sender {
            Some(s) => (
                Some(s.id.as_str()),
                Some(s.name.as_str()),
                s.model.as_deref(),
                s.role.as_deref(),
            ),
            None => (None, None, None, None),
        };
        let (git_oid, git_head, git_dirty, git_prefix) = match &new.git {
            Some(g) => (
                Some(g.oid.as_str()),
                Some(g.head.as_str()),
                Some(g.dirty as i64),
                g.prefix.as_deref(),
            ),
            None => (None, None, None, None),
        };

        let txn = self.db.immediate_txn()?;
        self.db
            .conn()
            .execute(
                "INSERT INTO messages
                 (id, topic_id, parent_id, body, created_at,
                  sender_id, sender_name, sender_model, sender_role,
                  git_oid, git_head, git_dirty, git_prefix)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    id, topic_id, parent_id, body, created_at,
                    sender_id, sender_name, sender_model, sender_role,
                    git_oid, git_head, git_dirty, git_prefix,
                ],
            )
            .sql()?;
        self.db
            .conn()
            .execute(
                "INSERT INTO messages_fts (rowid, body) VALUES (?1, ?2)",
                params![self.db.last_insert_rowid(), body],
            )
            .sql()?;

        let record = LogRecord::Message(MessageRecord {
            id: id.clone(),
            topic_id,
            parent_id,
            body: body.to_string(),
            created_at,
            sender: new.sender,
            git: new.git,
        });
        let receipt = self.log.append(&record.encode()?)?;
        self.db.set_meta(OFFSET_KEY, &receipt.end.to_string())?;
        txn.commit()?;

        tracing::debug!(id = %id, topic = new.topic, "posted message");
        Ok(id)
    }

    /// Fetch one message by full identifier or unique prefix.
    pub fn fetch_message(&self, id_or_prefix: &str) -> Result<Message> {
        use rusqlite::OptionalExtension;

        let id = self.resolve_message_id(id_or_prefix)?;
        let sql = format!("{MESSAGE_SELECT} WHERE m.id = ?1");
        self.db
            .conn()
            .query_row(&sql, [&id], message_from_row)
            .optional()
            .sql()?
            .ok_or(StoreError::MessageNotFound(id))
    }

    /// Root messages of a topic, newest first, up to `limit`.
    pub fn list_messages(&self, topic: &str, limit: usize) -> Result<Vec<Message>> {
        let topic_id = self.topic_id_by_name(topic)?;
        let sql = format!(
            "{MESSAGE_SELECT}
             WHERE m.topic_id = ?1 AND m.parent_id IS NULL
             ORDER BY m.created_at DESC, m.id DESC
             LIMIT ?2"
        );
        let mut stmt = self.db.conn().prepare(&sql).sql()?;
        let rows = stmt
            .query_map(params![topic_id, limit as i64], message_from_row)
            .sql()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .sql()?;
        Ok(rows)
    }

    /// A whole thread: the root message followed by all transitive
    /// replies, in creation order. Depth is not materialized; callers
    /// reconstruct it from the parent chain.
    pub fn thread(&self, root_id_or_prefix: &str) -> Result<Vec<Message>> {
        let root = self.resolve_message_id(root_id_or_prefix)?;
        let sql = format!(
            "WITH RECURSIVE thread(id) AS (
                 SELECT ?1
                 UNION
                 SELECT m.id FROM messages m JOIN thread t ON m.parent_id = t.id
             )
             {MESSAGE_SELECT}
             JOIN thread t ON t.id = m.id
             ORDER BY m.created_at ASC, m.id ASC"
        );
        let mut stmt = self.db.conn().prepare(&sql).sql()?;
        let rows = stmt
            .query_map([&root], message_from_row)
            .sql()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .sql()?;
        if rows.is_empty() {
            return Err(StoreError::MessageNotFound(root));
        }
        Ok(rows)
    }

    /// Immediate children of a message, oldest first.
    pub fn replies(&self, id_or_prefix: &str) -> Result<Vec<Message>> {
        let id = self.resolve_message_id(id_or_prefix)?;
        let sql = format!(
            "{MESSAGE_SELECT}
             WHERE m.parent_id = ?1
             ORDER BY m.created_at ASC, m.id ASC"
        );
        let mut stmt = self.db.conn().prepare(&sql).sql()?;
        let rows = stmt
            .query_map([&id], message_from_row)
            .sql()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .sql()?;
        Ok(rows)
    }

    /// Fetch one topic by (trimmed) name, with its derived message count.
    pub fn fetch_topic(&self, name: &str) -> Result<Topic> {
        use rusqlite::OptionalExtension;

        let name = name.trim();
        self.db
            .conn()
            .query_row(
                "SELECT id, name, description, created_at,
                        (SELECT COUNT(*) FROM messages m WHERE m.topic_id = topics.id)
                 FROM topics WHERE name = ?1",
                [name],
                topic_from_row,
            )
            .optional()
            .sql()?
            .ok_or_else(|| StoreError::TopicNotFound(name.to_string()))
    }

    /// All topics, newest first, each with its derived message count.
    pub fn list_topics(&self) -> Result<Vec<Topic>> {
        let mut stmt = self
            .db
            .conn()
            .prepare(
                "SELECT id, name, description, created_at,
                        (SELECT COUNT(*) FROM messages m WHERE m.topic_id = topics.id)
                 FROM topics
                 ORDER BY created_at DESC, id DESC",
            )
            .sql()?;
        let rows = stmt
            .query_map([], topic_from_row)
            .sql()?
            .collect::<std::result::Result<Vec<_>, _>>()
            .sql()?;
        Ok(rows)
    }

    /// Topic identity by name. Lookup trims like the insert path does, so
    /// a whitespace-padded name round-trips.
    pub(crate) fn topic_id_by_name(&self, name: &str) -> Result<String> {
        use rusqlite::OptionalExtension;

        let name = name.trim();
        self.db
            .conn()
            .query_row("SELECT id FROM topics WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()
            .sql()?
            .ok_or_else(|| StoreError::TopicNotFound(name.to_string()))
    }
}

fn topic_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Topic> {
    Ok(Topic {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        created_at: row.get(3)?,
        message_count: row.get(4)?,
    })
}
