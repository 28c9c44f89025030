//! Domain records and the append-only log line format.
//!
//! Entities are independent value records linked by identifier fields; the
//! parent edge of a message is a lookup, never ownership, so threads form a
//! forest without reference cycles. Everything here is an owned copy;
//! query code deep-copies out of engine buffers before returning.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A named container grouping related messages.
///
/// `message_count` is derived by the index at query time, never stored as
/// authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub message_count: i64,
}

/// Identity attached to a message by its producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Source-control state captured at post time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionContext {
    /// Commit digest.
    pub oid: String,
    /// Branch name, or a detached-head marker.
    pub head: String,
    pub dirty: bool,
    /// Subdirectory prefix of the working tree, when not at the root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// A message within a topic, optionally replying to another message.
///
/// `reply_count` is the number of immediate children, derived at query
/// time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub topic_id: String,
    pub parent_id: Option<String>,
    pub body: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub reply_count: i64,
    pub sender: Option<Sender>,
    pub git: Option<VersionContext>,
}

/// Metadata of a content-addressed blob. The bytes live in the index and
/// are fetched separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// `"sha256:<lowercase hex>"`; the prefix is part of the identity.
    pub id: String,
    pub size: i64,
    pub mime_type: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
}

/// Relation linking a message to a blob, with an optional display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub message_id: String,
    pub blob_id: String,
    pub name: Option<String>,
}

/// One line of `messages.jsonl`.
///
/// Serialized minified, one object per line, tagged by `"type"`. Unknown
/// fields are ignored on replay so newer writers stay readable by older
/// code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogRecord {
    Topic(TopicRecord),
    Message(MessageRecord),
}

/// The log form of a topic creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub created_at: i64,
}

/// The log form of a message creation. `parent_id`, `sender` and `git`
/// serialize as JSON `null` when absent; replay accepts null or missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub topic_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub body: String,
    pub created_at: i64,
    #[serde(default)]
    pub sender: Option<Sender>,
    #[serde(default)]
    pub git: Option<VersionContext>,
}

impl LogRecord {
    /// Encode as a single minified JSON line, without the trailing newline.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Decode one log line. Callers treat an error as a skippable
    /// (partially written or foreign) line, not a fatal condition.
    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}
