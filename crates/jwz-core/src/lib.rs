//! jwz core: shared types for the jwz message store
//!
//! This crate defines everything the storage crates agree on:
//! - Error taxonomy ([`StoreError`]) and the crate-wide [`Result`] alias
//! - Domain records: [`Topic`], [`Message`], [`Sender`], [`VersionContext`],
//!   blobs and attachments
//! - The append-only log line format ([`LogRecord`])
//! - Monotonic lexicographic identifiers ([`IdGenerator`])
//! - The [`Clock`] abstraction so tests control time
//! - The busy-retry policy ([`RetryPolicy`]) used at transaction boundaries

pub mod clock;
pub mod error;
pub mod id;
pub mod retry;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{Result, StoreError};
pub use id::{validate_id_prefix, IdGenerator, ID_LEN};
pub use retry::RetryPolicy;
pub use types::{
    Attachment, BlobInfo, LogRecord, Message, MessageRecord, Sender, Topic, TopicRecord,
    VersionContext,
};
