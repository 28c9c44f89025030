//! jwz: a local, single-host message store for machine-to-machine traffic.
//!
//! Producers post topic-rooted messages and threaded replies; consumers
//! list, fetch, thread, and full-text search them. Durability rests on two
//! representations of the same data:
//! - `messages.jsonl`: an append-only JSON-lines log, the source of truth
//! - `messages.db`: a SQLite index with FTS, a rebuildable cache
//!
//! Every write lands in both inside one index transaction and one locked
//! log append; every open replays whatever log suffix the index has not
//! yet observed, so the two can never disagree after a crash. Deleting the
//! index file entirely is safe; the next open rebuilds it from the log.
//!
//! # Quick start
//!
//! ```no_run
//! use jwz::prelude::*;
//!
//! # fn main() -> Result<()> {
//! let root = Store::init(std::path::Path::new("."))?;
//! let store = Store::open(&root)?;
//!
//! store.create_topic("tasks", "work queue")?;
//! let id = store.create_message(NewMessage::new("tasks", "hello"))?;
//!
//! for msg in store.list_messages("tasks", 10)? {
//!     println!("{}: {}", msg.id, msg.body);
//! }
//! let found = store.search("hello", None, 10)?;
//! assert_eq!(found[0].id, id);
//! # Ok(())
//! # }
//! ```

pub mod blobs;
pub mod integrity;
pub mod prelude;
pub mod replay;
pub mod repository;
pub mod resolve;
pub mod search;
pub mod store;

pub use blobs::blob_id_for;
pub use integrity::{IntegrityIssue, IntegrityReport};
pub use replay::ReplayStats;
pub use repository::NewMessage;
pub use store::{Store, StoreConfig, StoreStats, INDEX_FILE, LOCK_FILE, LOG_FILE, STORE_DIR};

// Re-export the shared vocabulary so embedders need only this crate.
pub use jwz_core::{
    Attachment, BlobInfo, Clock, FixedClock, LogRecord, Message, RetryPolicy, Result, Sender,
    StoreError, SystemClock, Topic, VersionContext,
};
