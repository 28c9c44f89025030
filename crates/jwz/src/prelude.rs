//! Convenience re-exports for embedders.

pub use crate::repository::NewMessage;
pub use crate::store::{Store, StoreConfig};
pub use jwz_core::{
    Attachment, BlobInfo, Message, Result, Sender, StoreError, Topic, VersionContext,
};
