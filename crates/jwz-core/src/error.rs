use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// All errors surfaced by the jwz store.
///
/// One enum for the whole workspace: callers typically either map a kind to
/// a short user-facing message or propagate, and a single type keeps both
/// simple. Transient contention is the only retryable kind ([`Busy`] inside
/// the driver, [`DatabaseBusy`] once the retry budget is spent); everything
/// else is permanent.
///
/// [`Busy`]: StoreError::Busy
/// [`DatabaseBusy`]: StoreError::DatabaseBusy
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// No store directory was found walking up from the working directory.
    #[error("no message store found here or in any parent directory")]
    StoreNotFound,

    /// `init` refused to clobber an existing store root.
    #[error("store already exists at {}", .0.display())]
    StoreAlreadyExists(PathBuf),

    #[error("topic not found: '{0}'")]
    TopicNotFound(String),

    #[error("topic already exists: '{0}'")]
    TopicExists(String),

    #[error("message not found: '{0}'")]
    MessageNotFound(String),

    /// The supplied prefix matches more than one message identifier.
    #[error("message id '{0}' is ambiguous, use more characters")]
    MessageIdAmbiguous(String),

    /// The input is not a valid identifier or identifier prefix.
    #[error("invalid message id: '{0}'")]
    InvalidMessageId(String),

    #[error("parent message not found: '{0}'")]
    ParentNotFound(String),

    /// A transaction boundary stayed busy past the retry budget.
    #[error("database busy after {attempts} attempts")]
    DatabaseBusy { attempts: u32 },

    #[error("topic name must not be empty")]
    EmptyTopicName,

    #[error("message body must not be empty")]
    EmptyMessageBody,

    #[error("blob not found: '{0}'")]
    BlobNotFound(String),

    /// The engine reported SQLITE_BUSY or SQLITE_LOCKED (or an extended
    /// code with a matching low byte). Surfaced directly for non-boundary
    /// statements; boundary statements retry first.
    #[error("database busy or locked: {0}")]
    Busy(String),

    /// Any other engine failure, carrying the engine's own message.
    #[error("database error: {0}")]
    Engine(String),

    #[error("record serialization error: {0}")]
    Serialization(String),

    #[error("other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    /// Whether this error signals transient engine contention.
    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy(_) | StoreError::DatabaseBusy { .. })
    }
}
