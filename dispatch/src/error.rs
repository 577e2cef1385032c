use styx_compat::{FormatError, Interrupted};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Sentinel for "this path is not valid in the queried store".
    #[error("path '{0}' is not valid")]
    InvalidPath(String),

    /// Sentinel for a miss when probing the binary cache.
    #[error("file '{0}' does not exist in binary cache")]
    NoSuchCacheFile(String),

    /// The addressed queue is gone. Non-fatal for result delivery:
    /// a vanished result queue means the broker already got (or gave
    /// up on) its answer.
    #[error("queue '{0}' does not exist")]
    NoSuchQueue(String),

    /// Any other failure reported by the queue service, carrying the
    /// service's error code where one was available.
    #[error("queue service error: {0}")]
    Queue(String),

    #[error(transparent)]
    ObjectStore(#[from] object_store::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("store error: {0}")]
    Store(String),

    #[error("unsupported compression method '{0}'")]
    UnsupportedCompression(String),

    #[error("invalid store address '{0}': {1}")]
    InvalidAddress(String, String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted(_))
    }
}
