//! Error type for message store operations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MessageStoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error serializing message for the store: {0}")]
    Serialize(String),

    #[error("error deserializing message from the store: {0}")]
    Deserialize(String),

    #[error("malformed store key: {0}")]
    InvalidKey(String),

    #[error("deleted {failed} of {attempted} messages from the store")]
    PartialDelete { attempted: usize, failed: usize },
}
