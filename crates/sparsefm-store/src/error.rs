//! Error types for the shard store.

use thiserror::Error;

/// Errors that can occur while constructing or persisting a shard store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The shard id range is empty or inverted.
    #[error("invalid shard range: [{start_id}, {end_id})")]
    InvalidRange {
        /// The first feature id owned by the shard.
        start_id: u64,
        /// One past the last feature id owned by the shard.
        end_id: u64,
    },

    /// A configuration parameter failed validation.
    #[error("invalid config: {message}")]
    InvalidConfig {
        /// Description of the offending parameter.
        message: String,
    },

    /// The checkpoint stream is malformed. There is no partial-load
    /// recovery; the store contents are unspecified after this error.
    #[error("malformed checkpoint: {message}")]
    Format {
        /// Description of the format violation.
        message: String,
    },

    /// An underlying I/O operation failed.
    #[error("checkpoint i/o failed")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
