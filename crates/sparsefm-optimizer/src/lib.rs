//! Online optimizer for sparsefm shards.
//!
//! This crate implements the training rule for one shard of a sparse
//! factorization-machine model: FTRL-proximal for the scalar weights
//! and adagrad for the lazily-created embedding vectors. The storage
//! itself lives in `sparsefm-store`; the optimizer drives it through
//! three batch operations (`get`, `add_count`, `update`) plus
//! checkpoint load/save.
//!
//! # Example
//!
//! ```
//! use sparsefm_optimizer::FtrlOptimizer;
//! use sparsefm_store::{ModelConfig, ShardStore};
//!
//! let config = ModelConfig::new().with_l1(0.1).with_v_dim(4);
//! let store = ShardStore::new(0, 1_000, config).unwrap();
//! let mut optimizer = FtrlOptimizer::new(store);
//!
//! optimizer.update(&[42], &[2.5], &[]).unwrap();
//! let (weights, _lens) = optimizer.get(&[42]);
//! assert!(weights[0] != 0.0);
//! ```

use thiserror::Error;

mod ftrl;

pub use ftrl::FtrlOptimizer;
pub use sparsefm_store::{Entry, ModelConfig, ShardStore, StoreError};

/// Errors that can occur while applying batch operations.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Two parallel batch arrays disagree on length.
    #[error("batch length mismatch: {ids} ids vs {values} values")]
    CountMismatch {
        /// Number of feature ids in the batch.
        ids: usize,
        /// Number of per-id values supplied alongside them.
        values: usize,
    },

    /// The flat gradient buffer does not match the lengths declared
    /// for the batch.
    #[error("gradient buffer mismatch: {supplied} floats supplied, {expected} expected")]
    GradientMismatch {
        /// Number of floats in the supplied buffer.
        supplied: usize,
        /// Number of floats the batch accounts for.
        expected: usize,
    },

    /// A per-id gradient length is neither 0 nor the embedding
    /// dimension.
    #[error("gradient length {len} at position {index} is neither 0 nor v_dim {v_dim}")]
    InvalidGradientLen {
        /// Position of the offending id within the batch.
        index: usize,
        /// The declared embedding-gradient length.
        len: usize,
        /// The configured embedding dimension.
        v_dim: usize,
    },

    /// `update` was called on a shard restored from an inference-only
    /// snapshot; FTRL cannot proceed without its accumulators.
    #[error("optimizer state missing: checkpoint was loaded without aux data")]
    NoAuxState,

    /// A storage or checkpoint operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A specialized Result type for optimizer operations.
pub type Result<T> = std::result::Result<T, OptimizerError>;
