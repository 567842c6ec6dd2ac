//! Per-shard parameter storage for sparse factorization-machine models.
//!
//! This crate owns, for a contiguous range of feature ids, each
//! feature's scalar weight, its FTRL accumulators, and an optional
//! low-rank embedding with its adagrad accumulator. It provides the
//! storage and persistence half of a shard; the update rules live in
//! the companion optimizer crate.
//!
//! # Overview
//!
//! - [`Entry`] — the per-feature value object.
//! - [`ShardStore`] — the id-to-entry mapping, dense or sparse by
//!   range width, with binary checkpoint load/save.
//! - [`ModelConfig`] — the immutable hyperparameter set a store and
//!   its optimizer share.
//!
//! # Example
//!
//! ```
//! use sparsefm_store::{ModelConfig, ShardStore};
//!
//! let config = ModelConfig::new().with_v_dim(4);
//! let mut store = ShardStore::new(0, 1_000, config).unwrap();
//!
//! store.entry_mut(42).w = 0.5;
//!
//! let mut buf = Vec::new();
//! store.save(true, &mut buf).unwrap();
//!
//! let mut restored = ShardStore::new(0, 1_000, ModelConfig::new().with_v_dim(4)).unwrap();
//! let has_aux = restored.load(&mut &buf[..]).unwrap();
//! assert!(has_aux);
//! assert_eq!(restored.get(42).unwrap().w, 0.5);
//! ```

mod config;
mod entry;
mod error;
mod serialization;
mod store;

pub use config::{ModelConfig, DEFAULT_DENSE_THRESHOLD};
pub use entry::Entry;
pub use error::{Result, StoreError};
pub use store::ShardStore;
