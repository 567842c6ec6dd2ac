//! Model and storage configuration.
//!
//! [`ModelConfig`] carries the regularization, learning-rate, and
//! embedding parameters that stay fixed for the lifetime of a shard
//! store and its optimizer. It deserializes from any serde source;
//! unknown keys are ignored, so a forward-compatible key-value
//! configuration surface can feed it directly.
//!
//! # Example
//!
//! ```
//! use sparsefm_store::ModelConfig;
//!
//! let config = ModelConfig::new().with_l1(0.1).with_v_dim(8);
//! assert_eq!(config.v_dim, 8);
//! config.validate().unwrap();
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Id-span threshold below which the dense representation is chosen.
///
/// This is a heuristic, not a hard constraint; override it through
/// [`ModelConfig::dense_threshold`] when the default does not fit the
/// deployment's memory budget.
pub const DEFAULT_DENSE_THRESHOLD: u64 = 100_000_000;

/// Hyperparameters for one shard: FTRL-proximal for the scalar weight
/// `w`, adagrad for the optional embedding `V`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// L1 penalty on `w`; drives weights to exact zero.
    pub l1: f32,
    /// L2 penalty on `w`.
    pub l2: f32,
    /// L2 penalty on each embedding coordinate.
    pub v_l2: f32,
    /// FTRL learning rate (alpha) for `w`.
    pub lr: f32,
    /// FTRL learning-rate offset (beta) for `w`.
    pub lr_beta: f32,
    /// Adagrad learning rate for `V`.
    pub v_lr: f32,
    /// Adagrad learning-rate offset for `V`.
    pub v_lr_beta: f32,
    /// Embedding dimension; `0` disables embeddings entirely.
    pub v_dim: usize,
    /// Observation count a feature must exceed before its embedding is
    /// materialized.
    pub v_threshold: u32,
    /// Width of the uniform range the embedding is initialized from:
    /// `[-v_init_scale / 2, +v_init_scale / 2)`.
    pub v_init_scale: f32,
    /// Id-span threshold for choosing the dense representation.
    pub dense_threshold: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            l1: 1.0,
            l2: 0.0,
            v_l2: 0.01,
            lr: 0.1,
            lr_beta: 1.0,
            v_lr: 0.01,
            v_lr_beta: 1.0,
            v_dim: 0,
            v_threshold: 0,
            v_init_scale: 0.01,
            dense_threshold: DEFAULT_DENSE_THRESHOLD,
        }
    }
}

impl ModelConfig {
    /// Creates a configuration with default hyperparameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the L1 penalty on `w`.
    pub fn with_l1(mut self, l1: f32) -> Self {
        self.l1 = l1;
        self
    }

    /// Sets the L2 penalty on `w`.
    pub fn with_l2(mut self, l2: f32) -> Self {
        self.l2 = l2;
        self
    }

    /// Sets the FTRL learning-rate pair for `w`.
    pub fn with_lr(mut self, lr: f32, lr_beta: f32) -> Self {
        self.lr = lr;
        self.lr_beta = lr_beta;
        self
    }

    /// Sets the adagrad learning-rate pair for `V`.
    pub fn with_v_lr(mut self, v_lr: f32, v_lr_beta: f32) -> Self {
        self.v_lr = v_lr;
        self.v_lr_beta = v_lr_beta;
        self
    }

    /// Sets the embedding dimension.
    pub fn with_v_dim(mut self, v_dim: usize) -> Self {
        self.v_dim = v_dim;
        self
    }

    /// Sets the observation-count threshold for embedding creation.
    pub fn with_v_threshold(mut self, v_threshold: u32) -> Self {
        self.v_threshold = v_threshold;
        self
    }

    /// Sets the uniform initialization scale for embeddings.
    pub fn with_v_init_scale(mut self, v_init_scale: f32) -> Self {
        self.v_init_scale = v_init_scale;
        self
    }

    /// Sets the dense/sparse selection threshold.
    pub fn with_dense_threshold(mut self, dense_threshold: u64) -> Self {
        self.dense_threshold = dense_threshold;
        self
    }

    /// Validates parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidConfig`] when a penalty or learning
    /// rate is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.l1 < 0.0 || self.l2 < 0.0 || self.v_l2 < 0.0 {
            return Err(StoreError::InvalidConfig {
                message: format!(
                    "regularizers must be non-negative (l1={}, l2={}, v_l2={})",
                    self.l1, self.l2, self.v_l2
                ),
            });
        }
        if self.lr <= 0.0 || self.v_lr <= 0.0 {
            return Err(StoreError::InvalidConfig {
                message: format!(
                    "learning rates must be positive (lr={}, v_lr={})",
                    self.lr, self.v_lr
                ),
            });
        }
        if self.v_dim > 0 && self.v_init_scale < 0.0 {
            return Err(StoreError::InvalidConfig {
                message: format!("v_init_scale must be non-negative ({})", self.v_init_scale),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        ModelConfig::default().validate().unwrap();
    }

    #[test]
    fn test_builder_setters() {
        let config = ModelConfig::new()
            .with_l1(0.5)
            .with_l2(0.1)
            .with_lr(0.2, 2.0)
            .with_v_lr(0.05, 1.5)
            .with_v_dim(16)
            .with_v_threshold(4)
            .with_v_init_scale(0.02)
            .with_dense_threshold(1_000);

        assert_eq!(config.l1, 0.5);
        assert_eq!(config.l2, 0.1);
        assert_eq!(config.lr, 0.2);
        assert_eq!(config.lr_beta, 2.0);
        assert_eq!(config.v_lr, 0.05);
        assert_eq!(config.v_lr_beta, 1.5);
        assert_eq!(config.v_dim, 16);
        assert_eq!(config.v_threshold, 4);
        assert_eq!(config.v_init_scale, 0.02);
        assert_eq!(config.dense_threshold, 1_000);
        config.validate().unwrap();
    }

    #[test]
    fn test_negative_regularizer_rejected() {
        let config = ModelConfig::new().with_l1(-1.0);
        assert!(matches!(
            config.validate(),
            Err(StoreError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_non_positive_learning_rate_rejected() {
        let config = ModelConfig::new().with_lr(0.0, 1.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_are_tolerated() {
        let json = r#"{
            "l1": 0.25,
            "v_dim": 4,
            "some_future_knob": true,
            "worker_threads": 8
        }"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.l1, 0.25);
        assert_eq!(config.v_dim, 4);
        // Untouched keys keep their defaults.
        assert_eq!(config.v_l2, 0.01);
    }

    #[test]
    fn test_config_roundtrip() {
        let config = ModelConfig::new().with_v_dim(8).with_v_threshold(2);
        let json = serde_json::to_string(&config).unwrap();
        let restored: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, restored);
    }
}
