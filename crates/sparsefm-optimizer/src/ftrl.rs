//! FTRL-proximal + adagrad shard optimizer.
//!
//! The scalar weight `w` is updated by FTRL-proximal, a smoothed
//! adagrad variant that plays well with L1 shrinkage and keeps the
//! model sparse. The embedding `V` is updated by plain per-coordinate
//! adagrad:
//!
//! ```text
//! gw      = grad_w + l2 * w
//! sqrt_g' = sqrt(sqrt_g^2 + gw^2)
//! z      -= gw - (sqrt_g' - sqrt_g) / lr * w
//! w       = 0                        if |z| <= l1
//!         = (z -/+ l1) * lr / (lr_beta + sqrt_g')   otherwise
//!
//! g       = grad_V[i] + v_l2 * V[i]
//! acc'    = sqrt(acc[i]^2 + g^2)
//! V[i]   -= v_lr / (acc' + v_lr_beta) * g
//! ```

use sparsefm_store::{ModelConfig, ShardStore};

use crate::{OptimizerError, Result};

/// The batch optimizer for one shard.
///
/// Owns the shard's [`ShardStore`] and applies updates sequentially;
/// there is no internal locking, matching the single-owner contract of
/// the store. Besides the model state it tracks whether FTRL aux
/// accumulators are available (a checkpoint may have been saved
/// without them) and a running count of nonzero weights for
/// diagnostics.
pub struct FtrlOptimizer {
    store: ShardStore,
    has_aux: bool,
    nonzero_weights: usize,
}

impl FtrlOptimizer {
    /// Wraps a freshly-constructed store. A new store always has aux
    /// state (it is simply all zeros).
    pub fn new(store: ShardStore) -> Self {
        let nonzero_weights = store.num_nonzero_weights();
        Self {
            store,
            has_aux: true,
            nonzero_weights,
        }
    }

    /// Returns the shard configuration.
    #[inline]
    pub fn config(&self) -> &ModelConfig {
        self.store.config()
    }

    /// Returns the underlying store, for inspection.
    #[inline]
    pub fn store(&self) -> &ShardStore {
        &self.store
    }

    /// Returns the number of currently nonzero weights.
    #[inline]
    pub fn nonzero_weights(&self) -> usize {
        self.nonzero_weights
    }

    /// Returns whether aux optimizer state is available.
    #[inline]
    pub fn has_aux(&self) -> bool {
        self.has_aux
    }

    /// Reads the weights for a batch of feature ids, creating entries
    /// on first touch.
    ///
    /// The first vector is flat: for each id, `w` followed by its
    /// embedding when materialized. When `v_dim > 0` the second vector
    /// holds one length per id (`1 + v_dim` or `1`) so the caller can
    /// re-segment the flat data; when `v_dim == 0` it is empty and the
    /// stride is a fixed 1.
    pub fn get(&mut self, ids: &[u64]) -> (Vec<f32>, Vec<usize>) {
        let v_dim = self.store.config().v_dim;
        let mut weights = Vec::with_capacity(ids.len() * (1 + v_dim));
        let mut lens = Vec::with_capacity(if v_dim == 0 { 0 } else { ids.len() });

        for &id in ids {
            let entry = self.store.entry_mut(id);
            weights.push(entry.w);
            let mut len = 1;
            if let Some(live) = entry.embedding() {
                weights.extend_from_slice(live);
                len += live.len();
            }
            if v_dim != 0 {
                lens.push(len);
            }
        }
        (weights, lens)
    }

    /// Adds observation counts for a batch of feature ids.
    ///
    /// Crossing `v_threshold` materializes the embedding of an entry
    /// whose weight is already nonzero; this is how embeddings appear
    /// from passive observation, without a gradient step.
    ///
    /// # Errors
    ///
    /// Returns [`OptimizerError::CountMismatch`] when the arrays
    /// disagree on length.
    pub fn add_count(&mut self, ids: &[u64], counts: &[u32]) -> Result<()> {
        if ids.len() != counts.len() {
            return Err(OptimizerError::CountMismatch {
                ids: ids.len(),
                values: counts.len(),
            });
        }
        let cfg = self.store.config().clone();
        for (&id, &count) in ids.iter().zip(counts) {
            let entry = self.store.entry_mut(id);
            entry.fea_cnt += count;
            if cfg.v_dim > 0
                && !entry.has_embedding()
                && entry.w != 0.0
                && entry.fea_cnt > cfg.v_threshold
            {
                entry.init_embedding(cfg.v_dim, cfg.v_init_scale);
            }
        }
        Ok(())
    }

    /// Applies one gradient batch.
    ///
    /// `grads` is flat. With `grad_lens` empty, every element is a
    /// bare scalar gradient for `w` and `grads.len()` must equal
    /// `ids.len()`. Otherwise `grad_lens[i]` counts the embedding
    /// gradient floats following id `i`'s scalar gradient — 0 or
    /// exactly `v_dim` — and the batch must account for the whole
    /// buffer.
    ///
    /// # Errors
    ///
    /// * [`OptimizerError::NoAuxState`] — the shard was restored from
    ///   an inference-only snapshot.
    /// * [`OptimizerError::CountMismatch`] /
    ///   [`OptimizerError::GradientMismatch`] /
    ///   [`OptimizerError::InvalidGradientLen`] — malformed batch;
    ///   these indicate a caller bug and leave no partial guarantee
    ///   about which ids were updated.
    pub fn update(&mut self, ids: &[u64], grads: &[f32], grad_lens: &[usize]) -> Result<()> {
        if !self.has_aux {
            return Err(OptimizerError::NoAuxState);
        }
        let cfg = self.store.config().clone();
        let scalar_only = grad_lens.is_empty();

        if !scalar_only && grad_lens.len() != ids.len() {
            return Err(OptimizerError::CountMismatch {
                ids: ids.len(),
                values: grad_lens.len(),
            });
        }
        for (i, &len) in grad_lens.iter().enumerate() {
            if len != 0 && len != cfg.v_dim {
                return Err(OptimizerError::InvalidGradientLen {
                    index: i,
                    len,
                    v_dim: cfg.v_dim,
                });
            }
        }
        let expected = ids.len() + grad_lens.iter().sum::<usize>();
        if grads.len() != expected {
            return Err(OptimizerError::GradientMismatch {
                supplied: grads.len(),
                expected,
            });
        }

        let mut p = 0;
        for (i, &id) in ids.iter().enumerate() {
            self.update_w(id, grads[p], &cfg);
            p += 1;

            if !scalar_only && grad_lens[i] > 0 {
                let n = grad_lens[i];
                self.update_v(id, &grads[p..p + n], &cfg);
                p += n;
            }
        }
        debug_assert_eq!(p, grads.len());
        Ok(())
    }

    /// Loads a checkpoint into the shard, recording whether aux state
    /// was present and rebuilding the nonzero-weight counter.
    pub fn load(&mut self, reader: &mut impl std::io::Read) -> Result<bool> {
        let has_aux = self.store.load(reader)?;
        self.has_aux = has_aux;
        self.nonzero_weights = self.store.num_nonzero_weights();
        if !has_aux {
            tracing::warn!("checkpoint has no aux state; updates are disabled until reset");
        }
        Ok(has_aux)
    }

    /// Saves the shard. See [`ShardStore::save`].
    pub fn save(&self, save_aux: bool, writer: &mut impl std::io::Write) -> Result<()> {
        self.store.save(save_aux, writer)?;
        Ok(())
    }

    /// One FTRL-proximal step on `w`, with nonzero bookkeeping and the
    /// lazy embedding trigger on a 0-to-nonzero transition.
    fn update_w(&mut self, id: u64, grad: f32, cfg: &ModelConfig) {
        let entry = self.store.entry_mut(id);
        let w = entry.w;

        let gw = grad + cfg.l2 * w;
        let sg = entry.sqrt_g;
        entry.sqrt_g = (sg * sg + gw * gw).sqrt();
        entry.z -= gw - (entry.sqrt_g - sg) / cfg.lr * w;

        let z = entry.z;
        if z.abs() <= cfg.l1 {
            entry.w = 0.0;
        } else {
            let eta = (cfg.lr_beta + entry.sqrt_g) / cfg.lr;
            entry.w = (if z > 0.0 { z - cfg.l1 } else { z + cfg.l1 }) / eta;
        }

        if w == 0.0 && entry.w != 0.0 {
            self.nonzero_weights += 1;
            if cfg.v_dim > 0 && !entry.has_embedding() && entry.fea_cnt > cfg.v_threshold {
                entry.init_embedding(cfg.v_dim, cfg.v_init_scale);
            }
        } else if w != 0.0 && entry.w == 0.0 {
            self.nonzero_weights -= 1;
        }
    }

    /// One adagrad step on the embedding. A gradient supplied for an
    /// entry whose embedding is still absent is dropped; the caller
    /// saw no embedding in `get`, so there is nothing to update.
    fn update_v(&mut self, id: u64, grad_v: &[f32], cfg: &ModelConfig) {
        let entry = self.store.entry_mut(id);
        if let Some((live, acc)) = entry.embedding_parts_mut() {
            for ((v, a), &g) in live.iter_mut().zip(acc.iter_mut()).zip(grad_v) {
                let g = g + cfg.v_l2 * *v;
                let acc_new = (*a * *a + g * g).sqrt();
                *v -= cfg.v_lr / (acc_new + cfg.v_lr_beta) * g;
                *a = acc_new;
            }
        }
    }
}
