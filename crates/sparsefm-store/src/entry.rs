//! Per-feature model entry.

use rand::Rng;

/// The weight and optimizer state for one feature id.
///
/// Each entry carries:
/// - `fea_cnt` — how often the feature has been observed so far,
/// - `w` — the scalar model weight,
/// - `sqrt_g`, `z` — the FTRL-proximal accumulators for `w`,
/// - an optional embedding buffer of length `2 * v_dim`: the embedding
///   vector followed by its per-coordinate adagrad accumulator.
///
/// The embedding is either fully absent or fully present; a
/// half-initialized buffer is never observable.
///
/// # Example
///
/// ```
/// use sparsefm_store::Entry;
///
/// let mut entry = Entry::default();
/// assert!(entry.is_empty());
/// entry.init_embedding(4, 0.01);
/// assert_eq!(entry.embedding().unwrap().len(), 4);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entry {
    /// Number of times this feature has appeared in the data.
    pub fea_cnt: u32,
    /// The scalar weight.
    pub w: f32,
    /// Accumulated gradient norm for the FTRL update.
    pub sqrt_g: f32,
    /// FTRL proximal offset.
    pub z: f32,
    /// Embedding plus adagrad accumulator, `2 * v_dim` values.
    pub(crate) v: Option<Box<[f32]>>,
}

impl Entry {
    /// Returns `true` when the embedding has been materialized.
    #[inline]
    pub fn has_embedding(&self) -> bool {
        self.v.is_some()
    }

    /// Returns the embedding dimension, or `0` when absent.
    #[inline]
    pub fn v_dim(&self) -> usize {
        self.v.as_ref().map_or(0, |v| v.len() / 2)
    }

    /// Returns the live embedding half, if materialized.
    #[inline]
    pub fn embedding(&self) -> Option<&[f32]> {
        self.v.as_deref().map(|v| &v[..v.len() / 2])
    }

    /// Returns the adagrad accumulator half, if materialized.
    #[inline]
    pub fn accumulator(&self) -> Option<&[f32]> {
        self.v.as_deref().map(|v| &v[v.len() / 2..])
    }

    /// Returns mutable views of the embedding and accumulator halves.
    #[inline]
    pub fn embedding_parts_mut(&mut self) -> Option<(&mut [f32], &mut [f32])> {
        self.v.as_deref_mut().map(|v| {
            let mid = v.len() / 2;
            v.split_at_mut(mid)
        })
    }

    /// Materializes the embedding: `v_dim` values drawn uniformly from
    /// `[-init_scale / 2, +init_scale / 2)`, followed by a zeroed
    /// accumulator half.
    ///
    /// # Panics
    ///
    /// Panics if the embedding has already been initialized.
    pub fn init_embedding(&mut self, v_dim: usize, init_scale: f32) {
        assert!(self.v.is_none(), "embedding already initialized");
        let mut buf = vec![0.0f32; v_dim * 2];
        if init_scale > 0.0 {
            let mut rng = rand::thread_rng();
            let half = init_scale / 2.0;
            for slot in &mut buf[..v_dim] {
                *slot = rng.gen_range(-half..half);
            }
        }
        self.v = Some(buf.into_boxed_slice());
    }

    /// Restores the embedding from a checkpointed live half; the
    /// accumulator half starts zeroed.
    pub(crate) fn restore_embedding(&mut self, live: &[f32]) {
        let mut buf = vec![0.0f32; live.len() * 2];
        buf[..live.len()].copy_from_slice(live);
        self.v = Some(buf.into_boxed_slice());
    }

    /// Returns `true` when the entry carries no model state worth
    /// persisting: zero weight and no embedding. Such entries are
    /// omitted from checkpoints.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w == 0.0 && self.v.is_none()
    }
}
