//! Shard-local model storage.

use std::io::{Read, Write};

use hashbrown::HashMap;

use crate::config::ModelConfig;
use crate::entry::Entry;
use crate::error::{Result, StoreError};
use crate::serialization;

/// Physical entry storage, chosen once at construction.
///
/// Dense pre-allocates one slot per id in the shard range and indexes
/// directly; sparse starts empty and creates slots on demand. Both are
/// keyed by the shard-local id `id - start_id`.
enum Slab {
    Dense(Vec<Entry>),
    Sparse(HashMap<u64, Entry>),
}

/// The model store for one shard: a mapping from feature ids in
/// `[start_id, end_id)` to their [`Entry`].
///
/// Entries are created on first access with default (zero) values and
/// are never removed; logically empty entries are simply omitted from
/// saved checkpoints. The store is single-owner: no internal locking is
/// provided, and `load`/`save` assume exclusive access for the whole
/// call.
///
/// # Example
///
/// ```
/// use sparsefm_store::{ModelConfig, ShardStore};
///
/// let mut store = ShardStore::new(100, 200, ModelConfig::new()).unwrap();
/// store.entry_mut(150).w = 1.0;
/// assert_eq!(store.get(150).unwrap().w, 1.0);
/// assert!(store.get(99).is_none());
/// ```
pub struct ShardStore {
    start_id: u64,
    end_id: u64,
    config: ModelConfig,
    slab: Slab,
}

impl ShardStore {
    /// Creates a store owning the feature id range `[start_id, end_id)`.
    ///
    /// The dense representation is selected when the id span is below
    /// [`ModelConfig::dense_threshold`], the sparse one otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidRange`] when `end_id <= start_id`,
    /// or [`StoreError::InvalidConfig`] when the configuration fails
    /// validation.
    pub fn new(start_id: u64, end_id: u64, config: ModelConfig) -> Result<Self> {
        if end_id <= start_id {
            return Err(StoreError::InvalidRange { start_id, end_id });
        }
        config.validate()?;

        let span = end_id - start_id;
        let slab = if span < config.dense_threshold {
            Slab::Dense(vec![Entry::default(); span as usize])
        } else {
            Slab::Sparse(HashMap::new())
        };
        Ok(Self {
            start_id,
            end_id,
            config,
            slab,
        })
    }

    /// Returns the owned id range as `(start_id, end_id)`.
    #[inline]
    pub fn range(&self) -> (u64, u64) {
        (self.start_id, self.end_id)
    }

    /// Returns the store configuration.
    #[inline]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Returns the entry for `id`, creating a zero-valued one if
    /// absent. This is the sole mutation entry point used by the
    /// optimizer.
    ///
    /// # Panics
    ///
    /// Panics when `id` is outside the shard range; that is a caller
    /// contract violation, not a recoverable condition.
    pub fn entry_mut(&mut self, id: u64) -> &mut Entry {
        assert!(
            id >= self.start_id && id < self.end_id,
            "feature id {} outside shard range [{}, {})",
            id,
            self.start_id,
            self.end_id
        );
        let local = id - self.start_id;
        match &mut self.slab {
            Slab::Dense(vec) => &mut vec[local as usize],
            Slab::Sparse(map) => map.entry(local).or_default(),
        }
    }

    /// Returns the entry for `id` without creating one.
    ///
    /// A read-only inspection surface, not the update path. Dense
    /// slots exist for the whole range; the sparse representation
    /// reports `None` for ids never touched.
    pub fn get(&self, id: u64) -> Option<&Entry> {
        if id < self.start_id || id >= self.end_id {
            return None;
        }
        let local = id - self.start_id;
        match &self.slab {
            Slab::Dense(vec) => Some(&vec[local as usize]),
            Slab::Sparse(map) => map.get(&local),
        }
    }

    /// Counts entries that would survive a save.
    pub fn num_nonempty(&self) -> usize {
        match &self.slab {
            Slab::Dense(vec) => vec.iter().filter(|e| !e.is_empty()).count(),
            Slab::Sparse(map) => map.values().filter(|e| !e.is_empty()).count(),
        }
    }

    /// Counts entries whose weight is currently nonzero.
    pub fn num_nonzero_weights(&self) -> usize {
        match &self.slab {
            Slab::Dense(vec) => vec.iter().filter(|e| e.w != 0.0).count(),
            Slab::Sparse(map) => map.values().filter(|e| e.w != 0.0).count(),
        }
    }

    #[cfg(test)]
    fn is_dense(&self) -> bool {
        matches!(self.slab, Slab::Dense(_))
    }

    /// Loads entries from a checkpoint stream.
    ///
    /// Records whose id falls outside the shard range are skipped by
    /// consuming their payload. Returns whether the stream carried aux
    /// optimizer state; training must not resume without it. A stream
    /// with no in-range records reports aux as present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Format`] on a malformed stream: short
    /// read, payload disagreeing with the declared length, or records
    /// disagreeing on aux presence. The store contents are unspecified
    /// after a format error.
    pub fn load(&mut self, reader: &mut impl Read) -> Result<bool> {
        let v_dim = self.config.v_dim;
        let mut has_aux: Option<bool> = None;
        let mut loaded = 0u64;
        let mut skipped = 0u64;

        while let Some(id) = serialization::try_read_id(reader)? {
            let len = serialization::read_len(reader)?;
            if id < self.start_id || id >= self.end_id {
                serialization::skip_record(reader, len)?;
                skipped += 1;
                continue;
            }

            let (entry, record_aux) = serialization::decode_record(reader, len, v_dim)?;
            if let Some(expected) = has_aux {
                if record_aux != expected {
                    return Err(StoreError::Format {
                        message: format!(
                            "inconsistent aux flags across records (id {id} disagrees)"
                        ),
                    });
                }
            }
            has_aux = Some(record_aux);
            *self.entry_mut(id) = entry;
            loaded += 1;
        }

        let has_aux = has_aux.unwrap_or(true);
        tracing::info!(
            start_id = self.start_id,
            end_id = self.end_id,
            loaded,
            skipped,
            has_aux,
            "loaded shard checkpoint"
        );
        Ok(has_aux)
    }

    /// Saves all non-empty entries in ascending id order.
    ///
    /// When `save_aux` is false the FTRL accumulators are dropped from
    /// the records, producing an inference-only snapshot.
    pub fn save(&self, save_aux: bool, writer: &mut impl Write) -> Result<()> {
        let mut written = 0u64;
        match &self.slab {
            Slab::Dense(vec) => {
                for (local, entry) in vec.iter().enumerate() {
                    if entry.is_empty() {
                        continue;
                    }
                    serialization::encode_record(
                        writer,
                        self.start_id + local as u64,
                        entry,
                        save_aux,
                    )?;
                    written += 1;
                }
            }
            Slab::Sparse(map) => {
                let mut locals: Vec<u64> = map
                    .iter()
                    .filter(|(_, e)| !e.is_empty())
                    .map(|(&local, _)| local)
                    .collect();
                locals.sort_unstable();
                for local in locals {
                    serialization::encode_record(
                        writer,
                        self.start_id + local,
                        &map[&local],
                        save_aux,
                    )?;
                    written += 1;
                }
            }
        }

        tracing::info!(
            start_id = self.start_id,
            end_id = self.end_id,
            written,
            save_aux,
            "saved shard checkpoint"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> ModelConfig {
        ModelConfig::new().with_v_dim(4)
    }

    #[test]
    fn test_rejects_empty_range() {
        assert!(matches!(
            ShardStore::new(10, 10, ModelConfig::new()),
            Err(StoreError::InvalidRange { .. })
        ));
        assert!(ShardStore::new(10, 5, ModelConfig::new()).is_err());
    }

    #[test]
    fn test_representation_selection() {
        let config = ModelConfig::new().with_dense_threshold(1_000);
        let dense = ShardStore::new(0, 999, config.clone()).unwrap();
        assert!(dense.is_dense());

        let sparse = ShardStore::new(0, 1_000, config).unwrap();
        assert!(!sparse.is_dense());
    }

    #[test]
    fn test_read_through_creation() {
        let config = ModelConfig::new().with_dense_threshold(1);
        let mut store = ShardStore::new(0, 1_000_000, config).unwrap();
        assert!(!store.is_dense());

        let entry = store.entry_mut(123);
        assert_eq!(entry.fea_cnt, 0);
        entry.w = 2.0;
        assert_eq!(store.get(123).unwrap().w, 2.0);
    }

    #[test]
    fn test_entry_shifted_by_start_id() {
        let mut store = ShardStore::new(500, 600, small_config()).unwrap();
        store.entry_mut(500).w = 1.0;
        store.entry_mut(599).w = 2.0;
        assert_eq!(store.num_nonempty(), 2);
    }

    #[test]
    #[should_panic(expected = "outside shard range")]
    fn test_out_of_range_access_panics() {
        let mut store = ShardStore::new(100, 200, ModelConfig::new()).unwrap();
        store.entry_mut(99);
    }

    fn populate(store: &mut ShardStore) {
        let e = store.entry_mut(3);
        e.fea_cnt = 5;
        e.w = 0.5;
        e.sqrt_g = 1.5;
        e.z = -2.0;

        let e = store.entry_mut(7);
        e.fea_cnt = 9;
        e.w = -0.25;
        e.init_embedding(4, 0.1);

        // Logically empty despite a count; must be omitted on save.
        store.entry_mut(11).fea_cnt = 100;
    }

    #[test]
    fn test_save_load_roundtrip_with_aux() {
        let mut store = ShardStore::new(0, 100, small_config()).unwrap();
        populate(&mut store);

        let mut buf = Vec::new();
        store.save(true, &mut buf).unwrap();

        let mut restored = ShardStore::new(0, 100, small_config()).unwrap();
        let has_aux = restored.load(&mut &buf[..]).unwrap();
        assert!(has_aux);

        assert_eq!(restored.get(3).unwrap(), store.get(3).unwrap());
        let orig = store.get(7).unwrap();
        let back = restored.get(7).unwrap();
        assert_eq!(back.fea_cnt, orig.fea_cnt);
        assert_eq!(back.w, orig.w);
        assert_eq!(back.embedding(), orig.embedding());
        // Empty entry 11 does not survive.
        assert!(restored.get(11).is_none() || restored.get(11).unwrap().is_empty());
        assert_eq!(restored.num_nonempty(), 2);
    }

    #[test]
    fn test_save_without_aux_roundtrip() {
        let mut store = ShardStore::new(0, 100, small_config()).unwrap();
        populate(&mut store);

        let mut buf = Vec::new();
        store.save(false, &mut buf).unwrap();

        let mut restored = ShardStore::new(0, 100, small_config()).unwrap();
        let has_aux = restored.load(&mut &buf[..]).unwrap();
        assert!(!has_aux);
        assert_eq!(restored.get(3).unwrap().w, 0.5);
        assert_eq!(restored.get(3).unwrap().sqrt_g, 0.0);
        assert_eq!(restored.get(3).unwrap().z, 0.0);
    }

    #[test]
    fn test_empty_entry_omitted_from_stream() {
        let mut store = ShardStore::new(0, 100, small_config()).unwrap();
        store.entry_mut(11).fea_cnt = 100;

        let mut buf = Vec::new();
        store.save(true, &mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_out_of_range_records_skipped() {
        // A wider shard writes the stream; a narrower one loads it.
        let mut wide = ShardStore::new(0, 1_000, small_config()).unwrap();
        wide.entry_mut(5).w = 1.0;
        wide.entry_mut(50).w = 2.0;
        wide.entry_mut(500).w = 3.0;
        let e = wide.entry_mut(700);
        e.w = 4.0;
        e.init_embedding(4, 0.1);

        let mut buf = Vec::new();
        wide.save(true, &mut buf).unwrap();

        let mut narrow = ShardStore::new(10, 600, small_config()).unwrap();
        let has_aux = narrow.load(&mut &buf[..]).unwrap();
        assert!(has_aux);
        assert_eq!(narrow.num_nonempty(), 2);
        assert_eq!(narrow.get(50).unwrap().w, 2.0);
        assert_eq!(narrow.get(500).unwrap().w, 3.0);
    }

    #[test]
    fn test_load_empty_stream_defaults_to_aux() {
        let mut store = ShardStore::new(0, 100, small_config()).unwrap();
        let has_aux = store.load(&mut &[][..]).unwrap();
        assert!(has_aux);
        assert_eq!(store.num_nonempty(), 0);
    }

    #[test]
    fn test_mixed_aux_flags_rejected() {
        let mut with_aux = ShardStore::new(0, 100, small_config()).unwrap();
        with_aux.entry_mut(1).w = 1.0;
        let mut without_aux = ShardStore::new(0, 100, small_config()).unwrap();
        without_aux.entry_mut(2).w = 2.0;

        let mut buf = Vec::new();
        with_aux.save(true, &mut buf).unwrap();
        without_aux.save(false, &mut buf).unwrap();

        let mut store = ShardStore::new(0, 100, small_config()).unwrap();
        assert!(matches!(
            store.load(&mut &buf[..]),
            Err(StoreError::Format { .. })
        ));
    }

    #[test]
    fn test_truncated_stream_rejected() {
        let mut store = ShardStore::new(0, 100, small_config()).unwrap();
        store.entry_mut(1).w = 1.0;
        let mut buf = Vec::new();
        store.save(true, &mut buf).unwrap();
        buf.truncate(buf.len() - 3);

        let mut restored = ShardStore::new(0, 100, small_config()).unwrap();
        assert!(matches!(
            restored.load(&mut &buf[..]),
            Err(StoreError::Format { .. })
        ));
    }

    #[test]
    fn test_sparse_save_is_ascending() {
        let config = small_config().with_dense_threshold(1);
        let mut store = ShardStore::new(0, 1_000_000, config.clone()).unwrap();
        store.entry_mut(900).w = 1.0;
        store.entry_mut(3).w = 2.0;
        store.entry_mut(77).w = 3.0;

        let mut buf = Vec::new();
        store.save(true, &mut buf).unwrap();

        let mut ids = Vec::new();
        let mut cursor = &buf[..];
        while let Some(id) = serialization::try_read_id(&mut cursor).unwrap() {
            let len = serialization::read_len(&mut cursor).unwrap();
            serialization::skip_record(&mut cursor, len).unwrap();
            ids.push(id);
        }
        assert_eq!(ids, vec![3, 77, 900]);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard.bin");

        let mut store = ShardStore::new(0, 100, small_config()).unwrap();
        populate(&mut store);

        let mut file = std::fs::File::create(&path).unwrap();
        store.save(true, &mut file).unwrap();
        drop(file);

        let mut restored = ShardStore::new(0, 100, small_config()).unwrap();
        let mut file = std::fs::File::open(&path).unwrap();
        assert!(restored.load(&mut file).unwrap());
        assert_eq!(restored.num_nonempty(), 2);
    }
}
