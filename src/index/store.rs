use std::path::Path;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use rayon::prelude::*;

use super::snapshot::{model_id_hash, SnapshotFile, VectorStorageError};
use super::wal::{LogRecord, VectorLog};
use crate::config::MatchingConfig;

const SNAPSHOT_FILE_NAME: &str = "vectors.snap";
const LOG_FILE_NAME: &str = "vectors.log";

/// Flat, append-only table of vectors; position = row index.
#[derive(Debug, Clone)]
pub struct VectorTable {
    dimensions: usize,
    data: Vec<f32>,
    tombstones: Vec<bool>,
}

impl VectorTable {
    pub fn new(dimensions: usize) -> Self {
        Self::with_capacity(dimensions, 0)
    }

    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            dimensions,
            data: Vec::with_capacity(dimensions * capacity),
            tombstones: Vec::with_capacity(capacity),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.tombstones.len()
    }

    pub fn push(&mut self, embedding: &[f32]) {
        debug_assert_eq!(embedding.len(), self.dimensions);
        self.data.extend_from_slice(embedding);
        self.tombstones.push(false);
    }

    pub fn vector(&self, position: usize) -> &[f32] {
        let start = position * self.dimensions;
        &self.data[start..start + self.dimensions]
    }

    pub fn tombstone(&mut self, position: usize) {
        self.tombstones[position] = true;
    }

    pub fn is_tombstoned(&self, position: usize) -> bool {
        self.tombstones[position]
    }

    fn live_len(&self) -> usize {
        self.tombstones.iter().filter(|t| !**t).count()
    }

    fn apply(&mut self, record: LogRecord) -> Result<(), VectorStorageError> {
        match record {
            LogRecord::Insert {
                position,
                embedding,
            } => {
                let len = self.len() as u64;
                if position < len {
                    // already covered by the snapshot
                    return Ok(());
                }
                if position > len {
                    return Err(VectorStorageError::Corrupt(format!(
                        "insert at position {position} leaves a gap after {len} entries"
                    )));
                }
                self.push(&embedding);
            }
            LogRecord::Tombstone { position } => {
                if position >= self.len() as u64 {
                    return Err(VectorStorageError::Corrupt(format!(
                        "tombstone for unknown position {position}"
                    )));
                }
                self.tombstone(position as usize);
            }
        }
        Ok(())
    }
}

/// A nearest-neighbour hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: u64,
    /// Squared Euclidean distance to the query
    pub distance: f32,
}

/// Errors that can occur during embedding store operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Embedding contains NaN or infinite values")]
    NonFinite,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("Vector table lock poisoned")]
    Poisoned,
}

struct Persistence {
    log: VectorLog,
    snapshot: SnapshotFile,
    model_id: [u8; 32],
    since_snapshot: usize,
}

/// Append-only embedding store with brute-force nearest-neighbour search.
///
/// Writers (insert, tombstone, snapshot) are serialised by `writer`, which
/// also owns the on-disk log. Readers only take the table read lock, so a
/// search waits at most for a single row to be published.
pub struct EmbeddingStore {
    dimensions: usize,
    table: RwLock<VectorTable>,
    writer: Mutex<Option<Persistence>>,
}

impl EmbeddingStore {
    /// Create a store that lives only in memory.
    pub fn in_memory(dimensions: usize) -> Self {
        Self {
            dimensions,
            table: RwLock::new(VectorTable::new(dimensions)),
            writer: Mutex::new(None),
        }
    }

    /// Load the store from `dir`: snapshot first, then every log record
    /// written after it.
    pub fn open(dir: &Path, config: &MatchingConfig) -> Result<Self, IndexError> {
        let dimensions = config.dimension;
        let model_id = model_id_hash(&config.model);

        let snapshot = SnapshotFile::new(dir.join(SNAPSHOT_FILE_NAME));
        let mut table = if snapshot.exists() {
            snapshot.load(&model_id, dimensions)?
        } else {
            VectorTable::new(dimensions)
        };
        let from_snapshot = table.len();

        let (log, records) = VectorLog::open(dir.join(LOG_FILE_NAME), dimensions, config.sync_writes)?;
        let replayed = records.len();
        for record in records {
            table.apply(record)?;
        }

        log::info!(
            "Loaded {} vectors ({} from snapshot, {} log records from {})",
            table.len(),
            from_snapshot,
            replayed,
            log.path().display()
        );

        Ok(Self {
            dimensions,
            table: RwLock::new(table),
            writer: Mutex::new(Some(Persistence {
                log,
                snapshot,
                model_id,
                since_snapshot: replayed,
            })),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Number of positions ever assigned, tombstoned ones included.
    pub fn size(&self) -> Result<usize, IndexError> {
        Ok(self.read()?.len())
    }

    pub fn live_len(&self) -> Result<usize, IndexError> {
        Ok(self.read()?.live_len())
    }

    /// Append `embedding` and return its position.
    pub fn insert(&self, embedding: &[f32]) -> Result<u64, IndexError> {
        self.check_vector(embedding)?;

        let mut writer = self.writer.lock().map_err(|_| IndexError::Poisoned)?;
        let position = self.read()?.len() as u64;

        if let Some(persistence) = writer.as_mut() {
            persistence.log.append_insert(position, embedding)?;
            persistence.since_snapshot += 1;
        }
        self.write()?.push(embedding);

        Ok(position)
    }

    /// Mark `position` invalid. Returns `false` if it already was.
    pub fn tombstone(&self, position: u64) -> Result<bool, IndexError> {
        let mut writer = self.writer.lock().map_err(|_| IndexError::Poisoned)?;

        {
            let table = self.read()?;
            if position >= table.len() as u64 {
                return Err(IndexError::InvalidArgument(format!(
                    "position {position} is beyond the store size {}",
                    table.len()
                )));
            }
            if table.is_tombstoned(position as usize) {
                return Ok(false);
            }
        }

        if let Some(persistence) = writer.as_mut() {
            persistence.log.append_tombstone(position)?;
            persistence.since_snapshot += 1;
        }
        self.write()?.tombstone(position as usize);

        Ok(true)
    }

    pub fn is_tombstoned(&self, position: u64) -> Result<bool, IndexError> {
        let table = self.read()?;
        Ok(position < table.len() as u64 && table.is_tombstoned(position as usize))
    }

    /// Copy of the vector stored at `position`, if any.
    pub fn vector(&self, position: u64) -> Result<Option<Vec<f32>>, IndexError> {
        let table = self.read()?;
        if position >= table.len() as u64 {
            return Ok(None);
        }
        Ok(Some(table.vector(position as usize).to_vec()))
    }

    /// Live positions in ascending order.
    pub fn live_positions(&self) -> Result<Vec<u64>, IndexError> {
        let table = self.read()?;
        Ok((0..table.len())
            .filter(|p| !table.is_tombstoned(*p))
            .map(|p| p as u64)
            .collect())
    }

    /// Up to `k` live entries nearest to `query`, ascending by squared
    /// Euclidean distance, ties broken by lower position.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if k == 0 {
            return Err(IndexError::InvalidArgument("k must be at least 1".to_string()));
        }
        if query.len() != self.dimensions {
            return Err(IndexError::InvalidArgument(format!(
                "query has {} dimensions, store has {}",
                query.len(),
                self.dimensions
            )));
        }

        let table = self.read()?;
        let mut hits: Vec<Neighbor> = (0..table.len())
            .into_par_iter()
            .filter(|p| !table.is_tombstoned(*p))
            .map(|p| Neighbor {
                position: p as u64,
                distance: squared_l2(query, table.vector(p)),
            })
            .collect();
        drop(table);

        hits.sort_unstable_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.position.cmp(&b.position))
        });
        hits.truncate(k);

        Ok(hits)
    }

    /// Number of log records written since the last snapshot.
    pub fn pending_records(&self) -> Result<usize, IndexError> {
        let writer = self.writer.lock().map_err(|_| IndexError::Poisoned)?;
        Ok(writer.as_ref().map(|p| p.since_snapshot).unwrap_or(0))
    }

    /// Write a snapshot of the whole table and truncate the log.
    pub fn snapshot(&self) -> Result<(), IndexError> {
        let mut writer = self.writer.lock().map_err(|_| IndexError::Poisoned)?;
        let Some(persistence) = writer.as_mut() else {
            return Ok(());
        };

        {
            let table = self.read()?;
            persistence.snapshot.save(&table, &persistence.model_id)?;
            log::info!("Wrote snapshot of {} vectors", table.len());
        }
        persistence.log.truncate()?;
        persistence.since_snapshot = 0;

        Ok(())
    }

    fn check_vector(&self, embedding: &[f32]) -> Result<(), IndexError> {
        if embedding.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(IndexError::NonFinite);
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, VectorTable>, IndexError> {
        self.table.read().map_err(|_| IndexError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, VectorTable>, IndexError> {
        self.table.write().map_err(|_| IndexError::Poisoned)
    }
}

pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dimension: usize) -> MatchingConfig {
        MatchingConfig {
            dimension,
            sync_writes: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_assigns_sequential_positions() {
        let store = EmbeddingStore::in_memory(3);
        assert_eq!(store.insert(&[1.0, 0.0, 0.0]).unwrap(), 0);
        assert_eq!(store.insert(&[0.0, 1.0, 0.0]).unwrap(), 1);
        assert_eq!(store.size().unwrap(), 2);
    }

    #[test]
    fn test_insert_dimension_mismatch_leaves_store_untouched() {
        let store = EmbeddingStore::in_memory(3);
        store.insert(&[1.0, 0.0, 0.0]).unwrap();

        let result = store.insert(&[1.0, 0.0, 0.0, 0.0]);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch {
                expected: 3,
                got: 4
            })
        ));
        assert_eq!(store.size().unwrap(), 1);
        assert_eq!(store.insert(&[0.0, 0.0, 1.0]).unwrap(), 1);
    }

    #[test]
    fn test_insert_rejects_nan() {
        let store = EmbeddingStore::in_memory(2);
        assert!(matches!(
            store.insert(&[f32::NAN, 0.0]),
            Err(IndexError::NonFinite)
        ));
        assert_eq!(store.size().unwrap(), 0);
    }

    #[test]
    fn test_search_orders_by_distance_then_position() {
        let store = EmbeddingStore::in_memory(2);
        store.insert(&[3.0, 0.0]).unwrap(); // 0: distance 9
        store.insert(&[1.0, 0.0]).unwrap(); // 1: distance 1
        store.insert(&[0.0, 1.0]).unwrap(); // 2: distance 1
        store.insert(&[0.0, 0.0]).unwrap(); // 3: distance 0

        let hits = store.search(&[0.0, 0.0], 10).unwrap();
        let positions: Vec<u64> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![3, 1, 2, 0]);
        assert_eq!(hits[0].distance, 0.0);
        assert_eq!(hits[1].distance, 1.0);
        assert_eq!(hits[3].distance, 9.0);
    }

    #[test]
    fn test_search_returns_at_most_k_sorted() {
        let store = EmbeddingStore::in_memory(2);
        for i in 0..50 {
            let x = (i * 7 % 13) as f32;
            store.insert(&[x, -x / 2.0]).unwrap();
        }

        for k in [1, 3, 10, 50, 100] {
            let hits = store.search(&[1.5, 0.0], k).unwrap();
            assert!(hits.len() <= k);
            assert_eq!(hits.len(), k.min(50));
            assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
        }
    }

    #[test]
    fn test_search_validates_arguments() {
        let store = EmbeddingStore::in_memory(2);
        store.insert(&[0.0, 0.0]).unwrap();

        assert!(matches!(
            store.search(&[0.0, 0.0], 0),
            Err(IndexError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.search(&[0.0, 0.0, 0.0], 1),
            Err(IndexError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_store_search_is_empty() {
        let store = EmbeddingStore::in_memory(4);
        assert!(store.search(&[0.0; 4], 5).unwrap().is_empty());
    }

    #[test]
    fn test_tombstoned_positions_are_skipped() {
        let store = EmbeddingStore::in_memory(2);
        store.insert(&[0.0, 0.0]).unwrap();
        store.insert(&[1.0, 1.0]).unwrap();

        assert!(store.tombstone(0).unwrap());
        assert!(!store.tombstone(0).unwrap());
        assert!(store.is_tombstoned(0).unwrap());

        let hits = store.search(&[0.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].position, 1);
        assert_eq!(store.size().unwrap(), 2);
        assert_eq!(store.live_len().unwrap(), 1);
        assert_eq!(store.live_positions().unwrap(), vec![1]);
    }

    #[test]
    fn test_tombstone_unknown_position_fails() {
        let store = EmbeddingStore::in_memory(2);
        assert!(matches!(
            store.tombstone(3),
            Err(IndexError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reopen_replays_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(2);

        {
            let store = EmbeddingStore::open(dir.path(), &config).unwrap();
            store.insert(&[1.0, 2.0]).unwrap();
            store.insert(&[3.0, 4.0]).unwrap();
            store.tombstone(0).unwrap();
        }

        let store = EmbeddingStore::open(dir.path(), &config).unwrap();
        assert_eq!(store.size().unwrap(), 2);
        assert!(store.is_tombstoned(0).unwrap());
        assert_eq!(store.vector(1).unwrap(), Some(vec![3.0, 4.0]));
        assert_eq!(store.pending_records().unwrap(), 3);
        assert_eq!(store.insert(&[5.0, 6.0]).unwrap(), 2);
    }

    #[test]
    fn test_reopen_from_snapshot_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(2);

        {
            let store = EmbeddingStore::open(dir.path(), &config).unwrap();
            store.insert(&[1.0, 2.0]).unwrap();
            store.insert(&[3.0, 4.0]).unwrap();
            store.snapshot().unwrap();
            assert_eq!(store.pending_records().unwrap(), 0);

            store.insert(&[5.0, 6.0]).unwrap();
            store.tombstone(1).unwrap();
        }

        let store = EmbeddingStore::open(dir.path(), &config).unwrap();
        assert_eq!(store.size().unwrap(), 3);
        assert!(store.is_tombstoned(1).unwrap());
        assert_eq!(store.vector(2).unwrap(), Some(vec![5.0, 6.0]));
        assert_eq!(store.pending_records().unwrap(), 2);
    }

    #[test]
    fn test_log_records_already_in_snapshot_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(2);

        {
            let store = EmbeddingStore::open(dir.path(), &config).unwrap();
            store.insert(&[1.0, 2.0]).unwrap();
        }

        // snapshot written but the log was never truncated
        {
            let store = EmbeddingStore::open(dir.path(), &config).unwrap();
            let table = store.read().unwrap().clone();
            SnapshotFile::new(dir.path().join(SNAPSHOT_FILE_NAME))
                .save(&table, &model_id_hash(&config.model))
                .unwrap();
        }

        let store = EmbeddingStore::open(dir.path(), &config).unwrap();
        assert_eq!(store.size().unwrap(), 1);
    }

    #[test]
    fn test_corrupt_snapshot_halts_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(2);

        {
            let store = EmbeddingStore::open(dir.path(), &config).unwrap();
            store.insert(&[1.0, 2.0]).unwrap();
            store.snapshot().unwrap();
        }

        let path = dir.path().join(SNAPSHOT_FILE_NAME);
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 6;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let result = EmbeddingStore::open(dir.path(), &config);
        assert!(matches!(
            result,
            Err(IndexError::Storage(VectorStorageError::ChecksumMismatch(_)))
        ));
    }
}
