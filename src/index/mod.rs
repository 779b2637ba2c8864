//! Embedding store for face vectors.
//!
//! # Architecture
//!
//! - `store`: In-memory vector table with brute-force Euclidean search
//! - `wal`: Append-only log of inserts and tombstones
//! - `snapshot`: Binary snapshot of the whole table (vectors.snap)
//!
//! Positions are assigned densely from 0 and never reused.

mod snapshot;
mod store;
mod wal;

pub use snapshot::VectorStorageError;
pub use store::{EmbeddingStore, IndexError};
