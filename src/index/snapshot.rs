//! Binary snapshot of the vector table.
//!
//! File format: vectors.snap
//!
//! Header (47 bytes):
//! - version: u8 (1)
//! - model_id: [u8; 32] (SHA256 hash of the embedder model name)
//! - dimensions: u16 (little-endian)
//! - entry_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Entries (repeated, position = entry index):
//! - tombstoned: u8 (0 or 1)
//! - embedding: [f32; dimensions] (little-endian)
//!
//! Trailer:
//! - body_checksum: u32 (CRC32 of all entry bytes)

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use super::store::VectorTable;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// Header size in bytes: version(1) + model_id(32) + dimensions(2) + entry_count(8) + checksum(4)
const HEADER_SIZE: usize = 47;

/// Errors that can occur while reading or writing persisted vectors.
#[derive(Debug, thiserror::Error)]
pub enum VectorStorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Model mismatch: file was written for a different embedder model")]
    ModelMismatch,

    #[error("Checksum mismatch: {0} may be corrupted")]
    ChecksumMismatch(PathBuf),

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Corrupt vector log: {0}")]
    Corrupt(String),
}

/// Compute SHA256 hash of the model name for storage identification.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}

pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(
        &self,
        expected_model_id: &[u8; 32],
        expected_dimensions: usize,
    ) -> Result<VectorTable, VectorStorageError> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);

        let header = self.read_header(&mut reader)?;
        if header.model_id != *expected_model_id {
            return Err(VectorStorageError::ModelMismatch);
        }
        if header.dimensions as usize != expected_dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: expected_dimensions,
                got: header.dimensions as usize,
            });
        }

        let dimensions = expected_dimensions;
        let mut table = VectorTable::with_capacity(dimensions, header.entry_count as usize);
        let mut hasher = crc32fast::Hasher::new();
        let mut entry_bytes = vec![0u8; 1 + dimensions * 4];
        let mut embedding = Vec::with_capacity(dimensions);

        for _ in 0..header.entry_count {
            reader.read_exact(&mut entry_bytes)?;
            hasher.update(&entry_bytes);

            let tombstoned = match entry_bytes[0] {
                0 => false,
                1 => true,
                flag => {
                    return Err(VectorStorageError::InvalidFormat(format!(
                        "unknown tombstone flag {flag}"
                    )))
                }
            };

            embedding.clear();
            embedding.extend(
                entry_bytes[1..]
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            );
            table.push(&embedding);
            if tombstoned {
                table.tombstone(table.len() - 1);
            }
        }

        let mut trailer = [0u8; 4];
        reader.read_exact(&mut trailer)?;
        if u32::from_le_bytes(trailer) != hasher.finalize() {
            return Err(VectorStorageError::ChecksumMismatch(self.path.clone()));
        }

        Ok(table)
    }

    /// Save the table.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn save(&self, table: &VectorTable, model_id: &[u8; 32]) -> Result<(), VectorStorageError> {
        let temp_path = self.path.with_extension("tmp");

        let result = self.write_to_file(&temp_path, table, model_id);
        if result.is_err() {
            let _ = std::fs::remove_file(&temp_path);
            return result;
        }

        std::fs::rename(&temp_path, &self.path)?;
        sync_parent(&self.path)?;

        Ok(())
    }

    fn write_to_file(
        &self,
        path: &Path,
        table: &VectorTable,
        model_id: &[u8; 32],
    ) -> Result<(), VectorStorageError> {
        let dimensions = u16::try_from(table.dimensions()).map_err(|_| {
            VectorStorageError::InvalidFormat(format!(
                "{} dimensions do not fit the snapshot header",
                table.dimensions()
            ))
        })?;

        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let mut header_bytes = [0u8; HEADER_SIZE];
        header_bytes[0] = FORMAT_VERSION;
        header_bytes[1..33].copy_from_slice(model_id);
        header_bytes[33..35].copy_from_slice(&dimensions.to_le_bytes());
        header_bytes[35..43].copy_from_slice(&(table.len() as u64).to_le_bytes());
        let checksum = crc32fast::hash(&header_bytes[0..43]);
        header_bytes[43..47].copy_from_slice(&checksum.to_le_bytes());
        writer.write_all(&header_bytes)?;

        let mut hasher = crc32fast::Hasher::new();
        let mut entry_bytes = Vec::with_capacity(1 + table.dimensions() * 4);
        for position in 0..table.len() {
            entry_bytes.clear();
            entry_bytes.push(table.is_tombstoned(position) as u8);
            for value in table.vector(position) {
                entry_bytes.extend_from_slice(&value.to_le_bytes());
            }
            hasher.update(&entry_bytes);
            writer.write_all(&entry_bytes)?;
        }
        writer.write_all(&hasher.finalize().to_le_bytes())?;

        writer.flush()?;
        let file = writer
            .into_inner()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        file.sync_all()?;

        Ok(())
    }

    fn read_header(&self, reader: &mut BufReader<File>) -> Result<Header, VectorStorageError> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_bytes)?;

        let version = header_bytes[0];
        if version > FORMAT_VERSION {
            return Err(VectorStorageError::VersionMismatch(version, FORMAT_VERSION));
        }

        let stored_checksum = u32::from_le_bytes([
            header_bytes[43],
            header_bytes[44],
            header_bytes[45],
            header_bytes[46],
        ]);
        if stored_checksum != crc32fast::hash(&header_bytes[0..43]) {
            return Err(VectorStorageError::ChecksumMismatch(self.path.clone()));
        }

        let mut model_id = [0u8; 32];
        model_id.copy_from_slice(&header_bytes[1..33]);

        let dimensions = u16::from_le_bytes([header_bytes[33], header_bytes[34]]);
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header_bytes[35..43]);

        Ok(Header {
            model_id,
            dimensions,
            entry_count: u64::from_le_bytes(count_bytes),
        })
    }
}

#[derive(Debug)]
struct Header {
    model_id: [u8; 32],
    dimensions: u16,
    entry_count: u64,
}

fn sync_parent(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        if let Some(parent) = path.parent() {
            File::open(parent)?.sync_all()?;
        }
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> [u8; 32] {
        model_id_hash("Facenet")
    }

    fn sample_table() -> VectorTable {
        let mut table = VectorTable::new(3);
        table.push(&[1.0, 0.0, 0.0]);
        table.push(&[0.0, 1.0, 0.0]);
        table.push(&[0.0, 0.0, -2.5]);
        table.tombstone(1);
        table
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("vectors.snap"));

        snapshot.save(&sample_table(), &model()).unwrap();
        assert!(snapshot.exists());

        let loaded = snapshot.load(&model(), 3).unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.vector(2), &[0.0, 0.0, -2.5]);
        assert!(loaded.is_tombstoned(1));
        assert!(!loaded.is_tombstoned(0));
    }

    #[test]
    fn test_model_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("vectors.snap"));
        snapshot.save(&sample_table(), &model()).unwrap();

        let result = snapshot.load(&model_id_hash("ArcFace"), 3);
        assert!(matches!(result, Err(VectorStorageError::ModelMismatch)));
    }

    #[test]
    fn test_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = SnapshotFile::new(dir.path().join("vectors.snap"));
        snapshot.save(&sample_table(), &model()).unwrap();

        let result = snapshot.load(&model(), 128);
        assert!(matches!(
            result,
            Err(VectorStorageError::DimensionMismatch {
                expected: 128,
                got: 3
            })
        ));
    }

    #[test]
    fn test_body_checksum_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.snap");
        let snapshot = SnapshotFile::new(path.clone());
        snapshot.save(&sample_table(), &model()).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[HEADER_SIZE + 3] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let result = snapshot.load(&model(), 3);
        assert!(matches!(result, Err(VectorStorageError::ChecksumMismatch(_))));
    }

    #[test]
    fn test_failed_save_cleans_up() {
        let path = PathBuf::from("/nonexistent/directory/vectors.snap");
        let snapshot = SnapshotFile::new(path.clone());

        assert!(snapshot.save(&sample_table(), &model()).is_err());
        assert!(!path.with_extension("tmp").exists());
    }
}
