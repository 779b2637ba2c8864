//! Append-only vector log.
//!
//! File format: vectors.log
//!
//! Records (repeated):
//! - kind: u8 (1 = insert, 2 = tombstone)
//! - position: u64 (little-endian)
//! - embedding: [f32; dimensions] (little-endian, insert records only)
//! - checksum: u32 (CRC32 of the record bytes before checksum)
//!
//! The log only holds records written since the last snapshot; it is
//! truncated once a snapshot has been renamed into place.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use super::snapshot::VectorStorageError;
use crate::journal::AppendFile;

const KIND_INSERT: u8 = 1;
const KIND_TOMBSTONE: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Insert { position: u64, embedding: Vec<f32> },
    Tombstone { position: u64 },
}

pub struct VectorLog {
    path: PathBuf,
    file: AppendFile,
    dimensions: usize,
    sync_writes: bool,
}

impl VectorLog {
    /// Open (or create) the log and return the records it holds.
    pub fn open(
        path: PathBuf,
        dimensions: usize,
        sync_writes: bool,
    ) -> Result<(Self, Vec<LogRecord>), VectorStorageError> {
        let records = if path.exists() {
            Self::replay(&path, dimensions)?
        } else {
            Vec::new()
        };

        let file = AppendFile::open(&path)?;

        Ok((
            Self {
                path,
                file,
                dimensions,
                sync_writes,
            },
            records,
        ))
    }

    pub fn append_insert(&mut self, position: u64, embedding: &[f32]) -> Result<(), VectorStorageError> {
        if embedding.len() != self.dimensions {
            return Err(VectorStorageError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }

        let mut record = Vec::with_capacity(Self::record_len(KIND_INSERT, self.dimensions));
        record.push(KIND_INSERT);
        record.extend_from_slice(&position.to_le_bytes());
        for value in embedding {
            record.extend_from_slice(&value.to_le_bytes());
        }
        self.write_record(record)
    }

    pub fn append_tombstone(&mut self, position: u64) -> Result<(), VectorStorageError> {
        let mut record = Vec::with_capacity(Self::record_len(KIND_TOMBSTONE, self.dimensions));
        record.push(KIND_TOMBSTONE);
        record.extend_from_slice(&position.to_le_bytes());
        self.write_record(record)
    }

    /// Drop every record; called after a snapshot covering them is durable.
    pub fn truncate(&mut self) -> Result<(), VectorStorageError> {
        self.file.truncate()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_record(&mut self, mut record: Vec<u8>) -> Result<(), VectorStorageError> {
        let checksum = crc32fast::hash(&record);
        record.extend_from_slice(&checksum.to_le_bytes());

        self.file.append(&record, self.sync_writes)?;
        Ok(())
    }

    fn record_len(kind: u8, dimensions: usize) -> usize {
        let payload = if kind == KIND_INSERT { dimensions * 4 } else { 0 };
        1 + 8 + payload + 4
    }

    fn replay(path: &Path, dimensions: usize) -> Result<Vec<LogRecord>, VectorStorageError> {
        let data = std::fs::read(path)?;
        let mut records = Vec::new();
        let mut offset = 0usize;

        while offset < data.len() {
            let kind = data[offset];
            if kind != KIND_INSERT && kind != KIND_TOMBSTONE {
                return Err(VectorStorageError::Corrupt(format!(
                    "unknown record kind {kind} at offset {offset}"
                )));
            }

            let len = Self::record_len(kind, dimensions);
            let end = offset + len;
            if end > data.len() {
                Self::truncate_torn(path, offset, data.len() - offset)?;
                break;
            }

            let body = &data[offset..end - 4];
            let stored = u32::from_le_bytes([data[end - 4], data[end - 3], data[end - 2], data[end - 1]]);
            if stored != crc32fast::hash(body) {
                if end == data.len() {
                    Self::truncate_torn(path, offset, len)?;
                    break;
                }
                return Err(VectorStorageError::Corrupt(format!(
                    "checksum mismatch in record at offset {offset}"
                )));
            }

            let mut position_bytes = [0u8; 8];
            position_bytes.copy_from_slice(&body[1..9]);
            let position = u64::from_le_bytes(position_bytes);

            let record = if kind == KIND_INSERT {
                let embedding = body[9..]
                    .chunks_exact(4)
                    .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                    .collect();
                LogRecord::Insert {
                    position,
                    embedding,
                }
            } else {
                LogRecord::Tombstone { position }
            };

            records.push(record);
            offset = end;
        }

        Ok(records)
    }

    fn truncate_torn(path: &Path, offset: usize, torn_bytes: usize) -> Result<(), VectorStorageError> {
        log::warn!(
            "{}: dropping torn trailing record ({} bytes at offset {})",
            path.display(),
            torn_bytes,
            offset
        );
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(offset as u64)?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_append_and_replay() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.log");

        {
            let (mut log, records) = VectorLog::open(path.clone(), 2, true).unwrap();
            assert!(records.is_empty());
            log.append_insert(0, &[1.0, 2.0]).unwrap();
            log.append_insert(1, &[3.0, 4.0]).unwrap();
            log.append_tombstone(0).unwrap();
        }

        let (_, records) = VectorLog::open(path, 2, true).unwrap();
        assert_eq!(
            records,
            vec![
                LogRecord::Insert {
                    position: 0,
                    embedding: vec![1.0, 2.0]
                },
                LogRecord::Insert {
                    position: 1,
                    embedding: vec![3.0, 4.0]
                },
                LogRecord::Tombstone { position: 0 },
            ]
        );
    }

    #[test]
    fn test_failed_append_is_cut_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.log");

        {
            let (mut log, _) = VectorLog::open(path.clone(), 2, false).unwrap();
            log.append_insert(0, &[1.0, 2.0]).unwrap();

            let record = vec![KIND_INSERT; VectorLog::record_len(KIND_INSERT, 2)];
            let result = log.file.append_with(&record, false, |file, record| {
                file.write_all(&record[..5])?;
                Err(std::io::Error::other("disk full"))
            });
            assert!(result.is_err());

            log.append_insert(1, &[3.0, 4.0]).unwrap();
        }

        let (_, records) = VectorLog::open(path, 2, false).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(
            records[1],
            LogRecord::Insert {
                position: 1,
                embedding: vec![3.0, 4.0]
            }
        );
    }

    #[test]
    fn test_torn_tail_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.log");

        {
            let (mut log, _) = VectorLog::open(path.clone(), 2, false).unwrap();
            log.append_insert(0, &[1.0, 2.0]).unwrap();
            log.append_insert(1, &[3.0, 4.0]).unwrap();
        }

        // simulate a crash half-way through the second record
        let full_len = std::fs::metadata(&path).unwrap().len();
        let record_len = VectorLog::record_len(KIND_INSERT, 2) as u64;
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - record_len / 2).unwrap();
        drop(file);

        let (_, records) = VectorLog::open(path.clone(), 2, false).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), record_len);
    }

    #[test]
    fn test_corruption_before_tail_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.log");

        {
            let (mut log, _) = VectorLog::open(path.clone(), 2, false).unwrap();
            log.append_insert(0, &[1.0, 2.0]).unwrap();
            log.append_insert(1, &[3.0, 4.0]).unwrap();
        }

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[10] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let result = VectorLog::open(path, 2, false);
        assert!(matches!(result, Err(VectorStorageError::Corrupt(_))));
    }

    #[test]
    fn test_truncate_empties_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.log");

        let (mut log, _) = VectorLog::open(path.clone(), 2, false).unwrap();
        log.append_insert(0, &[1.0, 2.0]).unwrap();
        log.truncate().unwrap();
        log.append_insert(1, &[5.0, 6.0]).unwrap();
        drop(log);

        let (_, records) = VectorLog::open(path, 2, false).unwrap();
        assert_eq!(
            records,
            vec![LogRecord::Insert {
                position: 1,
                embedding: vec![5.0, 6.0]
            }]
        );
    }
}
