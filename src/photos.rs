use std::path::Path;

use crate::storage::{BackendLocal, StorageManager};

#[derive(Debug, thiserror::Error)]
pub enum PhotoStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persists normalised photos and hands back an opaque reference.
pub trait PhotoStore: Send + Sync {
    fn put(&self, data: &[u8]) -> Result<String, PhotoStoreError>;
    fn delete(&self, reference: &str) -> Result<(), PhotoStoreError>;
}

/// Photos kept as `<ulid>.jpg` files in one directory.
pub struct PhotoDirectory {
    backend: BackendLocal,
}

impl PhotoDirectory {
    pub fn new(dir: &Path) -> Result<Self, PhotoStoreError> {
        Ok(Self {
            backend: BackendLocal::new(dir)?,
        })
    }
}

impl PhotoStore for PhotoDirectory {
    fn put(&self, data: &[u8]) -> Result<String, PhotoStoreError> {
        let reference = format!("{}.jpg", rusty_ulid::generate_ulid_string());
        self.backend.write(&reference, data)?;
        Ok(reference)
    }

    fn delete(&self, reference: &str) -> Result<(), PhotoStoreError> {
        if !self.backend.exists(reference) {
            return Ok(());
        }
        self.backend.delete(reference)?;
        Ok(())
    }
}
