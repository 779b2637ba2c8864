use crate::embedder::EmbedError;
use crate::index::{IndexError, VectorStorageError};
use crate::journal::JournalError;
use crate::photos::PhotoStoreError;
use crate::report::{ReportId, ReportStatus};

/// Coarse error classes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InvalidTransition,
    Consistency,
    Dependency,
    Storage,
}

#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("report {0} not found")]
    ReportNotFound(ReportId),

    #[error("position {0} is not bound to a report")]
    Unbound(u64),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cannot move report from {from} to {to}")]
    InvalidTransition {
        from: ReportStatus,
        to: ReportStatus,
    },

    #[error("consistency violation: {0}")]
    Consistency(String),

    #[error("dependency failure: {0}")]
    Dependency(String),

    #[error("persisted state is corrupt: {0}")]
    Corrupt(String),

    #[error("vector storage error: {0}")]
    VectorStorage(#[from] VectorStorageError),

    #[error("journal error: {0}")]
    Journal(#[from] JournalError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) | CoreError::DimensionMismatch { .. } => ErrorKind::Validation,
            CoreError::ReportNotFound(_) | CoreError::Unbound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            CoreError::Consistency(_) => ErrorKind::Consistency,
            CoreError::Dependency(_) => ErrorKind::Dependency,
            CoreError::Corrupt(_)
            | CoreError::VectorStorage(_)
            | CoreError::Journal(_)
            | CoreError::Internal(_) => ErrorKind::Storage,
        }
    }

    pub(crate) fn poisoned<E: std::fmt::Display>(err: E) -> Self {
        CoreError::Internal(format!("lock poisoned: {err}"))
    }
}

impl From<IndexError> for CoreError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::DimensionMismatch { expected, got } => {
                CoreError::DimensionMismatch { expected, got }
            }
            IndexError::NonFinite => {
                CoreError::Validation("embedding contains NaN or infinite values".to_string())
            }
            IndexError::InvalidArgument(msg) => CoreError::Validation(msg),
            IndexError::Storage(err) => CoreError::VectorStorage(err),
            IndexError::Poisoned => CoreError::Internal("vector table lock poisoned".to_string()),
        }
    }
}

impl From<EmbedError> for CoreError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::NoFaceDetected => {
                CoreError::Validation("no face detected in image".to_string())
            }
            other => CoreError::Dependency(format!("embedder: {other}")),
        }
    }
}

impl From<PhotoStoreError> for CoreError {
    fn from(err: PhotoStoreError) -> Self {
        CoreError::Dependency(format!("photo store: {err}"))
    }
}
