//! Consistency layer between the embedding store and the report repository.
//!
//! Positions and report ids are tied together by an explicit, journaled
//! binding table. A live position without a binding is either an in-flight
//! creation or garbage left by a crash; `reconcile` cleans up the latter at
//! startup.

mod bindings;
mod reconcile;

use std::sync::Arc;

pub use bindings::Bindings;
pub use reconcile::ReconcileReport;

use crate::errors::CoreError;
use crate::index::EmbeddingStore;
use crate::report::ReportId;

pub struct ConsistencyLayer {
    store: Arc<EmbeddingStore>,
    bindings: Bindings,
}

impl ConsistencyLayer {
    pub fn new(store: Arc<EmbeddingStore>, bindings: Bindings) -> Self {
        Self { store, bindings }
    }

    pub fn store(&self) -> &EmbeddingStore {
        &self.store
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// Bind a live position to a report.
    pub fn bind(&self, position: u64, report_id: &ReportId) -> Result<(), CoreError> {
        let size = self.store.size()? as u64;
        if position >= size {
            return Err(CoreError::Consistency(format!(
                "cannot bind position {position}: store holds {size} positions"
            )));
        }
        if self.store.is_tombstoned(position)? {
            return Err(CoreError::Consistency(format!(
                "cannot bind tombstoned position {position}"
            )));
        }

        self.bindings.bind(position, report_id)
    }

    pub fn resolve(&self, position: u64) -> Result<ReportId, CoreError> {
        self.bindings.resolve(position)
    }

    pub fn resolve_reverse(&self, report_id: &ReportId) -> Result<u64, CoreError> {
        self.bindings.resolve_reverse(report_id)
    }

    /// Tombstone `position` in the store and drop its binding, if any.
    pub fn tombstone(&self, position: u64) -> Result<Option<ReportId>, CoreError> {
        self.store.tombstone(position)?;
        self.bindings.release(position)
    }
}
