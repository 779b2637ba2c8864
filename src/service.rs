//! Match service: the single entry point the web layer and the CLI use.
//!
//! Built once at startup from the persisted state, shared behind an `Arc`,
//! flushed on shutdown.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::config::MatchingConfig;
use crate::consistency::{Bindings, ConsistencyLayer, ReconcileReport};
use crate::errors::CoreError;
use crate::index::EmbeddingStore;
use crate::lifecycle::LifecycleManager;
use crate::matcher::{Match, Matcher};
use crate::report::{Report, ReportCreate, ReportId, ReportStatus, ReportView};
use crate::repository::ReportRepository;

pub const MAX_LIST_LIMIT: usize = 100;
pub const MAX_SEARCH_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub reports: usize,
    pub active: usize,
    pub resolved: usize,
    pub archived: usize,
    pub store_size: usize,
    pub live_vectors: usize,
    pub bindings: usize,
    /// Vector log records not yet folded into a snapshot
    pub pending_log_records: usize,
}

pub struct MatchService {
    config: MatchingConfig,
    repository: Arc<ReportRepository>,
    consistency: Arc<ConsistencyLayer>,
    lifecycle: LifecycleManager,
    matcher: Matcher,
    creations_since_checkpoint: AtomicUsize,
    last_reconcile: ReconcileReport,
}

impl MatchService {
    /// Load persisted state from `dir` and run startup recovery.
    pub fn open(config: &MatchingConfig, dir: &Path) -> Result<Self, CoreError> {
        let store = EmbeddingStore::open(dir, config)?;
        let repository = ReportRepository::open(dir, config.sync_writes)?;
        let bindings = Bindings::open(dir, config.sync_writes)?;

        Self::assemble(config, store, repository, bindings)
    }

    pub fn in_memory(config: &MatchingConfig) -> Result<Self, CoreError> {
        Self::assemble(
            config,
            EmbeddingStore::in_memory(config.dimension),
            ReportRepository::in_memory(),
            Bindings::in_memory(),
        )
    }

    fn assemble(
        config: &MatchingConfig,
        store: EmbeddingStore,
        repository: ReportRepository,
        bindings: Bindings,
    ) -> Result<Self, CoreError> {
        let repository = Arc::new(repository);
        let consistency = Arc::new(ConsistencyLayer::new(Arc::new(store), bindings));

        let last_reconcile = consistency.reconcile(&repository)?;

        Ok(Self {
            config: config.clone(),
            lifecycle: LifecycleManager::new(
                consistency.clone(),
                repository.clone(),
                config.dimension,
            ),
            matcher: Matcher::new(consistency.clone(), repository.clone(), config.dimension),
            repository,
            consistency,
            creations_since_checkpoint: AtomicUsize::new(0),
            last_reconcile,
        })
    }

    /// Repairs made by the recovery pass at startup.
    pub fn reconcile_report(&self) -> ReconcileReport {
        self.last_reconcile
    }

    pub fn create_report(
        &self,
        fields: ReportCreate,
        embedding: Vec<f32>,
        created_by: &str,
    ) -> Result<Report, CoreError> {
        let report = self.lifecycle.create(fields, embedding, created_by)?;

        let created = self.creations_since_checkpoint.fetch_add(1, Ordering::SeqCst) + 1;
        if created >= self.config.snapshot_interval
            && self
                .creations_since_checkpoint
                .compare_exchange(created, 0, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            // the report is already durable in the journals
            if let Err(err) = self.checkpoint() {
                log::error!("Checkpoint after {created} creations failed: {err}");
            }
        }

        Ok(report)
    }

    pub fn search(
        &self,
        query: &[f32],
        threshold: Option<f32>,
        limit: usize,
    ) -> Result<Vec<Match>, CoreError> {
        if limit > MAX_SEARCH_LIMIT {
            return Err(CoreError::Validation(format!(
                "limit must be at most {MAX_SEARCH_LIMIT}, got {limit}"
            )));
        }
        let threshold = threshold.unwrap_or(self.config.default_threshold);
        self.matcher.search(query, threshold, limit)
    }

    pub fn list_reports(
        &self,
        status: Option<ReportStatus>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ReportView>, CoreError> {
        if !(1..=MAX_LIST_LIMIT).contains(&limit) {
            return Err(CoreError::Validation(format!(
                "limit must be between 1 and {MAX_LIST_LIMIT}, got {limit}"
            )));
        }

        Ok(self
            .repository
            .list(status, offset, limit)?
            .iter()
            .map(ReportView::from)
            .collect())
    }

    pub fn get_report(&self, report_id: &ReportId) -> Result<Report, CoreError> {
        self.repository.get(report_id)
    }

    pub fn update_status(
        &self,
        report_id: &ReportId,
        status: ReportStatus,
    ) -> Result<Report, CoreError> {
        self.lifecycle.transition(report_id, status)
    }

    pub fn stats(&self) -> Result<Stats, CoreError> {
        let store = self.consistency.store();
        Ok(Stats {
            reports: self.repository.len()?,
            active: self.repository.count_by_status(ReportStatus::Active)?,
            resolved: self.repository.count_by_status(ReportStatus::Resolved)?,
            archived: self.repository.count_by_status(ReportStatus::Archived)?,
            store_size: store.size()?,
            live_vectors: store.live_len()?,
            bindings: self.consistency.bindings().len()?,
            pending_log_records: store.pending_records()?,
        })
    }

    /// Snapshot the vector store and compact both journals.
    pub fn checkpoint(&self) -> Result<(), CoreError> {
        self.consistency.store().snapshot()?;
        self.repository.compact()?;
        self.consistency.bindings().compact()?;
        log::info!("Checkpoint complete");
        Ok(())
    }

    pub fn shutdown(&self) -> Result<(), CoreError> {
        log::info!("Flushing state before shutdown");
        self.checkpoint()
    }
}
