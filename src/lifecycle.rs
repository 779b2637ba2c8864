//! Report creation and status transitions.
//!
//! Creation is a three-step sequence (insert vector, insert report, bind)
//! run under one writer mutex. A failure after the vector is in the store
//! rolls back what was done so far; nothing is left bound to a report that
//! does not exist.

use std::sync::{Arc, Mutex};

use crate::consistency::ConsistencyLayer;
use crate::errors::CoreError;
use crate::report::{Report, ReportCreate, ReportId, ReportStatus};
use crate::repository::ReportRepository;

pub struct LifecycleManager {
    consistency: Arc<ConsistencyLayer>,
    repository: Arc<ReportRepository>,
    dimensions: usize,
    writer: Mutex<()>,
}

impl LifecycleManager {
    pub fn new(
        consistency: Arc<ConsistencyLayer>,
        repository: Arc<ReportRepository>,
        dimensions: usize,
    ) -> Self {
        Self {
            consistency,
            repository,
            dimensions,
            writer: Mutex::new(()),
        }
    }

    pub fn create(
        &self,
        fields: ReportCreate,
        embedding: Vec<f32>,
        created_by: &str,
    ) -> Result<Report, CoreError> {
        if embedding.len() != self.dimensions {
            return Err(CoreError::DimensionMismatch {
                expected: self.dimensions,
                got: embedding.len(),
            });
        }
        if embedding.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::Validation(
                "embedding contains NaN or infinite values".to_string(),
            ));
        }
        let fields = fields.validate()?;
        let created_by = created_by.trim();
        if created_by.is_empty() {
            return Err(CoreError::Validation("created_by must not be empty".to_string()));
        }

        let _writer = self.writer.lock().map_err(CoreError::poisoned)?;

        let position = self.consistency.store().insert(&embedding)?;

        let report = Report {
            report_id: ReportId::new(),
            name: fields.name,
            age: fields.age,
            last_seen: fields.last_seen,
            datetime_last_seen: fields.datetime_last_seen,
            photo_reference: fields.photo_reference,
            embedding,
            status: ReportStatus::Active,
            appearance: fields.appearance,
            details: fields.details,
            created_by: created_by.to_string(),
            created_at: match self.repository.next_created_at() {
                Ok(created_at) => created_at,
                Err(err) => {
                    self.abandon(position, None);
                    return Err(err);
                }
            },
        };

        if let Err(err) = self.repository.insert(report.clone()) {
            self.abandon(position, None);
            return Err(err);
        }

        if let Err(err) = self.consistency.bind(position, &report.report_id) {
            self.abandon(position, Some(&report.report_id));
            return Err(err);
        }

        log::info!(
            "Created report {} at position {} by {}",
            report.report_id,
            position,
            report.created_by
        );

        Ok(report)
    }

    pub fn transition(&self, report_id: &ReportId, next: ReportStatus) -> Result<Report, CoreError> {
        let report = self.repository.update_status(report_id, next)?;
        log::info!("Report {} is now {}", report_id, report.status);
        Ok(report)
    }

    /// Roll back a creation that failed after its vector was appended.
    ///
    /// Errors are logged rather than returned; whatever is left over is
    /// repaired by the next reconciliation.
    fn abandon(&self, position: u64, report_id: Option<&ReportId>) {
        if let Err(err) = self.consistency.tombstone(position) {
            log::error!("Failed to tombstone abandoned position {position}: {err}");
        }

        if let Some(report_id) = report_id {
            if let Err(err) = self.repository.retract(report_id) {
                log::error!("Failed to retract abandoned report {report_id}: {err}");
            }
        }

        log::warn!("Rolled back creation at position {position}");
    }
}
