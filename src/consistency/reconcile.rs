use serde::Serialize;

use super::ConsistencyLayer;
use crate::errors::CoreError;
use crate::report::Report;
use crate::repository::ReportRepository;

/// Repairs performed by a reconciliation pass, one counter per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub released_out_of_range: usize,
    pub tombstoned_missing_report: usize,
    pub released_tombstoned: usize,
    pub tombstoned_mismatched: usize,
    pub tombstoned_unbound: usize,
    pub reindexed_reports: usize,
}

impl ReconcileReport {
    pub fn repairs(&self) -> usize {
        self.released_out_of_range
            + self.tombstoned_missing_report
            + self.released_tombstoned
            + self.tombstoned_mismatched
            + self.tombstoned_unbound
            + self.reindexed_reports
    }

    pub fn is_clean(&self) -> bool {
        self.repairs() == 0
    }
}

fn violation(message: String) {
    log::warn!("{}", CoreError::Consistency(message));
}

fn same_embedding(stored: &[f32], expected: &[f32]) -> bool {
    stored.len() == expected.len()
        && stored
            .iter()
            .zip(expected)
            .all(|(a, b)| (a - b).abs() <= f32::EPSILON * a.abs().max(1.0))
}

impl ConsistencyLayer {
    /// Bring store, bindings and repository back into agreement.
    ///
    /// Must run before any writer is started; it assumes nothing else
    /// mutates the three structures while it works.
    pub fn reconcile(&self, repository: &ReportRepository) -> Result<ReconcileReport, CoreError> {
        let mut report = ReconcileReport::default();
        let size = self.store.size()? as u64;

        for (position, report_id) in self.bindings.entries()? {
            if position >= size {
                violation(format!(
                    "binding {position} -> {report_id} points past the end of the store ({size})"
                ));
                self.bindings.release(position)?;
                report.released_out_of_range += 1;
                continue;
            }

            let stored_report = match repository.get(&report_id) {
                Ok(stored) => stored,
                Err(CoreError::ReportNotFound(_)) => {
                    violation(format!(
                        "position {position} is bound to missing report {report_id}"
                    ));
                    self.tombstone(position)?;
                    report.tombstoned_missing_report += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };

            if self.store.is_tombstoned(position)? {
                violation(format!(
                    "report {report_id} is bound to tombstoned position {position}"
                ));
                self.bindings.release(position)?;
                report.released_tombstoned += 1;
                continue;
            }

            let matches = self
                .store
                .vector(position)?
                .is_some_and(|stored| same_embedding(&stored, &stored_report.embedding));
            if !matches {
                violation(format!(
                    "vector at position {position} differs from the embedding of report {report_id}"
                ));
                self.tombstone(position)?;
                report.tombstoned_mismatched += 1;
            }
        }

        for position in self.store.live_positions()? {
            if !self.bindings.is_bound(position)? {
                violation(format!("live position {position} has no binding"));
                self.store.tombstone(position)?;
                report.tombstoned_unbound += 1;
            }
        }

        for report_id in repository.ids()? {
            if self.bindings.resolve_reverse(&report_id).is_ok() {
                continue;
            }
            let stored = repository.get(&report_id)?;
            violation(format!("report {report_id} has no indexed embedding"));
            self.reindex(&stored)?;
            report.reindexed_reports += 1;
        }

        if report.is_clean() {
            log::info!("Consistency check passed");
        } else {
            log::warn!("Consistency check repaired {} problems: {:?}", report.repairs(), report);
        }

        Ok(report)
    }

    fn reindex(&self, report: &Report) -> Result<(), CoreError> {
        let dimensions = self.store.dimensions();
        if report.embedding.len() != dimensions {
            return Err(CoreError::Corrupt(format!(
                "report {} has a {}-dimensional embedding, store expects {dimensions}",
                report.report_id,
                report.embedding.len()
            )));
        }

        let position = self.store.insert(&report.embedding)?;
        self.bind(position, &report.report_id)
    }
}
