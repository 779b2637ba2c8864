use std::cmp::Ordering;
use std::sync::Arc;

use crate::consistency::ConsistencyLayer;
use crate::errors::CoreError;
use crate::report::{Report, ReportId, ReportStatus};
use crate::repository::ReportRepository;

/// Minimum number of neighbours pulled from the store per search.
const MIN_CANDIDATES: usize = 10;
/// Over-fetch factor; filtered hits are replaced from the surplus.
const CANDIDATE_FACTOR: usize = 3;

#[derive(Debug, Clone)]
pub struct Match {
    /// 1-based
    pub rank: usize,
    pub similarity: f32,
    pub position: u64,
    pub report: Report,
}

pub struct Matcher {
    consistency: Arc<ConsistencyLayer>,
    repository: Arc<ReportRepository>,
    dimensions: usize,
}

impl Matcher {
    pub fn new(
        consistency: Arc<ConsistencyLayer>,
        repository: Arc<ReportRepository>,
        dimensions: usize,
    ) -> Self {
        Self {
            consistency,
            repository,
            dimensions,
        }
    }

    /// Active reports whose face is at least `threshold` similar to `query`,
    /// best first.
    pub fn search(&self, query: &[f32], threshold: f32, limit: usize) -> Result<Vec<Match>, CoreError> {
        self.validate(query, threshold, limit)?;

        let k = limit.saturating_mul(CANDIDATE_FACTOR).max(MIN_CANDIDATES);
        let neighbors = self.consistency.store().search(query, k)?;

        let mut matches = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let similarity = 1.0 - neighbor.distance;
            if similarity < threshold {
                continue;
            }

            let report_id = match self.consistency.resolve(neighbor.position) {
                Ok(report_id) => report_id,
                // creation still in flight
                Err(CoreError::Unbound(_)) => continue,
                Err(err) => return Err(err),
            };

            let report = match self.repository.get(&report_id) {
                Ok(report) => report,
                Err(CoreError::ReportNotFound(_)) => {
                    self.repair_dangling(neighbor.position, &report_id);
                    continue;
                }
                Err(err) => return Err(err),
            };

            if report.status != ReportStatus::Active {
                continue;
            }

            matches.push(Match {
                rank: 0,
                similarity,
                position: neighbor.position,
                report,
            });
        }

        matches.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then(a.position.cmp(&b.position))
        });
        matches.truncate(limit);
        for (idx, m) in matches.iter_mut().enumerate() {
            m.rank = idx + 1;
        }

        Ok(matches)
    }

    fn validate(&self, query: &[f32], threshold: f32, limit: usize) -> Result<(), CoreError> {
        if query.len() != self.dimensions {
            return Err(CoreError::Validation(format!(
                "query embedding has {} dimensions, expected {}",
                query.len(),
                self.dimensions
            )));
        }
        if query.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::Validation(
                "query embedding contains NaN or infinite values".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(CoreError::Validation(format!(
                "threshold must be between 0.0 and 1.0, got {threshold}"
            )));
        }
        if limit == 0 {
            return Err(CoreError::Validation("limit must be at least 1".to_string()));
        }
        Ok(())
    }

    fn repair_dangling(&self, position: u64, report_id: &ReportId) {
        log::warn!(
            "{}",
            CoreError::Consistency(format!(
                "position {position} is bound to missing report {report_id}"
            ))
        );
        if let Err(err) = self.consistency.tombstone(position) {
            log::error!("Failed to tombstone dangling position {position}: {err}");
        }
    }
}
