//! Report repository.
//!
//! Reports live in memory, keyed by `report_id`, with secondary indexes on
//! status and creation time. Every mutation is appended to `reports.jsonl`
//! before it is applied, so the in-memory state can always be rebuilt by
//! replaying the journal.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::journal::Journal;
use crate::report::{Report, ReportId, ReportStatus};

const JOURNAL_FILE_NAME: &str = "reports.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ReportEvent {
    Created {
        report: Report,
    },
    StatusChanged {
        report_id: ReportId,
        status: ReportStatus,
    },
    /// Rollback of a creation that was never acknowledged.
    Retracted {
        report_id: ReportId,
    },
}

type CreatedKey = (DateTime<Utc>, ReportId);

#[derive(Default)]
struct RepositoryState {
    reports: HashMap<ReportId, Report>,
    by_status: HashMap<ReportStatus, BTreeSet<CreatedKey>>,
    by_created: BTreeSet<CreatedKey>,
    last_created_at: Option<DateTime<Utc>>,
}

impl RepositoryState {
    fn insert(&mut self, report: Report) {
        let key = (report.created_at, report.report_id.clone());
        self.by_status
            .entry(report.status)
            .or_default()
            .insert(key.clone());
        self.by_created.insert(key);
        self.last_created_at = self.last_created_at.max(Some(report.created_at));
        self.reports.insert(report.report_id.clone(), report);
    }

    fn remove(&mut self, report_id: &ReportId) -> Option<Report> {
        let report = self.reports.remove(report_id)?;
        let key = (report.created_at, report.report_id.clone());
        if let Some(keys) = self.by_status.get_mut(&report.status) {
            keys.remove(&key);
        }
        self.by_created.remove(&key);
        Some(report)
    }

    fn set_status(&mut self, report_id: &ReportId, status: ReportStatus) -> Option<Report> {
        let report = self.reports.get_mut(report_id)?;
        let key = (report.created_at, report.report_id.clone());

        if let Some(keys) = self.by_status.get_mut(&report.status) {
            keys.remove(&key);
        }
        self.by_status.entry(status).or_default().insert(key);
        report.status = status;

        Some(report.clone())
    }

    fn apply(&mut self, event: ReportEvent) -> Result<(), CoreError> {
        match event {
            ReportEvent::Created { report } => {
                if self.reports.contains_key(&report.report_id) {
                    return Err(CoreError::Corrupt(format!(
                        "report {} is created twice in the journal",
                        report.report_id
                    )));
                }
                self.insert(report);
            }
            ReportEvent::StatusChanged { report_id, status } => {
                if self.set_status(&report_id, status).is_none() {
                    return Err(CoreError::Corrupt(format!(
                        "status change for unknown report {report_id}"
                    )));
                }
            }
            ReportEvent::Retracted { report_id } => {
                self.remove(&report_id);
            }
        }
        Ok(())
    }
}

pub struct ReportRepository {
    state: RwLock<RepositoryState>,
    journal: Option<Journal<ReportEvent>>,
}

impl ReportRepository {
    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(RepositoryState::default()),
            journal: None,
        }
    }

    /// Open the repository in `dir`, replaying `reports.jsonl`.
    pub fn open(dir: &Path, sync_writes: bool) -> Result<Self, CoreError> {
        let (journal, events) = Journal::open(dir.join(JOURNAL_FILE_NAME), sync_writes)?;

        let mut state = RepositoryState::default();
        let replayed = events.len();
        for event in events {
            state.apply(event)?;
        }

        log::info!(
            "Loaded {} reports from {} ({} journal entries)",
            state.reports.len(),
            journal.path().display(),
            replayed
        );

        Ok(Self {
            state: RwLock::new(state),
            journal: Some(journal),
        })
    }

    /// Creation timestamp for the next report: now, or 1µs past the most
    /// recent one if the clock has not moved forward.
    pub fn next_created_at(&self) -> Result<DateTime<Utc>, CoreError> {
        let state = self.read()?;
        let now = Utc::now();
        Ok(match state.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        })
    }

    pub fn insert(&self, report: Report) -> Result<(), CoreError> {
        let mut state = self.write()?;
        if state.reports.contains_key(&report.report_id) {
            return Err(CoreError::Conflict(format!(
                "report {} already exists",
                report.report_id
            )));
        }

        self.record(&ReportEvent::Created {
            report: report.clone(),
        })?;
        state.insert(report);

        Ok(())
    }

    /// Remove a report whose creation was rolled back.
    pub fn retract(&self, report_id: &ReportId) -> Result<Option<Report>, CoreError> {
        let mut state = self.write()?;
        if !state.reports.contains_key(report_id) {
            return Ok(None);
        }

        self.record(&ReportEvent::Retracted {
            report_id: report_id.clone(),
        })?;
        Ok(state.remove(report_id))
    }

    pub fn get(&self, report_id: &ReportId) -> Result<Report, CoreError> {
        self.read()?
            .reports
            .get(report_id)
            .cloned()
            .ok_or_else(|| CoreError::ReportNotFound(report_id.clone()))
    }

    /// Move a report to `next`, checking the transition table against the
    /// current status under the write lock.
    pub fn update_status(
        &self,
        report_id: &ReportId,
        next: ReportStatus,
    ) -> Result<Report, CoreError> {
        let mut state = self.write()?;
        let current = state
            .reports
            .get(report_id)
            .map(|report| report.status)
            .ok_or_else(|| CoreError::ReportNotFound(report_id.clone()))?;

        let status = current.transition_to(next)?;
        self.record(&ReportEvent::StatusChanged {
            report_id: report_id.clone(),
            status,
        })?;

        state
            .set_status(report_id, status)
            .ok_or_else(|| CoreError::ReportNotFound(report_id.clone()))
    }

    /// Reports ordered by `created_at`, newest first.
    pub fn list(
        &self,
        status: Option<ReportStatus>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Report>, CoreError> {
        let state = self.read()?;
        let keys = match status {
            Some(status) => match state.by_status.get(&status) {
                Some(keys) => keys,
                None => return Ok(Vec::new()),
            },
            None => &state.by_created,
        };

        Ok(keys
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .filter_map(|(_, id)| state.reports.get(id).cloned())
            .collect())
    }

    pub fn len(&self) -> Result<usize, CoreError> {
        Ok(self.read()?.reports.len())
    }

    pub fn count_by_status(&self, status: ReportStatus) -> Result<usize, CoreError> {
        Ok(self
            .read()?
            .by_status
            .get(&status)
            .map(BTreeSet::len)
            .unwrap_or(0))
    }

    pub fn ids(&self) -> Result<Vec<ReportId>, CoreError> {
        Ok(self
            .read()?
            .by_created
            .iter()
            .map(|(_, id)| id.clone())
            .collect())
    }

    /// Rewrite the journal as one `created` entry per live report.
    pub fn compact(&self) -> Result<(), CoreError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        let state = self.read()?;
        let events = state.by_created.iter().filter_map(|(_, id)| {
            state
                .reports
                .get(id)
                .map(|report| ReportEvent::Created {
                    report: report.clone(),
                })
        });
        journal.rewrite(events)?;

        log::debug!("Compacted report journal to {} entries", state.reports.len());
        Ok(())
    }

    fn record(&self, event: &ReportEvent) -> Result<(), CoreError> {
        if let Some(journal) = &self.journal {
            journal.append(event).map_err(|err| {
                log::error!("Failed to append to report journal: {err}");
                err
            })?;
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, RepositoryState>, CoreError> {
        self.state.read().map_err(CoreError::poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, RepositoryState>, CoreError> {
        self.state.write().map_err(CoreError::poisoned)
    }
}
