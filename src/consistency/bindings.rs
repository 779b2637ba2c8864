use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;
use crate::journal::Journal;
use crate::report::ReportId;

const JOURNAL_FILE_NAME: &str = "bindings.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BindingEvent {
    Bind { position: u64, report_id: ReportId },
    Release { position: u64 },
}

#[derive(Default)]
struct BindingTable {
    forward: BTreeMap<u64, ReportId>,
    reverse: HashMap<ReportId, u64>,
}

impl BindingTable {
    fn check_free(&self, position: u64, report_id: &ReportId) -> Result<(), CoreError> {
        if let Some(bound) = self.forward.get(&position) {
            return Err(CoreError::Conflict(format!(
                "position {position} is already bound to report {bound}"
            )));
        }
        if let Some(bound) = self.reverse.get(report_id) {
            return Err(CoreError::Conflict(format!(
                "report {report_id} is already bound to position {bound}"
            )));
        }
        Ok(())
    }

    fn release(&mut self, position: u64) -> Option<ReportId> {
        let report_id = self.forward.remove(&position)?;
        self.reverse.remove(&report_id);
        Some(report_id)
    }

    fn apply(&mut self, event: BindingEvent) -> Result<(), CoreError> {
        match event {
            BindingEvent::Bind {
                position,
                report_id,
            } => {
                self.check_free(position, &report_id).map_err(|err| {
                    CoreError::Corrupt(format!("binding journal replays a double bind: {err}"))
                })?;
                self.reverse.insert(report_id.clone(), position);
                self.forward.insert(position, report_id);
            }
            BindingEvent::Release { position } => {
                self.release(position);
            }
        }
        Ok(())
    }
}

/// Durable bijection between store positions and report ids.
pub struct Bindings {
    table: RwLock<BindingTable>,
    journal: Option<Journal<BindingEvent>>,
}

impl Bindings {
    pub fn in_memory() -> Self {
        Self {
            table: RwLock::new(BindingTable::default()),
            journal: None,
        }
    }

    pub fn open(dir: &Path, sync_writes: bool) -> Result<Self, CoreError> {
        let (journal, events) = Journal::open(dir.join(JOURNAL_FILE_NAME), sync_writes)?;

        let mut table = BindingTable::default();
        for event in events {
            table.apply(event)?;
        }
        log::info!("Loaded {} bindings", table.forward.len());

        Ok(Self {
            table: RwLock::new(table),
            journal: Some(journal),
        })
    }

    pub fn bind(&self, position: u64, report_id: &ReportId) -> Result<(), CoreError> {
        let mut table = self.write()?;
        table.check_free(position, report_id)?;

        self.record(&BindingEvent::Bind {
            position,
            report_id: report_id.clone(),
        })?;
        table.reverse.insert(report_id.clone(), position);
        table.forward.insert(position, report_id.clone());

        Ok(())
    }

    pub fn resolve(&self, position: u64) -> Result<ReportId, CoreError> {
        self.read()?
            .forward
            .get(&position)
            .cloned()
            .ok_or(CoreError::Unbound(position))
    }

    pub fn resolve_reverse(&self, report_id: &ReportId) -> Result<u64, CoreError> {
        self.read()?
            .reverse
            .get(report_id)
            .copied()
            .ok_or_else(|| CoreError::ReportNotFound(report_id.clone()))
    }

    /// Drop the binding of `position`, returning the report it pointed at.
    pub fn release(&self, position: u64) -> Result<Option<ReportId>, CoreError> {
        let mut table = self.write()?;
        if !table.forward.contains_key(&position) {
            return Ok(None);
        }

        self.record(&BindingEvent::Release { position })?;
        Ok(table.release(position))
    }

    pub fn is_bound(&self, position: u64) -> Result<bool, CoreError> {
        Ok(self.read()?.forward.contains_key(&position))
    }

    /// All bindings in ascending position order.
    pub fn entries(&self) -> Result<Vec<(u64, ReportId)>, CoreError> {
        Ok(self
            .read()?
            .forward
            .iter()
            .map(|(position, id)| (*position, id.clone()))
            .collect())
    }

    pub fn len(&self) -> Result<usize, CoreError> {
        Ok(self.read()?.forward.len())
    }

    pub fn compact(&self) -> Result<(), CoreError> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        let table = self.read()?;
        journal.rewrite(table.forward.iter().map(|(position, report_id)| {
            BindingEvent::Bind {
                position: *position,
                report_id: report_id.clone(),
            }
        }))?;

        Ok(())
    }

    fn record(&self, event: &BindingEvent) -> Result<(), CoreError> {
        if let Some(journal) = &self.journal {
            journal.append(event).map_err(|err| {
                log::error!("Failed to append to binding journal: {err}");
                err
            })?;
        }
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BindingTable>, CoreError> {
        self.table.read().map_err(CoreError::poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BindingTable>, CoreError> {
        self.table.write().map_err(CoreError::poisoned)
    }
}
