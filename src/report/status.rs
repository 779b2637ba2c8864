use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::errors::CoreError;

/// Report status. Reports start `Active`; `Archived` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Active,
    Resolved,
    Archived,
}

impl ReportStatus {
    pub const ALL: [ReportStatus; 3] = [
        ReportStatus::Active,
        ReportStatus::Resolved,
        ReportStatus::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Active => "active",
            ReportStatus::Resolved => "resolved",
            ReportStatus::Archived => "archived",
        }
    }

    /// Allowed moves: active→resolved, active→archived, resolved→archived.
    pub fn can_transition_to(self, next: ReportStatus) -> bool {
        matches!(
            (self, next),
            (ReportStatus::Active, ReportStatus::Resolved)
                | (ReportStatus::Active, ReportStatus::Archived)
                | (ReportStatus::Resolved, ReportStatus::Archived)
        )
    }

    pub fn transition_to(self, next: ReportStatus) -> Result<ReportStatus, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        ReportStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "unknown status '{wanted}', expected one of: active, resolved, archived"
                ))
            })
    }
}
