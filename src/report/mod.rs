//! Missing-person report documents.

mod id;
mod status;

pub use id::ReportId;
pub use status::ReportStatus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Oldest age a report may carry.
pub const MAX_AGE: u32 = 150;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub report_id: ReportId,

    pub name: String,
    pub age: u32,
    pub last_seen: String,
    pub datetime_last_seen: DateTime<Utc>,
    pub photo_reference: String,

    /// Written once at creation, never mutated.
    pub embedding: Vec<f32>,
    pub status: ReportStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<Appearance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appearance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dress_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hair_color: Option<String>,
    /// Centimetres
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Kilograms
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_color: Option<String>,
}

impl Appearance {
    pub fn is_empty(&self) -> bool {
        self.dress_color.is_none()
            && self.hair_color.is_none()
            && self.height.is_none()
            && self.weight.is_none()
            && self.face_color.is_none()
    }

    fn normalized(self) -> Option<Self> {
        let appearance = Appearance {
            dress_color: non_empty(self.dress_color),
            hair_color: non_empty(self.hair_color),
            height: self.height,
            weight: self.weight,
            face_color: non_empty(self.face_color),
        };

        if appearance.is_empty() {
            None
        } else {
            Some(appearance)
        }
    }
}

/// Caller-supplied fields of a new report.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ReportCreate {
    pub name: String,
    pub age: u32,
    pub last_seen: String,
    pub datetime_last_seen: DateTime<Utc>,
    pub photo_reference: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<Appearance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ReportCreate {
    /// Trims free text and rejects missing or out-of-range fields.
    pub fn validate(self) -> Result<Self, CoreError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(CoreError::Validation("name must not be empty".to_string()));
        }

        if self.age > MAX_AGE {
            return Err(CoreError::Validation(format!(
                "age must be at most {MAX_AGE}, got {}",
                self.age
            )));
        }

        let last_seen = self.last_seen.trim().to_string();
        if last_seen.is_empty() {
            return Err(CoreError::Validation(
                "last_seen must not be empty".to_string(),
            ));
        }

        if self.photo_reference.trim().is_empty() {
            return Err(CoreError::Validation(
                "photo_reference must not be empty".to_string(),
            ));
        }

        Ok(ReportCreate {
            name,
            age: self.age,
            last_seen,
            datetime_last_seen: self.datetime_last_seen,
            photo_reference: self.photo_reference,
            appearance: self.appearance.and_then(Appearance::normalized),
            details: non_empty(self.details),
        })
    }
}

/// A report as exposed to listings and lookups: everything but the embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportView {
    pub report_id: ReportId,
    pub name: String,
    pub age: u32,
    pub last_seen: String,
    pub datetime_last_seen: DateTime<Utc>,
    pub photo_reference: String,
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<Appearance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Report> for ReportView {
    fn from(report: &Report) -> Self {
        ReportView {
            report_id: report.report_id.clone(),
            name: report.name.clone(),
            age: report.age,
            last_seen: report.last_seen.clone(),
            datetime_last_seen: report.datetime_last_seen,
            photo_reference: report.photo_reference.clone(),
            status: report.status,
            appearance: report.appearance.clone(),
            details: report.details.clone(),
            created_by: report.created_by.clone(),
            created_at: report.created_at,
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
