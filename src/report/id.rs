use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt::Display;
use std::str::FromStr;

/// Opaque, immutable report identifier (a ULID string for new reports).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(String);

impl Display for ReportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReportId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ReportId(s.to_string()))
    }
}

impl From<&str> for ReportId {
    fn from(fr: &str) -> Self {
        ReportId(fr.to_string())
    }
}

impl From<String> for ReportId {
    fn from(fr: String) -> Self {
        ReportId(fr)
    }
}

impl ReportId {
    #[inline]
    pub fn new() -> ReportId {
        ReportId(rusty_ulid::generate_ulid_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ReportId {
    fn default() -> Self {
        Self::new()
    }
}
