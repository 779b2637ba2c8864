use std::path::Path;

use crate::config::MatchingConfig;
use crate::report::ReportCreate;
use crate::service::MatchService;

mod recovery;
mod scenarios;

pub const DIMENSIONS: usize = 4;

pub fn matching_config() -> MatchingConfig {
    MatchingConfig {
        dimension: DIMENSIONS,
        sync_writes: false,
        ..Default::default()
    }
}

/// Service backed by files in `dir`.
pub fn open_service(dir: &Path) -> MatchService {
    MatchService::open(&matching_config(), dir).expect("failed to open service")
}

pub fn memory_service() -> MatchService {
    MatchService::in_memory(&matching_config()).expect("failed to build service")
}

pub fn fields(name: &str) -> ReportCreate {
    ReportCreate {
        name: name.to_string(),
        age: 30,
        last_seen: "railway station".to_string(),
        photo_reference: format!("{name}.jpg"),
        ..Default::default()
    }
}

/// Distinct unit-ish vector per seed, far apart from its neighbours.
pub fn face(seed: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMENSIONS];
    v[seed % DIMENSIONS] = 1.0 + (seed / DIMENSIONS) as f32;
    v
}
