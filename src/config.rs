use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::storage::{self, StorageManager};

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default embedder model; vectors written by another model are rejected.
const DEFAULT_MODEL: &str = "Facenet";
const DEFAULT_DIMENSION: usize = 128;
/// Default minimum similarity for a search hit
const DEFAULT_THRESHOLD: f32 = 0.7;
const DEFAULT_SNAPSHOT_INTERVAL: usize = 1000;

const DEFAULT_LISTEN: &str = "0.0.0.0:8000";
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

const DEFAULT_PHOTO_MAX_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_PHOTO_MAX_DIMENSION: u32 = 1600;
const DEFAULT_JPEG_QUALITY: u8 = 85;

const DEFAULT_EMBEDDER_URL: &str = "http://127.0.0.1:5000/embed";
const DEFAULT_EMBEDDER_TIMEOUT_SECS: u64 = 30;

/// Matching engine settings shared by every core component.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Embedding dimension D
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Threshold used when a search does not supply one [0.0, 1.0]
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    /// Creations between two checkpoints
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: usize,

    #[serde(default = "default_model")]
    pub model: String,

    /// fsync every journal and log append
    #[serde(default = "default_true")]
    pub sync_writes: bool,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            default_threshold: DEFAULT_THRESHOLD,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            model: DEFAULT_MODEL.to_string(),
            sync_writes: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Limits applied to uploaded photos.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhotoConfig {
    #[serde(default = "default_photo_max_bytes")]
    pub max_bytes: usize,

    /// Longest side after normalisation, in pixels
    #[serde(default = "default_photo_max_dimension")]
    pub max_dimension: u32,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_PHOTO_MAX_BYTES,
            max_dimension: DEFAULT_PHOTO_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbedderConfig {
    #[serde(default = "default_embedder_url")]
    pub url: String,

    #[serde(default = "default_embedder_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_EMBEDDER_URL.to_string(),
            timeout_secs: DEFAULT_EMBEDDER_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// principal -> bearer token
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub photos: PhotoConfig,
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

fn default_dimension() -> usize {
    DEFAULT_DIMENSION
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_snapshot_interval() -> usize {
    DEFAULT_SNAPSHOT_INTERVAL
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_true() -> bool {
    true
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

fn default_photo_max_bytes() -> usize {
    DEFAULT_PHOTO_MAX_BYTES
}

fn default_photo_max_dimension() -> u32 {
    DEFAULT_PHOTO_MAX_DIMENSION
}

fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_embedder_url() -> String {
    DEFAULT_EMBEDDER_URL.to_string()
}

fn default_embedder_timeout_secs() -> u64 {
    DEFAULT_EMBEDDER_TIMEOUT_SECS
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        let matching = &self.matching;
        if matching.dimension == 0 || matching.dimension > u16::MAX as usize {
            bail!(
                "matching.dimension must be between 1 and {}, got {}",
                u16::MAX,
                matching.dimension
            );
        }
        if !(0.0..=1.0).contains(&matching.default_threshold) {
            bail!(
                "matching.default_threshold must be between 0.0 and 1.0, got {}",
                matching.default_threshold
            );
        }
        if matching.snapshot_interval == 0 {
            bail!("matching.snapshot_interval must be greater than 0");
        }
        if matching.model.trim().is_empty() {
            bail!("matching.model must not be empty");
        }

        if self.photos.max_dimension == 0 {
            bail!("photos.max_dimension must be greater than 0");
        }
        if !(1..=100).contains(&self.photos.jpeg_quality) {
            bail!(
                "photos.jpeg_quality must be between 1 and 100, got {}",
                self.photos.jpeg_quality
            );
        }
        if self.server.max_body_bytes < self.photos.max_bytes {
            bail!("server.max_body_bytes must be at least photos.max_bytes");
        }

        if self.embedder.timeout_secs == 0 {
            bail!("embedder.timeout_secs must be greater than 0");
        }

        for (principal, token) in &self.auth.tokens {
            if token.trim().is_empty() {
                bail!("auth.tokens.{principal} must not be empty");
            }
        }

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE_NAME) {
            store.write(
                CONFIG_FILE_NAME,
                serde_yml::to_string(&Self::default())?.as_bytes(),
            )?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE_NAME)?)
            .context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE_NAME, config_str.as_bytes())?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_written_on_first_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path()).unwrap();

        assert_eq!(config.matching.dimension, 128);
        assert_eq!(config.matching.default_threshold, 0.7);
        assert_eq!(config.matching.model, "Facenet");
        assert_eq!(config.server.listen, "0.0.0.0:8000");
        assert_eq!(config.photos.max_dimension, 1600);
        assert_eq!(config.base_path(), dir.path());
        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
    }

    #[test]
    fn test_missing_fields_are_defaulted_and_resaved() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "matching:\n  dimension: 512\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.matching.dimension, 512);
        assert_eq!(config.matching.snapshot_interval, 1000);

        let saved = std::fs::read_to_string(dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert!(saved.contains("snapshot_interval"));
        assert!(saved.contains("jpeg_quality"));
    }

    #[test]
    fn test_invalid_threshold_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "matching:\n  default_threshold: 1.5\n",
        )
        .unwrap();

        let err = Config::load_with(dir.path()).unwrap_err();
        assert!(err.to_string().contains("default_threshold"));
    }

    #[test]
    fn test_auth_tokens_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "auth:\n  tokens:\n    desk: secret-1\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.auth.tokens.get("desk").map(String::as_str), Some("secret-1"));
    }
}
