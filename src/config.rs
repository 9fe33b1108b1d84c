//! Config module.
//! Loads kartdash.json (provider, polling, server and storage settings) with serde.
//! Every field has a default, so a missing file or a partial file is fine.
//! Environment overrides: KARTDASH_PROVIDER_URL, KARTDASH_CIRCUIT, KARTDASH_DATA_DIR.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "kartdash.json";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 3000;

/// Where snapshots come from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// In-memory generated race
    #[default]
    Mock,
    /// Timing provider over HTTP
    Http,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub source: SourceKind,
    pub url: String,
    pub circuit: String,
    pub timeout_secs: u64,
    /// Karts in the generated race when `source` is `mock`.
    pub mock_karts: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::default(),
            url: String::new(),
            circuit: "default".to_string(),
            timeout_secs: 10,
            mock_karts: 8,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub interval_ms: u64,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Built single-page front end; `index.html` is served for unknown paths.
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            static_dir: PathBuf::from("dist"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub poll: PollConfig,
    pub server: ServerConfig,
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            poll: PollConfig::default(),
            server: ServerConfig::default(),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl Config {
    /// Reads `path`, or the default path when it exists, then applies env overrides.
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("KARTDASH_PROVIDER_URL") {
            self.provider.url = url;
            self.provider.source = SourceKind::Http;
        }
        if let Some(circuit) = lookup("KARTDASH_CIRCUIT") {
            self.provider.circuit = circuit;
        }
        if let Some(dir) = lookup("KARTDASH_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
    }
}
