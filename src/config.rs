//! Application configuration, loaded from YAML with a default for every field.
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::store::SledStore;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub log_level: String,
    pub use_json: bool,
    pub store: StoreConfig,
    pub auth: AuthConfig,
    /// Usernames allowed to manage genres.
    pub admins: Vec<String>,
    /// Buffered deliveries per notification subscriber.
    pub notify_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            use_json: false,
            store: StoreConfig::default(),
            auth: AuthConfig::default(),
            admins: vec![],
            notify_capacity: 256,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
    /// Throw the database away on drop, for demos and tests.
    pub temporary: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "./data/book-trade".to_string(),
            temporary: false,
        }
    }
}

impl StoreConfig {
    pub fn open(&self) -> Result<SledStore, StoreError> {
        if self.temporary {
            SledStore::temporary()
        } else {
            SledStore::open(&self.path)
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    /// Session lifetime used when a login does not ask for one.
    pub default_ttl_secs: i64,
    pub argon2: Argon2Config,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 7 * 24 * 60 * 60,
            argon2: Argon2Config::default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Argon2Config {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            memory_kib: argon2::Params::DEFAULT_M_COST,
            iterations: argon2::Params::DEFAULT_T_COST,
            parallelism: argon2::Params::DEFAULT_P_COST,
        }
    }
}

impl AppConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        // an empty document is a valid, all-default config
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("failed to parse config yaml")
    }
}
