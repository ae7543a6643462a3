//! Application configuration management.
//!
//! Configuration is stored at `~/.config/fieldcache/config.json`; environment
//! variables override the API settings and the sign-in email.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::CacheOptions;
use crate::models::DEFAULT_LANGUAGE;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "fieldcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Subdirectory of the cache dir holding persisted query results
const QUERY_CACHE_DIR: &str = "queries";

pub const ENV_API_URL: &str = "FIELDCACHE_API_URL";
pub const ENV_API_KEY: &str = "FIELDCACHE_API_KEY";
pub const ENV_EMAIL: &str = "FIELDCACHE_EMAIL";
pub const ENV_PASSWORD: &str = "FIELDCACHE_PASSWORD";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub last_email: Option<String>,
    pub language: Option<String>,
    pub offline_mode: bool,
    /// Skip automatic revalidation of values younger than this
    pub fresh_for_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Override settings from `FIELDCACHE_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| var(name).filter(|v| !v.is_empty());
        if let Some(url) = var(ENV_API_URL) {
            self.api_url = Some(url);
        }
        if let Some(key) = var(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(email) = var(ENV_EMAIL) {
            self.last_email = Some(email);
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn query_cache_dir(cache_dir: &Path) -> PathBuf {
        cache_dir.join(QUERY_CACHE_DIR)
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or(DEFAULT_LANGUAGE)
    }

    /// API base URL and key, both required to talk to the service
    pub fn api_settings(&self) -> Result<(&str, &str)> {
        let url = self.api_url.as_deref().with_context(|| {
            format!("No API URL configured (set {} or api_url in config)", ENV_API_URL)
        })?;
        let key = self.api_key.as_deref().with_context(|| {
            format!("No API key configured (set {} or api_key in config)", ENV_API_KEY)
        })?;
        Ok((url, key))
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            fresh_for: Duration::from_secs(self.fresh_for_secs),
            offline_mode: self.offline_mode,
        }
    }
}
