//! Application configuration management.
//!
//! This module handles loading and saving the console configuration: the API
//! base URL, the default scanning agent, paging and refresh settings.
//!
//! Configuration is stored at `~/.config/pickup-console/config.json`.
//! `PICKUP_API_URL`, `PICKUP_API_TOKEN` and `PICKUP_AGENT` override it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Application name used for config directory paths
const APP_NAME: &str = "pickup-console";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

/// Rows per directory page, matching the admin tables.
const DEFAULT_PAGE_SIZE: u32 = 15;

/// Dashboard refresh period. Display only; never drives presence decisions.
const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 30;

/// Directory pages older than this are refetched on the next read.
const DEFAULT_CACHE_STALE_MINUTES: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub api_base_url: Option<String>,
    pub agent_code: Option<String>,
    pub page_size: Option<u32>,
    pub refresh_interval_secs: Option<u64>,
    pub cache_stale_minutes: Option<i64>,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_json::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the config back to the user config dir. Returns where it went.
    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn api_base_url(&self) -> String {
        std::env::var("PICKUP_API_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| self.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn api_token(&self) -> Option<String> {
        std::env::var("PICKUP_API_TOKEN").ok().filter(|t| !t.is_empty())
    }

    pub fn agent_code(&self) -> Option<String> {
        std::env::var("PICKUP_AGENT")
            .ok()
            .filter(|a| !a.is_empty())
            .or_else(|| self.agent_code.clone())
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.filter(|&n| n > 0).unwrap_or(DEFAULT_PAGE_SIZE)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(
            self.refresh_interval_secs
                .filter(|&s| s > 0)
                .unwrap_or(DEFAULT_REFRESH_INTERVAL_SECS),
        )
    }

    pub fn cache_stale_minutes(&self) -> i64 {
        self.cache_stale_minutes
            .filter(|&m| m >= 0)
            .unwrap_or(DEFAULT_CACHE_STALE_MINUTES)
    }
}
