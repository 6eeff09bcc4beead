//! Client configuration.
//!
//! Sources, later wins: built-in defaults, the optional JSON file at
//! `<config_dir>/glider/client.json`, `GLIDER_*` environment variables, then
//! whatever the CLI overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClientError, ClientResult};

pub const ENV_BASE_URL: &str = "GLIDER_BASE_URL";
pub const ENV_PREVIEW_DEBOUNCE_MS: &str = "GLIDER_PREVIEW_DEBOUNCE_MS";
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "GLIDER_REQUEST_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Quiet period before a preview render is requested.
    #[serde(default = "default_preview_debounce_ms")]
    pub preview_debounce_ms: u64,
    /// Total timeout for short requests. Streamed runs have none.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// How many recent evaluations to display.
    #[serde(default = "default_evaluation_window")]
    pub evaluation_window: usize,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_preview_debounce_ms() -> u64 {
    500
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_evaluation_window() -> usize {
    glider::ledger::DEFAULT_DISPLAY_WINDOW
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            preview_debounce_ms: default_preview_debounce_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            evaluation_window: default_evaluation_window(),
        }
    }
}

impl ClientConfig {
    pub fn config_file() -> Option<PathBuf> {
        dirs::config_dir().map(|base| base.join("glider").join("client.json"))
    }

    /// Defaults, then the config file if present, then the environment.
    pub fn load() -> ClientResult<Self> {
        let mut cfg = match Self::config_file() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> ClientResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg = serde_json::from_str(&text)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded client config from {:?}", path);
        Ok(cfg)
    }

    /// Apply `GLIDER_*` overrides looked up through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ClientResult<()> {
        if let Some(url) = lookup(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Some(ms) = lookup(ENV_PREVIEW_DEBOUNCE_MS) {
            self.preview_debounce_ms = parse_number(ENV_PREVIEW_DEBOUNCE_MS, &ms)?;
        }
        if let Some(secs) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            self.request_timeout_secs = parse_number(ENV_REQUEST_TIMEOUT_SECS, &secs)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> ClientResult<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(ClientError::Config(
                "request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn preview_debounce(&self) -> Duration {
        Duration::from_millis(self.preview_debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> ClientResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| ClientError::Config(format!("{} must be a non-negative integer, got {:?}", key, raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: ClientConfig = serde_json::from_str(r#"{"base_url":"http://gpu-box:9000"}"#).unwrap();
        assert_eq!(cfg.base_url, "http://gpu-box:9000");
        assert_eq!(cfg.preview_debounce(), Duration::from_millis(500));
        assert_eq!(cfg.evaluation_window, 50);
    }

    #[test]
    fn overrides_replace_and_validate() {
        let env: HashMap<&str, &str> = [
            (ENV_BASE_URL, "https://sim.example"),
            (ENV_PREVIEW_DEBOUNCE_MS, "250"),
        ]
        .into_iter()
        .collect();
        let mut cfg = ClientConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.base_url, "https://sim.example");
        assert_eq!(cfg.preview_debounce_ms, 250);

        let mut cfg = ClientConfig::default();
        let err = cfg
            .apply_overrides(|k| (k == ENV_REQUEST_TIMEOUT_SECS).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));

        let mut cfg = ClientConfig::default();
        assert!(cfg
            .apply_overrides(|k| (k == ENV_BASE_URL).then(|| "localhost:8000".to_string()))
            .is_err());
    }
}
