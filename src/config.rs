use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::credential::Credential;

pub const DEFAULT_URL: &str = "https://api.ensue-network.ai/";

/// Name of the optional key file read when neither env var is set.
pub const KEY_FILE_NAME: &str = ".ensue-key";

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EnsueConfig {
    pub server: ServerConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    /// Never read from the TOML file; only from the environment or the key file.
    #[serde(skip)]
    pub credential: Option<Credential>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub timeout_secs: u64,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SessionConfig {
    /// Read-only / no-auto-logging mode. Manual operations still work.
    pub read_only: bool,
    pub search_limit: usize,
    pub browse_page_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.into(),
            timeout_secs: 30,
            log_level: "info".into(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay_ms: 500,
            max_delay_ms: 5_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            search_limit: 10,
            browse_page_size: 5,
        }
    }
}

/// Returns `~/.ensue/`
pub fn default_ensue_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ensue")
}

/// Returns the default config file path: `~/.ensue/config.toml`
pub fn default_config_path() -> PathBuf {
    default_ensue_dir().join("config.toml")
}

/// Interpret a boolean-like flag value.
///
/// Returns `None` for malformed input so the caller can fall back to its
/// conservative default.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl EnsueConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides and resolve the
    /// credential (env first, then a key file beside the config file).
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            EnsueConfig::default()
        };

        config.apply_overrides(|name| std::env::var(name).ok());

        if config.credential.is_none() {
            if let Some(dir) = path.parent() {
                config.credential = read_key_file(&dir.join(KEY_FILE_NAME))?;
            }
        }

        Ok(config)
    }

    /// Apply overrides (ENSUE_URL, ENSUE_LOG_LEVEL, ENSUE_READONLY,
    /// ENSUE_API_KEY / ENSUE_TOKEN) from a variable lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(val) = lookup("ENSUE_URL") {
            self.server.url = val;
        }
        if let Some(val) = lookup("ENSUE_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Some(val) = lookup("ENSUE_READONLY") {
            self.session.read_only = match parse_flag(&val) {
                Some(flag) => flag,
                None => {
                    warn!("ENSUE_READONLY has an unrecognized value; auto-logging stays disabled");
                    true
                }
            };
        }
        if let Some(credential) = lookup("ENSUE_API_KEY")
            .and_then(Credential::new)
            .or_else(|| lookup("ENSUE_TOKEN").and_then(Credential::new))
        {
            self.credential = Some(credential);
        }
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.server.timeout_secs.max(1))
    }
}

fn read_key_file(path: &Path) -> Result<Option<Credential>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    Ok(Credential::new(contents))
}
