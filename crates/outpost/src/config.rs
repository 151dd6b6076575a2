// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine configuration: server, pacing, retry ceilings and file locations.
//!
//! Resolution order for each value: environment variable, then the TOML
//! file, then the built-in default. Every field has a default so an empty
//! file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Game server root, e.g. `https://ts1.x1.europe.travian.com`.
    pub base_url: String,
    /// Name of the cookie that proves an authenticated session.
    pub auth_cookie: String,
    /// Directory holding rule files, cookies, logs and the activity journal.
    pub data_dir: PathBuf,
    /// Per-request timeout.
    pub timeout_ms: u64,
    pub pacing: PacingConfig,
    pub retry: RetryConfig,
    pub session: SessionConfig,
    pub refresh: RefreshMode,
    pub credentials: Option<Credentials>,
    pub telegram: Option<TelegramConfig>,
    /// Replaces the embedded pattern table when set.
    pub patterns_path: Option<PathBuf>,
}

/// Random delay applied before every dispatched request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts allowed after the first failure of one request.
    pub max_request_retries: u32,
    /// First backoff step; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Consecutive failures across all requests before the client is rebuilt.
    pub consecutive_errors_before_reset: u32,
    /// Re-runs of a farm dispatch whose target list came back empty.
    pub max_farm_retries: u32,
    pub farm_retry_delay_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Minimum gap between cookie writes when the token has not changed.
    pub persist_interval_secs: u64,
    /// Assumed lifetime of a saved session when the token carries no expiry.
    pub cookie_lifetime_hours: u64,
}

/// How the orchestrator schedules the next fetch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    /// 30 to 60 seconds.
    Short,
    /// 5 to 10 minutes.
    Long,
    /// Shortest builder remaining time plus a small buffer.
    #[default]
    Smart,
    Off,
}

impl std::str::FromStr for RefreshMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "short" => Ok(Self::Short),
            "long" => Ok(Self::Long),
            "smart" => Ok(Self::Smart),
            "off" => Ok(Self::Off),
            other => Err(format!("unknown refresh mode {other:?} (short, long, smart, off)")),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            auth_cookie: "JWT".to_string(),
            data_dir: default_data_dir(),
            timeout_ms: 30_000,
            pacing: PacingConfig::default(),
            retry: RetryConfig::default(),
            session: SessionConfig::default(),
            refresh: RefreshMode::default(),
            credentials: None,
            telegram: None,
            patterns_path: None,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 500,
            max_delay_ms: 2000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_request_retries: 3,
            backoff_base_ms: 1000,
            consecutive_errors_before_reset: 5,
            max_farm_retries: 3,
            farm_retry_delay_ms: 2000,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            persist_interval_secs: 300,
            cookie_lifetime_hours: 20,
        }
    }
}

/// `~/.outpost`, or `.outpost` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".outpost"))
        .unwrap_or_else(|| PathBuf::from(".outpost"))
}

impl EngineConfig {
    /// Load from `path` (missing file means defaults) and apply env overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            toml::from_str::<EngineConfig>(&text)?
        } else {
            EngineConfig::default()
        };
        config.apply_env();
        config.normalize()?;
        Ok(config)
    }

    /// Override fields from `OUTPOST_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("OUTPOST_BASE_URL") {
            self.base_url = url;
        }
        let user = std::env::var("OUTPOST_USERNAME").ok();
        let pass = std::env::var("OUTPOST_PASSWORD").ok();
        match (user, pass, self.credentials.as_mut()) {
            (Some(username), Some(password), _) => {
                self.credentials = Some(Credentials { username, password });
            }
            (Some(username), None, Some(existing)) => existing.username = username,
            (None, Some(password), Some(existing)) => existing.password = password,
            _ => {}
        }
    }

    /// Trim the trailing slash from the base URL and validate it.
    pub fn normalize(&mut self) -> Result<(), ConfigError> {
        while self.base_url.ends_with('/') {
            self.base_url.pop();
        }
        if !self.base_url.is_empty() && url::Url::parse(&self.base_url).is_err() {
            return Err(ConfigError::BaseUrl(self.base_url.clone()));
        }
        Ok(())
    }

    /// Host part of `base_url`, used to re-home saved cookies.
    pub fn host(&self) -> Option<String> {
        url::Url::parse(&self.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn cookies_path(&self) -> PathBuf {
        self.data_dir.join("cookies.json")
    }

    pub fn build_queue_path(&self) -> PathBuf {
        self.data_dir.join("build_queue.json")
    }

    pub fn troop_rules_path(&self) -> PathBuf {
        self.data_dir.join("troop_rules.json")
    }

    pub fn farm_rules_path(&self) -> PathBuf {
        self.data_dir.join("farm_rules.json")
    }

    pub fn activity_path(&self) -> PathBuf {
        self.data_dir.join("activity.jsonl")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Configuration with all delays zeroed, for tests and dry runs.
    pub fn unpaced(base_url: &str, data_dir: &Path) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            data_dir: data_dir.to_path_buf(),
            timeout_ms: 5_000,
            pacing: PacingConfig {
                min_delay_ms: 0,
                max_delay_ms: 0,
            },
            retry: RetryConfig {
                backoff_base_ms: 0,
                farm_retry_delay_ms: 0,
                ..RetryConfig::default()
            },
            refresh: RefreshMode::Off,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let c = EngineConfig::default();
        assert_eq!(c.auth_cookie, "JWT");
        assert_eq!(c.pacing.min_delay_ms, 500);
        assert_eq!(c.pacing.max_delay_ms, 2000);
        assert_eq!(c.retry.max_request_retries, 3);
        assert_eq!(c.retry.consecutive_errors_before_reset, 5);
        assert_eq!(c.retry.max_farm_retries, 3);
        assert_eq!(c.refresh, RefreshMode::Smart);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let text = r#"
base_url = "https://ts1.example.com/"
refresh = "long"

[retry]
max_farm_retries = 5
"#;
        let mut c: EngineConfig = toml::from_str(text).unwrap();
        c.normalize().unwrap();
        assert_eq!(c.base_url, "https://ts1.example.com");
        assert_eq!(c.refresh, RefreshMode::Long);
        assert_eq!(c.retry.max_farm_retries, 5);
        assert_eq!(c.retry.max_request_retries, 3);
        assert_eq!(c.host().as_deref(), Some("ts1.example.com"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let c = EngineConfig::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(c.timeout_ms, 30_000);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let mut c = EngineConfig {
            base_url: "not a url".into(),
            ..EngineConfig::default()
        };
        assert!(c.normalize().is_err());
    }

    #[test]
    fn test_refresh_mode_parse() {
        assert_eq!("Short".parse::<RefreshMode>().unwrap(), RefreshMode::Short);
        assert_eq!("off".parse::<RefreshMode>().unwrap(), RefreshMode::Off);
        assert!("hourly".parse::<RefreshMode>().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let c = Credentials {
            username: "alice".into(),
            password: "hunter2".into(),
        };
        let shown = format!("{c:?}");
        assert!(shown.contains("alice"));
        assert!(!shown.contains("hunter2"));
    }
}
