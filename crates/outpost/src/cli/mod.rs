// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI subcommand implementations for the `outpost` binary.

pub mod attacks_cmd;
pub mod farms_cmd;
pub mod logging;
pub mod output;
pub mod queue_cmd;
pub mod run_cmd;
pub mod session_cmd;
pub mod troops_cmd;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::config::EngineConfig;
use crate::engine::{Engine, EngineHandle};
use crate::events::{EngineEvent, EventBus};
use crate::extraction::PatternTable;
use crate::notify;
use crate::session::CookieJar;
use crate::transport::HttpTransport;

/// How long one-shot commands wait for the engine to answer.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Resolved configuration shared by every subcommand.
pub struct AppContext {
    pub config: EngineConfig,
    pub config_path: PathBuf,
}

impl AppContext {
    /// Load the config file. `data_dir` overrides the file's value and is
    /// also where the config file is looked up when `config_path` is unset.
    pub fn load(config_path: Option<&Path>, data_dir: Option<&Path>) -> Result<Self> {
        let config_path = match (config_path, data_dir) {
            (Some(p), _) => p.to_path_buf(),
            (None, Some(dir)) => dir.join("config.toml"),
            (None, None) => crate::config::default_data_dir().join("config.toml"),
        };
        let mut config = EngineConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        if let Some(dir) = data_dir {
            config.data_dir = dir.to_path_buf();
        }
        Ok(Self { config, config_path })
    }

    /// Fail early when a command needs the server.
    pub fn require_server(&self) -> Result<()> {
        if self.config.base_url.is_empty() {
            anyhow::bail!(
                "no server configured: set base_url in {} or OUTPOST_BASE_URL",
                self.config_path.display()
            );
        }
        Ok(())
    }

    pub fn patterns(&self) -> Result<Arc<PatternTable>> {
        let table = PatternTable::load(self.config.patterns_path.as_deref()).context("loading pattern table")?;
        Ok(Arc::new(table))
    }

    /// Build an engine on the real HTTP transport.
    pub fn engine(&self, bus: EventBus) -> Result<Engine> {
        self.require_server()?;
        let jar = Arc::new(CookieJar::new());
        let transport = HttpTransport::new(Arc::clone(&jar), self.config.timeout())
            .context("building HTTP client")?;
        Engine::new(
            self.config.clone(),
            self.patterns()?,
            jar,
            Arc::new(transport),
            notify::from_config(self.config.telegram.as_ref()),
            bus,
        )
    }

    /// Spawn an engine that runs the startup sequence and wait for its
    /// first completed fetch cycle.
    pub async fn engine_with_snapshot(&self) -> Result<(EngineHandle, broadcast::Receiver<EngineEvent>)> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let handle = self.engine(bus)?.spawn();
        wait_for(&mut rx, COMMAND_TIMEOUT, |e| match e {
            EngineEvent::CycleCompleted { .. } => Some(Ok(())),
            EngineEvent::LoginFailed { message, .. } => Some(Err(anyhow::anyhow!("login failed: {message}"))),
            _ => None,
        })
        .await??;
        Ok((handle, rx))
    }
}

/// Read events until `pick` returns a value or `timeout` passes.
pub async fn wait_for<T>(
    rx: &mut broadcast::Receiver<EngineEvent>,
    timeout: Duration,
    mut pick: impl FnMut(&EngineEvent) -> Option<T>,
) -> Result<T> {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    output::print_event(&event);
                    if let Some(value) = pick(&event) {
                        return Ok(value);
                    }
                }
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "event receiver lagged"),
                Err(RecvError::Closed) => anyhow::bail!("engine stopped"),
            }
        }
    };
    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| anyhow::anyhow!("timed out after {}s", timeout.as_secs()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_data_dir_override_wins() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::load(None, Some(dir.path())).unwrap();
        assert_eq!(ctx.config.data_dir, dir.path());
        assert_eq!(ctx.config_path, dir.path().join("config.toml"));
    }

    #[test]
    fn test_require_server() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "base_url = \"https://ts1.example.com/\"\n").unwrap();
        let ctx = AppContext::load(None, Some(dir.path())).unwrap();
        if std::env::var("OUTPOST_BASE_URL").is_err() {
            assert_eq!(ctx.config.base_url, "https://ts1.example.com");
        }
        ctx.require_server().unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_picks_matching_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::LoginStarted);
        bus.emit(EngineEvent::RefreshScheduled { in_secs: 42 });
        let secs = wait_for(&mut rx, Duration::from_secs(1), |e| match e {
            EngineEvent::RefreshScheduled { in_secs } => Some(*in_secs),
            _ => None,
        })
        .await
        .unwrap();
        assert_eq!(secs, 42);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let err = wait_for(&mut rx, Duration::from_millis(20), |_| Some(()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
