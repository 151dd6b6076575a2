// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tracing setup: console output plus a daily-rotated file under the data
//! directory.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Days of log files kept.
const MAX_LOG_FILES: usize = 14;

/// Install the global subscriber. Keep the returned guard alive for the
/// program's lifetime or buffered file output is lost.
///
/// `RUST_LOG` wins over `verbose`.
pub fn init(log_dir: &Path, json: bool, verbose: bool) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir).with_context(|| format!("creating {}", log_dir.display()))?;
    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("outpost")
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(log_dir)
        .context("creating log file appender")?;
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "outpost=debug" } else { "outpost=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let console = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_target(false).with_writer(std::io::stderr).boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .try_init()
        .context("installing tracing subscriber")?;
    Ok(guard)
}
