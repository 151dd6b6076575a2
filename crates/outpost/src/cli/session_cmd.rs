// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI handlers for `outpost login` and `outpost fetch`.

use anyhow::Result;

use super::{output, wait_for, AppContext, COMMAND_TIMEOUT};
use crate::events::{EngineEvent, EventBus};

/// Log in with the configured credentials and save the session cookies.
pub async fn run_login(ctx: &AppContext) -> Result<()> {
    if ctx.config.credentials.is_none() {
        anyhow::bail!(
            "no credentials: set [credentials] in {} or OUTPOST_USERNAME/OUTPOST_PASSWORD",
            ctx.config_path.display()
        );
    }
    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let handle = ctx.engine(bus)?.without_startup().spawn();
    handle.login().await?;
    let outcome = wait_for(&mut rx, COMMAND_TIMEOUT, |e| match e {
        EngineEvent::LoginSucceeded => Some(Ok(())),
        EngineEvent::LoginFailed { message, .. } => Some(Err(anyhow::anyhow!("login failed: {message}"))),
        _ => None,
    })
    .await?;
    handle.shutdown().await?;
    outcome?;
    println!("  Session saved to {}.", ctx.config.cookies_path().display());
    Ok(())
}

/// Run one fetch cycle and print the village overview.
pub async fn run_fetch(ctx: &AppContext) -> Result<()> {
    let (handle, _rx) = ctx.engine_with_snapshot().await?;
    let snapshot = handle.snapshot().await?;
    handle.shutdown().await?;
    print!("{}", output::snapshot_table(&snapshot));
    Ok(())
}
