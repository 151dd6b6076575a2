// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! `outpost run`: the long-running engine with auto-refresh.

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::broadcast::error::RecvError;

use super::{output, AppContext};
use crate::activity::{self, ActivityJournal};
use crate::config::RefreshMode;
use crate::events::{EngineEvent, EventBus};

pub async fn run(mut ctx: AppContext, refresh: Option<RefreshMode>) -> Result<()> {
    if let Some(mode) = refresh {
        ctx.config.refresh = mode;
    }
    let bus = EventBus::default();
    let journal = ActivityJournal::open(&ctx.config.activity_path())?;
    let journal_task = activity::spawn(&bus, journal);
    let mut rx = bus.subscribe();
    let handle = ctx.engine(bus)?.spawn();
    tracing::info!(server = %ctx.config.base_url, refresh = ?ctx.config.refresh, "engine running; Ctrl-C to stop");

    let mut bar: Option<ProgressBar> = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            received = rx.recv() => match received {
                Ok(event) => render(&mut bar, &event),
                Err(RecvError::Lagged(skipped)) => tracing::debug!(skipped, "display lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Some(bar) = bar.take() {
        bar.finish_and_clear();
    }
    drop(rx);
    handle.shutdown().await?;
    journal_task.await.context("activity journal task failed")?;
    Ok(())
}

fn render(bar: &mut Option<ProgressBar>, event: &EngineEvent) {
    match event {
        EngineEvent::CycleStarted { .. } => {
            let pb = ProgressBar::new(1);
            if let Ok(style) = ProgressStyle::with_template("{spinner} fetch [{bar:30}] {pos}/{len} {msg}") {
                pb.set_style(style.progress_chars("=> "));
            }
            *bar = Some(pb);
        }
        EngineEvent::FetchProgress { completed, total, page } => {
            if let Some(pb) = bar.as_ref() {
                pb.set_length(*total as u64);
                pb.set_position(*completed as u64);
                pb.set_message(page.clone());
            }
        }
        EngineEvent::CycleCompleted { snapshot, .. } => {
            if let Some(pb) = bar.take() {
                pb.finish_and_clear();
            }
            print!("{}", output::snapshot_table(snapshot));
        }
        _ => {}
    }
    let Some(line) = output::event_line(event) else {
        return;
    };
    match bar.as_ref() {
        Some(pb) => pb.println(line),
        None => println!("{line}"),
    }
}
