// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI handlers for `outpost farms` subcommands.
//!
//! `lists` and `send` talk to the server through a short-lived engine; the
//! rule commands only edit the farm rule file.

use anyhow::{Context, Result};

use super::{wait_for, AppContext, COMMAND_TIMEOUT};
use crate::events::{EngineEvent, ManagerKind};
use crate::model::VillageId;
use crate::scheduler::{FarmRule, FarmScheduler};

fn open(ctx: &AppContext) -> Result<FarmScheduler> {
    let path = ctx.config.farm_rules_path();
    FarmScheduler::load(ManagerKind::Farms, &path, &mut rand::thread_rng())
        .with_context(|| format!("loading {}", path.display()))
}

/// Print the farm lists visible from a village.
pub async fn run_lists(ctx: &AppContext, village_id: VillageId) -> Result<()> {
    let (handle, mut rx) = ctx.engine_with_snapshot().await?;
    handle.fetch_farm_lists(village_id).await?;
    let lists = wait_for(&mut rx, COMMAND_TIMEOUT, |e| match e {
        EngineEvent::FarmListsFetched { village_id: v, lists } if *v == village_id => Some(Ok(lists.clone())),
        EngineEvent::FetchFailed {
            village_id: Some(v),
            message,
            ..
        } if *v == village_id => Some(Err(anyhow::anyhow!("{message}"))),
        _ => None,
    })
    .await??;
    handle.shutdown().await?;

    if lists.is_empty() {
        println!("  No farm lists in village {village_id}.");
        return Ok(());
    }
    println!("  {:<10} {:<30} {:>6}", "LIST", "NAME", "SLOTS");
    for list in &lists {
        println!("  {:<10} {:<30} {:>6}", list.id, list.name, list.slots);
    }
    Ok(())
}

/// Dispatch one farm list now.
pub async fn run_send(ctx: &AppContext, village_id: VillageId, list_id: u64) -> Result<()> {
    let (handle, mut rx) = ctx.engine_with_snapshot().await?;
    handle.send_farm(village_id, list_id).await?;
    let outcome = wait_for(&mut rx, COMMAND_TIMEOUT, |e| match e {
        EngineEvent::FarmDispatched { list_id: l, targets, .. } if *l == list_id => Some(Ok(*targets)),
        EngineEvent::FarmDispatchFailed { list_id: l, message, .. } if *l == list_id => {
            Some(Err(anyhow::anyhow!("dispatch failed: {message}")))
        }
        _ => None,
    })
    .await?;
    handle.shutdown().await?;
    let targets = outcome?;
    println!("  Sent farm list {list_id} ({targets} targets).");
    Ok(())
}

pub fn run_set(ctx: &AppContext, rule: FarmRule) -> Result<()> {
    let mut scheduler = open(ctx)?;
    let (list_id, minutes, enabled) = (rule.list_id, rule.interval_minutes.max(1), rule.enabled);
    scheduler.upsert(rule, &mut rand::thread_rng())?;
    let state = if enabled { "enabled" } else { "disabled" };
    println!("  Saved farm rule {list_id} (every {minutes}m, {state}).");
    Ok(())
}

pub fn run_list(ctx: &AppContext) -> Result<()> {
    let scheduler = open(ctx)?;
    let mut rules = scheduler.rules().peekable();
    if rules.peek().is_none() {
        println!("  No farm rules.");
        return Ok(());
    }
    println!(
        "  {:<10} {:<10} {:<24} {:>9} {:>8}",
        "LIST", "VILLAGE", "NAME", "INTERVAL", "ENABLED"
    );
    for rule in rules {
        println!(
            "  {:<10} {:<10} {:<24} {:>8}m {:>8}",
            rule.list_id,
            rule.village_id,
            rule.list_name,
            rule.interval_minutes,
            if rule.enabled { "yes" } else { "no" }
        );
    }
    Ok(())
}

pub fn run_remove(ctx: &AppContext, list_id: u64) -> Result<()> {
    let mut scheduler = open(ctx)?;
    match scheduler.remove(&list_id)? {
        Some(_) => println!("  Removed farm rule {list_id}."),
        None => println!("  No farm rule {list_id}."),
    }
    Ok(())
}

pub fn run_toggle(ctx: &AppContext, list_id: u64, enabled: bool) -> Result<()> {
    let mut scheduler = open(ctx)?;
    if scheduler.set_enabled(&list_id, enabled, &mut rand::thread_rng())?.is_none() {
        anyhow::bail!("no farm rule {list_id}");
    }
    let state = if enabled { "Enabled" } else { "Disabled" };
    println!("  {state} farm rule {list_id}.");
    Ok(())
}
