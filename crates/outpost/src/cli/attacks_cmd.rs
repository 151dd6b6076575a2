// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI handler for `outpost attacks`.

use anyhow::Result;

use super::{wait_for, AppContext, COMMAND_TIMEOUT};
use crate::events::EngineEvent;
use crate::model::{Confidence, IncomingMovement, VillageId};

/// Read the rally point of one village and list incoming movements.
pub async fn run(ctx: &AppContext, village_id: VillageId) -> Result<()> {
    let (handle, mut rx) = ctx.engine_with_snapshot().await?;
    handle.incoming_attacks(village_id).await?;
    let outcome = wait_for(&mut rx, COMMAND_TIMEOUT, |e| match e {
        EngineEvent::IncomingAttacks {
            village_id: v,
            confidence: Confidence::Detailed,
            movements,
        } if *v == village_id => Some(Ok(movements.clone())),
        EngineEvent::FetchFailed {
            village_id: Some(v),
            message,
            ..
        } if *v == village_id => Some(Err(anyhow::anyhow!("{message}"))),
        _ => None,
    })
    .await?;
    handle.shutdown().await?;
    print_movements(village_id, &outcome?);
    Ok(())
}

fn print_movements(village_id: VillageId, movements: &[IncomingMovement]) {
    if movements.is_empty() {
        println!("  Nothing incoming to village {village_id}.");
        return;
    }
    println!("  {:<12} {:>6} {:<24} {:>10}", "KIND", "COUNT", "ORIGIN", "ARRIVAL");
    for m in movements {
        let arrival = m
            .arrival_in_secs
            .map(|s| format!("{}:{:02}:{:02}", s / 3600, (s / 60) % 60, s % 60))
            .unwrap_or_else(|| "?".into());
        println!(
            "  {:<12} {:>6} {:<24} {:>10}",
            format!("{:?}", m.kind).to_lowercase(),
            m.count,
            m.origin.as_deref().unwrap_or("-"),
            arrival
        );
    }
}
