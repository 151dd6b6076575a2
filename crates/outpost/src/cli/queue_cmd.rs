// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI handlers for `outpost queue` subcommands.
//!
//! These edit the build queue file directly. A running engine picks the
//! change up only after restart.

use anyhow::{Context, Result};

use super::AppContext;
use crate::model::{SlotId, VillageId};
use crate::scheduler::{BuildTask, ConstructionManager};

fn open(ctx: &AppContext) -> Result<ConstructionManager> {
    let path = ctx.config.build_queue_path();
    ConstructionManager::load(&path).with_context(|| format!("loading {}", path.display()))
}

/// Append a task to a village's queue.
pub fn run_add(ctx: &AppContext, task: BuildTask) -> Result<()> {
    if task.target_level == 0 {
        anyhow::bail!("target level must be at least 1");
    }
    let mut manager = open(ctx)?;
    let (village_id, slot_id, target) = (task.village_id, task.slot_id, task.target_level);
    manager.add(task)?;
    println!("  Queued slot {slot_id} -> level {target} in village {village_id}.");
    Ok(())
}

pub fn run_list(ctx: &AppContext, village: Option<VillageId>) -> Result<()> {
    let manager = open(ctx)?;
    if manager.is_empty() {
        println!("  Build queue is empty.");
        return Ok(());
    }
    println!(
        "  {:<10} {:>5} {:<20} {:>9} {:>8}",
        "VILLAGE", "SLOT", "BUILDING", "LEVEL", "PRIORITY"
    );
    for task in manager.all().filter(|t| village.map_or(true, |v| v == t.village_id)) {
        println!(
            "  {:<10} {:>5} {:<20} {:>4}->{:<3} {:>8}",
            task.village_id, task.slot_id, task.building_name, task.current_level, task.target_level, task.priority
        );
    }
    Ok(())
}

pub fn run_remove(ctx: &AppContext, village_id: VillageId, slot_id: SlotId) -> Result<()> {
    let mut manager = open(ctx)?;
    if manager.remove(village_id, slot_id)? {
        println!("  Removed slot {slot_id} from village {village_id}.");
    } else {
        println!("  No task for slot {slot_id} in village {village_id}.");
    }
    Ok(())
}
