// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI handlers for `outpost troops` subcommands.

use anyhow::{Context, Result};

use super::AppContext;
use crate::events::ManagerKind;
use crate::model::{BuildingKind, VillageId};
use crate::scheduler::troops::countdown_bounds;
use crate::scheduler::{TroopKey, TroopRule, TroopScheduler};

fn open(ctx: &AppContext) -> Result<TroopScheduler> {
    let path = ctx.config.troop_rules_path();
    TroopScheduler::load(ManagerKind::Troops, &path, &mut rand::thread_rng())
        .with_context(|| format!("loading {}", path.display()))
}

/// Create or replace the rule for one building.
pub fn run_set(ctx: &AppContext, rule: TroopRule) -> Result<()> {
    if rule.troop_id.trim().is_empty() {
        anyhow::bail!("troop id must not be empty");
    }
    let mut scheduler = open(ctx)?;
    let (lo, hi) = countdown_bounds(rule.interval_minutes);
    let key = TroopKey {
        village_id: rule.village_id,
        building: rule.building,
    };
    scheduler.upsert(rule, &mut rand::thread_rng())?;
    println!("  Saved troop rule {key} (every {lo}-{hi}s).");
    Ok(())
}

pub fn run_list(ctx: &AppContext) -> Result<()> {
    let scheduler = open(ctx)?;
    let mut any = false;
    for rule in scheduler.rules() {
        if !any {
            println!(
                "  {:<10} {:<9} {:<20} {:>9} {:>8}",
                "VILLAGE", "BUILDING", "TROOP", "INTERVAL", "ENABLED"
            );
            any = true;
        }
        let troop = if rule.troop_name.is_empty() {
            rule.troop_id.clone()
        } else {
            format!("{} ({})", rule.troop_name, rule.troop_id)
        };
        println!(
            "  {:<10} {:<9} {:<20} {:>7}m {:>8}",
            rule.village_id,
            rule.building.to_string(),
            troop,
            rule.interval_minutes,
            if rule.enabled { "yes" } else { "no" }
        );
    }
    if !any {
        println!("  No troop rules.");
    }
    Ok(())
}

pub fn run_remove(ctx: &AppContext, village_id: VillageId, building: BuildingKind) -> Result<()> {
    let mut scheduler = open(ctx)?;
    let key = TroopKey { village_id, building };
    match scheduler.remove(&key)? {
        Some(_) => println!("  Removed troop rule {key}."),
        None => println!("  No troop rule {key}."),
    }
    Ok(())
}

pub fn run_toggle(ctx: &AppContext, village_id: VillageId, building: BuildingKind, enabled: bool) -> Result<()> {
    let mut scheduler = open(ctx)?;
    let key = TroopKey { village_id, building };
    match scheduler.set_enabled(&key, enabled, &mut rand::thread_rng())? {
        Some(_) if enabled => println!("  Enabled troop rule {key}."),
        Some(_) => println!("  Disabled troop rule {key}."),
        None => anyhow::bail!("no troop rule {key}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn rule() -> TroopRule {
        TroopRule {
            village_id: 11,
            building: BuildingKind::Stable,
            troop_id: "t4".into(),
            troop_name: "Equites Legati".into(),
            interval_minutes: 15,
            enabled: true,
        }
    }

    #[test]
    fn test_set_toggle_remove() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::load(None, Some(dir.path())).unwrap();
        run_set(&ctx, rule()).unwrap();

        run_toggle(&ctx, 11, BuildingKind::Stable, false).unwrap();
        let key = TroopKey {
            village_id: 11,
            building: BuildingKind::Stable,
        };
        let scheduler = open(&ctx).unwrap();
        assert!(!scheduler.get(&key).unwrap().enabled);
        assert_eq!(scheduler.remaining(&key), 0);

        run_remove(&ctx, 11, BuildingKind::Stable).unwrap();
        assert!(open(&ctx).unwrap().get(&key).is_none());
    }

    #[test]
    fn test_toggle_unknown_rule_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::load(None, Some(dir.path())).unwrap();
        assert!(run_toggle(&ctx, 1, BuildingKind::Barracks, true).is_err());
    }

    #[test]
    fn test_empty_troop_id_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = AppContext::load(None, Some(dir.path())).unwrap();
        let mut r = rule();
        r.troop_id = " ".into();
        assert!(run_set(&ctx, r).is_err());
    }
}
