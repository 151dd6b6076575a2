// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Troop-training rules: at most one per military building per village.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::interval::{IntervalScheduler, ScheduledRule};
use super::store::{numeric_key, RuleCodec};
use crate::actions::Operation;
use crate::error::StoreError;
use crate::model::{BuildingKind, VillageId};

/// Interval given to rules migrated from the flat file shape.
pub const LEGACY_INTERVAL_MINUTES: u32 = 5;

/// Lower bound of any training countdown.
pub const MIN_COUNTDOWN_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TroopRule {
    #[serde(skip)]
    pub village_id: VillageId,
    pub building: BuildingKind,
    pub troop_id: String,
    pub troop_name: String,
    pub interval_minutes: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TroopKey {
    pub village_id: VillageId,
    pub building: BuildingKind,
}

impl fmt::Display for TroopKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.village_id, self.building)
    }
}

/// Countdown bounds for an interval: the interval plus or minus 20%,
/// never below [`MIN_COUNTDOWN_SECS`].
pub fn countdown_bounds(interval_minutes: u32) -> (u64, u64) {
    let base = u64::from(interval_minutes) * 60;
    let lo = (base * 8 / 10).max(MIN_COUNTDOWN_SECS);
    let hi = (base * 12 / 10).max(lo);
    (lo, hi)
}

impl ScheduledRule for TroopRule {
    type Key = TroopKey;

    fn key(&self) -> TroopKey {
        TroopKey {
            village_id: self.village_id,
            building: self.building,
        }
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn next_countdown<G: Rng>(&self, rng: &mut G) -> u64 {
        let (lo, hi) = countdown_bounds(self.interval_minutes);
        rng.gen_range(lo..=hi)
    }

    fn action(&self) -> Operation {
        Operation::Train {
            village_id: self.village_id,
            building: self.building,
            troop_id: self.troop_id.clone(),
            troop_name: self.troop_name.clone(),
        }
    }
}

/// `{"villages": {vid: {building: rule}}}`.
///
/// The flat `{"villages": {vid: {troopId, troopName, building}}}` shape is
/// migrated on read to one enabled rule at the legacy interval.
pub struct TroopCodec;

impl RuleCodec for TroopCodec {
    type Rule = TroopRule;

    fn decode(root: Value) -> Result<Vec<TroopRule>, StoreError> {
        let Some(villages) = root.get("villages").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };
        let mut rules = Vec::new();
        for (vid, entry) in villages {
            let village_id = numeric_key(vid)?;
            let Some(entry) = entry.as_object() else {
                return Err(StoreError::Shape(format!("village {vid} is not an object")));
            };
            if entry.contains_key("troopId") {
                tracing::info!(village_id, "migrating flat troop rule");
                rules.push(legacy_rule(village_id, entry)?);
                continue;
            }
            for (building, rule) in entry {
                let mut rule: TroopRule = serde_json::from_value(rule.clone())
                    .map_err(|e| StoreError::Shape(format!("troop rule {vid}/{building}: {e}")))?;
                rule.village_id = village_id;
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    fn is_legacy(root: &Value) -> bool {
        root.get("villages")
            .and_then(Value::as_object)
            .is_some_and(|villages| villages.values().any(|v| v.get("troopId").is_some()))
    }

    fn encode<'a>(rules: impl Iterator<Item = &'a TroopRule>) -> Value {
        let mut villages: BTreeMap<String, Map<String, Value>> = BTreeMap::new();
        for rule in rules {
            let value = serde_json::to_value(rule).unwrap_or(Value::Null);
            villages
                .entry(rule.village_id.to_string())
                .or_default()
                .insert(rule.building.to_string(), value);
        }
        json!({ "villages": villages })
    }
}

fn legacy_rule(village_id: VillageId, entry: &Map<String, Value>) -> Result<TroopRule, StoreError> {
    let text = |k: &str| entry.get(k).and_then(Value::as_str).unwrap_or_default().to_string();
    let building = text("building")
        .parse()
        .map_err(|e: String| StoreError::Shape(format!("legacy troop rule for {village_id}: {e}")))?;
    Ok(TroopRule {
        village_id,
        building,
        troop_id: text("troopId"),
        troop_name: text("troopName"),
        interval_minutes: LEGACY_INTERVAL_MINUTES,
        enabled: true,
    })
}

pub type TroopScheduler = IntervalScheduler<TroopCodec>;
