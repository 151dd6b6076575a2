// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Farm-list rules, keyed by list id.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::interval::{IntervalScheduler, ScheduledRule};
use super::store::{numeric_key, RuleCodec};
use crate::actions::Operation;
use crate::error::StoreError;
use crate::model::VillageId;

pub const DEFAULT_INTERVAL_MINUTES: u32 = 30;

fn default_interval() -> u32 {
    DEFAULT_INTERVAL_MINUTES
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmRule {
    #[serde(skip)]
    pub list_id: u64,
    pub village_id: VillageId,
    #[serde(default)]
    pub list_name: String,
    #[serde(default = "default_interval")]
    pub interval_minutes: u32,
    #[serde(default)]
    pub enabled: bool,
}

impl ScheduledRule for FarmRule {
    type Key = u64;

    fn key(&self) -> u64 {
        self.list_id
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// The exact interval, no jitter. Zero counts as one minute.
    fn next_countdown<G: Rng>(&self, _rng: &mut G) -> u64 {
        u64::from(self.interval_minutes.max(1)) * 60
    }

    fn action(&self) -> Operation {
        Operation::DispatchFarm {
            village_id: self.village_id,
            list_id: self.list_id,
        }
    }
}

/// `{"lists": {listId: {villageId, listName, intervalMinutes, enabled}}}`.
pub struct FarmCodec;

impl RuleCodec for FarmCodec {
    type Rule = FarmRule;

    fn decode(root: Value) -> Result<Vec<FarmRule>, StoreError> {
        let Some(lists) = root.get("lists").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };
        lists
            .iter()
            .map(|(id, entry)| {
                let mut rule: FarmRule = serde_json::from_value(entry.clone())
                    .map_err(|e| StoreError::Shape(format!("farm rule {id}: {e}")))?;
                rule.list_id = numeric_key(id)?;
                Ok(rule)
            })
            .collect()
    }

    fn encode<'a>(rules: impl Iterator<Item = &'a FarmRule>) -> Value {
        let lists: BTreeMap<String, Value> = rules
            .map(|r| (r.list_id.to_string(), serde_json::to_value(r).unwrap_or(Value::Null)))
            .collect();
        json!({ "lists": lists })
    }
}

pub type FarmScheduler = IntervalScheduler<FarmCodec>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EngineEvent, ManagerKind};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn rule(list_id: u64, interval: u32) -> FarmRule {
        FarmRule {
            list_id,
            village_id: 9,
            list_name: "Oases".into(),
            interval_minutes: interval,
            enabled: true,
        }
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let rules = FarmCodec::decode(json!({"lists": {"77": {"villageId": 9}}})).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].list_id, 77);
        assert_eq!(rules[0].interval_minutes, DEFAULT_INTERVAL_MINUTES);
        assert!(!rules[0].enabled);
    }

    #[test]
    fn test_non_numeric_list_key_is_rejected() {
        let err = FarmCodec::decode(json!({"lists": {"abc": {"villageId": 9}}})).unwrap_err();
        assert_eq!(err.code(), "shape");
    }

    #[test]
    fn test_countdown_is_exact_interval() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(rule(1, 15).next_countdown(&mut rng), 900);
        assert_eq!(rule(1, 0).next_countdown(&mut rng), 60);
    }

    #[test]
    fn test_reload_restarts_enabled_rules_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("farm_rules.json");
        let mut rng = StdRng::seed_from_u64(0);
        {
            let mut s = FarmScheduler::load(ManagerKind::Farms, &path, &mut rng).unwrap();
            s.upsert(rule(1, 10), &mut rng).unwrap();
            s.upsert(FarmRule { enabled: false, ..rule(2, 10) }, &mut rng).unwrap();
        }
        let s = FarmScheduler::load(ManagerKind::Farms, &path, &mut rng).unwrap();
        assert_eq!(s.rules().count(), 2);
        assert_eq!(s.get(&1), Some(&rule(1, 10)));
        assert_eq!(s.remaining(&1), 600);
        assert_eq!(s.remaining(&2), 0);
    }

    #[test]
    fn test_tick_emits_timer_then_dispatch() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("farm_rules.json");
        let mut rng = StdRng::seed_from_u64(0);
        let mut s = FarmScheduler::load(ManagerKind::Farms, &path, &mut rng).unwrap();
        s.upsert(rule(4, 1), &mut rng).unwrap();

        let first = s.tick(&mut rng);
        assert!(first.fired.is_empty());
        assert!(matches!(
            first.events.as_slice(),
            [EngineEvent::RuleTimer { remaining_secs: 59, .. }]
        ));
        let fired: Vec<_> = (0..59).flat_map(|_| s.tick(&mut rng).fired).collect();
        assert_eq!(
            fired,
            vec![Operation::DispatchFarm {
                village_id: 9,
                list_id: 4
            }]
        );
        assert_eq!(s.remaining(&4), 60);
    }

    #[test]
    fn test_unknown_key_is_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("farm_rules.json");
        let mut rng = StdRng::seed_from_u64(0);
        let mut s = FarmScheduler::load(ManagerKind::Farms, &path, &mut rng).unwrap();
        assert!(s.remove(&5).unwrap().is_none());
        assert!(s.set_enabled(&5, true, &mut rng).unwrap().is_none());
        assert!(!path.exists());
    }
}
