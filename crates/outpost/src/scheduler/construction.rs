// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Construction queue.
//!
//! Unlike the interval schedulers this manager is driven by snapshots: every
//! completed fetch cycle is evaluated against the per-village task lists.
//! Its only timer is the builder wait, which asks for a fresh cycle once the
//! running construction should have finished.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::countdown::Countdowns;
use super::store::{self, numeric_key, RuleCodec};
use crate::actions::Operation;
use crate::error::StoreError;
use crate::events::{EngineEvent, ManagerKind};
use crate::model::{SlotId, Snapshot, VillageId};

/// Resource floor used as the affordability check. Building-independent;
/// real per-level costs are not consulted.
pub const AFFORD_FLOOR: u64 = 100;

/// Extra wait added to the builder's remaining time, in seconds.
const WAIT_BUFFER_SECS: std::ops::RangeInclusive<u64> = 10..=30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildTask {
    pub village_id: VillageId,
    pub slot_id: SlotId,
    #[serde(default)]
    pub current_level: u32,
    pub target_level: u32,
    #[serde(default)]
    pub building_name: String,
    #[serde(default)]
    pub priority: i32,
}

/// `{"queues": {vid: [task, ...]}}`. The flat `{"queue": [...]}` shape is
/// grouped by village on read.
pub struct QueueCodec;

impl RuleCodec for QueueCodec {
    type Rule = BuildTask;

    fn is_legacy(root: &Value) -> bool {
        root.get("queues").is_none() && root.get("queue").is_some()
    }

    fn decode(root: Value) -> Result<Vec<BuildTask>, StoreError> {
        let parse = |v: &Value| {
            serde_json::from_value::<BuildTask>(v.clone())
                .map_err(|e| StoreError::Shape(format!("build task: {e}")))
        };
        if let Some(queues) = root.get("queues").and_then(Value::as_object) {
            let mut tasks = Vec::new();
            for (vid, list) in queues {
                let village_id = numeric_key(vid)?;
                for item in list.as_array().map(Vec::as_slice).unwrap_or_default() {
                    let mut task = parse(item)?;
                    task.village_id = village_id;
                    tasks.push(task);
                }
            }
            return Ok(tasks);
        }
        root.get("queue")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(parse)
            .collect()
    }

    fn encode<'a>(tasks: impl Iterator<Item = &'a BuildTask>) -> Value {
        let mut queues: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for task in tasks {
            queues
                .entry(task.village_id.to_string())
                .or_default()
                .push(serde_json::to_value(task).unwrap_or(Value::Null));
        }
        json!({ "queues": queues })
    }
}

/// Result of evaluating the queue against one snapshot.
#[derive(Debug, Default)]
pub struct ConstructionPass {
    /// At most one upgrade per village.
    pub operations: Vec<Operation>,
    pub events: Vec<EngineEvent>,
}

/// Result of one timer tick.
#[derive(Debug, Default)]
pub struct ConstructionTick {
    pub events: Vec<EngineEvent>,
    /// A builder wait expired; the caller should run a fetch cycle.
    pub refresh_requested: bool,
}

pub struct ConstructionManager {
    path: PathBuf,
    queues: BTreeMap<VillageId, Vec<BuildTask>>,
    waits: Countdowns<VillageId>,
}

impl ConstructionManager {
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let root = store::read_json(path)?;
        let legacy = root.as_ref().is_some_and(QueueCodec::is_legacy);
        let tasks = match root {
            Some(root) => QueueCodec::decode(root)?,
            None => Vec::new(),
        };
        let mut manager = Self {
            path: path.to_path_buf(),
            queues: BTreeMap::new(),
            waits: Countdowns::new(),
        };
        for task in tasks {
            manager.queues.entry(task.village_id).or_default().push(task);
        }
        for list in manager.queues.values_mut() {
            list.sort_by_key(|t| t.priority);
        }
        if legacy {
            tracing::info!(path = %path.display(), "migrating flat construction queue");
            manager.save()?;
        }
        tracing::info!(villages = manager.queues.len(), tasks = manager.len(), "construction queue loaded");
        Ok(manager)
    }

    pub fn tasks(&self, village_id: VillageId) -> &[BuildTask] {
        self.queues.get(&village_id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn all(&self) -> impl Iterator<Item = &BuildTask> {
        self.queues.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Append a task, keeping the village's list ordered by priority.
    /// Equal priorities keep insertion order.
    pub fn add(&mut self, task: BuildTask) -> Result<Vec<EngineEvent>, StoreError> {
        tracing::info!(
            village_id = task.village_id,
            slot_id = task.slot_id,
            target = task.target_level,
            "build task added"
        );
        let list = self.queues.entry(task.village_id).or_default();
        list.push(task);
        list.sort_by_key(|t| t.priority);
        self.save()?;
        Ok(vec![changed()])
    }

    /// Remove every task for `slot_id` in the village. `false` when none
    /// matched.
    pub fn remove(&mut self, village_id: VillageId, slot_id: SlotId) -> Result<bool, StoreError> {
        let Some(list) = self.queues.get_mut(&village_id) else {
            return Ok(false);
        };
        let before = list.len();
        list.retain(|t| t.slot_id != slot_id);
        if list.len() == before {
            return Ok(false);
        }
        if list.is_empty() {
            self.queues.remove(&village_id);
            self.waits.stop(&village_id);
        }
        self.save()?;
        tracing::info!(village_id, slot_id, "build task removed");
        Ok(true)
    }

    /// Evaluate every village's queue against a fresh snapshot.
    ///
    /// Tasks whose target level the snapshot already shows are dropped
    /// first. A busy builder then skips the village and arms its wait.
    /// Otherwise the head task is started if the village passes the
    /// resource floor.
    pub fn evaluate<G: Rng>(&mut self, snapshot: &Snapshot, rng: &mut G) -> Result<ConstructionPass, StoreError> {
        let mut pass = ConstructionPass::default();
        let mut dirty = false;
        let village_ids: Vec<VillageId> = self.queues.keys().copied().collect();

        for village_id in village_ids {
            let Some(village) = snapshot.village(village_id) else {
                continue;
            };
            let Some(list) = self.queues.get_mut(&village_id) else {
                continue;
            };

            let mut kept = Vec::with_capacity(list.len());
            for task in list.drain(..) {
                let level = village.level_of(task.slot_id).unwrap_or(0);
                if level >= task.target_level {
                    tracing::info!(village_id, slot_id = task.slot_id, level, "build task complete");
                    pass.events.push(EngineEvent::BuildTaskCompleted {
                        village_id,
                        slot_id: task.slot_id,
                        building_name: task.building_name,
                        level,
                    });
                    dirty = true;
                } else {
                    kept.push(BuildTask {
                        current_level: level,
                        ..task
                    });
                }
            }
            *list = kept;
            let Some(head) = list.first() else {
                self.queues.remove(&village_id);
                self.waits.stop(&village_id);
                continue;
            };

            if !village.builder_idle() {
                let remaining = village.builder_remaining().unwrap_or(0);
                let wait = remaining + rng.gen_range(WAIT_BUFFER_SECS);
                self.waits.start(village_id, wait);
                tracing::debug!(village_id, remaining, wait, "builder busy");
                pass.events.push(EngineEvent::BuilderBusy {
                    village_id,
                    remaining_secs: remaining,
                });
                continue;
            }
            self.waits.stop(&village_id);

            if !village.resources.all_at_least(AFFORD_FLOOR) {
                tracing::debug!(village_id, building = %head.building_name, "not enough resources");
                pass.events.push(EngineEvent::InsufficientResources {
                    village_id,
                    building_name: head.building_name.clone(),
                });
                continue;
            }

            tracing::info!(
                village_id,
                slot_id = head.slot_id,
                level = head.current_level,
                target = head.target_level,
                "starting build task"
            );
            pass.operations.push(Operation::Upgrade {
                village_id,
                slot_id: head.slot_id,
            });
            pass.events.push(EngineEvent::BuildTaskStarted {
                village_id,
                slot_id: head.slot_id,
                building_name: head.building_name.clone(),
                target_level: head.target_level,
            });
        }

        if dirty {
            self.save()?;
            pass.events.push(changed());
        }
        Ok(pass)
    }

    /// Advance the builder waits by one second.
    pub fn tick(&mut self) -> ConstructionTick {
        let elapsed = self.waits.tick();
        let mut out = ConstructionTick::default();
        for (village_id, remaining_secs) in elapsed.running {
            out.events.push(EngineEvent::RuleTimer {
                manager: ManagerKind::Construction,
                key: village_id.to_string(),
                remaining_secs,
            });
        }
        for village_id in elapsed.expired {
            tracing::info!(village_id, "builder wait over, requesting refresh");
            out.events.push(EngineEvent::RuleTimer {
                manager: ManagerKind::Construction,
                key: village_id.to_string(),
                remaining_secs: 0,
            });
            out.refresh_requested = true;
        }
        out
    }

    fn save(&self) -> Result<(), StoreError> {
        store::save::<QueueCodec>(&self.path, self.all())
    }
}

fn changed() -> EngineEvent {
    EngineEvent::RulesChanged {
        manager: ManagerKind::Construction,
    }
}
