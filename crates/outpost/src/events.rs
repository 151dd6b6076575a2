// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Engine event bus: typed events from every component.
//!
//! The EventBus is a `tokio::sync::broadcast` channel that carries
//! [`EngineEvent`] values. The CLI, the activity journal and the notifier
//! each subscribe independently. When no subscribers exist, events are
//! silently dropped.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::FailureKind;
use crate::model::{
    BuildingKind, Confidence, FarmListInfo, IncomingMovement, SlotId, Snapshot, VillageId,
    VillageSummary,
};
use crate::session::SessionHealth;

/// Which scheduling manager an event comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManagerKind {
    Construction,
    Troops,
    Farms,
}

/// Every event the engine emits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EngineEvent {
    // ── Fetch cycle ───────────────────────
    /// A full fetch cycle began.
    CycleStarted { cycle: u64 },
    /// The village list was read.
    VillagesDiscovered { villages: Vec<VillageSummary> },
    /// One page of one village was scraped.
    PageUpdated { village_id: VillageId, page: String },
    /// A village snapshot was replaced.
    VillageUpdated { village_id: VillageId, name: String },
    FetchProgress {
        completed: usize,
        total: usize,
        page: String,
    },
    FetchFailed {
        page: String,
        village_id: Option<VillageId>,
        kind: FailureKind,
        message: String,
    },
    /// Every page of the cycle completed. Carries the aggregate snapshot.
    CycleCompleted { cycle: u64, snapshot: Arc<Snapshot> },

    // ── Session ───────────────────────────
    LoginStarted,
    LoginSucceeded,
    LoginFailed { kind: FailureKind, message: String },
    /// The server no longer accepts the session; a new login is needed.
    SessionExpired { context: String },
    SessionHealth { health: SessionHealth },

    // ── Actions ───────────────────────────
    UpgradeStarted {
        village_id: VillageId,
        slot_id: SlotId,
        building_name: String,
        /// False when the response carried no queue marker.
        confirmed: bool,
    },
    UpgradeFailed {
        village_id: VillageId,
        slot_id: SlotId,
        kind: FailureKind,
        message: String,
    },
    TrainingStarted {
        village_id: VillageId,
        building: BuildingKind,
        troop_id: String,
        troop_name: String,
        count: u32,
        confirmed: bool,
    },
    TrainingFailed {
        village_id: VillageId,
        building: BuildingKind,
        troop_id: String,
        kind: FailureKind,
        message: String,
    },
    FarmListsFetched {
        village_id: VillageId,
        lists: Vec<FarmListInfo>,
    },
    FarmDispatched {
        village_id: VillageId,
        list_id: u64,
        targets: usize,
    },
    FarmDispatchFailed {
        village_id: VillageId,
        list_id: u64,
        kind: FailureKind,
        message: String,
    },
    /// The farm tab showed no active targets; the dispatch will run again.
    FarmRetryScheduled {
        village_id: VillageId,
        list_id: u64,
        attempt: u32,
    },
    IncomingAttacks {
        village_id: VillageId,
        confidence: Confidence,
        movements: Vec<IncomingMovement>,
    },

    // ── Managers ──────────────────────────
    BuildTaskStarted {
        village_id: VillageId,
        slot_id: SlotId,
        building_name: String,
        target_level: u32,
    },
    BuildTaskCompleted {
        village_id: VillageId,
        slot_id: SlotId,
        building_name: String,
        level: u32,
    },
    BuilderBusy {
        village_id: VillageId,
        remaining_secs: u64,
    },
    InsufficientResources {
        village_id: VillageId,
        building_name: String,
    },
    /// Per-second remaining time of one rule. Zero when stopped.
    RuleTimer {
        manager: ManagerKind,
        key: String,
        remaining_secs: u64,
    },
    RulesChanged { manager: ManagerKind },

    // ── Orchestrator ──────────────────────
    RefreshScheduled { in_secs: u64 },
    EngineStopped,
}

impl EngineEvent {
    /// Stable variant name, as used in the serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CycleStarted { .. } => "CycleStarted",
            Self::VillagesDiscovered { .. } => "VillagesDiscovered",
            Self::PageUpdated { .. } => "PageUpdated",
            Self::VillageUpdated { .. } => "VillageUpdated",
            Self::FetchProgress { .. } => "FetchProgress",
            Self::FetchFailed { .. } => "FetchFailed",
            Self::CycleCompleted { .. } => "CycleCompleted",
            Self::LoginStarted => "LoginStarted",
            Self::LoginSucceeded => "LoginSucceeded",
            Self::LoginFailed { .. } => "LoginFailed",
            Self::SessionExpired { .. } => "SessionExpired",
            Self::SessionHealth { .. } => "SessionHealth",
            Self::UpgradeStarted { .. } => "UpgradeStarted",
            Self::UpgradeFailed { .. } => "UpgradeFailed",
            Self::TrainingStarted { .. } => "TrainingStarted",
            Self::TrainingFailed { .. } => "TrainingFailed",
            Self::FarmListsFetched { .. } => "FarmListsFetched",
            Self::FarmDispatched { .. } => "FarmDispatched",
            Self::FarmDispatchFailed { .. } => "FarmDispatchFailed",
            Self::FarmRetryScheduled { .. } => "FarmRetryScheduled",
            Self::IncomingAttacks { .. } => "IncomingAttacks",
            Self::BuildTaskStarted { .. } => "BuildTaskStarted",
            Self::BuildTaskCompleted { .. } => "BuildTaskCompleted",
            Self::BuilderBusy { .. } => "BuilderBusy",
            Self::InsufficientResources { .. } => "InsufficientResources",
            Self::RuleTimer { .. } => "RuleTimer",
            Self::RulesChanged { .. } => "RulesChanged",
            Self::RefreshScheduled { .. } => "RefreshScheduled",
            Self::EngineStopped => "EngineStopped",
        }
    }

    /// Village the event is about, if any.
    pub fn village_id(&self) -> Option<VillageId> {
        match self {
            Self::PageUpdated { village_id, .. }
            | Self::VillageUpdated { village_id, .. }
            | Self::UpgradeStarted { village_id, .. }
            | Self::UpgradeFailed { village_id, .. }
            | Self::TrainingStarted { village_id, .. }
            | Self::TrainingFailed { village_id, .. }
            | Self::FarmListsFetched { village_id, .. }
            | Self::FarmDispatched { village_id, .. }
            | Self::FarmDispatchFailed { village_id, .. }
            | Self::FarmRetryScheduled { village_id, .. }
            | Self::IncomingAttacks { village_id, .. }
            | Self::BuildTaskStarted { village_id, .. }
            | Self::BuildTaskCompleted { village_id, .. }
            | Self::BuilderBusy { village_id, .. }
            | Self::InsufficientResources { village_id, .. } => Some(*village_id),
            Self::FetchFailed { village_id, .. } => *village_id,
            _ => None,
        }
    }

    /// One-line human description for user-facing events.
    ///
    /// `None` for high-frequency telemetry (timers, progress, page updates).
    pub fn describe(&self) -> Option<String> {
        let text = match self {
            Self::VillagesDiscovered { villages } => format!("{} villages found", villages.len()),
            Self::FetchFailed { page, message, .. } => format!("fetch {page} failed: {message}"),
            Self::CycleCompleted { snapshot, .. } => {
                format!("data refreshed for {} villages", snapshot.villages.len())
            }
            Self::LoginSucceeded => "login succeeded".to_string(),
            Self::LoginFailed { message, .. } => format!("login failed: {message}"),
            Self::SessionExpired { context } => format!("session expired ({context})"),
            Self::UpgradeStarted {
                building_name,
                confirmed,
                ..
            } => {
                if *confirmed {
                    format!("upgrade started: {building_name}")
                } else {
                    format!("upgrade probably started: {building_name}")
                }
            }
            Self::UpgradeFailed { slot_id, message, .. } => {
                format!("upgrade of slot {slot_id} failed: {message}")
            }
            Self::TrainingStarted {
                troop_name, count, ..
            } => format!("training {count} x {troop_name}"),
            Self::TrainingFailed { troop_id, message, .. } => {
                format!("training {troop_id} failed: {message}")
            }
            Self::FarmListsFetched { lists, .. } => format!("{} farm lists found", lists.len()),
            Self::FarmDispatched { list_id, targets, .. } => {
                format!("farm list {list_id} sent to {targets} targets")
            }
            Self::FarmDispatchFailed { list_id, message, .. } => {
                format!("farm list {list_id} failed: {message}")
            }
            Self::IncomingAttacks {
                confidence,
                movements,
                ..
            } => {
                let hostile: u32 = movements
                    .iter()
                    .filter(|m| m.kind.is_hostile())
                    .map(|m| m.count)
                    .sum();
                format!("{hostile} hostile movements incoming ({confidence:?})")
            }
            Self::BuildTaskStarted {
                building_name,
                target_level,
                ..
            } => format!("construction started: {building_name} toward level {target_level}"),
            Self::BuildTaskCompleted {
                building_name, level, ..
            } => format!("construction task done: {building_name} level {level}"),
            Self::InsufficientResources { building_name, .. } => {
                format!("not enough resources for {building_name}")
            }
            _ => return None,
        };
        Some(text)
    }

    /// Whether the event is worth pushing to the side-channel notifier.
    pub fn is_alert(&self) -> bool {
        match self {
            Self::LoginFailed { .. } | Self::SessionExpired { .. } => true,
            Self::IncomingAttacks { movements, .. } => movements.iter().any(|m| m.kind.is_hostile()),
            _ => false,
        }
    }
}

/// The central event bus.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. Silently ignores if no subscribers.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MovementKind;

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::UpgradeFailed {
            village_id: 7,
            slot_id: 19,
            kind: FailureKind::InsufficientResources,
            message: "upgrade link not found".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"UpgradeFailed\""));
        assert!(json.contains("insufficient_resources"));

        let parsed: EngineEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            EngineEvent::UpgradeFailed { slot_id, .. } => assert_eq!(slot_id, 19),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_cycle_completed_serializes_snapshot() {
        let event = EngineEvent::CycleCompleted {
            cycle: 2,
            snapshot: Arc::new(Snapshot::default()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "CycleCompleted");
        assert!(json["snapshot"]["villages"].is_object());
    }

    #[test]
    fn test_event_bus_emit_no_subscribers() {
        let bus = EventBus::new(16);
        bus.emit(EngineEvent::LoginStarted);
    }

    #[test]
    fn test_event_bus_subscribe_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        bus.emit(EngineEvent::BuilderBusy {
            village_id: 3,
            remaining_secs: 90,
        });
        let event = rx.try_recv().unwrap();
        assert_eq!(event.kind(), "BuilderBusy");
        assert_eq!(event.village_id(), Some(3));
    }

    #[test]
    fn test_alerts() {
        let hostile = EngineEvent::IncomingAttacks {
            village_id: 1,
            confidence: Confidence::Coarse,
            movements: vec![IncomingMovement {
                kind: MovementKind::Attack,
                count: 2,
                origin: None,
                arrival_in_secs: None,
            }],
        };
        assert!(hostile.is_alert());
        assert!(hostile.describe().unwrap().contains("2 hostile"));
        assert!(!EngineEvent::LoginSucceeded.is_alert());
        assert!(EngineEvent::RuleTimer {
            manager: ManagerKind::Farms,
            key: "12".into(),
            remaining_secs: 5,
        }
        .describe()
        .is_none());
    }
}
