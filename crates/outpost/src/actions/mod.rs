// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Multi-step actions built on the request pipeline.
//!
//! Each action is a short chain of round-trips. The step an in-flight
//! request belongs to travels with it as an [`OperationState`], a tagged
//! union whose variants carry the typed context that step needs. When the
//! response arrives, [`resume`] dispatches to the owning machine, which
//! either issues the next request or finishes with events.

pub mod attacks;
pub mod farm;
pub mod login;
pub mod train;
pub mod upgrade;

use std::collections::HashMap;

use regex::Regex;

use crate::config::{Credentials, RetryConfig};
use crate::error::{FailureKind, TransportError};
use crate::events::EngineEvent;
use crate::extraction::PatternTable;
use crate::model::{BuildingKind, SlotId, Snapshot, VillageId};
use crate::pipeline::{Completion, PageResponse, PendingRequest};

// ── Intents ──────────────────────────────────────────────────────────────────

/// An action request, before its first round-trip.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Login(Credentials),
    Upgrade {
        village_id: VillageId,
        slot_id: SlotId,
    },
    Train {
        village_id: VillageId,
        building: BuildingKind,
        troop_id: String,
        troop_name: String,
    },
    DispatchFarm {
        village_id: VillageId,
        list_id: u64,
    },
    FetchFarmLists {
        village_id: VillageId,
    },
    IncomingAttacks {
        village_id: VillageId,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login(_) => "login",
            Self::Upgrade { .. } => "upgrade",
            Self::Train { .. } => "train",
            Self::DispatchFarm { .. } => "farm",
            Self::FetchFarmLists { .. } => "farm-lists",
            Self::IncomingAttacks { .. } => "attacks",
        }
    }

    /// Build the first request. Some operations finish (or fail) without
    /// one, and some emit events up front.
    pub fn start(self, ctx: &ActionContext<'_>, snapshot: &Snapshot) -> Started {
        match self {
            Self::Login(creds) => Started::request(login::start(ctx, &creds)),
            Self::Upgrade { village_id, slot_id } => {
                Started::request(upgrade::start(ctx, village_id, slot_id))
            }
            Self::Train {
                village_id,
                building,
                troop_id,
                troop_name,
            } => {
                let slot = snapshot
                    .village(village_id)
                    .and_then(|v| v.slot_of_gid(building.gid()));
                match slot {
                    Some(slot_id) => Started::request(train::start(
                        ctx,
                        train::TrainOrder {
                            village_id,
                            building,
                            slot_id,
                            troop_id,
                            troop_name,
                        },
                    )),
                    None => Started::events(vec![EngineEvent::TrainingFailed {
                        village_id,
                        building,
                        troop_id,
                        kind: FailureKind::NotFound,
                        message: format!("no {building} in village {village_id}"),
                    }]),
                }
            }
            Self::DispatchFarm { village_id, list_id } => {
                let order = farm::FarmOrder {
                    village_id,
                    list_id,
                    rally_slot: rally_slot(ctx, snapshot, village_id),
                };
                Started::request(farm::start_dispatch(ctx, order))
            }
            Self::FetchFarmLists { village_id } => Started::request(farm::start_discovery(
                ctx,
                village_id,
                rally_slot(ctx, snapshot, village_id),
            )),
            Self::IncomingAttacks { village_id } => {
                let mut started = Started::request(attacks::start(
                    ctx,
                    village_id,
                    rally_slot(ctx, snapshot, village_id),
                ));
                if let Some(event) = snapshot
                    .summary(village_id)
                    .and_then(|s| attacks::coarse_report(ctx.patterns, s))
                {
                    started.events.push(event);
                }
                started
            }
        }
    }
}

fn rally_slot(ctx: &ActionContext<'_>, snapshot: &Snapshot, village_id: VillageId) -> SlotId {
    snapshot
        .village(village_id)
        .and_then(|v| v.slot_of_gid(ctx.patterns.farm.rally_point_gid))
        .unwrap_or(ctx.patterns.farm.default_rally_slot)
}

/// Result of [`Operation::start`].
#[derive(Debug, Default)]
pub struct Started {
    pub request: Option<PendingRequest>,
    pub events: Vec<EngineEvent>,
}

impl Started {
    fn request(request: PendingRequest) -> Self {
        Self {
            request: Some(request),
            events: Vec::new(),
        }
    }

    fn events(events: Vec<EngineEvent>) -> Self {
        Self {
            request: None,
            events,
        }
    }
}

// ── Steps ────────────────────────────────────────────────────────────────────

/// The step an in-flight action request belongs to.
#[derive(Debug, Clone)]
pub enum OperationState {
    Login(login::LoginStep),
    Upgrade(upgrade::UpgradeStep),
    Train(train::TrainStep),
    Farm(farm::FarmStep),
    FarmLists(farm::DiscoveryStep),
    Attacks(attacks::AttacksStep),
}

/// What a step produced.
#[derive(Debug)]
pub enum Transition {
    /// Issue the next request of the same operation.
    Next {
        request: PendingRequest,
        events: Vec<EngineEvent>,
    },
    /// The operation is over.
    Done(Vec<EngineEvent>),
    /// The response was login markup. `replay` is re-run after re-login.
    SessionLost {
        context: String,
        events: Vec<EngineEvent>,
        replay: Option<Operation>,
    },
}

impl Transition {
    pub fn events(&self) -> &[EngineEvent] {
        match self {
            Self::Next { events, .. } | Self::Done(events) | Self::SessionLost { events, .. } => events,
        }
    }
}

/// Read-only inputs every step needs, plus the farm retry counters.
pub struct ActionContext<'a> {
    pub base_url: &'a str,
    pub patterns: &'a PatternTable,
    pub retry: &'a RetryConfig,
    /// Whether the auth cookie is currently held.
    pub authenticated: bool,
    pub farm_retries: &'a mut RetryContexts,
}

/// Attempt counters per logical operation, keyed by a composite id.
///
/// Incremented when an attempt comes back empty, reset on any terminal
/// outcome.
#[derive(Debug, Default)]
pub struct RetryContexts {
    counts: HashMap<String, u32>,
}

impl RetryContexts {
    pub fn increment(&mut self, key: &str) -> u32 {
        let count = self.counts.entry(key.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn get(&self, key: &str) -> u32 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn reset(&mut self, key: &str) {
        self.counts.remove(key);
    }
}

/// Continue the operation an action completion belongs to.
pub fn resume(state: OperationState, ctx: &mut ActionContext<'_>, completion: Completion) -> Transition {
    let response = match completion.result {
        Ok(r) => r,
        Err(err) => return network_failure(state, ctx, &err),
    };
    match state {
        OperationState::Login(step) => login::resume(step, ctx, &response),
        OperationState::Upgrade(step) => upgrade::resume(step, ctx, &completion.request, &response),
        OperationState::Train(step) => train::resume(step, ctx, &completion.request, &response),
        OperationState::Farm(step) => farm::resume(step, ctx, &completion.request, &response),
        OperationState::FarmLists(step) => farm::resume_discovery(step, ctx, &response),
        OperationState::Attacks(step) => attacks::resume(step, ctx, &response),
    }
}

fn network_failure(state: OperationState, ctx: &mut ActionContext<'_>, err: &TransportError) -> Transition {
    let kind = match err {
        TransportError::ServerError(_) => FailureKind::Server,
        _ => FailureKind::Network,
    };
    let message = err.to_string();
    tracing::warn!(error = %err, "action request failed");
    let event = match state {
        OperationState::Login(_) => EngineEvent::LoginFailed { kind, message },
        OperationState::Upgrade(step) => {
            let (village_id, slot_id) = step.target();
            EngineEvent::UpgradeFailed {
                village_id,
                slot_id,
                kind,
                message,
            }
        }
        OperationState::Train(step) => {
            let order = step.order();
            EngineEvent::TrainingFailed {
                village_id: order.village_id,
                building: order.building,
                troop_id: order.troop_id.clone(),
                kind,
                message,
            }
        }
        OperationState::Farm(step) => {
            let order = step.order();
            ctx.farm_retries.reset(&order.retry_key());
            EngineEvent::FarmDispatchFailed {
                village_id: order.village_id,
                list_id: order.list_id,
                kind,
                message,
            }
        }
        OperationState::FarmLists(step) => EngineEvent::FetchFailed {
            page: "farmLists".to_string(),
            village_id: Some(step.village_id),
            kind,
            message,
        },
        OperationState::Attacks(step) => EngineEvent::FetchFailed {
            page: "rallyIncoming".to_string(),
            village_id: Some(step.village_id),
            kind,
            message,
        },
    };
    Transition::Done(vec![event])
}

// ── Shared helpers ───────────────────────────────────────────────────────────

/// First capture (or whole match for group 0) of `pattern` in `body`.
/// Patterns that fail to compile match nothing.
pub(crate) fn capture(body: &str, pattern: &str, group: usize) -> Option<String> {
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!(pattern, error = %e, "pattern does not compile");
            return None;
        }
    };
    re.captures(body)
        .and_then(|c| c.get(group))
        .map(|m| m.as_str().to_string())
}

/// `&amp;` to `&` in attribute-embedded URLs.
pub(crate) fn unescape_href(href: &str) -> String {
    href.replace("&amp;", "&")
}

/// Session-lost transition when `body` is login markup.
pub(crate) fn login_markup(
    ctx: &ActionContext<'_>,
    body: &str,
    context: &str,
    replay: Option<Operation>,
) -> Option<Transition> {
    if !ctx.patterns.is_login_page(body) {
        return None;
    }
    tracing::warn!(context, "login page returned during action");
    Some(Transition::SessionLost {
        context: context.to_string(),
        events: vec![EngineEvent::SessionExpired {
            context: context.to_string(),
        }],
        replay,
    })
}

/// Short response excerpt for failure messages.
pub(crate) fn excerpt(body: &str, max: usize) -> &str {
    match body.char_indices().nth(max) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

pub(crate) fn response_url(request: &PendingRequest, response: &PageResponse) -> String {
    if response.final_url.is_empty() {
        request.url.clone()
    } else {
        response.final_url.clone()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub const BASE: &str = "https://ts1.example.com";

    pub struct Fixture {
        pub patterns: PatternTable,
        pub retry: RetryConfig,
        pub retries: RetryContexts,
        pub authenticated: bool,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                patterns: PatternTable::embedded().unwrap(),
                retry: RetryConfig::default(),
                retries: RetryContexts::default(),
                authenticated: false,
            }
        }

        pub fn ctx(&mut self) -> ActionContext<'_> {
            ActionContext {
                base_url: BASE,
                patterns: &self.patterns,
                retry: &self.retry,
                authenticated: self.authenticated,
                farm_retries: &mut self.retries,
            }
        }
    }

    pub fn reply(request: &PendingRequest, status: u16, body: &str) -> Completion {
        Completion {
            request: request.clone(),
            result: Ok(PageResponse {
                status,
                final_url: request.url.clone(),
                headers: Vec::new(),
                body: body.to_string(),
            }),
        }
    }

    pub fn state_of(request: &PendingRequest) -> OperationState {
        match &request.tag {
            crate::pipeline::RequestTag::Action(s) => s.clone(),
            other => panic!("not an action request: {other:?}"),
        }
    }

    /// Feed `body` to the step carried by `request`.
    pub fn step(fx: &mut Fixture, request: &PendingRequest, status: u16, body: &str) -> Transition {
        let state = state_of(request);
        let mut ctx = fx.ctx();
        resume(state, &mut ctx, reply(request, status, body))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::model::{VillageSnapshot, VillageSummary};

    #[test]
    fn test_retry_contexts() {
        let mut r = RetryContexts::default();
        assert_eq!(r.increment("1_2"), 1);
        assert_eq!(r.increment("1_2"), 2);
        assert_eq!(r.get("1_2"), 2);
        r.reset("1_2");
        assert_eq!(r.get("1_2"), 0);
    }

    #[test]
    fn test_train_without_building_fails_not_found() {
        let mut fx = Fixture::new();
        let ctx = fx.ctx();
        let started = Operation::Train {
            village_id: 7,
            building: BuildingKind::Stable,
            troop_id: "t4".into(),
            troop_name: "Scout".into(),
        }
        .start(&ctx, &Snapshot::default());
        assert!(started.request.is_none());
        assert!(matches!(
            started.events.as_slice(),
            [EngineEvent::TrainingFailed { kind: FailureKind::NotFound, .. }]
        ));
    }

    #[test]
    fn test_rally_slot_from_snapshot_or_default() {
        let mut fx = Fixture::new();
        let ctx = fx.ctx();
        let mut snapshot = Snapshot::default();
        assert_eq!(rally_slot(&ctx, &snapshot, 1), 39);

        let mut village = VillageSnapshot::from_pages(
            &VillageSummary {
                id: 1,
                name: "A".into(),
                incoming: Default::default(),
            },
            Default::default(),
        );
        village.buildings.push(crate::model::BuildingRecord {
            slot_id: 21,
            gid: 16,
            name: "Rally Point".into(),
            level: 1,
            in_progress: false,
            remaining_secs: None,
        });
        snapshot.villages.insert(1, village);
        assert_eq!(rally_slot(&ctx, &snapshot, 1), 21);
    }

    #[test]
    fn test_network_failure_ends_operation() {
        let mut fx = Fixture::new();
        let ctx = fx.ctx();
        let req = upgrade::start(&ctx, 3, 5);
        let state = state_of(&req);
        let mut ctx = fx.ctx();
        let t = resume(
            state,
            &mut ctx,
            Completion {
                request: req,
                result: Err(TransportError::Timeout(30_000)),
            },
        );
        assert!(matches!(
            t,
            Transition::Done(ref ev) if matches!(ev.as_slice(), [EngineEvent::UpgradeFailed { kind: FailureKind::Network, slot_id: 5, .. }])
        ));
    }

    #[test]
    fn test_excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("héllo", 2), "hé");
        assert_eq!(excerpt("ok", 200), "ok");
    }
}
