// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Farm lists: discovery and dispatch.
//!
//! Both read the rally point's farm tab, whose script block embeds the
//! player's lists as a JSON array. Dispatch keeps the active slot ids of one
//! list and posts them to the raid endpoint. An empty target set is often
//! stale data, so the two-step flow is re-run a bounded number of times
//! before giving up. A tab without the data block means the session is gone;
//! the dispatch is then handed back for replay after login.

use std::time::Duration;

use regex::Regex;
use serde_json::{json, Value};

use super::{excerpt, login_markup, response_url, ActionContext, Operation, OperationState, Transition};
use crate::error::FailureKind;
use crate::events::EngineEvent;
use crate::extraction::brackets::{array_after_key, value_after_key};
use crate::extraction::patterns::FarmPatterns;
use crate::model::{FarmListInfo, SlotId, VillageId};
use crate::pipeline::{PageResponse, PendingRequest, RequestTag};
use crate::transport::{absolute_url, with_village_param};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FarmOrder {
    pub village_id: VillageId,
    pub list_id: u64,
    pub rally_slot: SlotId,
}

impl FarmOrder {
    /// Key of this dispatch's attempt counter.
    pub fn retry_key(&self) -> String {
        format!("{}_{}", self.village_id, self.list_id)
    }

    fn replay(&self) -> Operation {
        Operation::DispatchFarm {
            village_id: self.village_id,
            list_id: self.list_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FarmStep {
    LoadTab(FarmOrder),
    Send { order: FarmOrder, targets: usize },
}

impl FarmStep {
    pub fn order(&self) -> &FarmOrder {
        match self {
            Self::LoadTab(order) | Self::Send { order, .. } => order,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryStep {
    pub village_id: VillageId,
    pub rally_slot: SlotId,
}

fn tab_url(ctx: &ActionContext<'_>, village_id: VillageId, rally_slot: SlotId) -> String {
    let path = format!("build.php?id={rally_slot}&{}", ctx.patterns.farm.tab);
    with_village_param(&absolute_url(ctx.base_url, &path), village_id)
}

// ── Dispatch ─────────────────────────────────────────────────────────────────

pub fn start_dispatch(ctx: &ActionContext<'_>, order: FarmOrder) -> PendingRequest {
    tracing::info!(village_id = order.village_id, list_id = order.list_id, "farm dispatch requested");
    PendingRequest::get(
        "farmTab",
        tab_url(ctx, order.village_id, order.rally_slot),
        RequestTag::Action(OperationState::Farm(FarmStep::LoadTab(order))),
    )
    .for_village(order.village_id, None)
}

pub fn resume(
    step: FarmStep,
    ctx: &mut ActionContext<'_>,
    request: &PendingRequest,
    response: &PageResponse,
) -> Transition {
    let order = *step.order();
    if let Some(lost) = login_markup(ctx, &response.body, "farm dispatch", Some(order.replay())) {
        ctx.farm_retries.reset(&order.retry_key());
        return lost;
    }
    match step {
        FarmStep::LoadTab(order) => on_tab(ctx, order, request, response),
        FarmStep::Send { order, targets } => {
            ctx.farm_retries.reset(&order.retry_key());
            on_send(order, targets, response)
        }
    }
}

fn on_tab(
    ctx: &mut ActionContext<'_>,
    order: FarmOrder,
    request: &PendingRequest,
    response: &PageResponse,
) -> Transition {
    let Some(targets) = active_targets(&response.body, &ctx.patterns.farm, order.list_id) else {
        tracing::warn!(village_id = order.village_id, list_id = order.list_id, "farm data block missing");
        ctx.farm_retries.reset(&order.retry_key());
        return Transition::SessionLost {
            context: "farm data block missing".to_string(),
            events: vec![EngineEvent::SessionExpired {
                context: "farm data block missing".to_string(),
            }],
            replay: Some(order.replay()),
        };
    };

    let key = order.retry_key();
    if targets.is_empty() {
        let attempt = ctx.farm_retries.increment(&key);
        if attempt <= ctx.retry.max_farm_retries {
            tracing::info!(
                village_id = order.village_id,
                list_id = order.list_id,
                attempt,
                "no active targets yet; retrying"
            );
            let again = start_dispatch(ctx, order).after(Duration::from_millis(ctx.retry.farm_retry_delay_ms));
            return Transition::Next {
                request: again,
                events: vec![EngineEvent::FarmRetryScheduled {
                    village_id: order.village_id,
                    list_id: order.list_id,
                    attempt,
                }],
            };
        }
        ctx.farm_retries.reset(&key);
        return failed(order, FailureKind::NoTargets, "no active slots found".to_string());
    }

    tracing::info!(
        village_id = order.village_id,
        list_id = order.list_id,
        targets = targets.len(),
        "sending farm list"
    );
    let body = json!({
        "action": "farmList",
        "lists": [{ "id": order.list_id, "targets": targets }],
    });
    let send = PendingRequest::post_json(
        "farmSend",
        absolute_url(ctx.base_url, "/api/v1/farm-list/send"),
        body,
        RequestTag::Action(OperationState::Farm(FarmStep::Send {
            order,
            targets: targets.len(),
        })),
    )
    .for_village(order.village_id, None)
    .with_referer(response_url(request, response))
    .with_header("Accept", "application/json")
    .with_header("X-Requested-With", "XMLHttpRequest")
    .with_header("Origin", ctx.base_url);
    Transition::Next {
        request: send,
        events: Vec::new(),
    }
}

fn on_send(order: FarmOrder, targets: usize, response: &PageResponse) -> Transition {
    let parsed: Option<Value> = serde_json::from_str(&response.body).ok();
    if let Some(errors) = parsed.as_ref().and_then(|v| v.get("errors")) {
        let message = match errors {
            Value::Array(list) => list
                .first()
                .map(|e| {
                    e.get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| e.to_string())
                }),
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        };
        if let Some(message) = message {
            return failed(order, FailureKind::Server, message);
        }
    }
    if response.status == 200 {
        tracing::info!(village_id = order.village_id, list_id = order.list_id, targets, "farm list sent");
        return Transition::Done(vec![EngineEvent::FarmDispatched {
            village_id: order.village_id,
            list_id: order.list_id,
            targets,
        }]);
    }
    failed(
        order,
        FailureKind::Server,
        format!("HTTP {}: {}", response.status, excerpt(&response.body, 200)),
    )
}

fn failed(order: FarmOrder, kind: FailureKind, message: String) -> Transition {
    tracing::warn!(village_id = order.village_id, list_id = order.list_id, %kind, %message, "farm dispatch failed");
    Transition::Done(vec![EngineEvent::FarmDispatchFailed {
        village_id: order.village_id,
        list_id: order.list_id,
        kind,
        message,
    }])
}

/// Active slot ids of `list_id`.
///
/// `None` when the page has no farm-list block at all. A list that is
/// absent or has no active slots yields an empty vector.
pub fn active_targets(body: &str, patterns: &FarmPatterns, list_id: u64) -> Option<Vec<u64>> {
    let block = array_after_key(body, &patterns.lists_key)?;
    match serde_json::from_str::<Vec<Value>>(block) {
        Ok(lists) => Some(
            lists
                .iter()
                .find(|l| l.get("id").and_then(json_u64) == Some(list_id))
                .and_then(|l| l.get(&patterns.slots_key))
                .map(active_ids)
                .unwrap_or_default(),
        ),
        Err(e) => {
            tracing::debug!(error = %e, "farm-list block is not valid JSON; scanning by position");
            Some(positional_targets(body, patterns, list_id))
        }
    }
}

/// Locate `"id":L` and read the first slot array after it, provided no
/// other list begins in between.
fn positional_targets(body: &str, patterns: &FarmPatterns, list_id: u64) -> Vec<u64> {
    let Ok(re) = Regex::new(&format!(r#""id"\s*:\s*{list_id}\b"#)) else {
        return Vec::new();
    };
    let Some(at) = re.find(body) else {
        return Vec::new();
    };
    let Some((open, slots)) = value_after_key(body, &patterns.slots_key, at.end()) else {
        return Vec::new();
    };
    if body[at.end()..open].contains(&format!("\"{}\"", patterns.lists_key)) {
        return Vec::new();
    }
    serde_json::from_str::<Value>(slots)
        .map(|v| active_ids(&v))
        .unwrap_or_default()
}

fn active_ids(slots: &Value) -> Vec<u64> {
    slots
        .as_array()
        .map(|slots| {
            slots
                .iter()
                .filter(|s| s.get("isActive").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|s| s.get("id").and_then(json_u64))
                .collect()
        })
        .unwrap_or_default()
}

fn json_u64(v: &Value) -> Option<u64> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

// ── Discovery ────────────────────────────────────────────────────────────────

pub fn start_discovery(ctx: &ActionContext<'_>, village_id: VillageId, rally_slot: SlotId) -> PendingRequest {
    PendingRequest::get(
        "farmTab",
        tab_url(ctx, village_id, rally_slot),
        RequestTag::Action(OperationState::FarmLists(DiscoveryStep { village_id, rally_slot })),
    )
    .for_village(village_id, None)
}

pub fn resume_discovery(step: DiscoveryStep, ctx: &ActionContext<'_>, response: &PageResponse) -> Transition {
    if let Some(lost) = login_markup(ctx, &response.body, "farm lists", None) {
        return lost;
    }
    let lists = parse_farm_lists(&response.body, &ctx.patterns.farm);
    tracing::info!(village_id = step.village_id, count = lists.len(), "farm lists discovered");
    Transition::Done(vec![EngineEvent::FarmListsFetched {
        village_id: step.village_id,
        lists,
    }])
}

/// Every list on the farm tab with its slot count and owner.
pub fn parse_farm_lists(body: &str, patterns: &FarmPatterns) -> Vec<FarmListInfo> {
    let Some(block) = array_after_key(body, &patterns.lists_key) else {
        tracing::warn!("farm-list block not found");
        return Vec::new();
    };
    let Ok(lists) = serde_json::from_str::<Vec<Value>>(block) else {
        tracing::warn!("farm-list block is not valid JSON");
        return Vec::new();
    };
    lists
        .iter()
        .filter_map(|l| {
            Some(FarmListInfo {
                id: l.get("id").and_then(json_u64)?,
                name: l.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                slots: l
                    .get("slotsAmount")
                    .and_then(json_u64)
                    .map(|n| n as u32)
                    .or_else(|| l.get(&patterns.slots_key).and_then(Value::as_array).map(|a| a.len() as u32))
                    .unwrap_or(0),
                owner_village: l.get("ownerVillage").and_then(|o| o.get("id")).and_then(json_u64),
            })
        })
        .collect()
}
