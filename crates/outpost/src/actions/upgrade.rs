// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Upgrade one building: read its page, follow the upgrade link, classify.
//!
//! No local resource check is made; the server's answer decides.

use super::{capture, login_markup, response_url, unescape_href, ActionContext, OperationState, Transition};
use crate::error::FailureKind;
use crate::events::EngineEvent;
use crate::extraction::patterns::contains_any;
use crate::model::{SlotId, VillageId};
use crate::pipeline::{PageResponse, PendingRequest, RequestTag};
use crate::transport::{absolute_url, with_village_param};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeStep {
    LoadPage {
        village_id: VillageId,
        slot_id: SlotId,
    },
    Confirm {
        village_id: VillageId,
        slot_id: SlotId,
        building_name: String,
    },
}

impl UpgradeStep {
    pub fn target(&self) -> (VillageId, SlotId) {
        match self {
            Self::LoadPage { village_id, slot_id } | Self::Confirm { village_id, slot_id, .. } => {
                (*village_id, *slot_id)
            }
        }
    }
}

pub fn start(ctx: &ActionContext<'_>, village_id: VillageId, slot_id: SlotId) -> PendingRequest {
    tracing::info!(village_id, slot_id, "upgrade requested");
    let url = with_village_param(
        &absolute_url(ctx.base_url, &format!("build.php?id={slot_id}")),
        village_id,
    );
    PendingRequest::get(
        "upgrade",
        url,
        RequestTag::Action(OperationState::Upgrade(UpgradeStep::LoadPage { village_id, slot_id })),
    )
    .for_village(village_id, None)
}

pub fn resume(
    step: UpgradeStep,
    ctx: &ActionContext<'_>,
    request: &PendingRequest,
    response: &PageResponse,
) -> Transition {
    if let Some(lost) = login_markup(ctx, &response.body, "upgrade", None) {
        return lost;
    }
    match step {
        UpgradeStep::LoadPage { village_id, slot_id } => {
            let patterns = &ctx.patterns.upgrade;
            let building_name = capture(&response.body, &patterns.building_name, 1)
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Building".to_string());

            let Some(href) = patterns
                .links
                .iter()
                .find_map(|l| capture(&response.body, &l.pattern, l.group))
            else {
                return failed(
                    village_id,
                    slot_id,
                    FailureKind::NotFound,
                    "upgrade link not found - resources may be insufficient".to_string(),
                );
            };

            let mut url = absolute_url(ctx.base_url, &unescape_href(&href));
            if !url.contains("newdid=") {
                url = with_village_param(&url, village_id);
            }
            tracing::debug!(village_id, slot_id, %building_name, %url, "following upgrade link");
            let next = PendingRequest::get(
                "upgrade",
                url,
                RequestTag::Action(OperationState::Upgrade(UpgradeStep::Confirm {
                    village_id,
                    slot_id,
                    building_name,
                })),
            )
            .for_village(village_id, None)
            .with_referer(response_url(request, response));
            Transition::Next {
                request: next,
                events: Vec::new(),
            }
        }
        UpgradeStep::Confirm {
            village_id,
            slot_id,
            building_name,
        } => {
            let patterns = &ctx.patterns.upgrade;
            if contains_any(&response.body, &patterns.started) {
                tracing::info!(village_id, slot_id, %building_name, "upgrade started");
                return started(village_id, slot_id, building_name, true);
            }
            if contains_any(&response.body, &patterns.insufficient) {
                return failed(
                    village_id,
                    slot_id,
                    FailureKind::InsufficientResources,
                    format!("not enough resources to upgrade {building_name}"),
                );
            }
            tracing::info!(village_id, slot_id, %building_name, "upgrade probably started");
            started(village_id, slot_id, building_name, false)
        }
    }
}

fn started(village_id: VillageId, slot_id: SlotId, building_name: String, confirmed: bool) -> Transition {
    Transition::Done(vec![EngineEvent::UpgradeStarted {
        village_id,
        slot_id,
        building_name,
        confirmed,
    }])
}

fn failed(village_id: VillageId, slot_id: SlotId, kind: FailureKind, message: String) -> Transition {
    tracing::warn!(village_id, slot_id, %kind, %message, "upgrade failed");
    Transition::Done(vec![EngineEvent::UpgradeFailed {
        village_id,
        slot_id,
        kind,
        message,
    }])
}
