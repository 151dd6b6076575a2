// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Incoming movements for one village.
//!
//! Two reports come out of one request. The village list already carries a
//! per-color count of incoming movements, which is reported immediately as
//! a coarse warning. The rally point's incoming tab then gives one row per
//! movement with its origin and arrival countdown.

use super::{login_markup, ActionContext, OperationState, Transition};
use crate::events::EngineEvent;
use crate::extraction::{parse_page, PatternTable};
use crate::model::{Confidence, IncomingMovement, MovementKind, SlotId, VillageId, VillageSummary};
use crate::pipeline::{PageResponse, PendingRequest, RequestTag};
use crate::transport::{absolute_url, with_village_param};

/// Page-table name of the incoming tab.
pub const INCOMING_PAGE: &str = "rallyIncoming";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttacksStep {
    pub village_id: VillageId,
}

pub fn start(ctx: &ActionContext<'_>, village_id: VillageId, rally_slot: SlotId) -> PendingRequest {
    let path = format!("build.php?id={rally_slot}&{}", ctx.patterns.attacks.tab);
    PendingRequest::get(
        INCOMING_PAGE,
        with_village_param(&absolute_url(ctx.base_url, &path), village_id),
        RequestTag::Action(OperationState::Attacks(AttacksStep { village_id })),
    )
    .for_village(village_id, None)
}

/// Report built from the village list's color counts, if it has any.
pub fn coarse_report(patterns: &PatternTable, summary: &VillageSummary) -> Option<EngineEvent> {
    if summary.incoming.is_empty() {
        return None;
    }
    let movements = summary
        .incoming
        .iter()
        .map(|(color, count)| IncomingMovement {
            kind: patterns
                .attacks
                .colors
                .get(color)
                .map(|label| MovementKind::from_label(label))
                .unwrap_or(MovementKind::Unknown),
            count: *count,
            origin: None,
            arrival_in_secs: None,
        })
        .collect();
    Some(EngineEvent::IncomingAttacks {
        village_id: summary.id,
        confidence: Confidence::Coarse,
        movements,
    })
}

pub fn resume(step: AttacksStep, ctx: &ActionContext<'_>, response: &PageResponse) -> Transition {
    if let Some(lost) = login_markup(ctx, &response.body, "incoming attacks", None) {
        return lost;
    }
    let movements = parse_movements(ctx.patterns, &response.body);
    let hostile = movements.iter().filter(|m| m.kind.is_hostile()).count();
    tracing::info!(village_id = step.village_id, movements = movements.len(), hostile, "incoming movements read");
    Transition::Done(vec![EngineEvent::IncomingAttacks {
        village_id: step.village_id,
        confidence: Confidence::Detailed,
        movements,
    }])
}

/// Rows of the incoming table, one movement each.
pub fn parse_movements(patterns: &PatternTable, body: &str) -> Vec<IncomingMovement> {
    let page = parse_page(patterns, INCOMING_PAGE, body);
    page.fields
        .list("movements")
        .iter()
        .map(|row| IncomingMovement {
            kind: row
                .get("movementClass")
                .and_then(|class| patterns.attacks.movement_classes.get(class))
                .map(|label| MovementKind::from_label(label))
                .unwrap_or(MovementKind::Unknown),
            count: 1,
            origin: row.get("origin").map(|o| o.trim().to_string()).filter(|o| !o.is_empty()),
            arrival_in_secs: row.get("arrivalIn").and_then(|s| s.parse().ok()),
        })
        .collect()
}
