// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Train the maximum affordable count of one unit.
//!
//! The training page is read for the unit's current maximum and the form's
//! hidden fields; the form is then posted back with that maximum. A maximum
//! of zero ends the operation quietly.

use regex::Regex;

use super::{capture, login_markup, response_url, unescape_href, ActionContext, OperationState, Transition};
use crate::error::FailureKind;
use crate::events::EngineEvent;
use crate::extraction::patterns::{contains_any, TrainPatterns};
use crate::model::{BuildingKind, SlotId, VillageId};
use crate::pipeline::{PageResponse, PendingRequest, RequestTag};
use crate::transport::{absolute_url, with_village_param};

/// What to train and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainOrder {
    pub village_id: VillageId,
    pub building: BuildingKind,
    pub slot_id: SlotId,
    pub troop_id: String,
    pub troop_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrainStep {
    LoadPage(TrainOrder),
    Submit { order: TrainOrder, count: u32 },
}

impl TrainStep {
    pub fn order(&self) -> &TrainOrder {
        match self {
            Self::LoadPage(order) | Self::Submit { order, .. } => order,
        }
    }
}

pub fn start(ctx: &ActionContext<'_>, order: TrainOrder) -> PendingRequest {
    tracing::info!(
        village_id = order.village_id,
        building = %order.building,
        troop = %order.troop_id,
        "training requested"
    );
    let url = with_village_param(
        &absolute_url(ctx.base_url, &format!("build.php?id={}", order.slot_id)),
        order.village_id,
    );
    let village_id = order.village_id;
    PendingRequest::get(
        order.building.page_name(),
        url,
        RequestTag::Action(OperationState::Train(TrainStep::LoadPage(order))),
    )
    .for_village(village_id, None)
}

pub fn resume(
    step: TrainStep,
    ctx: &ActionContext<'_>,
    request: &PendingRequest,
    response: &PageResponse,
) -> Transition {
    if let Some(lost) = login_markup(ctx, &response.body, "train", None) {
        return lost;
    }
    let patterns = &ctx.patterns.train;
    match step {
        TrainStep::LoadPage(order) => {
            let Some(count) = max_trainable(&response.body, patterns, &order.troop_id) else {
                return failed(
                    &order,
                    FailureKind::NotFound,
                    format!("{} is not trainable here", order.troop_id),
                );
            };
            if count == 0 {
                tracing::info!(
                    village_id = order.village_id,
                    troop = %order.troop_id,
                    "nothing trainable right now"
                );
                return Transition::Done(Vec::new());
            }

            let action = capture(&response.body, &patterns.form_action, 1)
                .map(|a| unescape_href(&a))
                .unwrap_or_else(|| format!("build.php?id={}", order.slot_id));
            let url = with_village_param(&absolute_url(ctx.base_url, &action), order.village_id);

            let mut fields = hidden_fields(&response.body, patterns);
            fields.push((order.troop_id.clone(), count.to_string()));
            fields.push(patterns.submit_field.clone());

            tracing::debug!(
                village_id = order.village_id,
                troop = %order.troop_id,
                count,
                fields = fields.len(),
                "submitting training form"
            );
            let village_id = order.village_id;
            let page = order.building.page_name();
            let next = PendingRequest::post_form(
                page,
                url,
                fields,
                RequestTag::Action(OperationState::Train(TrainStep::Submit { order, count })),
            )
            .for_village(village_id, None)
            .with_referer(response_url(request, response));
            Transition::Next {
                request: next,
                events: Vec::new(),
            }
        }
        TrainStep::Submit { order, count } => {
            if contains_any(&response.body, &patterns.success) {
                return started(order, count, true);
            }
            if contains_any(&response.body, &patterns.failure) {
                return failed(
                    &order,
                    FailureKind::InsufficientResources,
                    format!("not enough resources to train {}", order.troop_name),
                );
            }
            started(order, count, false)
        }
    }
}

/// Maximum trainable count shown next to the unit's input.
///
/// `None` when the unit has no input on the page.
pub fn max_trainable(body: &str, patterns: &TrainPatterns, troop_id: &str) -> Option<u32> {
    let input = patterns.input.replace("{troop}", &regex::escape(troop_id));
    let re = Regex::new(&input).ok()?;
    let found = re.find(body)?;

    let rest = &body[found.end()..];
    let mut end = rest.len().min(patterns.window);
    while !rest.is_char_boundary(end) {
        end -= 1;
    }
    let mut window = &rest[..end];
    if let Some(next_input) = window.find("<input") {
        window = &window[..next_input];
    }

    let count = patterns
        .max_count
        .iter()
        .find_map(|p| capture(window, p, 1))
        .and_then(|n| n.parse().ok())
        .unwrap_or(0);
    Some(count)
}

/// Hidden inputs in document order, first occurrence of each name wins.
pub fn hidden_fields(body: &str, patterns: &TrainPatterns) -> Vec<(String, String)> {
    let mut found: Vec<(usize, String, String)> = Vec::new();
    for spec in &patterns.hidden_fields {
        let Ok(re) = Regex::new(&spec.pattern) else {
            tracing::warn!(pattern = %spec.pattern, "hidden field pattern does not compile");
            continue;
        };
        for caps in re.captures_iter(body) {
            let (Some(name), Some(value)) = (caps.get(spec.name_group), caps.get(spec.value_group)) else {
                continue;
            };
            let Some(whole) = caps.get(0) else {
                continue;
            };
            found.push((whole.start(), name.as_str().to_string(), value.as_str().to_string()));
        }
    }
    found.sort_by_key(|(pos, _, _)| *pos);

    let mut fields: Vec<(String, String)> = Vec::new();
    for (_, name, value) in found {
        if !fields.iter().any(|(n, _)| *n == name) {
            fields.push((name, value));
        }
    }
    fields
}

fn started(order: TrainOrder, count: u32, confirmed: bool) -> Transition {
    tracing::info!(
        village_id = order.village_id,
        troop = %order.troop_id,
        count,
        confirmed,
        "training started"
    );
    Transition::Done(vec![EngineEvent::TrainingStarted {
        village_id: order.village_id,
        building: order.building,
        troop_id: order.troop_id,
        troop_name: order.troop_name,
        count,
        confirmed,
    }])
}

fn failed(order: &TrainOrder, kind: FailureKind, message: String) -> Transition {
    tracing::warn!(village_id = order.village_id, troop = %order.troop_id, %kind, %message, "training failed");
    Transition::Done(vec![EngineEvent::TrainingFailed {
        village_id: order.village_id,
        building: order.building,
        troop_id: order.troop_id.clone(),
        kind,
        message,
    }])
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::extraction::PatternTable;
    use crate::transport::Body;

    const BARRACKS: &str = r##"
<form method="POST" name="snd" action="/build.php?id=26&amp;gid=19">
<input type="hidden" name="did" value="42" />
<input type="hidden" value="a1b2c3" name="checksum" />
<input type="hidden" name="did" value="99" />
<div class="details">
<input type="text" class="text" name="t1" value="0" maxlength="10" />
<a href="#" onClick="div.querySelector('input').val(17); return false;">17</a>
<input type="text" class="text" name="t2" value="0" />
<a href="#">4</a>
<input type="text" class="text" name="t3" value="0" />
<span>none</span>
</div>
</form>
"##;

    fn order(troop: &str) -> TrainOrder {
        TrainOrder {
            village_id: 42,
            building: BuildingKind::Barracks,
            slot_id: 26,
            troop_id: troop.into(),
            troop_name: "Legionnaire".into(),
        }
    }

    #[test]
    fn test_max_trainable_windows() {
        let p = PatternTable::embedded().unwrap().train;
        assert_eq!(max_trainable(BARRACKS, &p, "t1"), Some(17));
        assert_eq!(max_trainable(BARRACKS, &p, "t2"), Some(4));
        assert_eq!(max_trainable(BARRACKS, &p, "t3"), Some(0));
        assert_eq!(max_trainable(BARRACKS, &p, "t9"), None);
    }

    #[test]
    fn test_hidden_fields_both_orders_deduplicated() {
        let p = PatternTable::embedded().unwrap().train;
        assert_eq!(
            hidden_fields(BARRACKS, &p),
            vec![
                ("did".to_string(), "42".to_string()),
                ("checksum".to_string(), "a1b2c3".to_string()),
            ]
        );
    }

    #[test]
    fn test_form_posted_with_max_count() {
        let mut fx = Fixture::new();
        let req = start(&fx.ctx(), order("t1"));
        assert_eq!(req.url, "https://ts1.example.com/build.php?id=26&newdid=42");

        let Transition::Next { request, .. } = step(&mut fx, &req, 200, BARRACKS) else {
            panic!("form submit expected");
        };
        assert_eq!(
            request.url,
            "https://ts1.example.com/build.php?id=26&gid=19&newdid=42"
        );
        let Some(Body::Form(fields)) = &request.body else {
            panic!("form body expected");
        };
        assert!(fields.contains(&("t1".to_string(), "17".to_string())));
        assert!(fields.contains(&("s1".to_string(), "ok".to_string())));
        assert!(fields.contains(&("checksum".to_string(), "a1b2c3".to_string())));

        let t = step(&mut fx, &request, 200, r#"<table class="under_progress">"#);
        assert!(matches!(
            t.events(),
            [EngineEvent::TrainingStarted { count: 17, confirmed: true, .. }]
        ));
    }

    #[test]
    fn test_zero_max_stops_silently() {
        let mut fx = Fixture::new();
        let req = start(&fx.ctx(), order("t3"));
        let t = step(&mut fx, &req, 200, BARRACKS);
        assert!(matches!(t, Transition::Done(ref ev) if ev.is_empty()));
    }

    #[test]
    fn test_failure_markers() {
        let mut fx = Fixture::new();
        let req = start(&fx.ctx(), order("t2"));
        let Transition::Next { request, .. } = step(&mut fx, &req, 200, BARRACKS) else {
            panic!("form submit expected");
        };
        let t = step(&mut fx, &request, 200, r#"<span class="notEnough">"#);
        assert!(matches!(
            t.events(),
            [EngineEvent::TrainingFailed { kind: FailureKind::InsufficientResources, .. }]
        ));
    }
}
