// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fetch-cycle planning.
//!
//! A cycle starts with the village list (read from the resource overview)
//! and fans out: overview and center page per village, then one page per
//! military building found in the center page. Each completed page is
//! staged and the village's snapshot rebuilt from everything staged so far,
//! replacing the previous one whole. The cycle ends when the pipeline holds
//! no more fetch-tagged items.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::{FailureKind, TransportError};
use crate::events::EngineEvent;
use crate::extraction::{parse_page, parse_village_list, PagePayload, PatternTable};
use crate::model::{BuildingKind, Snapshot, VillageId, VillageSnapshot, VillageSummary};
use crate::pipeline::{Completion, PendingRequest, RequestTag};
use crate::transport::{absolute_url, with_village_param};

/// Page name of the village-list request.
pub const VILLAGE_LIST: &str = "villageList";

/// Fetch-tagged request context.
#[derive(Debug, Clone)]
pub struct FetchPage {
    pub cycle: u64,
    /// Page-table name (`dorf1`, `dorf2`, `barracks`, ...).
    pub page: String,
    pub village: Option<VillageSummary>,
}

/// What handling one fetch completion produced.
#[derive(Debug, Default)]
pub struct CycleStep {
    pub requests: Vec<PendingRequest>,
    pub events: Vec<EngineEvent>,
    /// The response showed the session is gone.
    pub session_expired: bool,
}

/// One fetch cycle in progress.
#[derive(Debug)]
pub struct FetchCycle {
    cycle: u64,
    base_url: String,
    summaries: Vec<VillageSummary>,
    staged: BTreeMap<VillageId, BTreeMap<String, PagePayload>>,
    villages: BTreeMap<VillageId, VillageSnapshot>,
}

impl FetchCycle {
    /// Begin cycle `cycle`. Returns the cycle and its first request.
    pub fn start(cycle: u64, base_url: &str, table: &PatternTable) -> (Self, PendingRequest) {
        let path = table.page("dorf1").map(|t| t.url.as_str()).unwrap_or("/dorf1.php");
        let request = PendingRequest::get(
            VILLAGE_LIST,
            absolute_url(base_url, path),
            RequestTag::Fetch(FetchPage {
                cycle,
                page: VILLAGE_LIST.to_string(),
                village: None,
            }),
        );
        let state = Self {
            cycle,
            base_url: base_url.to_string(),
            summaries: Vec::new(),
            staged: BTreeMap::new(),
            villages: BTreeMap::new(),
        };
        (state, request)
    }

    pub fn id(&self) -> u64 {
        self.cycle
    }

    pub fn summaries(&self) -> &[VillageSummary] {
        &self.summaries
    }

    /// Route one fetch completion. Completions from other cycles are ignored.
    pub fn handle(&mut self, table: &PatternTable, page: &FetchPage, completion: Completion) -> CycleStep {
        let mut step = CycleStep::default();
        if page.cycle != self.cycle {
            tracing::debug!(cycle = page.cycle, current = self.cycle, "stale fetch completion");
            return step;
        }
        let village_id = page.village.as_ref().map(|v| v.id);

        let response = match completion.result {
            Ok(r) => r,
            Err(e) => {
                step.events.push(EngineEvent::FetchFailed {
                    page: page.page.clone(),
                    village_id,
                    kind: transport_failure_kind(&e),
                    message: e.to_string(),
                });
                return step;
            }
        };

        if matches!(response.status, 302 | 401 | 403) || table.is_login_page(&response.body) {
            step.session_expired = true;
            step.events.push(EngineEvent::FetchFailed {
                page: page.page.clone(),
                village_id,
                kind: FailureKind::SessionExpired,
                message: if table.is_login_page(&response.body) {
                    "login page returned".to_string()
                } else {
                    format!("HTTP {}", response.status)
                },
            });
            return step;
        }

        if page.page == VILLAGE_LIST {
            self.on_village_list(table, &response.body, &mut step);
            return step;
        }

        let Some(summary) = page.village.clone() else {
            tracing::warn!(page = %page.page, "fetch page without a village");
            return step;
        };
        let payload = parse_page(table, &page.page, &response.body);
        if page.page == "dorf2" {
            step.requests.extend(self.military_requests(&summary, &payload));
        }
        self.stage(&summary, &page.page, payload, &mut step);
        step
    }

    fn on_village_list(&mut self, table: &PatternTable, body: &str, step: &mut CycleStep) {
        let villages = parse_village_list(body, &table.village_list);
        if villages.is_empty() {
            step.session_expired = true;
            step.events.push(EngineEvent::FetchFailed {
                page: VILLAGE_LIST.to_string(),
                village_id: None,
                kind: FailureKind::SessionExpired,
                message: "no villages found".to_string(),
            });
            return;
        }
        tracing::info!(count = villages.len(), "villages discovered");
        step.events.push(EngineEvent::VillagesDiscovered {
            villages: villages.clone(),
        });
        self.summaries = villages.clone();

        // The list arrives on the active village's overview; reuse it.
        let overview = parse_page(table, "dorf1", body);
        let active = overview
            .fields
            .text("villageName")
            .and_then(|name| villages.iter().find(|v| v.name == name))
            .unwrap_or(&villages[0])
            .clone();

        step.requests.push(self.page_request(table, &active, "dorf2"));
        self.stage(&active, "dorf1", overview, step);
        for village in villages.iter().filter(|v| v.id != active.id) {
            step.requests.push(self.page_request(table, village, "dorf1"));
            step.requests.push(self.page_request(table, village, "dorf2"));
        }
    }

    fn page_request(&self, table: &PatternTable, village: &VillageSummary, page: &str) -> PendingRequest {
        let path = table
            .page(page)
            .map(|t| t.url.clone())
            .unwrap_or_else(|| format!("/{page}.php"));
        let url = with_village_param(&absolute_url(&self.base_url, &path), village.id);
        self.tagged(page, url, village)
    }

    fn military_requests(&self, village: &VillageSummary, center: &PagePayload) -> Vec<PendingRequest> {
        let mut seen = Vec::new();
        let mut out = Vec::new();
        for record in center.fields.list("buildings") {
            let Some(gid) = record.get("gid").and_then(|g| g.parse::<u32>().ok()) else {
                continue;
            };
            let Some(kind) = BuildingKind::from_gid(gid) else {
                continue;
            };
            let Some(slot) = record.get("slotId") else {
                continue;
            };
            if seen.contains(&kind) {
                continue;
            }
            seen.push(kind);
            let url = with_village_param(
                &absolute_url(&self.base_url, &format!("build.php?id={slot}")),
                village.id,
            );
            out.push(self.tagged(kind.page_name(), url, village));
        }
        out
    }

    fn tagged(&self, page: &str, url: String, village: &VillageSummary) -> PendingRequest {
        PendingRequest::get(
            page,
            url,
            RequestTag::Fetch(FetchPage {
                cycle: self.cycle,
                page: page.to_string(),
                village: Some(village.clone()),
            }),
        )
        .for_village(village.id, Some(village.name.clone()))
    }

    fn stage(&mut self, village: &VillageSummary, page: &str, payload: PagePayload, step: &mut CycleStep) {
        let pages = self.staged.entry(village.id).or_default();
        pages.insert(page.to_string(), payload);
        let rebuilt = VillageSnapshot::from_pages(village, pages.clone());
        step.events.push(EngineEvent::PageUpdated {
            village_id: village.id,
            page: page.to_string(),
        });
        step.events.push(EngineEvent::VillageUpdated {
            village_id: village.id,
            name: rebuilt.name.clone(),
        });
        self.villages.insert(village.id, rebuilt);
    }

    /// Close the cycle. `None` when the village list never arrived.
    pub fn finish(self) -> Option<Snapshot> {
        if self.summaries.is_empty() {
            return None;
        }
        Some(Snapshot {
            villages: self.villages,
            summaries: self.summaries,
            taken_at: Utc::now(),
        })
    }
}

fn transport_failure_kind(err: &TransportError) -> FailureKind {
    match err {
        TransportError::ServerError(_) => FailureKind::Server,
        _ => FailureKind::Network,
    }
}

/// Whether a fetch failure means the session is gone and a re-login helps.
/// Auth statuses and redirects to the login page arrive as responses and are
/// classified as `SessionExpired`; transport errors never are.
pub fn indicates_auth_loss(kind: FailureKind) -> bool {
    kind == FailureKind::SessionExpired
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PageResponse;

    const BASE: &str = "https://ts1.example.com";

    const LIST_PAGE: &str = r#"
<script>var data = {"villageList":[{"id":101,"name":"Capital"},{"id":202,"name":"Outpost"}]};</script>
<input id="villageName" class="villageInput" value="Outpost">
<div id="l1" class="value">500</div>
"#;

    const DORF2: &str = r#"
<div class="buildingSlot a19 g16 aid19 roman" data-aid="19" data-gid="16" data-name="Rally Point"> <a href="/build.php?id=19" data-level="1"></a></div>
<div class="buildingSlot a26 g19 aid26 roman" data-aid="26" data-gid="19" data-name="Barracks"> <a href="/build.php?id=26" data-level="3"></a></div>
<div class="buildingSlot a30 g20 aid30 roman" data-aid="30" data-gid="20" data-name="Stable"> <a href="/build.php?id=30" data-level="1"></a></div>
"#;

    fn table() -> PatternTable {
        PatternTable::embedded().unwrap()
    }

    fn ok(request: &PendingRequest, body: &str) -> Completion {
        Completion {
            request: request.clone(),
            result: Ok(PageResponse {
                status: 200,
                final_url: request.url.clone(),
                headers: Vec::new(),
                body: body.to_string(),
            }),
        }
    }

    fn page_of(request: &PendingRequest) -> FetchPage {
        match &request.tag {
            RequestTag::Fetch(p) => p.clone(),
            other => panic!("unexpected tag {other:?}"),
        }
    }

    #[test]
    fn test_village_list_fans_out() {
        let t = table();
        let (mut cycle, first) = FetchCycle::start(1, BASE, &t);
        assert_eq!(first.url, "https://ts1.example.com/dorf1.php");

        let step = cycle.handle(&t, &page_of(&first), ok(&first, LIST_PAGE));
        assert!(!step.session_expired);
        let urls: Vec<&str> = step.requests.iter().map(|r| r.url.as_str()).collect();
        // The active village (by name) reuses the list page as its overview.
        assert_eq!(
            urls,
            vec![
                "https://ts1.example.com/dorf2.php?newdid=202",
                "https://ts1.example.com/dorf1.php?newdid=101",
                "https://ts1.example.com/dorf2.php?newdid=101",
            ]
        );
        assert!(step
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::VillagesDiscovered { villages } if villages.len() == 2)));
        assert!(step
            .events
            .iter()
            .any(|e| matches!(e, EngineEvent::PageUpdated { village_id: 202, page } if page == "dorf1")));
    }

    #[test]
    fn test_empty_village_list_means_expired() {
        let t = table();
        let (mut cycle, first) = FetchCycle::start(1, BASE, &t);
        let step = cycle.handle(&t, &page_of(&first), ok(&first, "<html>nothing</html>"));
        assert!(step.session_expired);
        assert!(step.requests.is_empty());
        assert!(cycle.finish().is_none());
    }

    #[test]
    fn test_center_page_enqueues_military_pages() {
        let t = table();
        let (mut cycle, first) = FetchCycle::start(3, BASE, &t);
        let step = cycle.handle(&t, &page_of(&first), ok(&first, LIST_PAGE));
        let dorf2 = step.requests[0].clone();

        let step = cycle.handle(&t, &page_of(&dorf2), ok(&dorf2, DORF2));
        let pages: Vec<(&str, &str)> = step
            .requests
            .iter()
            .map(|r| (r.page_name.as_str(), r.url.as_str()))
            .collect();
        assert_eq!(
            pages,
            vec![
                ("barracks", "https://ts1.example.com/build.php?id=26&newdid=202"),
                ("stable", "https://ts1.example.com/build.php?id=30&newdid=202"),
            ]
        );

        let snapshot = cycle.finish().unwrap();
        let village = snapshot.village(202).unwrap();
        assert_eq!(village.resources.lumber, 500);
        assert_eq!(village.slot_of_gid(16), Some(19));
        assert!(snapshot.village(101).is_none());
    }

    #[test]
    fn test_login_markup_and_stale_cycles() {
        let t = table();
        let (mut cycle, first) = FetchCycle::start(2, BASE, &t);
        let step = cycle.handle(&t, &page_of(&first), ok(&first, r#"<form class="loginForm">"#));
        assert!(step.session_expired);

        let mut stale = page_of(&first);
        stale.cycle = 1;
        let step = cycle.handle(&t, &stale, ok(&first, LIST_PAGE));
        assert!(step.events.is_empty());
    }

    #[test]
    fn test_transport_failure_reported() {
        let t = table();
        let (mut cycle, first) = FetchCycle::start(1, BASE, &t);
        let completion = Completion {
            request: first.clone(),
            result: Err(TransportError::ServerError(502)),
        };
        let step = cycle.handle(&t, &page_of(&first), completion);
        assert!(matches!(
            step.events.as_slice(),
            [EngineEvent::FetchFailed { kind: FailureKind::Server, .. }]
        ));
    }

    #[test]
    fn test_auth_loss_follows_failure_kind_not_message() {
        let t = table();
        let kind_of = |step: CycleStep| match step.events.as_slice() {
            [EngineEvent::FetchFailed { kind, .. }] => *kind,
            other => panic!("unexpected {other:?}"),
        };

        let (mut cycle, first) = FetchCycle::start(1, BASE, &t);
        let mut completion = ok(&first, "");
        if let Ok(response) = completion.result.as_mut() {
            response.status = 401;
        }
        let kind = kind_of(cycle.handle(&t, &page_of(&first), completion));
        assert!(indicates_auth_loss(kind));

        let (mut cycle, first) = FetchCycle::start(2, BASE, &t);
        let completion = Completion {
            request: first.clone(),
            result: Err(TransportError::ConnectionRefused("tcp connect to 10.0.0.3:4030".into())),
        };
        let kind = kind_of(cycle.handle(&t, &page_of(&first), completion));
        assert_eq!(kind, FailureKind::Network);
        assert!(!indicates_auth_loss(kind));
    }
}
