// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Terminal rendering of events and snapshots.

use chrono::Local;

use crate::events::EngineEvent;
use crate::model::Snapshot;

/// One line per user-facing event; alerts are marked.
pub fn print_event(event: &EngineEvent) {
    if let Some(line) = event_line(event) {
        println!("{line}");
    }
}

pub fn event_line(event: &EngineEvent) -> Option<String> {
    let text = event.describe()?;
    let marker = if event.is_alert() { "!" } else { " " };
    let village = event
        .village_id()
        .map(|v| format!("[{v}] "))
        .unwrap_or_default();
    Some(format!("{} {marker} {village}{text}", Local::now().format("%H:%M:%S")))
}

/// Village overview: stock, builder and military slots.
pub fn snapshot_table(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<10} {:<20} {:>8} {:>8} {:>8} {:>8}  {}\n",
        "ID", "VILLAGE", "LUMBER", "CLAY", "IRON", "CROP", "BUILDER"
    ));
    for summary in &snapshot.summaries {
        let Some(v) = snapshot.village(summary.id) else {
            out.push_str(&format!("{:<10} {:<20} (not fetched)\n", summary.id, summary.name));
            continue;
        };
        let builder = match v.construction.first() {
            Some(c) => format!("{} -> {} ({}s)", c.building_name, c.level, c.remaining_secs),
            None => "idle".to_string(),
        };
        out.push_str(&format!(
            "{:<10} {:<20} {:>8} {:>8} {:>8} {:>8}  {}\n",
            v.id, v.name, v.resources.lumber, v.resources.clay, v.resources.iron, v.resources.crop, builder
        ));
        let incoming: u32 = summary.incoming.values().sum();
        if incoming > 0 {
            out.push_str(&format!("{:<10} ! {incoming} incoming movements\n", ""));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ResourceStock, VillageSnapshot, VillageSummary};
    use std::collections::BTreeMap;

    #[test]
    fn test_event_line_skips_telemetry() {
        assert!(event_line(&EngineEvent::RefreshScheduled { in_secs: 3 }).is_none());
        let line = event_line(&EngineEvent::SessionExpired {
            context: "fetch".into(),
        })
        .unwrap();
        assert!(line.contains(" ! session expired (fetch)"));
    }

    #[test]
    fn test_snapshot_table_rows() {
        let summary = VillageSummary {
            id: 5,
            name: "Capital".into(),
            incoming: BTreeMap::from([("red".to_string(), 2)]),
        };
        let missing = VillageSummary {
            id: 6,
            name: "Hamlet".into(),
            incoming: BTreeMap::new(),
        };
        let village = VillageSnapshot {
            id: 5,
            name: "Capital".into(),
            resources: ResourceStock {
                lumber: 120,
                clay: 80,
                iron: 60,
                crop: 300,
            },
            ..Default::default()
        };
        let snapshot = Snapshot {
            villages: BTreeMap::from([(5, village)]),
            summaries: vec![summary, missing],
            ..Default::default()
        };
        let table = snapshot_table(&snapshot);
        assert!(table.contains("Capital"));
        assert!(table.contains("idle"));
        assert!(table.contains("2 incoming movements"));
        assert!(table.contains("(not fetched)"));
    }
}
