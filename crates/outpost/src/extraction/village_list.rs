// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Player village list embedded in every authenticated page.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use serde_json::Value;

use super::brackets;
use super::patterns::VillageListPatterns;
use super::text;
use crate::model::{VillageId, VillageSummary};

/// Parse the village list, preferring the embedded JSON array and falling
/// back to `id`/`name` pairs. Order follows the page; duplicates are dropped.
pub fn parse_village_list(page: &str, patterns: &VillageListPatterns) -> Vec<VillageSummary> {
    if let Some(found) = from_json(page, patterns) {
        if !found.is_empty() {
            return found;
        }
    }
    from_pairs(page, &patterns.fallback)
}

fn from_json(page: &str, patterns: &VillageListPatterns) -> Option<Vec<VillageSummary>> {
    let raw = brackets::array_after_key(page, &patterns.key)?;
    let entries: Vec<Value> = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "village list block is not valid JSON");
            return None;
        }
    };

    let mut seen = HashSet::new();
    let villages = entries
        .iter()
        .filter_map(|entry| {
            let id = json_id(entry.get("id").or_else(|| entry.get("villageId"))?)?;
            let name = entry.get("name")?.as_str()?.to_string();
            seen.insert(id).then(|| VillageSummary {
                id,
                name: text::decode_unicode_escapes(&name),
                incoming: attack_counts(entry, &patterns.attack_summary_keys),
            })
        })
        .collect();
    Some(villages)
}

fn from_pairs(page: &str, pattern: &str) -> Vec<VillageSummary> {
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!(error = %e, "village list fallback pattern does not compile");
            return Vec::new();
        }
    };
    let mut seen = HashSet::new();
    re.captures_iter(page)
        .filter_map(|caps| {
            let id: VillageId = caps.get(1)?.as_str().parse().ok()?;
            let name = caps.get(2)?.as_str();
            seen.insert(id).then(|| VillageSummary {
                id,
                name: text::decode_unicode_escapes(name),
                incoming: BTreeMap::new(),
            })
        })
        .collect()
}

fn json_id(v: &Value) -> Option<VillageId> {
    v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

/// Incoming-troop counts by symbol color. Accepts an object of color to
/// count or an array of `{color|type, count}` entries.
fn attack_counts(entry: &Value, keys: &[String]) -> BTreeMap<String, u32> {
    let Some(summary) = keys.iter().find_map(|k| entry.get(k.as_str())) else {
        return BTreeMap::new();
    };
    let count = |v: &Value| {
        v.as_u64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            .map(|n| n as u32)
    };
    match summary {
        Value::Object(map) => map
            .iter()
            .filter_map(|(color, v)| count(v).filter(|n| *n > 0).map(|n| (color.clone(), n)))
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let color = item
                    .get("color")
                    .or_else(|| item.get("type"))?
                    .as_str()?
                    .to_string();
                let n = count(item.get("count")?)?;
                (n > 0).then_some((color, n))
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}
