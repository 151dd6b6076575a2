// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page scraping: the field engine, the pattern table it is driven by, and
//! the structural helpers for JSON blocks embedded in script tags.

pub mod brackets;
pub mod engine;
pub mod patterns;
pub mod text;
pub mod village_list;

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub use engine::{extract, CompiledSpec, Extracted, FieldKind, FieldSpec, FieldValue, PageSpec, Record};
pub use patterns::PatternTable;
pub use village_list::parse_village_list;

/// Everything scraped from one fetched page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PagePayload {
    pub fields: Extracted,
    /// Script-embedded JSON objects keyed by the pattern-table name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub embedded: BTreeMap<String, serde_json::Value>,
}

/// Scrape `page_name` out of `body` using the table's template for it.
///
/// Unknown page names produce an empty payload.
pub fn parse_page(table: &PatternTable, page_name: &str, body: &str) -> PagePayload {
    let fields = match table.page(page_name) {
        Some(template) => engine::extract(body, &template.fields),
        None => {
            tracing::debug!(page = page_name, "no template for page");
            Extracted::default()
        }
    };
    PagePayload {
        fields,
        embedded: embedded_json(table, body),
    }
}

fn embedded_json(table: &PatternTable, body: &str) -> BTreeMap<String, serde_json::Value> {
    let mut out = BTreeMap::new();
    for (name, pattern) in &table.embedded_json {
        let Ok(re) = Regex::new(pattern) else {
            tracing::warn!(name = name.as_str(), "embedded JSON pattern does not compile");
            continue;
        };
        let Some(raw) = re.captures(body).and_then(|c| c.get(1)) else {
            continue;
        };
        let decoded = text::decode_unicode_escapes(raw.as_str());
        match serde_json::from_str(&decoded) {
            Ok(value) => {
                out.insert(name.clone(), value);
            }
            Err(e) => tracing::debug!(name = name.as_str(), error = %e, "embedded block is not JSON"),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_page_with_embedded_preferences() {
        let table = PatternTable::embedded().unwrap();
        let body = r#"<div id="l1" class="value">&#x202d;1.500&#x202c;</div>
<script>Travian.Game.Preferences.initialize({"lang":"tr","title":"Köy"});</script>"#;
        let payload = parse_page(&table, "dorf1", body);
        assert_eq!(payload.fields.number("lumber"), Some(1500));
        assert!(!payload.fields.is_present("clay"));
        assert_eq!(payload.embedded["preferences"]["title"], "Köy");
    }

    #[test]
    fn test_unknown_page_is_empty() {
        let table = PatternTable::embedded().unwrap();
        let payload = parse_page(&table, "statistics", "<html>");
        assert!(payload.fields.fields.is_empty());
    }
}
