// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! The swappable pattern table.
//!
//! Every literal pattern and marker the engine scrapes with lives in
//! `patterns.json`, embedded at compile time and replaceable at runtime from
//! a file when the game's markup drifts. Engine logic never hard-codes a
//! pattern.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::engine::PageSpec;
use crate::error::ConfigError;

/// Raw JSON of the built-in table.
const PATTERNS_JSON: &str = include_str!("patterns.json");

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternTable {
    pub version: u32,
    pub pages: BTreeMap<String, PageTemplate>,
    pub village_list: VillageListPatterns,
    /// Name to pattern whose first capture is a JSON object literal.
    #[serde(default)]
    pub embedded_json: BTreeMap<String, String>,
    pub markers: SessionMarkers,
    pub upgrade: UpgradePatterns,
    pub train: TrainPatterns,
    pub farm: FarmPatterns,
    pub attacks: AttackPatterns,
}

/// One fetchable page: its path and the fields scraped from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageTemplate {
    pub url: String,
    #[serde(default)]
    pub description: String,
    pub fields: PageSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VillageListPatterns {
    /// JSON key of the embedded village array.
    pub key: String,
    /// `id`/`name` pair pattern used when the array is not valid JSON.
    pub fallback: String,
    /// Keys that may hold the per-village incoming count by symbol color.
    #[serde(default)]
    pub attack_summary_keys: Vec<String>,
}

/// Substrings that identify login markup and authenticated markup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMarkers {
    pub login: Vec<String>,
    pub authenticated: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkPattern {
    pub pattern: String,
    /// Capture group holding the URL; 0 means the whole match.
    pub group: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradePatterns {
    pub building_name: String,
    /// Tried in order until one matches.
    pub links: Vec<LinkPattern>,
    pub started: Vec<String>,
    pub insufficient: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenFieldPattern {
    pub pattern: String,
    pub name_group: usize,
    pub value_group: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainPatterns {
    /// Input element for one unit; `{troop}` is replaced by the unit id.
    pub input: String,
    /// Characters after the input that may hold its max count.
    pub window: usize,
    pub max_count: Vec<String>,
    pub form_action: String,
    pub hidden_fields: Vec<HiddenFieldPattern>,
    pub submit_field: (String, String),
    pub success: Vec<String>,
    pub failure: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmPatterns {
    /// Query fragment selecting the farm-list tab of the rally point.
    pub tab: String,
    pub lists_key: String,
    pub slots_key: String,
    pub rally_point_gid: u32,
    pub default_rally_slot: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttackPatterns {
    pub tab: String,
    /// Village-list symbol color to movement kind label.
    pub colors: BTreeMap<String, String>,
    /// Incoming table CSS class to movement kind label.
    pub movement_classes: BTreeMap<String, String>,
}

impl PatternTable {
    /// The table compiled into the binary.
    pub fn embedded() -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(PATTERNS_JSON)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// File override when given, the embedded table otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Self::embedded(),
        }
    }

    /// Template for a page name. Military building pages share `military`.
    pub fn page(&self, name: &str) -> Option<&PageTemplate> {
        self.pages.get(name).or_else(|| match name {
            "barracks" | "stable" | "workshop" => self.pages.get("military"),
            _ => None,
        })
    }

    pub fn is_login_page(&self, body: &str) -> bool {
        self.markers.login.iter().any(|m| body.contains(m.as_str()))
    }

    pub fn is_authenticated_page(&self, body: &str) -> bool {
        self.markers
            .authenticated
            .iter()
            .any(|m| body.contains(m.as_str()))
    }
}

/// True when any marker occurs in `body`.
pub fn contains_any(body: &str, markers: &[String]) -> bool {
    markers.iter().any(|m| body.contains(m.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::engine::FieldKind;

    #[test]
    fn test_embedded_table_parses() {
        let t = PatternTable::embedded().unwrap();
        assert!(t.pages.contains_key("dorf1"));
        assert!(t.pages.contains_key("dorf2"));
        assert_eq!(t.upgrade.links.len(), 3);
        assert_eq!(t.train.hidden_fields.len(), 2);
        assert_eq!(t.farm.default_rally_slot, 39);
    }

    #[test]
    fn test_embedded_patterns_compile() {
        let t = PatternTable::embedded().unwrap();
        for page in t.pages.values() {
            for (name, field) in &page.fields {
                if field.kind != FieldKind::Object {
                    assert!(regex::Regex::new(&field.selector).is_ok(), "{name}");
                }
            }
        }
        for link in &t.upgrade.links {
            assert!(regex::Regex::new(&link.pattern).is_ok());
        }
        assert!(regex::Regex::new(&t.village_list.fallback).is_ok());
    }

    #[test]
    fn test_military_pages_share_template() {
        let t = PatternTable::embedded().unwrap();
        let b = t.page("barracks").unwrap();
        assert!(b.fields.contains_key("trainableTroops"));
        assert!(t.page("stable").is_some());
        assert!(t.page("unknown").is_none());
    }

    #[test]
    fn test_login_markers() {
        let t = PatternTable::embedded().unwrap();
        assert!(t.is_login_page(r#"<form name="login" id="loginForm">"#));
        assert!(!t.is_login_page(r#"<div id="villageList">"#));
        assert!(t.is_authenticated_page(r#"<a href="/dorf1.php">"#));
    }
}
