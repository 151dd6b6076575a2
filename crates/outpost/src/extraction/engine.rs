// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Declarative field extraction from raw page text.
//!
//! A page specification maps field names to a pattern and a kind:
//!
//! * `single` takes the first capture group of the first match.
//! * `list` takes every non-overlapping match and binds capture groups
//!   `1..N` to the declared sub-field names in order. Matches that bind
//!   nothing are skipped.
//! * `object` runs one named sub-pattern per key and assembles the results.
//!
//! Fields that match nothing are reported as `None` so callers can tell
//! "not on the page" apart from "zero". A pattern that fails to compile
//! behaves as a pattern that never matches, with a warning in the log.
//!
//! Extraction is a pure function of the text and the spec.

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use super::text;

// ── Specification types ──────────────────────────────────────────────────────

/// How a field's pattern is applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Single,
    List,
    Object,
}

/// Extraction rule for one field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Regex pattern. Unused for `object` fields.
    #[serde(default)]
    pub selector: String,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    /// Sub-field names bound to capture groups 1..N (`list` only).
    #[serde(default)]
    pub fields: Vec<String>,
    /// Sub-field name to single-capture pattern (`object` only).
    #[serde(default)]
    pub children: BTreeMap<String, String>,
}

impl FieldSpec {
    pub fn single(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            kind: FieldKind::Single,
            fields: Vec::new(),
            children: BTreeMap::new(),
        }
    }

    pub fn list(selector: &str, fields: &[&str]) -> Self {
        Self {
            selector: selector.to_string(),
            kind: FieldKind::List,
            fields: fields.iter().map(|f| f.to_string()).collect(),
            children: BTreeMap::new(),
        }
    }

    pub fn object(children: &[(&str, &str)]) -> Self {
        Self {
            selector: String::new(),
            kind: FieldKind::Object,
            fields: Vec::new(),
            children: children
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Field name to rule, for one page.
pub type PageSpec = BTreeMap<String, FieldSpec>;

/// One list entry or object value: sub-field name to captured text.
pub type Record = BTreeMap<String, String>;

// ── Result types ─────────────────────────────────────────────────────────────

/// A successfully extracted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<Record>),
    Object(Record),
}

/// Typed result map for one page. Every declared field is present as a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extracted {
    pub fields: BTreeMap<String, Option<FieldValue>>,
}

impl Extracted {
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).and_then(Option::as_ref)
    }

    pub fn is_present(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FieldValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// `text` parsed as an integer, ignoring thousands separators.
    pub fn number(&self, name: &str) -> Option<i64> {
        self.text(name).and_then(text::parse_int)
    }

    /// Entries of a `list` field. Empty when the field is absent.
    pub fn list(&self, name: &str) -> &[Record] {
        match self.get(name) {
            Some(FieldValue::List(items)) => items,
            _ => &[],
        }
    }

    pub fn object(&self, name: &str) -> Option<&Record> {
        match self.get(name)? {
            FieldValue::Object(r) => Some(r),
            _ => None,
        }
    }
}

// ── Compiled specification ───────────────────────────────────────────────────

#[derive(Debug)]
enum CompiledField {
    Single(Option<Regex>),
    List(Option<Regex>, Vec<String>),
    Object(Vec<(String, Option<Regex>)>),
}

/// A page spec with its patterns compiled once.
///
/// Broken patterns are kept as `None` so the field still appears in the
/// result, always absent.
#[derive(Debug)]
pub struct CompiledSpec {
    fields: Vec<(String, CompiledField)>,
}

impl CompiledSpec {
    pub fn compile(spec: &PageSpec) -> Self {
        let fields = spec
            .iter()
            .map(|(name, field)| {
                let compiled = match field.kind {
                    FieldKind::Single => CompiledField::Single(compile(name, &field.selector, false)),
                    FieldKind::List => CompiledField::List(
                        compile(name, &field.selector, true),
                        field.fields.clone(),
                    ),
                    FieldKind::Object => CompiledField::Object(
                        field
                            .children
                            .iter()
                            .map(|(key, pattern)| {
                                (key.clone(), compile(&format!("{name}.{key}"), pattern, false))
                            })
                            .collect(),
                    ),
                };
                (name.clone(), compiled)
            })
            .collect();
        Self { fields }
    }

    pub fn extract(&self, page: &str) -> Extracted {
        let mut out = Extracted::default();
        for (name, field) in &self.fields {
            let value = match field {
                CompiledField::Single(re) => re
                    .as_ref()
                    .and_then(|re| first_capture(re, page))
                    .map(FieldValue::Text),
                CompiledField::List(re, names) => re.as_ref().and_then(|re| {
                    let items = all_matches(re, names, page);
                    (!items.is_empty()).then_some(FieldValue::List(items))
                }),
                CompiledField::Object(children) => {
                    let record: Record = children
                        .iter()
                        .filter_map(|(key, re)| {
                            re.as_ref()
                                .and_then(|re| first_capture(re, page))
                                .map(|v| (key.clone(), v))
                        })
                        .collect();
                    (!record.is_empty()).then_some(FieldValue::Object(record))
                }
            };
            out.fields.insert(name.clone(), value);
        }
        out
    }
}

/// Compile `spec` and run it against `page`.
pub fn extract(page: &str, spec: &PageSpec) -> Extracted {
    CompiledSpec::compile(spec).extract(page)
}

fn compile(name: &str, pattern: &str, dot_all: bool) -> Option<Regex> {
    match RegexBuilder::new(pattern).dot_matches_new_line(dot_all).build() {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(field = name, error = %e, "pattern does not compile; field will be absent");
            None
        }
    }
}

fn first_capture(re: &Regex, page: &str) -> Option<String> {
    let caps = re.captures(page)?;
    caps.get(1).map(|m| text::decode_entities(m.as_str().trim()))
}

fn all_matches(re: &Regex, names: &[String], page: &str) -> Vec<Record> {
    re.captures_iter(page)
        .filter_map(|caps| {
            let record: Record = names
                .iter()
                .enumerate()
                .filter_map(|(i, name)| {
                    let m = caps.get(i + 1)?;
                    let v = m.as_str().trim();
                    (!v.is_empty()).then(|| (name.clone(), text::decode_entities(v)))
                })
                .collect();
            (!record.is_empty()).then_some(record)
        })
        .collect()
}

// ── Tests ────────────────────────────────────────────────────────────────────
