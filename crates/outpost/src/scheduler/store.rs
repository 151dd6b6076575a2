// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! JSON persistence for rule files.
//!
//! A [`RuleCodec`] maps between a file's JSON document and a flat rule
//! list, migrating older shapes on the way in. Files are written to a
//! temporary sibling and renamed into place.

use std::path::Path;

use serde_json::Value;

use crate::error::StoreError;

/// File shape of one rule kind.
pub trait RuleCodec {
    type Rule;

    /// Rules from a file's root document. Legacy shapes are migrated here.
    fn decode(root: Value) -> Result<Vec<Self::Rule>, StoreError>;

    /// Whether `root` is in an older shape that should be rewritten on load.
    fn is_legacy(_root: &Value) -> bool {
        false
    }

    /// Root document for `rules`. Entities without rules get no entry.
    fn encode<'a>(rules: impl Iterator<Item = &'a Self::Rule>) -> Value
    where
        Self::Rule: 'a;
}

/// Read `path` as JSON. A missing file is `Ok(None)`.
pub fn read_json(path: &Path) -> Result<Option<Value>, StoreError> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };
    if text.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| StoreError::Json {
            path: path.display().to_string(),
            source,
        })
}

/// Write `value` to `path` through a temporary file.
pub fn write_json(path: &Path, value: &Value) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let data = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.display().to_string(),
        source,
    })?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, data).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

/// Load every rule in `path` through codec `C`. The flag is set when the
/// file was in a legacy shape.
pub fn load<C: RuleCodec>(path: &Path) -> Result<(Vec<C::Rule>, bool), StoreError> {
    match read_json(path)? {
        Some(root) => {
            let legacy = C::is_legacy(&root);
            Ok((C::decode(root)?, legacy))
        }
        None => Ok((Vec::new(), false)),
    }
}

/// Persist `rules` to `path` through codec `C`.
pub fn save<'a, C: RuleCodec>(path: &Path, rules: impl Iterator<Item = &'a C::Rule>) -> Result<(), StoreError>
where
    C::Rule: 'a,
{
    write_json(path, &C::encode(rules))
}

/// Parse a JSON object key as a numeric id.
pub(crate) fn numeric_key(key: &str) -> Result<u64, StoreError> {
    key.parse()
        .map_err(|_| StoreError::Shape(format!("expected a numeric key, found {key:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_and_empty_files_read_as_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        assert!(read_json(&path).unwrap().is_none());
        std::fs::write(&path, "  ").unwrap();
        assert!(read_json(&path).unwrap().is_none());
    }

    #[test]
    fn test_write_creates_parent_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("rules.json");
        write_json(&path, &serde_json::json!({"a": 1})).unwrap();
        write_json(&path, &serde_json::json!({"a": 2})).unwrap();
        assert_eq!(read_json(&path).unwrap(), Some(serde_json::json!({"a": 2})));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = read_json(&path).unwrap_err();
        assert_eq!(err.code(), "json");
    }
}
