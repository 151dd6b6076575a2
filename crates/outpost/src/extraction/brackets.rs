// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Balanced-bracket scanner for JSON embedded in HTML.
//!
//! Script blocks carry arrays such as `"farmLists":[...]` whose end cannot be
//! bounded by a regex: the array nests objects and arrays, and string values
//! may contain brackets. The scanner walks from an opening bracket, tracks
//! depth across both bracket kinds, and skips string literals (with escapes)
//! until the matching close.

use regex::Regex;

/// Return the balanced slice starting at `open` (which must index `[` or `{`),
/// including both delimiters. `None` if the text ends before it closes.
pub fn balanced_at(text: &str, open: usize) -> Option<&str> {
    let bytes = text.as_bytes();
    match bytes.get(open) {
        Some(b'[') | Some(b'{') => {}
        _ => return None,
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth -= 1;
                if depth == 0 {
                    return text.get(open..=i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Find `"key": [` (or `{`) and return the balanced value that follows.
///
/// Starts searching at byte offset `from`; the returned offset is where the
/// value begins.
pub fn value_after_key<'a>(text: &'a str, key: &str, from: usize) -> Option<(usize, &'a str)> {
    let pattern = format!(r#""?{}"?\s*:\s*[\[{{]"#, regex::escape(key));
    let re = Regex::new(&pattern).ok()?;
    let haystack = text.get(from..)?;
    let m = re.find(haystack)?;
    let open = from + m.end() - 1;
    balanced_at(text, open).map(|slice| (open, slice))
}

/// Shorthand for the first array or object stored under `key`.
pub fn array_after_key<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    value_after_key(text, key, 0).map(|(_, slice)| slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_arrays_and_objects() {
        let text = r#"var x = {"farmLists":[{"id":1,"slots":[{"id":9}]},{"id":2,"slots":[]}],"other":1};"#;
        let arr = array_after_key(text, "farmLists").unwrap();
        assert!(arr.starts_with('['));
        assert!(arr.ends_with(']'));
        let parsed: serde_json::Value = serde_json::from_str(arr).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_brackets_inside_strings_ignored() {
        let text = r#""villageList": [{"name":"[TAG] Alpha ]"},{"name":"say \"]\" twice"}] tail"#;
        let arr = array_after_key(text, "villageList").unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(arr).unwrap();
        assert_eq!(parsed[0]["name"], "[TAG] Alpha ]");
        assert_eq!(parsed[1]["name"], "say \"]\" twice");
    }

    #[test]
    fn test_unterminated_returns_none() {
        assert_eq!(array_after_key(r#""lists":[{"id":1}"#, "lists"), None);
    }

    #[test]
    fn test_missing_key_returns_none() {
        assert_eq!(array_after_key(r#"{"a":[1]}"#, "b"), None);
    }

    #[test]
    fn test_balanced_at_requires_open_bracket() {
        assert_eq!(balanced_at("abc", 0), None);
        assert_eq!(balanced_at("x[1,[2]]y", 1), Some("[1,[2]]"));
    }

    #[test]
    fn test_value_after_key_respects_offset() {
        let text = r#"{"slotsStates":[1]} {"slotsStates":[2,3]}"#;
        let (first, _) = value_after_key(text, "slotsStates", 0).unwrap();
        let (_, second) = value_after_key(text, "slotsStates", first + 1).unwrap();
        assert_eq!(second, "[2,3]");
    }
}
