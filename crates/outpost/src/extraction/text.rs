// Copyright 2026 Outpost Contributors
// SPDX-License-Identifier: Apache-2.0

//! Small text normalizers shared by the extractors.

/// Parse an integer that may carry thousands separators, bidi marks or a
/// typographic minus sign.
pub fn parse_int(raw: &str) -> Option<i64> {
    let mut negative = false;
    let mut digits = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '0'..='9' => digits.push(c),
            '-' | '\u{2212}' if digits.is_empty() => negative = true,
            _ => {}
        }
    }
    let value: i64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Parse `H:MM:SS` or `MM:SS` into seconds.
pub fn parse_clock(raw: &str) -> Option<u64> {
    let parts: Vec<u64> = raw
        .trim()
        .split(':')
        .map(|p| p.trim().parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;
    match parts.as_slice() {
        [h, m, s] => Some(h * 3600 + m * 60 + s),
        [m, s] => Some(m * 60 + s),
        _ => None,
    }
}

/// Decode the handful of HTML entities the game emits in names and URLs.
pub fn decode_entities(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }
    raw.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#039;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#x202d;", "")
        .replace("&#x202c;", "")
}

/// Replace `\uXXXX` escapes left in script-embedded strings.
pub fn decode_unicode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find("\\u") {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 2..];
        let decoded = tail
            .get(..4)
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32);
        match decoded {
            Some(c) => {
                out.push(c);
                rest = &tail[4..];
            }
            None => {
                out.push_str("\\u");
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_int_variants() {
        assert_eq!(parse_int("1.250"), Some(1250));
        assert_eq!(parse_int("\u{202d}12,400\u{202c}"), Some(12400));
        assert_eq!(parse_int("\u{2212}35"), Some(-35));
        assert_eq!(parse_int("-7"), Some(-7));
        assert_eq!(parse_int("none"), None);
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("1:02:03"), Some(3723));
        assert_eq!(parse_clock("05:10"), Some(310));
        assert_eq!(parse_clock("soon"), None);
        assert_eq!(parse_clock("1:2:3:4"), None);
    }

    #[test]
    fn test_decode_unicode_escapes() {
        assert_eq!(decode_unicode_escapes("K\\u00f6y 01"), "Köy 01");
        assert_eq!(decode_unicode_escapes("bad \\uZZ end"), "bad \\uZZ end");
        assert_eq!(decode_unicode_escapes("plain"), "plain");
    }

    #[test]
    fn test_decode_entities() {
        assert_eq!(
            decode_entities("build.php?id=5&amp;a=1&amp;c=ab"),
            "build.php?id=5&a=1&c=ab"
        );
    }
}
