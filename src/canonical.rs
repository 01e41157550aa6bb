//! Canonical request construction: URI encoding profiles, canonical header
//! block, canonical query string (spec §4.1).

use std::collections::BTreeMap;
use std::fmt::Write as _;

/// The four URI-encoding profiles of spec §4.1; they differ only in which
/// characters are treated as "safe" (left unescaped).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingProfile {
    /// alphanumerics plus `- _ . /`
    Standard,
    /// alphanumerics plus `/` only (S3 listing query values)
    AllSafe,
    /// alphanumerics plus `- . / _ ~`
    V4Auth,
    /// V4Auth minus `/` (i.e. `/` is encoded too)
    V4AuthSlash,
}

impl EncodingProfile {
    fn is_safe(self, b: u8) -> bool {
        let alnum = b.is_ascii_alphanumeric();
        match self {
            Self::Standard => alnum || matches!(b, b'-' | b'_' | b'.' | b'/'),
            Self::AllSafe => alnum || b == b'/',
            Self::V4Auth => alnum || matches!(b, b'-' | b'.' | b'/' | b'_' | b'~'),
            Self::V4AuthSlash => alnum || matches!(b, b'-' | b'.' | b'_' | b'~'),
        }
    }
}

/// Percent-encode `s` using the given profile.
pub fn uri_encode(s: &str, profile: EncodingProfile) -> String {
    let mut out = String::with_capacity(s.len());
    for &b in s.as_bytes() {
        if profile.is_safe(b) {
            out.push(b as char);
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

/// Percent-decode `s`, tolerating percent sequences of arbitrary casing.
/// Returns the raw decoded bytes reinterpreted as UTF-8 (lossy on invalid
/// sequences, matching "reinterpreted as the platform string type").
pub fn uri_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Collapse runs of internal whitespace to a single space and trim outer
/// whitespace, per the canonical-header-block rule.
pub fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.trim().chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
            }
            last_was_space = true;
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    out
}

/// An ordered mapping from lowercased header name to (display-cased name,
/// value), per spec §3 "HeaderMap". Iteration order is the sorted,
/// lowercased-name order used to build canonical header blocks.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    entries: BTreeMap<String, (String, String)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `name: value`. When `override_existing` is false and `name`
    /// is already present, the existing value is preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>, override_existing: bool) {
        let name = name.into();
        let key = name.to_ascii_lowercase();
        if !override_existing && self.entries.contains_key(&key) {
            return;
        }
        self.entries.insert(key, (name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, (_, v))| (k.as_str(), v.as_str()))
    }

    pub fn iter_display(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(_, (d, v))| (d.as_str(), v.as_str()))
    }

    /// Canonical header block for the given predicate over lowercased
    /// names, one `name:value\n` line per matching header, sorted by name.
    pub fn canonical_block(&self, mut include: impl FnMut(&str) -> bool) -> String {
        let mut out = String::new();
        for (name, (_, value)) in &self.entries {
            if include(name) {
                let _ = writeln!(out, "{name}:{}", collapse_whitespace(value));
            }
        }
        out
    }

    /// Semicolon-joined, sorted, lowercased header names matching the
    /// predicate (used for v4's SignedHeaders).
    pub fn signed_headers_list(&self, mut include: impl FnMut(&str) -> bool) -> String {
        self.entries
            .keys()
            .filter(|k| include(k))
            .cloned()
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Canonical query string per spec §4.1: split on `&`, each term on first
/// `=`; both sides decoded then re-encoded with V4-auth-slash; terms sorted
/// by encoded key.
pub fn canonical_query_string(raw_query: &str) -> String {
    if raw_query.is_empty() {
        return String::new();
    }
    let mut terms: Vec<(String, String)> = raw_query
        .split('&')
        .filter(|t| !t.is_empty())
        .map(|term| {
            let (k, v) = match term.split_once('=') {
                Some((k, v)) => (k, v),
                None => (term, ""),
            };
            let key = uri_encode(&uri_decode(k), EncodingProfile::V4AuthSlash);
            let value = uri_encode(&uri_decode(v), EncodingProfile::V4AuthSlash);
            (key, value)
        })
        .collect();
    terms.sort();
    terms
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Canonicalize a URI path: encode each segment with the v4-auth profile,
/// preserving `/` separators.
pub fn canonical_uri_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    path.split('/')
        .map(|seg| uri_encode(seg, EncodingProfile::V4Auth))
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_profiles_differ_on_slash() {
        assert_eq!(uri_encode("a/b", EncodingProfile::V4Auth), "a/b");
        assert_eq!(uri_encode("a/b", EncodingProfile::V4AuthSlash), "a%2Fb");
    }

    #[test]
    fn decode_tolerates_mixed_case_percent() {
        assert_eq!(uri_decode("%2f%2F"), "//");
    }

    #[test]
    fn collapse_whitespace_trims_and_folds() {
        assert_eq!(collapse_whitespace("  a   b\tc  "), "a b c");
    }

    #[test]
    fn header_map_override_semantics() {
        let mut h = HeaderMap::new();
        h.insert("X-Amz-Date", "first", true);
        h.insert("x-amz-date", "second", false);
        assert_eq!(h.get("X-AMZ-DATE"), Some("first"));
        h.insert("x-amz-date", "third", true);
        assert_eq!(h.get("x-amz-date"), Some("third"));
    }

    #[test]
    fn canonical_query_string_sorts_by_encoded_key() {
        let q = canonical_query_string("b=2&a=1&a=0");
        assert_eq!(q, "a=0&a=1&b=2");
    }

    #[test]
    fn canonical_query_string_reencodes_values() {
        let q = canonical_query_string("key=a/b");
        assert_eq!(q, "key=a%2Fb");
    }
}
