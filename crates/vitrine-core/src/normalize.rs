//! Identifier canonicalization.
//!
//! Remote IIIF identifiers are URLs, and semantically identical URLs can
//! differ only in query-parameter order. Every cache lookup, index comparison,
//! and hash computation routes through [`normalize_id`] so one resource keys
//! to one string.

use url::Url;

/// Canonicalize a resource identifier for stable comparison and keying.
///
/// Non-http(s) identifiers are returned unchanged. For URLs, the query pairs
/// are sorted lexicographically by `(key, value)` and reserialized; scheme,
/// host, path, and fragment are left exactly as written. Normalization is
/// idempotent.
#[must_use]
pub fn normalize_id(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw) else {
        return raw.to_string();
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return raw.to_string();
    }
    let Some(query_start) = raw.find('?') else {
        return raw.to_string();
    };

    let base = &raw[..query_start];
    let rest = &raw[query_start + 1..];
    let (query, fragment) = match rest.find('#') {
        Some(i) => (&rest[..i], Some(&rest[i..])),
        None => (rest, None),
    };

    let mut pairs: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
    pairs.sort_by(|a, b| split_pair(a).cmp(&split_pair(b)));

    let mut out = String::with_capacity(raw.len());
    out.push_str(base);
    if !pairs.is_empty() {
        out.push('?');
        out.push_str(&pairs.join("&"));
    }
    if let Some(fragment) = fragment {
        out.push_str(fragment);
    }
    out
}

/// Split a raw `key=value` piece into its ordering key.
fn split_pair(piece: &str) -> (&str, &str) {
    match piece.find('=') {
        Some(i) => (&piece[..i], &piece[i + 1..]),
        None => (piece, ""),
    }
}
