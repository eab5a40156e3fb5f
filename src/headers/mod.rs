//! Header policy for outbound origin requests.
//!
//! Two pure operations: building a canonical outbound header set from a
//! client's escape-hatch headers, and scrubbing transport/forwarding
//! headers that must never leave this process.

use std::collections::HashMap;

/// Default outbound User-Agent. Bit-exact; player fingerprinting on some
/// origins keys off this string.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:93.0) Gecko/20100101 Firefox/93.0";

/// Escape-hatch header names a client may use to control outbound headers,
/// mapped to their canonical outbound name. Exhaustive and fixed.
const ESCAPE_HATCHES: &[(&str, &str)] = &[
    ("x-cookie", "Cookie"),
    ("x-referer", "Referer"),
    ("x-origin", "Origin"),
    ("x-user-agent", "User-Agent"),
    ("x-x-real-ip", "X-Real-Ip"),
];

/// Headers that are never forwarded upstream, regardless of origin.
const BLACKLIST: &[&str] = &[
    "cf-connecting-ip",
    "cf-worker",
    "cf-ray",
    "cf-visitor",
    "cf-ew-via",
    "cdn-loop",
    "x-amzn-trace-id",
    "cf-ipcountry",
    "x-forwarded-for",
    "x-forwarded-host",
    "x-forwarded-proto",
    "forwarded",
    "x-real-ip",
    "content-length",
];

/// A case-insensitive outbound header bag, keyed by lower-cased name.
///
/// Using a plain map instead of `http::HeaderMap` keeps this module free of
/// a specific HTTP crate's header validation rules, which matters because
/// the client header JSON in `headers=` is attacker-controlled free text.
pub type Headers = HashMap<String, String>;

/// Build the outbound header set for a request to the origin.
///
/// `client_headers` are the headers the client sent on *its* request to
/// this proxy (already lower-cased by the caller, as axum's `HeaderMap`
/// iteration does).
pub fn build_outbound_headers(client_headers: &Headers) -> Headers {
    let mut out = Headers::new();
    out.insert("user-agent".to_string(), DEFAULT_USER_AGENT.to_string());

    for (inbound, outbound) in ESCAPE_HATCHES {
        if let Some(value) = client_headers.get(*inbound) {
            out.insert(outbound.to_lowercase(), value.clone());
        }
    }

    out
}

/// Remove every blacklisted or escape-hatch header from `headers`, and
/// strip the `zstd` token from `accept-encoding` if present.
pub fn scrub(headers: &Headers) -> Headers {
    let mut out: Headers = headers
        .iter()
        .filter(|(name, _)| !is_blacklisted(name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if let Some(accept_encoding) = out.get("accept-encoding").cloned() {
        out.insert("accept-encoding".to_string(), strip_zstd(&accept_encoding));
    }

    out
}

fn is_blacklisted(name: &str) -> bool {
    let lower = name.to_lowercase();
    BLACKLIST.contains(&lower.as_str())
        || ESCAPE_HATCHES.iter().any(|(inbound, _)| *inbound == lower)
}

/// Remove the `zstd` token (and its surrounding comma/whitespace) from an
/// `Accept-Encoding` value, preserving the order of remaining tokens.
fn strip_zstd(value: &str) -> String {
    value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.eq_ignore_ascii_case("zstd"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> Headers {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_user_agent_is_set_without_escape_hatch() {
        let out = build_outbound_headers(&Headers::new());
        assert_eq!(out.get("user-agent"), Some(&DEFAULT_USER_AGENT.to_string()));
    }

    #[test]
    fn escape_hatches_translate_to_canonical_names() {
        let client = map(&[
            ("x-cookie", "c=1"),
            ("x-referer", "https://a.test/"),
            ("x-origin", "https://a.test"),
            ("x-user-agent", "CustomUA/1.0"),
            ("x-x-real-ip", "9.9.9.9"),
        ]);
        let out = build_outbound_headers(&client);
        assert_eq!(out.get("cookie"), Some(&"c=1".to_string()));
        assert_eq!(out.get("referer"), Some(&"https://a.test/".to_string()));
        assert_eq!(out.get("origin"), Some(&"https://a.test".to_string()));
        assert_eq!(out.get("user-agent"), Some(&"CustomUA/1.0".to_string()));
        assert_eq!(out.get("x-real-ip"), Some(&"9.9.9.9".to_string()));
    }

    #[test]
    fn unrecognized_client_headers_are_not_forwarded() {
        let client = map(&[("x-custom-thing", "hello")]);
        let out = build_outbound_headers(&client);
        assert!(!out.contains_key("x-custom-thing"));
    }

    #[test]
    fn forwarded_for_and_cookie_escape_hatch_scrub_together() {
        let headers = map(&[
            ("x-forwarded-for", "1.2.3.4"),
            ("accept-encoding", "gzip, zstd, br"),
            ("x-cookie", "c=1"),
        ]);
        let mut outbound = build_outbound_headers(&headers);
        outbound.insert("accept-encoding".to_string(), "gzip, zstd, br".to_string());
        outbound.insert("x-forwarded-for".to_string(), "1.2.3.4".to_string());

        let scrubbed = scrub(&outbound);
        assert!(!scrubbed.contains_key("x-forwarded-for"));
        assert!(!scrubbed.contains_key("x-cookie"));
        assert_eq!(scrubbed.get("accept-encoding"), Some(&"gzip, br".to_string()));
        assert_eq!(scrubbed.get("cookie"), Some(&"c=1".to_string()));
    }

    #[test]
    fn blacklist_is_case_insensitive() {
        let headers = map(&[("X-Forwarded-For", "1.2.3.4")]);
        let scrubbed = scrub(&headers);
        assert!(scrubbed.is_empty());
    }

    #[test]
    fn strip_zstd_preserves_order_of_other_tokens() {
        assert_eq!(strip_zstd("gzip, zstd, br"), "gzip, br");
        assert_eq!(strip_zstd("zstd"), "");
        assert_eq!(strip_zstd("gzip, br"), "gzip, br");
    }
}
