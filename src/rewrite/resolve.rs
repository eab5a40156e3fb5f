//! URI resolution for playlist lines.
//!
//! When a manifest URL is available, resolution is standard RFC 3986
//! "resolve reference against base" (`url::Url::join`). When there is no
//! base, a candidate must look enough like a bare `host[:port]/path` or
//! `scheme://host/path` string to be treated as an absolute URL on its
//! own; the heuristic below pins down the exact matching rules,
//! including the two inputs it must reject.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Matches `[scheme://]host[:port][/path?query]`, capturing the optional
/// scheme marker, the host[:port] pair, the bare host, the optional port,
/// and the path+query tail.
static STANDALONE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:(https?:)?//)?(([^/?]+?)(?::(\d{0,5}))?)([/?].*|$)"#).unwrap()
});

/// Resolve `candidate` against `base`, or interpret it standalone if no
/// base is supplied.
pub fn resolve(candidate: &str, base: Option<&Url>) -> Option<Url> {
    match base {
        Some(base) => base.join(candidate).ok(),
        None => resolve_standalone(candidate),
    }
}

fn resolve_standalone(candidate: &str) -> Option<Url> {
    // A bare `http:` or `https:` prefix that isn't followed by `//` is
    // malformed input, not a schemeless host (rejects
    // "http:/notenoughslashes").
    if (candidate.starts_with("http:") || candidate.starts_with("https:"))
        && !candidate.starts_with("http://")
        && !candidate.starts_with("https://")
    {
        return None;
    }

    let captures = STANDALONE_PATTERN.captures(candidate)?;
    let scheme = captures.get(1).map(|m| m.as_str());
    let port = captures.get(4).map(|m| m.as_str()).unwrap_or("");

    let mut rebuilt = String::new();
    if let Some(scheme) = scheme {
        rebuilt.push_str(scheme);
        rebuilt.push_str("//");
        rebuilt.push_str(&candidate[scheme.len() + 2..]);
    } else {
        let default_scheme = if port == "443" { "https:" } else { "http:" };
        rebuilt.push_str(default_scheme);
        if candidate.starts_with("//") {
            rebuilt.push_str(candidate);
        } else {
            rebuilt.push_str("//");
            rebuilt.push_str(candidate);
        }
    }

    let url = Url::parse(&rebuilt).ok()?;
    let host = url.host_str()?;
    if host.is_empty() {
        return None;
    }
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotent_on_already_absolute_url() {
        let base = Url::parse("https://o.test/a/b.m3u8").unwrap();
        let resolved = resolve("https://cdn.test/seg2.ts", Some(&base)).unwrap();
        assert_eq!(resolved.as_str(), "https://cdn.test/seg2.ts");
    }

    #[test]
    fn resolves_relative_uri_against_base() {
        let base = Url::parse("https://o.test/a/b.m3u8").unwrap();
        let resolved = resolve("seg1.ts", Some(&base)).unwrap();
        assert_eq!(resolved.as_str(), "https://o.test/a/seg1.ts");
    }

    #[test]
    fn resolves_relative_uri_for_variant_playlist() {
        let base = Url::parse("https://o.test/a/b.m3u8").unwrap();
        let resolved = resolve("variant.m3u8", Some(&base)).unwrap();
        assert_eq!(resolved.as_str(), "https://o.test/a/variant.m3u8");
    }

    /// Standalone resolution defaults to `http:` when the port is absent
    /// or not 443.
    #[test]
    fn standalone_host_defaults_to_http_scheme() {
        let resolved = resolve("example.com/path", None).unwrap();
        assert_eq!(resolved.scheme(), "http");
        assert_eq!(resolved.host_str(), Some("example.com"));
    }

    #[test]
    fn standalone_host_with_port_443_defaults_to_https() {
        let resolved = resolve("example.com:443/path", None).unwrap();
        assert_eq!(resolved.scheme(), "https");
    }

    #[test]
    fn rejects_malformed_scheme_with_too_few_slashes() {
        assert!(resolve("http:/notenoughslashes", None).is_none());
    }

    #[test]
    fn rejects_url_with_empty_host() {
        assert!(resolve("http://:1/", None).is_none());
    }
}
