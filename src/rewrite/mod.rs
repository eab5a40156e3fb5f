//! HLS manifest classifier and rewriter.
//!
//! Parses an HLS playlist line by line, classifies it as master or media,
//! rewrites every embedded URL so the client fetches it back through this
//! proxy, and collects the absolute segment/key URLs a media playlist
//! references so the prefetch orchestrator can warm the cache.

mod encode;
mod resolve;

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

pub use resolve::resolve;

use self::encode::enc;

/// First `https?://` run up to the next quote or whitespace, used to pull
/// a URL out of a directive attribute list. Heuristic and deliberately
/// naive by design: it misses protocol-relative or quoted-with-whitespace
/// URIs, matching the reference behavior.
static EMBEDDED_URL: Lazy<Regex> = Lazy::new(|| Regex::new(r#"https?://[^"\s]+"#).unwrap());

/// Inputs the rewriter needs for a single manifest request.
pub struct RewriteContext<'a> {
    /// The absolute URL of the manifest being processed; base for relative
    /// URI resolution.
    pub manifest_url: &'a Url,
    /// The client-supplied `headers` query value, verbatim, re-embedded
    /// into every rewritten proxy URL.
    pub headers_json: &'a str,
    /// This proxy's own externally visible base, e.g. `https://px`.
    pub proxy_base: &'a str,
}

/// Result of rewriting one manifest.
pub struct RewriteOutput {
    pub body: String,
    /// Absolute URLs referenced by a media playlist, to be prefetched.
    pub prefetch_urls: Vec<Url>,
}

/// Rewrite `manifest`, routing every embedded URL back through
/// this proxy's `/m3u8-proxy` or `/ts-proxy` endpoints.
pub fn rewrite_manifest(manifest: &str, ctx: &RewriteContext) -> RewriteOutput {
    if is_master_playlist(manifest) {
        rewrite_master(manifest, ctx)
    } else {
        rewrite_media(manifest, ctx)
    }
}

/// A manifest is a master playlist iff it contains the literal substring
/// `RESOLUTION=` anywhere (the reference heuristic for detecting
/// `#EXT-X-STREAM-INF`, rather than parsing the directive itself).
pub fn is_master_playlist(manifest: &str) -> bool {
    manifest.contains("RESOLUTION=")
}

fn rewrite_master(manifest: &str, ctx: &RewriteContext) -> RewriteOutput {
    let mut out_lines = Vec::new();
    let prefetch_urls = Vec::new();

    for line in manifest.split('\n') {
        if line.is_empty() {
            out_lines.push(String::new());
            continue;
        }
        if let Some(rest) = line.strip_prefix("#EXT-X-KEY") {
            out_lines.push(rewrite_directive_url(line, "#EXT-X-KEY", rest, "ts-proxy", ctx));
            continue;
        }
        if let Some(rest) = line.strip_prefix("#EXT-X-MEDIA") {
            out_lines.push(rewrite_directive_url(line, "#EXT-X-MEDIA", rest, "m3u8-proxy", ctx));
            continue;
        }
        if line.starts_with('#') {
            out_lines.push(line.to_string());
            continue;
        }
        match resolve(line, Some(ctx.manifest_url)) {
            Some(resolved) => out_lines.push(proxy_url("m3u8-proxy", resolved.as_str(), ctx)),
            None => out_lines.push(line.to_string()),
        }
    }

    RewriteOutput {
        body: out_lines.join("\n"),
        prefetch_urls,
    }
}

fn rewrite_media(manifest: &str, ctx: &RewriteContext) -> RewriteOutput {
    let mut out_lines = Vec::new();
    let mut prefetch_urls = Vec::new();

    for line in manifest.split('\n') {
        if line.is_empty() {
            out_lines.push(String::new());
            continue;
        }
        if let Some(rest) = line.strip_prefix("#EXT-X-KEY") {
            match EMBEDDED_URL.find(rest) {
                Some(found) => {
                    if let Ok(url) = Url::parse(found.as_str()) {
                        prefetch_urls.push(url);
                    }
                    out_lines.push(rewrite_directive_url(line, "#EXT-X-KEY", rest, "ts-proxy", ctx));
                }
                None => out_lines.push(line.to_string()),
            }
            continue;
        }
        if line.starts_with('#') {
            out_lines.push(line.to_string());
            continue;
        }
        match resolve(line, Some(ctx.manifest_url)) {
            Some(resolved) => {
                out_lines.push(proxy_url("ts-proxy", resolved.as_str(), ctx));
                prefetch_urls.push(resolved);
            }
            None => out_lines.push(line.to_string()),
        }
    }

    RewriteOutput {
        body: out_lines.join("\n"),
        prefetch_urls,
    }
}

/// Rewrite the first embedded URL on a directive line (`#EXT-X-KEY` /
/// `#EXT-X-MEDIA`) in place, leaving the rest of the line untouched. Passes
/// the line through verbatim if no URL is found.
fn rewrite_directive_url(
    full_line: &str,
    _directive: &str,
    rest: &str,
    proxy_path: &str,
    ctx: &RewriteContext,
) -> String {
    match EMBEDDED_URL.find(rest) {
        Some(found) => {
            let replacement = proxy_url(proxy_path, found.as_str(), ctx);
            let mut rebuilt = String::with_capacity(full_line.len());
            let rest_start = full_line.len() - rest.len();
            rebuilt.push_str(&full_line[..rest_start]);
            rebuilt.push_str(&rest[..found.start()]);
            rebuilt.push_str(&replacement);
            rebuilt.push_str(&rest[found.end()..]);
            rebuilt
        }
        None => full_line.to_string(),
    }
}

fn proxy_url(path: &str, target: &str, ctx: &RewriteContext) -> String {
    format!(
        "{}/{}?url={}&headers={}",
        ctx.proxy_base,
        path,
        enc(target),
        enc(ctx.headers_json)
    )
}
