//! Route handlers for the relay's core and operational endpoints.

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::cache::normalize_key;
use crate::errors::{RelayError, RelayResult};
use crate::headers::{build_outbound_headers, scrub, Headers};
use crate::prefetch::prefetch_all;
use crate::rewrite::{rewrite_manifest, RewriteContext};
use crate::state::AppState;

const CORS_HEADERS: [(header::HeaderName, &str); 3] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "*"),
];

#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    url: Option<String>,
    headers: Option<String>,
}

/// Parse the `headers` query parameter into its verbatim JSON string (for
/// re-embedding) and a lower-cased map (for header policy). Defaults to an
/// empty object when absent; rejects malformed JSON with `BadRequest`.
fn parse_client_headers(raw: Option<&str>) -> RelayResult<(String, Headers)> {
    let raw = raw.unwrap_or("{}");
    let value: serde_json::Value = serde_json::from_str(raw)
        .map_err(|_| RelayError::BadRequest("invalid headers JSON".to_string()))?;

    let mut headers = Headers::new();
    if let serde_json::Value::Object(map) = value {
        for (key, val) in map {
            if let serde_json::Value::String(val) = val {
                headers.insert(key.to_lowercase(), val);
            }
        }
    }
    Ok((raw.to_string(), headers))
}

fn parse_target_url(raw: Option<&str>) -> RelayResult<Url> {
    let raw = raw
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RelayError::BadRequest("missing url parameter".to_string()))?;
    Url::parse(raw).map_err(|_| RelayError::BadRequest("invalid url parameter".to_string()))
}

fn status_text(status: u16) -> String {
    axum::http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("")
        .to_string()
}

/// `GET /m3u8-proxy?url=...&headers=...`: fetch, classify and rewrite an
/// HLS manifest, firing a background prefetch for any segment URLs a
/// media playlist names.
pub async fn m3u8_proxy(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> RelayResult<Response> {
    if std::env::var("DISABLE_M3U8").as_deref() == Ok("true") {
        return Err(RelayError::Disabled("M3U8 proxying is disabled"));
    }

    let target = parse_target_url(query.url.as_deref())?;
    let (headers_json, client_headers) = parse_client_headers(query.headers.as_deref())?;
    let outbound = scrub(&build_outbound_headers(&client_headers));

    let response = state
        .pool
        .request(&target, reqwest::Method::GET, &outbound)
        .await
        .map_err(RelayError::TransportFailure)?;

    if !(200..300).contains(&response.status) {
        return Err(RelayError::UpstreamFailure {
            status: response.status,
            status_text: status_text(response.status),
        });
    }

    let body = response
        .body
        .text()
        .await
        .map_err(|err| RelayError::Internal(err.to_string()))?;

    let proxy_base = state.config.server.base_url.clone();
    let ctx = RewriteContext {
        manifest_url: &target,
        headers_json: &headers_json,
        proxy_base: &proxy_base,
    };
    let out = rewrite_manifest(&body, &ctx);

    if !out.prefetch_urls.is_empty() {
        debug!(count = out.prefetch_urls.len(), "scheduling prefetch");
        prefetch_all(
            state.cache.clone(),
            state.pool.clone(),
            out.prefetch_urls,
            outbound,
        )
        .await;
    }

    Ok((
        StatusCode::OK,
        manifest_response_headers(),
        out.body,
    )
        .into_response())
}

/// `GET /ts-proxy?url=...&headers=...`: serve a segment from cache when
/// present, otherwise fetch it through the pool and opportunistically
/// cache the result.
pub async fn ts_proxy(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
) -> RelayResult<Response> {
    let target = parse_target_url(query.url.as_deref())?;
    let (_headers_json, client_headers) = parse_client_headers(query.headers.as_deref())?;
    let outbound = scrub(&build_outbound_headers(&client_headers));

    let disabled = crate::prefetch::cache_disabled();
    let key = normalize_key(&target);

    if !disabled {
        if let Some(entry) = state.cache.get(&key).await {
            debug!(url = %target, "segment cache hit");
            let status = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);
            return Ok((status, to_header_map(&entry.headers), entry.bytes).into_response());
        }
    }

    let response = state
        .pool
        .request(&target, reqwest::Method::GET, &outbound)
        .await
        .map_err(RelayError::TransportFailure)?;

    if !(200..300).contains(&response.status) {
        return Err(RelayError::UpstreamFailure {
            status: response.status,
            status_text: status_text(response.status),
        });
    }

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    let response_headers = to_header_map(&response.headers);

    if disabled {
        let body = Body::from_stream(response.body.bytes_stream());
        return Ok((status, response_headers, body).into_response());
    }

    let bytes = response
        .body
        .bytes()
        .await
        .map_err(|err| RelayError::Internal(err.to_string()))?;

    state
        .cache
        .set(key, bytes.clone(), response.headers, response.status)
        .await;

    Ok((status, response_headers, bytes).into_response())
}

/// Build an `axum::http::HeaderMap` from a plain outbound/stored header
/// bag, silently dropping any name or value that isn't valid as an HTTP
/// header (e.g. leftover CR/LF from a misbehaving origin).
fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::try_from(name.as_str()),
            axum::http::HeaderValue::try_from(value.as_str()),
        ) {
            map.insert(name, value);
        }
    }
    map
}

/// `OPTIONS /m3u8-proxy`, `/ts-proxy`: CORS preflight acknowledgement.
pub async fn proxy_preflight() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, CORS_HEADERS)
}

/// `GET /cache-stats`: runs a cleanup sweep, then reports occupancy.
pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    state.cache.cleanup().await;
    let stats = state.cache.stats().await;
    (
        [(
            header::CACHE_CONTROL,
            "no-cache, no-store, must-revalidate",
        )],
        Json(stats),
    )
}

/// `GET /healthz`: trivial liveness probe.
pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    destination: Option<String>,
}

/// `GET,POST /stream?destination=...`: a minimal, policy-free
/// pass-through left outside the manifest/segment core. Does not scrub
/// headers, rewrite URLs, or touch the cache.
pub async fn stream_passthrough(
    method: axum::http::Method,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> RelayResult<Response> {
    let target = parse_target_url(query.destination.as_deref())?;

    if std::env::var("REQ_DEBUG").as_deref() == Ok("true") {
        let header_names: Vec<&str> = headers.keys().map(|name| name.as_str()).collect();
        debug!(method = %method, url = %target, headers = ?header_names, "outbound stream request");
    }

    let client = reqwest::Client::new();
    let upstream = client
        .request(method, target)
        .send()
        .await
        .map_err(RelayError::TransportFailure)?;

    let status = StatusCode::from_u16(upstream.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = Body::from_stream(upstream.bytes_stream());
    Ok((status, body).into_response())
}

fn manifest_response_headers() -> [(header::HeaderName, &'static str); 5] {
    [
        (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
        (header::ACCESS_CONTROL_ALLOW_METHODS, "*"),
        (
            header::CACHE_CONTROL,
            "no-cache, no-store, must-revalidate",
        ),
    ]
}
