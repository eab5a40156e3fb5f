//! Prefetch orchestrator: couples the manifest rewriter's segment
//! URL list to the connection pool and the segment cache, warming the
//! cache in the background without delaying the client's manifest
//! response.

use std::sync::Arc;

use reqwest::Method;
use tracing::{debug, warn};
use url::Url;

use crate::cache::{normalize_key, SegmentCache};
use crate::headers::Headers;
use crate::pool::ConnectionPoolManager;

/// `true` iff the `DISABLE_CACHE` environment switch is set to the literal
/// string `"true"`. Read fresh on every call, never cached.
pub fn cache_disabled() -> bool {
    std::env::var("DISABLE_CACHE").as_deref() == Ok("true")
}

/// Run `cleanup()` and fan out a detached prefetch task per URL in
/// `urls`. Returns immediately; prefetch tasks continue in the
/// background regardless of whether the caller is still around.
pub async fn prefetch_all(
    cache: Arc<SegmentCache>,
    pool: Arc<ConnectionPoolManager>,
    urls: Vec<Url>,
    outbound_headers: Headers,
) {
    if cache_disabled() {
        return;
    }

    cache.cleanup().await;

    for url in urls {
        let cache = cache.clone();
        let pool = pool.clone();
        let outbound_headers = outbound_headers.clone();
        tokio::spawn(async move {
            prefetch_one(cache, pool, url, outbound_headers).await;
        });
    }
}

async fn prefetch_one(
    cache: Arc<SegmentCache>,
    pool: Arc<ConnectionPoolManager>,
    url: Url,
    outbound_headers: Headers,
) {
    if cache_disabled() {
        return;
    }

    let key = normalize_key(&url);
    if cache.get(&key).await.is_some() {
        return;
    }

    let response = match pool.request(&url, Method::GET, &outbound_headers).await {
        Ok(response) => response,
        Err(err) => {
            warn!(url = %url, error = %err, "prefetch request failed");
            return;
        }
    };

    if !(200..300).contains(&response.status) {
        warn!(url = %url, status = response.status, "prefetch got non-2xx response");
        return;
    }

    let bytes = match response.body.bytes().await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(url = %url, error = %err, "prefetch failed reading body");
            return;
        }
    };

    if cache_disabled() {
        return;
    }

    debug!(url = %url, bytes = bytes.len(), "prefetched segment");
    cache
        .set(key, bytes, response.headers, response.status)
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_disabled_matches_literal_string_true() {
        std::env::remove_var("DISABLE_CACHE");
        assert!(!cache_disabled());

        std::env::set_var("DISABLE_CACHE", "true");
        assert!(cache_disabled());

        std::env::set_var("DISABLE_CACHE", "TRUE");
        assert!(!cache_disabled());

        std::env::remove_var("DISABLE_CACHE");
    }
}
