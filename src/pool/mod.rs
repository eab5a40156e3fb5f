//! Per-origin connection pool manager.
//!
//! `reqwest::Client` already pools and pipelines keep-alive HTTP/1.1
//! connections per host; this module is a thin, origin-keyed registry on
//! top of it, giving each origin its own client configured with the pool's
//! connection and idle-timeout knobs, built at most once and reused for the
//! life of the process. A `tokio::sync::Semaphore` sized to
//! `max_connections` is held alongside each client to bound how many
//! requests to that origin may be in flight at once, since
//! `pool_max_idle_per_host` alone only caps idle/reusable connections, not
//! concurrent in-flight ones.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use tokio::sync::{RwLock, Semaphore};
use tracing::warn;

use crate::headers::Headers;

/// Configuration applied to every per-origin pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Caps both `reqwest`'s idle-connection cache per host and the number
    /// of requests to one origin allowed in flight at once (see
    /// [`PoolEntry::semaphore`]).
    pub max_connections: usize,
    /// No underlying effect: neither `reqwest` nor `hyper` expose HTTP/1.1
    /// request pipelining as a configurable knob, so there is nothing to
    /// wire this to. Kept on the config surface for operators migrating
    /// settings from the reference deployment.
    pub max_pipelined_per_connection: usize,
    pub keep_alive_idle: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_pipelined_per_connection: 5,
            keep_alive_idle: Duration::from_millis(30_000),
        }
    }
}

/// `scheme://host[:port]`, keying the per-origin pool registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Origin(String);

impl Origin {
    pub fn from_url(url: &url::Url) -> Option<Self> {
        let scheme = url.scheme();
        let host = url.host_str()?;
        match url.port() {
            Some(port) => Some(Self(format!("{scheme}://{host}:{port}"))),
            None => Some(Self(format!("{scheme}://{host}"))),
        }
    }
}

/// The normalized response shape returned by [`ConnectionPoolManager::request`].
pub struct PoolResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: reqwest::Response,
}

/// A per-origin pool: the shared `reqwest::Client` plus the semaphore that
/// bounds how many requests to this origin may be in flight at once.
struct PoolEntry {
    client: reqwest::Client,
    /// Permits equal to `PoolConfig::max_connections`. Acquired around
    /// [`ConnectionPoolManager::send`] so concurrent prefetch fan-out (see
    /// the prefetch orchestrator, which caps nothing on its own) can never
    /// drive more than `max_connections` simultaneous requests at one
    /// origin through the pool.
    semaphore: Semaphore,
}

/// Registry of per-origin `reqwest::Client`s, built lazily and retained
/// for process lifetime.
pub struct ConnectionPoolManager {
    config: PoolConfig,
    pools: RwLock<HashMap<Origin, Arc<PoolEntry>>>,
    /// Used only as the fallback client for one-shot, non-pooled requests.
    fallback: reqwest::Client,
}

impl ConnectionPoolManager {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pools: RwLock::new(HashMap::new()),
            fallback: reqwest::Client::new(),
        }
    }

    /// Return the pool entry for `origin`, constructing it on first use.
    /// Concurrent callers for the same origin never observe more than one
    /// constructed entry; a losing racer's entry is simply dropped.
    async fn get_pool(&self, origin: &Origin) -> Arc<PoolEntry> {
        if let Some(existing) = self.pools.read().await.get(origin) {
            return existing.clone();
        }

        let mut pools = self.pools.write().await;
        if let Some(existing) = pools.get(origin) {
            return existing.clone();
        }

        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(self.config.max_connections)
            .pool_idle_timeout(self.config.keep_alive_idle)
            .http1_only()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let entry = Arc::new(PoolEntry {
            client,
            semaphore: Semaphore::new(self.config.max_connections.max(1)),
        });
        pools.insert(origin.clone(), entry.clone());
        entry
    }

    /// Issue a request through the pool for `url`'s origin. Falls back to
    /// a one-shot, non-pooled fetch on transport failure or if the origin
    /// cannot be derived from `url`.
    pub async fn request(
        &self,
        url: &url::Url,
        method: Method,
        headers: &Headers,
    ) -> Result<PoolResponse, reqwest::Error> {
        let pooled = match Origin::from_url(url) {
            Some(origin) => Some(self.get_pool(&origin).await),
            None => None,
        };

        let result = match &pooled {
            Some(entry) => {
                let _permit = entry
                    .semaphore
                    .acquire()
                    .await
                    .expect("pool semaphore is never closed");
                Self::send(&entry.client, url.clone(), method.clone(), headers).await
            }
            None => Self::send(&self.fallback, url.clone(), method.clone(), headers).await,
        };

        match result {
            Ok(response) => Ok(response),
            Err(err) => {
                warn!(url = %url, error = %err, "pooled request failed, falling back to one-shot fetch");
                Self::send(&self.fallback, url.clone(), method, headers).await
            }
        }
    }

    async fn send(
        client: &reqwest::Client,
        url: url::Url,
        method: Method,
        headers: &Headers,
    ) -> Result<PoolResponse, reqwest::Error> {
        let mut builder = client.request(method, url);
        for (name, value) in headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let response_headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_lowercase(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        Ok(PoolResponse {
            status,
            headers: response_headers,
            body: response,
        })
    }

    /// Drain and drop every registered pool. Used only at shutdown.
    pub async fn close_all(&self) {
        self.pools.write().await.clear();
    }
}
