//! HTTP router.
//!
//! Five routes: `/m3u8-proxy` and `/ts-proxy` are the rewriting/caching
//! core, `/cache-stats` and `/healthz` are operational endpoints, and
//! `/stream` is a minimal pass-through left outside the core's header
//! and caching policy.

pub mod handlers;

use std::net::SocketAddr;

use anyhow::Result;
use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::Config;
use crate::state::AppState;

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
    state: AppState,
}

impl WebServer {
    pub fn new(config: Config) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
        let state = AppState::new(config);
        Ok(Self {
            app: create_router(state.clone()),
            addr,
            state,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve until `shutdown` resolves, then return so the caller can drain
    /// the connection pool registry before exiting.
    pub async fn serve(self, shutdown: impl std::future::Future<Output = ()> + Send + 'static) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/m3u8-proxy",
            get(handlers::m3u8_proxy).options(handlers::proxy_preflight),
        )
        .route(
            "/ts-proxy",
            get(handlers::ts_proxy).options(handlers::proxy_preflight),
        )
        .route("/cache-stats", get(handlers::cache_stats))
        .route("/healthz", get(handlers::healthz))
        .route(
            "/stream",
            get(handlers::stream_passthrough).post(handlers::stream_passthrough),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
