//! Shared application state injected into every HTTP handler.

use std::sync::Arc;

use crate::cache::SegmentCache;
use crate::config::Config;
use crate::pool::ConnectionPoolManager;

#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<SegmentCache>,
    pub pool: Arc<ConnectionPoolManager>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let cache = Arc::new(SegmentCache::new(config.cache.to_cache_config()));
        let pool = Arc::new(ConnectionPoolManager::new(config.pool.to_pool_config()));
        Self {
            cache,
            pool,
            config: Arc::new(config),
        }
    }
}
