//! Cache manager factory
//!
//! Selects the backend named in configuration and builds its manager.

use crate::cache::{CacheManager, MarathonCache, MemoryCache, ZookeeperCache};
use crate::config::{CacheBackendKind, Config};
use crate::error::CertcacheResult;
use tracing::info;

/// Create the cache manager for the configured backend
///
/// # Arguments
/// * `config` - The application configuration
/// * `http` - Client used by backends that speak HTTP
///
/// # Returns
/// * `Ok(CacheManager)` - Manager with an established backend connection
/// * `Err` - If the backend is misconfigured or unreachable
pub async fn create_cache_manager(
    config: &Config,
    http: &reqwest::Client,
) -> CertcacheResult<CacheManager> {
    config.validate_cache()?;
    info!("Using {} cache backend", config.cache.backend);

    let manager = match config.cache.backend {
        CacheBackendKind::Memory => CacheManager::new(MemoryCache::new()),
        CacheBackendKind::Zookeeper => {
            CacheManager::new(ZookeeperCache::connect(&config.cache.zookeeper).await?)
        }
        CacheBackendKind::Marathon => {
            CacheManager::new(MarathonCache::new(&config.cache.marathon, http.clone())?)
        }
    };

    Ok(manager)
}
