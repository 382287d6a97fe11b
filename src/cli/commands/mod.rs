//! CLI command implementations

pub mod cache;
pub mod config;
pub mod get_proxy;
pub mod serve;

pub use cache::execute as cache;
pub use config::execute as config;
pub use get_proxy::execute as get_proxy;
pub use serve::execute as serve;

use crate::cache::create_cache_manager;
use crate::config::Config;
use crate::error::CertcacheResult;
use crate::proxy::{build_http_client, ProxyManager};
use std::sync::Arc;

/// Wire the configured cache backend and HTTP client into a workflow
async fn proxy_manager(config: &Config) -> CertcacheResult<ProxyManager> {
    let http = build_http_client(&config.http)?;
    let cache = create_cache_manager(config, &http).await?;
    Ok(ProxyManager::from_config(config, Arc::new(cache), http))
}
