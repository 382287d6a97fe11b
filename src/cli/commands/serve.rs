//! Serve command - HTTP front end

use crate::cli::args::ServeArgs;
use crate::config::Config;
use crate::error::CertcacheResult;
use crate::server;
use std::sync::Arc;

/// Execute the serve command
pub async fn execute(args: ServeArgs, config: &Config) -> CertcacheResult<()> {
    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let manager = super::proxy_manager(config).await?;
    server::serve(&bind, Arc::new(manager)).await
}
