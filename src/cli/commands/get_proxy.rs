//! Get-proxy command - run the workflow once

use crate::cli::args::GetProxyArgs;
use crate::config::Config;
use crate::error::{CertcacheError, CertcacheResult};
use console::style;
use tokio::fs;

/// Execute the get-proxy command
pub async fn execute(args: GetProxyArgs, config: &Config) -> CertcacheResult<()> {
    let manager = super::proxy_manager(config).await?;
    let proxy = manager.generate_proxy().await?;

    match args.output {
        Some(output) => {
            fs::copy(&proxy, &output).await.map_err(|e| {
                CertcacheError::io(format!("copying proxy to {}", output.display()), e)
            })?;
            eprintln!(
                "{} Proxy written to {}",
                style("✓").green(),
                style(output.display()).cyan()
            );
        }
        None => println!("{}", proxy.display()),
    }

    Ok(())
}
