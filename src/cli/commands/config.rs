//! Config command - show configuration

use crate::config::{Config, ConfigManager};
use crate::error::CertcacheResult;

/// Print the effective configuration with secrets masked
pub async fn execute(config: &Config) -> CertcacheResult<()> {
    println!("{}", render(config)?);
    Ok(())
}

/// Print the configuration file path
///
/// Needs no loaded configuration, so it works with an incomplete environment.
pub fn print_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

fn render(config: &Config) -> CertcacheResult<String> {
    Ok(toml::to_string_pretty(&config.redacted())?)
}
