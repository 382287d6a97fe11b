//! Cache command - inspect and edit cache variables

use crate::cache::{create_cache_manager, CacheValue};
use crate::cli::args::{CacheAction, CacheArgs};
use crate::config::Config;
use crate::error::CertcacheResult;
use crate::proxy::build_http_client;
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> CertcacheResult<()> {
    let http = build_http_client(&config.http)?;
    let manager = create_cache_manager(config, &http).await?;

    match args.action {
        CacheAction::Get { name } => {
            let value = manager.variable(&name).await?.read().await?;
            print_value(&name, value);
        }
        CacheAction::Set { name, value } => {
            manager.variable(&name).await?.write(&value).await?;
            eprintln!(
                "{} Set {} on {} cache",
                style("✓").green(),
                style(&name).cyan(),
                manager.backend_kind()
            );
        }
        CacheAction::Delete { name } => {
            let previous = manager.variable(&name).await?.delete().await?;
            print_value(&name, previous);
        }
    }

    Ok(())
}

fn print_value(name: &str, value: CacheValue) {
    match value {
        CacheValue::Found(value) => println!("{}", value),
        CacheValue::NotFound => {
            eprintln!("{} {} not found", style("!").yellow(), style(name).cyan())
        }
    }
}
