//! certcache - proxy certificate cache
//!
//! CLI entry point that dispatches to subcommands.

use certcache::cli::args::{ConfigAction, ConfigArgs};
use certcache::cli::commands;
use certcache::cli::{Cli, Commands};
use certcache::config::ConfigManager;
use certcache::error::CertcacheResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CertcacheResult<()> {
    let cli = Cli::parse();

    let config_manager = ConfigManager::new(cli.config.clone());

    if let Commands::Config(ConfigArgs {
        action: Some(ConfigAction::Path),
    }) = &cli.command
    {
        commands::config::print_path(&config_manager);
        return Ok(());
    }

    let config = config_manager.load_with_env().await?;
    init_logging(cli.verbose, &config.general.log_format);
    debug!("Loaded configuration from {}", config_manager.path().display());

    match cli.command {
        Commands::GetProxy(args) => commands::get_proxy(args, &config).await,
        Commands::Serve(args) => commands::serve(args, &config).await,
        Commands::Cache(args) => commands::cache(args, &config).await,
        // `config path` returned above
        Commands::Config(_) => commands::config(&config).await,
    }
}

/// 0 = warn, 1 = info, 2+ = debug; `RUST_LOG` takes precedence
fn init_logging(verbose: u8, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("certcache=warn"),
        1 => EnvFilter::new("certcache=info"),
        _ => EnvFilter::new("certcache=debug"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        builder.json().init();
    } else {
        builder.without_time().init();
    }
}
