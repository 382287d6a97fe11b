//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

/// certcache - X.509 proxy certificates from OIDC identity tokens
///
/// Exchanges an IAM identity token for a TTS credential bundle and runs
/// grid-proxy-init over it, caching the refresh token between runs.
#[derive(Parser, Debug)]
#[command(name = "certcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "CERTCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the workflow once and write the proxy certificate
    GetProxy(GetProxyArgs),

    /// Serve proxies over HTTP
    Serve(ServeArgs),

    /// Read or modify a cache variable
    Cache(CacheArgs),

    /// Show configuration
    Config(ConfigArgs),
}

/// Arguments for the get-proxy command
#[derive(Parser, Debug)]
pub struct GetProxyArgs {
    /// Copy the proxy here instead of printing its path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen address (overrides server.bind)
    #[arg(short, long)]
    pub bind: Option<String>,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Print a variable's value
    Get {
        /// Variable name (e.g., refresh_token)
        name: String,
    },

    /// Overwrite a variable
    Set {
        /// Variable name
        name: String,
        /// New value
        value: String,
    },

    /// Delete a variable and print what it held
    Delete {
        /// Variable name
        name: String,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show effective configuration with secrets masked
    Show,

    /// Show configuration file path
    Path,
}
