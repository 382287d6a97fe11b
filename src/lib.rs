//! certcache - X.509 proxy certificates from OIDC identity tokens
//!
//! Exchanges an identity token at IAM, fetches a credential bundle from the
//! token translation service and runs grid-proxy-init over it. The refresh
//! token is kept in a pluggable cache (memory, ZooKeeper or the Marathon
//! app environment) so later runs can renew without a new identity token.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod proxy;
pub mod server;

pub use error::{CertcacheError, CertcacheResult};
