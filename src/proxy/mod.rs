//! Proxy certificate workflow
//!
//! [`ProxyManager`] is the entry point; the other modules are its steps.

pub mod generator;
pub mod lock;
pub mod manager;
pub mod material;
pub mod oidc;
pub mod retry;
pub mod tts;

pub use generator::ProxyGenerator;
pub use lock::{LockCoordinator, LockGuard, LockOutcome};
pub use manager::{CredentialState, ProxyManager, REFRESH_TOKEN_VAR};
pub use material::{CredentialBundle, CredentialPaths};
pub use oidc::{IamClient, TokenResponse};
pub use retry::{with_retry, RetryPolicy};
pub use tts::TtsClient;

use crate::config::schema::HttpConfig;
use crate::error::{CertcacheError, CertcacheResult};
use std::time::Duration;

/// Shared HTTP client for IAM, TTS and Marathon
///
/// Redirects are never followed; the TTS 303 is handled explicitly.
pub fn build_http_client(config: &HttpConfig) -> CertcacheResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("certcache/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| CertcacheError::transport("building HTTP client", e))
}
