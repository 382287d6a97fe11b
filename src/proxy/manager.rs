//! Credential refresh workflow
//!
//! ```text
//! bundle age <= max  -> Fresh      (no network, no lock)
//! bundle age >  max  -> Refreshed  (refresh token, identity exchange as fallback)
//! no bundle          -> Exchanged  (identity exchange, refresh token as fallback)
//! ```
//!
//! Renewal runs under the lock marker: obtain an access token, fetch the
//! TTS bundle, decompose it into credential files. The generator then turns
//! those files into a proxy certificate.

use crate::cache::CacheManager;
use crate::config::Config;
use crate::error::{CertcacheError, CertcacheResult};
use crate::proxy::generator::ProxyGenerator;
use crate::proxy::lock::LockCoordinator;
use crate::proxy::material::CredentialPaths;
use crate::proxy::oidc::{IamClient, TokenResponse};
use crate::proxy::retry::RetryPolicy;
use crate::proxy::tts::TtsClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Cache variable holding the IAM refresh token
pub const REFRESH_TOKEN_VAR: &str = "refresh_token";

/// How the credential material was made current
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    /// Bundle was young enough to reuse
    Fresh,
    /// Renewed with a refresh token
    Refreshed,
    /// Renewed with an identity token exchange
    Exchanged,
}

/// Access token to fetch the bundle with
enum Grant {
    /// Already obtained by an identity exchange
    Exchanged(String),
    /// Resolve and use the stored refresh token; the identity exchange is
    /// only a fallback if it has not already failed
    Refresh { exchange_tried: bool },
}

/// Drives token exchange, TTS retrieval and proxy generation
pub struct ProxyManager {
    paths: CredentialPaths,
    cache: Arc<CacheManager>,
    iam: IamClient,
    tts: TtsClient,
    lock: LockCoordinator,
    generator: ProxyGenerator,
    bundle_max_age: Duration,
    identity_token: Option<String>,
    seed_refresh_token: Option<String>,
    run: Mutex<()>,
}

impl ProxyManager {
    /// Build the workflow from configuration
    ///
    /// `http` must not follow redirects (see [`crate::proxy::build_http_client`]).
    pub fn from_config(config: &Config, cache: Arc<CacheManager>, http: reqwest::Client) -> Self {
        let retry = RetryPolicy::from(&config.http);
        let paths = CredentialPaths::new(&config.general.work_dir);
        let lock = LockCoordinator::new(
            paths.lock(),
            Duration::from_secs(config.proxy.lock_stale_secs),
        );

        Self {
            iam: IamClient::new(&config.iam, http.clone(), retry),
            tts: TtsClient::new(&config.tts, http, retry),
            generator: ProxyGenerator::from_config(&config.proxy),
            bundle_max_age: Duration::from_secs(config.proxy.bundle_max_age_secs),
            identity_token: non_blank(config.iam.token.as_deref()),
            seed_refresh_token: non_blank(config.iam.refresh_token.as_deref()),
            paths,
            cache,
            lock,
            run: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &CredentialPaths {
        &self.paths
    }

    /// Make the credential material current
    pub async fn check_tts_data(&self) -> CertcacheResult<CredentialState> {
        self.paths.ensure_work_dir().await?;

        match self.paths.bundle_age().await? {
            Some(age) if age <= self.bundle_max_age => {
                debug!("Bundle is {:?} old, reusing it", age);
                Ok(CredentialState::Fresh)
            }
            Some(age) => {
                info!("Bundle is {:?} old, renewing", age);
                self.get_tts_data(Grant::Refresh {
                    exchange_tried: false,
                })
                .await
            }
            None => {
                info!("No bundle, exchanging identity token");
                match self.exchange_identity().await {
                    Ok(access_token) => self.get_tts_data(Grant::Exchanged(access_token)).await,
                    Err(e) => {
                        if self.resolve_refresh_token().await?.is_none() {
                            return Err(e);
                        }
                        warn!("Identity exchange failed ({}), using refresh token", e);
                        self.get_tts_data(Grant::Refresh {
                            exchange_tried: true,
                        })
                        .await
                    }
                }
            }
        }
    }

    /// Make the material current, then run the generator
    pub async fn generate_proxy(&self) -> CertcacheResult<PathBuf> {
        // One workflow at a time per process; the lock marker covers other processes
        let _run = self.run.lock().await;

        let state = self.check_tts_data().await?;
        debug!("Credential state: {:?}", state);
        self.generator.generate(&self.paths).await
    }

    /// Lock-guarded renewal
    async fn get_tts_data(&self, grant: Grant) -> CertcacheResult<CredentialState> {
        let guard = self.lock.acquire().await?;
        let result = self.renew(grant).await;
        if let Err(e) = guard.release().await {
            warn!("Failed to release lock marker: {}", e);
        }
        result
    }

    async fn renew(&self, grant: Grant) -> CertcacheResult<CredentialState> {
        let (access_token, state) = match grant {
            Grant::Exchanged(token) => (token, CredentialState::Exchanged),
            Grant::Refresh { exchange_tried } => self.refresh_access(exchange_tried).await?,
        };

        self.paths.write_exchanged_token(&access_token).await?;
        let raw = self.tts.fetch_bundle(&access_token).await?;
        self.paths.store_bundle(&raw).await?;
        info!("Credential material renewed ({:?})", state);
        Ok(state)
    }

    /// Access token from the stored refresh token, or from an identity
    /// exchange when there is none or it is rejected and no exchange has
    /// been attempted yet
    async fn refresh_access(
        &self,
        exchange_tried: bool,
    ) -> CertcacheResult<(String, CredentialState)> {
        let Some(refresh_token) = self.resolve_refresh_token().await? else {
            if exchange_tried {
                return Err(CertcacheError::NoRefreshToken);
            }
            debug!("No refresh token stored, exchanging identity token");
            let token = self.exchange_identity().await?;
            return Ok((token, CredentialState::Exchanged));
        };

        match self.iam.refresh(&refresh_token).await {
            Ok(response) => {
                let rotated = response.refresh_token.as_deref().unwrap_or(&refresh_token);
                self.persist_refresh_token(rotated).await?;
                Ok((response.access_token, CredentialState::Refreshed))
            }
            Err(e) if !exchange_tried && self.identity_token.is_some() => {
                warn!("Refresh failed ({}), exchanging identity token", e);
                let token = self.exchange_identity().await?;
                Ok((token, CredentialState::Exchanged))
            }
            Err(e) => Err(e),
        }
    }

    /// Exchange the identity token and store the refresh token it yields
    async fn exchange_identity(&self) -> CertcacheResult<String> {
        let identity = self
            .identity_token
            .as_deref()
            .ok_or(CertcacheError::NoRefreshToken)?;

        let TokenResponse {
            access_token,
            refresh_token,
        } = self.iam.exchange(identity).await?;

        match refresh_token.as_deref().and_then(|t| non_blank(Some(t))) {
            Some(token) => self.persist_refresh_token(&token).await?,
            None => warn!("Token exchange returned no refresh token"),
        }
        Ok(access_token)
    }

    /// Cache variable first, then the scratch file, then the configured seed
    async fn resolve_refresh_token(&self) -> CertcacheResult<Option<String>> {
        let variable = self.cache.variable(REFRESH_TOKEN_VAR).await?;
        match variable.read().await {
            Ok(value) => {
                if let Some(token) = value.non_empty() {
                    return Ok(Some(token.trim().to_string()));
                }
            }
            Err(e) => warn!("Reading cached refresh token failed: {}", e),
        }

        if let Some(token) = self.paths.read_refresh_token().await? {
            debug!("Using refresh token from scratch file");
            return Ok(Some(token));
        }

        Ok(self.seed_refresh_token.clone())
    }

    async fn persist_refresh_token(&self, token: &str) -> CertcacheResult<()> {
        self.paths.write_refresh_token(token).await?;
        self.cache
            .variable(REFRESH_TOKEN_VAR)
            .await?
            .write(token)
            .await
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
