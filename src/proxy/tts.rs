//! Token translation service client
//!
//! The TTS hands out credentials in two steps: a POST to the credential
//! endpoint answers `303 See Other` with a `Location` pointing at the
//! credential data, and a GET on that location (resolved against the TTS
//! base URL) returns the JSON bundle.

use crate::config::schema::TtsConfig;
use crate::error::{CertcacheError, CertcacheResult};
use crate::proxy::retry::{check_status, with_retry, RetryPolicy};
use reqwest::header::LOCATION;
use reqwest::StatusCode;
use serde_json::json;
use tracing::debug;
use url::Url;

/// Client for the TTS credential API
#[derive(Debug, Clone)]
pub struct TtsClient {
    http: reqwest::Client,
    base_url: String,
    credential_url: String,
    service_id: String,
    retry: RetryPolicy,
}

impl TtsClient {
    /// `http` must not follow redirects; the 303 is part of the protocol
    pub fn new(config: &TtsConfig, http: reqwest::Client, retry: RetryPolicy) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credential_url: config.credential_url(),
            service_id: config.service_id.clone(),
            retry,
        }
    }

    /// Fetch the raw credential bundle with `access_token`
    pub async fn fetch_bundle(&self, access_token: &str) -> CertcacheResult<Vec<u8>> {
        // Only the first line of the token is a bearer credential
        let token = access_token.lines().next().unwrap_or_default().trim();
        let redirect = self.request_credential(token).await?;
        debug!("Redirect location: {}", redirect);
        self.fetch_data(&redirect, token).await
    }

    async fn request_credential(&self, token: &str) -> CertcacheResult<String> {
        let body = json!({ "service_id": self.service_id });

        with_retry(&self.retry, "tts_credential", || async {
            let response = self
                .http
                .post(&self.credential_url)
                .bearer_auth(token)
                .json(&body)
                .send()
                .await
                .map_err(|e| CertcacheError::transport("TTS credential request", e))?;

            let status = response.status();
            debug!("TTS credential request status: {}", status);
            if status != StatusCode::SEE_OTHER {
                return Err(CertcacheError::RedirectProtocol {
                    status: status.as_u16(),
                });
            }

            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    CertcacheError::RedirectLocation("missing Location header".to_string())
                })?;
            self.resolve_redirect(location)
        })
        .await
    }

    /// Keep only the path (and query) of `location`, on the TTS base
    fn resolve_redirect(&self, location: &str) -> CertcacheResult<String> {
        let base = Url::parse(&format!("{}/", self.base_url))
            .map_err(|e| CertcacheError::RedirectLocation(e.to_string()))?;
        let target = base
            .join(location.trim())
            .map_err(|e| CertcacheError::RedirectLocation(format!("{}: {}", location, e)))?;

        let mut redirect = format!("{}{}", self.base_url, target.path());
        if let Some(query) = target.query() {
            redirect.push('?');
            redirect.push_str(query);
        }
        Ok(redirect)
    }

    async fn fetch_data(&self, url: &str, token: &str) -> CertcacheResult<Vec<u8>> {
        with_retry(&self.retry, "tts_credential_data", || async {
            let response = self
                .http
                .get(url)
                .bearer_auth(token)
                .send()
                .await
                .map_err(|e| CertcacheError::transport("TTS credential data", e))?;
            check_status(&response, |status| CertcacheError::Fetch { status })?;
            let body = response
                .bytes()
                .await
                .map_err(|e| CertcacheError::transport("reading TTS credential data", e))?;
            Ok(body.to_vec())
        })
        .await
    }
}
