//! IAM token endpoint client
//!
//! Two grants are used against the same token endpoint:
//! - token exchange (RFC 8693), trading the user's identity token for an
//!   access token for the TTS audience plus a refresh token;
//! - refresh token, renewing the access token without the identity token.

use crate::config::schema::IamConfig;
use crate::error::{CertcacheError, CertcacheResult};
use crate::proxy::retry::{check_status, with_retry, RetryPolicy};
use serde::Deserialize;
use tracing::debug;

const TOKEN_EXCHANGE_GRANT: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// Token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Client for the IAM token endpoint
#[derive(Debug, Clone)]
pub struct IamClient {
    http: reqwest::Client,
    token_url: String,
    audience: String,
    scope: String,
    client_id: Option<String>,
    client_secret: Option<String>,
    retry: RetryPolicy,
}

impl IamClient {
    pub fn new(config: &IamConfig, http: reqwest::Client, retry: RetryPolicy) -> Self {
        Self {
            http,
            token_url: config.token_url(),
            audience: config.audience.clone(),
            scope: config.scope.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            retry,
        }
    }

    fn client_credentials(&self) -> CertcacheResult<(&str, &str)> {
        match (self.client_id.as_deref(), self.client_secret.as_deref()) {
            (Some(id), Some(secret)) => Ok((id, secret)),
            _ => Err(CertcacheError::ConfigMissing(
                "IAM_CLIENT_ID and IAM_CLIENT_SECRET are required".to_string(),
            )),
        }
    }

    /// Exchange the user's identity token for a TTS access token
    pub async fn exchange(&self, subject_token: &str) -> CertcacheResult<TokenResponse> {
        let (client_id, client_secret) = self.client_credentials()?;
        let form = [
            ("grant_type", TOKEN_EXCHANGE_GRANT),
            ("audience", self.audience.as_str()),
            ("subject_token", subject_token.trim()),
            ("scope", self.scope.as_str()),
        ];

        debug!("Requesting token exchange at {}", self.token_url);
        with_retry(&self.retry, "token_exchange", || async {
            let response = self
                .http
                .post(&self.token_url)
                .basic_auth(client_id, Some(client_secret))
                .form(&form)
                .send()
                .await
                .map_err(|e| CertcacheError::transport("token exchange", e))?;
            check_status(&response, |status| CertcacheError::AuthExchange { status })?;
            parse_token(response).await
        })
        .await
    }

    /// Obtain a new access token with a refresh token
    pub async fn refresh(&self, refresh_token: &str) -> CertcacheResult<TokenResponse> {
        let (client_id, client_secret) = self.client_credentials()?;
        let form = [
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.trim()),
        ];

        debug!("Refreshing access token at {}", self.token_url);
        with_retry(&self.retry, "refresh_token", || async {
            let response = self
                .http
                .post(&self.token_url)
                .form(&form)
                .send()
                .await
                .map_err(|e| CertcacheError::transport("refresh token", e))?;
            check_status(&response, |status| CertcacheError::Refresh { status })?;
            parse_token(response).await
        })
        .await
    }
}

async fn parse_token(response: reqwest::Response) -> CertcacheResult<TokenResponse> {
    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| CertcacheError::TokenResponse(e.to_string()))?;
    if token.access_token.trim().is_empty() {
        return Err(CertcacheError::TokenResponse(
            "empty access_token".to_string(),
        ));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{basic_auth, body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> IamClient {
        let config = IamConfig {
            endpoint: server.uri(),
            client_id: Some("client".to_string()),
            client_secret: Some("secret".to_string()),
            ..IamConfig::default()
        };
        IamClient::new(&config, reqwest::Client::new(), RetryPolicy::none())
    }

    #[tokio::test]
    async fn exchange_sends_grant_and_client_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(basic_auth("client", "secret"))
            .and(body_string_contains("grant-type%3Atoken-exchange"))
            .and(body_string_contains("subject_token=id-token"))
            .and(body_string_contains("offline_access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = client(&server).exchange("id-token\n").await.unwrap();
        assert_eq!(token.access_token, "access-1");
        assert_eq!(token.refresh_token.as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn exchange_rejection_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = client(&server).exchange("id-token").await.unwrap_err();
        assert!(matches!(err, CertcacheError::AuthExchange { status: 403 }));
    }

    #[tokio::test]
    async fn refresh_sends_credentials_in_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .and(body_string_contains("client_id=client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-2"
            })))
            .mount(&server)
            .await;

        let token = client(&server).refresh("refresh-1").await.unwrap();
        assert_eq!(token.access_token, "access-2");
        assert_eq!(token.refresh_token, None);
    }

    #[tokio::test]
    async fn refresh_rejection_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let err = client(&server).refresh("bad").await.unwrap_err();
        assert!(matches!(err, CertcacheError::Refresh { status: 400 }));
    }

    #[tokio::test]
    async fn missing_client_credentials() {
        let client = IamClient::new(
            &IamConfig::default(),
            reqwest::Client::new(),
            RetryPolicy::none(),
        );
        let err = client.exchange("id-token").await.unwrap_err();
        assert!(matches!(err, CertcacheError::ConfigMissing(_)));
    }
}
