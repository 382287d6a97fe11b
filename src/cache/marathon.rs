//! Marathon cache backend
//!
//! The whole cache is one JSON object stored in a single environment
//! variable of the running Marathon application. The application
//! environment is fetched lazily on the first variable materialization;
//! reads are served from memory afterwards. Writes and deletes PATCH the full
//! environment back, which restarts the application, so plain reads never
//! touch orchestrator state.

use super::{CacheBackend, CacheValue};
use crate::config::schema::MarathonConfig;
use crate::error::{CertcacheError, CertcacheResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

type JsonMap = Map<String, Value>;

#[derive(Deserialize)]
struct AppResponse {
    app: AppDefinition,
}

#[derive(Deserialize)]
struct AppDefinition {
    #[serde(default)]
    env: JsonMap,
}

/// Application environment plus the decoded cache blob
#[derive(Debug, Clone)]
struct AppEnv {
    env: JsonMap,
    blob: JsonMap,
}

impl AppEnv {
    fn decode(env: JsonMap, env_var: &str) -> Self {
        let blob = match env.get(env_var) {
            Some(Value::String(raw)) if !raw.trim().is_empty() => {
                match serde_json::from_str::<Value>(raw) {
                    Ok(Value::Object(map)) => map,
                    _ => {
                        debug!("{} does not hold a JSON object, starting empty", env_var);
                        JsonMap::new()
                    }
                }
            }
            _ => JsonMap::new(),
        };
        Self { env, blob }
    }
}

/// Cache backend storing variables in a Marathon app environment
pub struct MarathonCache {
    http: reqwest::Client,
    app_url: String,
    env_var: String,
    user: String,
    passwd: String,
    state: Mutex<Option<AppEnv>>,
}

impl MarathonCache {
    /// Create the backend; no request is made until a variable is bound
    pub fn new(config: &MarathonConfig, http: reqwest::Client) -> CertcacheResult<Self> {
        let missing =
            |what: &str| CertcacheError::ConfigMissing(format!("MARATHON cache requires {}", what));
        let app_id = config
            .app_id
            .as_deref()
            .ok_or_else(|| missing("MARATHON_APP_ID"))?;
        let user = config.user.clone().ok_or_else(|| missing("MARATHON_USER"))?;
        let passwd = config.passwd.clone().ok_or_else(|| missing("MARATHON_PASSWD"))?;

        Ok(Self {
            http,
            app_url: format!(
                "{}/v2/apps/{}",
                config.url.trim_end_matches('/'),
                app_id.trim_start_matches('/')
            ),
            env_var: config.env_var.clone(),
            user,
            passwd,
            state: Mutex::new(None),
        })
    }

    fn unavailable(reason: impl ToString) -> CertcacheError {
        CertcacheError::cache_unavailable("marathon", reason)
    }

    async fn fetch(&self) -> CertcacheResult<AppEnv> {
        debug!("Fetching Marathon app environment from {}", self.app_url);
        let response = self
            .http
            .get(&self.app_url)
            .basic_auth(&self.user, Some(&self.passwd))
            .send()
            .await
            .map_err(Self::unavailable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::unavailable(format!("GET app returned HTTP {}", status)));
        }

        let app: AppResponse = response.json().await.map_err(Self::unavailable)?;
        Ok(AppEnv::decode(app.app.env, &self.env_var))
    }

    /// Loaded state, fetching it if no variable has been bound yet
    async fn loaded(&self) -> CertcacheResult<MutexGuard<'_, Option<AppEnv>>> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            *state = Some(self.fetch().await?);
        }
        Ok(state)
    }

    /// PATCH `next` to Marathon and commit it locally only on success
    async fn commit(&self, state: &mut Option<AppEnv>, mut next: AppEnv) -> CertcacheResult<()> {
        next.env.insert(
            self.env_var.clone(),
            Value::String(Value::Object(next.blob.clone()).to_string()),
        );

        info!("Updating Marathon app environment (application restarts)");
        let response = self
            .http
            .patch(&self.app_url)
            .basic_auth(&self.user, Some(&self.passwd))
            .json(&json!({ "env": next.env }))
            .send()
            .await
            .map_err(Self::unavailable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::unavailable(format!("PATCH app returned HTTP {}", status)));
        }

        *state = Some(next);
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MarathonCache {
    fn kind(&self) -> &'static str {
        "marathon"
    }

    async fn pre_add(&self, name: &str) -> CertcacheResult<()> {
        debug!("Binding {} to Marathon env {}", name, self.env_var);
        self.loaded().await.map(|_| ())
    }

    async fn get(&self, name: &str) -> CertcacheResult<CacheValue> {
        let state = self.loaded().await?;
        let value = (*state).as_ref().and_then(|s| s.blob.get(name));
        Ok(match value {
            Some(Value::String(s)) => CacheValue::Found(s.clone()),
            Some(Value::Null) | None => CacheValue::NotFound,
            Some(other) => CacheValue::Found(other.to_string()),
        })
    }

    async fn set(&self, name: &str, value: &str) -> CertcacheResult<()> {
        let mut state = self.loaded().await?;
        let mut next = (*state)
            .clone()
            .ok_or_else(|| CertcacheError::Internal("Marathon state not loaded".into()))?;
        next.blob
            .insert(name.to_string(), Value::String(value.to_string()));
        self.commit(&mut state, next).await
    }

    async fn delete(&self, name: &str) -> CertcacheResult<CacheValue> {
        let mut state = self.loaded().await?;
        let mut next = (*state)
            .clone()
            .ok_or_else(|| CertcacheError::Internal("Marathon state not loaded".into()))?;
        let previous = match next.blob.remove(name) {
            Some(Value::String(s)) => CacheValue::Found(s),
            Some(Value::Null) | None => return Ok(CacheValue::NotFound),
            Some(other) => CacheValue::Found(other.to_string()),
        };
        self.commit(&mut state, next).await?;
        Ok(previous)
    }
}
