//! Configuration schema for certcache
//!
//! Configuration is stored at `~/.config/certcache/config.toml`. Environment
//! inputs (`IAM_TOKEN`, `CACHE_MANAGER`, ...) are applied on top once at
//! startup, see [`Config::apply_env`].

use crate::error::{CertcacheError, CertcacheResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

const REDACTED: &str = "***";

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// IAM (OIDC) settings
    pub iam: IamConfig,

    /// Token translation service settings
    pub tts: TtsConfig,

    /// Cache backend settings
    pub cache: CacheConfig,

    /// Proxy workflow settings
    pub proxy: ProxyConfig,

    /// Outbound HTTP settings
    pub http: HttpConfig,

    /// HTTP front end settings
    pub server: ServerConfig,
}

impl Config {
    /// Apply environment inputs on top of the file configuration.
    ///
    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> CertcacheResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("IAM_TOKEN") {
            self.iam.token = Some(token);
        }
        if let Some(token) = get("IAM_REFRESH_TOKEN") {
            self.iam.refresh_token = Some(token);
        }
        if let Some(id) = get("IAM_CLIENT_ID") {
            self.iam.client_id = Some(id);
        }
        if let Some(secret) = get("IAM_CLIENT_SECRET") {
            self.iam.client_secret = Some(secret);
        }
        if let Some(user) = get("MARATHON_USER") {
            self.cache.marathon.user = Some(user);
        }
        if let Some(passwd) = get("MARATHON_PASSWD") {
            self.cache.marathon.passwd = Some(passwd);
        }
        if let Some(app_id) = get("MARATHON_APP_ID") {
            self.cache.marathon.app_id = Some(app_id);
        }
        if let Some(hosts) = get("ZOOKEEPER_HOST_LIST") {
            self.cache.zookeeper.hosts = Some(hosts);
        }
        if let Some(selector) = get("CACHE_MANAGER") {
            self.cache.backend = selector.parse()?;
        }

        self.validate_cache()
    }

    /// Check that the selected cache backend has what it needs
    pub fn validate_cache(&self) -> CertcacheResult<()> {
        match self.cache.backend {
            CacheBackendKind::Memory => Ok(()),
            CacheBackendKind::Zookeeper => {
                if self.cache.zookeeper.hosts.is_none() {
                    return Err(CertcacheError::ConfigMissing(
                        "ZOOKEEPER cache requires ZOOKEEPER_HOST_LIST".to_string(),
                    ));
                }
                Ok(())
            }
            CacheBackendKind::Marathon => {
                let m = &self.cache.marathon;
                if m.user.is_none() || m.passwd.is_none() {
                    return Err(CertcacheError::ConfigMissing(
                        "MARATHON cache requires MARATHON_USER and MARATHON_PASSWD".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Copy of the configuration with secrets masked, for display
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        let mask = |v: &mut Option<String>| {
            if v.is_some() {
                *v = Some(REDACTED.to_string());
            }
        };
        mask(&mut config.iam.token);
        mask(&mut config.iam.refresh_token);
        mask(&mut config.iam.client_secret);
        mask(&mut config.cache.marathon.passwd);
        config
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Directory holding credential material, the lock marker and scratch files
    pub work_dir: PathBuf,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            work_dir: PathBuf::from("/tmp"),
        }
    }
}

/// IAM (OIDC provider) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IamConfig {
    /// Base URL of the IAM server
    pub endpoint: String,

    /// Token endpoint path, relative to `endpoint`
    pub token_path: String,

    /// Audience requested in the token exchange
    pub audience: String,

    /// Scope requested in the token exchange
    pub scope: String,

    /// OIDC client id
    pub client_id: Option<String>,

    /// OIDC client secret
    pub client_secret: Option<String>,

    /// Identity token of the user (`IAM_TOKEN`)
    pub token: Option<String>,

    /// Last-resort refresh token (`IAM_REFRESH_TOKEN`)
    pub refresh_token: Option<String>,
}

impl IamConfig {
    /// Full URL of the token endpoint
    pub fn token_url(&self) -> String {
        join_url(&self.endpoint, &self.token_path)
    }
}

impl Default for IamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://iam-test.indigo-datacloud.eu/".to_string(),
            token_path: "token".to_string(),
            audience: "https://watts-dev.data.kit.edu".to_string(),
            scope: "openid profile offline_access".to_string(),
            client_id: None,
            client_secret: None,
            token: None,
            refresh_token: None,
        }
    }
}

/// Token translation service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Base URL; redirect paths are resolved against it
    pub base_url: String,

    /// Credential request path, relative to `base_url`
    pub credential_path: String,

    /// Service requested from the TTS
    pub service_id: String,
}

impl TtsConfig {
    /// Full URL of the credential endpoint
    pub fn credential_url(&self) -> String {
        join_url(&self.base_url, &self.credential_path)
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: "https://watts-dev.data.kit.edu".to_string(),
            credential_path: "/api/v2/iam/credential".to_string(),
            service_id: "x509".to_string(),
        }
    }
}

/// Which cache backend stores the refresh token
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Zookeeper,
    Marathon,
}

impl FromStr for CacheBackendKind {
    type Err = CertcacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MEMORY" => Ok(Self::Memory),
            "ZOOKEEPER" => Ok(Self::Zookeeper),
            "MARATHON" => Ok(Self::Marathon),
            _ => Err(CertcacheError::UnknownCacheManager(s.to_string())),
        }
    }
}

impl fmt::Display for CacheBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Memory => "memory",
            Self::Zookeeper => "zookeeper",
            Self::Marathon => "marathon",
        };
        write!(f, "{}", name)
    }
}

/// Cache settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Selected backend
    pub backend: CacheBackendKind,

    /// ZooKeeper backend settings
    pub zookeeper: ZookeeperConfig,

    /// Marathon backend settings
    pub marathon: MarathonConfig,
}

/// ZooKeeper backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZookeeperConfig {
    /// Host list in list-literal form, e.g. `['zk1', 'zk2:2182']`
    pub hosts: Option<String>,

    /// Node path prefix for cache variables
    pub prefix: String,

    /// Port appended to hosts that carry none
    pub default_port: u16,
}

impl Default for ZookeeperConfig {
    fn default() -> Self {
        Self {
            hosts: None,
            prefix: "/cache/".to_string(),
            default_port: 2181,
        }
    }
}

/// Marathon backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarathonConfig {
    /// Marathon REST API base URL
    pub url: String,

    /// Application whose environment holds the cache
    pub app_id: Option<String>,

    /// Environment variable holding the JSON cache blob
    pub env_var: String,

    /// Basic auth user
    pub user: Option<String>,

    /// Basic auth password
    pub passwd: Option<String>,
}

impl Default for MarathonConfig {
    fn default() -> Self {
        Self {
            url: "http://marathon.mesos:8080".to_string(),
            app_id: None,
            env_var: "CERTCACHE_CACHE".to_string(),
            user: None,
            passwd: None,
        }
    }
}

/// Proxy workflow settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Age in seconds after which the TTS bundle is refreshed
    pub bundle_max_age_secs: u64,

    /// Age in seconds after which a lock marker is considered abandoned
    pub lock_stale_secs: u64,

    /// Proxy generator executable
    pub generator: String,

    /// Validity passed to the generator (`hours:minutes`)
    pub validity: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bundle_max_age_secs: 600_000,
            lock_stale_secs: 20,
            generator: "grid-proxy-init".to_string(),
            validity: "160:00".to_string(),
        }
    }
}

/// Outbound HTTP settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Total request timeout in seconds
    pub timeout_secs: u64,

    /// Connect timeout in seconds
    pub connect_timeout_secs: u64,

    /// Retries after the first attempt on transient failures
    pub max_retries: u32,

    /// First backoff delay in milliseconds, doubled per attempt
    pub initial_backoff_ms: u64,

    /// Backoff cap in milliseconds
    pub max_backoff_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_retries: 2,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

/// HTTP front end settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:80".to_string(),
        }
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
