//! Error types for certcache
//!
//! All modules use `CertcacheResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for certcache operations
pub type CertcacheResult<T> = Result<T, CertcacheError>;

/// All errors that can occur in certcache
#[derive(Error, Debug)]
pub enum CertcacheError {
    // Token endpoint errors
    #[error("Token exchange rejected by IAM (HTTP {status})")]
    AuthExchange { status: u16 },

    #[error("Refresh token rejected by IAM (HTTP {status})")]
    Refresh { status: u16 },

    #[error("No refresh token available and identity token exchange failed")]
    NoRefreshToken,

    #[error("Malformed token response: {0}")]
    TokenResponse(String),

    // TTS errors
    #[error("TTS did not redirect to credential data (HTTP {status})")]
    RedirectProtocol { status: u16 },

    #[error("TTS redirect carried no usable location: {0}")]
    RedirectLocation(String),

    #[error("Fetching credential data from TTS failed (HTTP {status})")]
    Fetch { status: u16 },

    #[error("Invalid credential bundle: {0}")]
    BundleInvalid(String),

    // Transport errors
    #[error("HTTP request failed: {context}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    // Cache errors
    #[error("Cache backend {backend} unavailable: {reason}")]
    CacheBackendUnavailable { backend: String, reason: String },

    #[error("Unknown cache manager: {0}")]
    UnknownCacheManager(String),

    #[error("Invalid cache variable name: {0:?}")]
    InvalidVariableName(String),

    #[error("Invalid ZooKeeper host {host:?}: {reason}")]
    InvalidHost { host: String, reason: &'static str },

    // Generator errors
    #[error("Proxy generator {program} failed with exit code {code}")]
    Generator {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("Proxy generator {program} produced no proxy file at {path}")]
    GeneratorOutputMissing { program: String, path: PathBuf },

    // Filesystem errors
    #[error("Unable to restrict permissions on {path}: {source}")]
    Permission {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse failure category exposed at the HTTP boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    Tts,
    Generator,
    Cache,
    Internal,
}

impl FailureKind {
    /// Machine-readable status string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth_failure",
            Self::Tts => "tts_failure",
            Self::Generator => "generator_failure",
            Self::Cache => "cache_failure",
            Self::Internal => "internal_error",
        }
    }
}

impl CertcacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a transport error with context
    pub fn transport(context: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source,
        }
    }

    /// Create a cache backend error
    pub fn cache_unavailable(backend: impl Into<String>, reason: impl ToString) -> Self {
        Self::CacheBackendUnavailable {
            backend: backend.into(),
            reason: reason.to_string(),
        }
    }

    /// Check if the failure is transient and the same call may be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport { source, .. } => {
                source.is_connect()
                    || source.is_timeout()
                    || source.status().is_some_and(|s| s.is_server_error())
            }
            Self::AuthExchange { status }
            | Self::Refresh { status }
            | Self::Fetch { status } => *status >= 500,
            _ => false,
        }
    }

    /// Failure category reported to HTTP callers
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::AuthExchange { .. }
            | Self::Refresh { .. }
            | Self::NoRefreshToken
            | Self::TokenResponse(_) => FailureKind::Auth,
            Self::RedirectProtocol { .. }
            | Self::RedirectLocation(_)
            | Self::Fetch { .. }
            | Self::BundleInvalid(_)
            | Self::Transport { .. } => FailureKind::Tts,
            Self::Generator { .. } | Self::GeneratorOutputMissing { .. } => FailureKind::Generator,
            Self::CacheBackendUnavailable { .. } | Self::UnknownCacheManager(_) => {
                FailureKind::Cache
            }
            _ => FailureKind::Internal,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NoRefreshToken => Some("Set IAM_TOKEN to a valid identity token"),
            Self::UnknownCacheManager(_) => Some("Use CACHE_MANAGER=MEMORY, ZOOKEEPER or MARATHON"),
            Self::Generator { .. } => Some("Check that grid-proxy-init is installed"),
            Self::Permission { .. } => Some("Check ownership of the working directory"),
            Self::InvalidHost { .. } => Some("Write IPv6 hosts as [addr] or [addr]:port"),
            _ => None,
        }
    }
}
