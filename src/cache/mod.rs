//! Pluggable key-value cache for workflow state
//!
//! A [`CacheManager`] owns one [`CacheBackend`] and a registry of named
//! [`CacheVariable`] handles. Handles are materialized on first lookup
//! (backend `pre_add` hook, bind, `post_add` hook) and the same handle is
//! returned for every later lookup of that name.
//!
//! # Backends
//!
//! | Backend | Storage | Survives restart |
//! |---------|---------|------------------|
//! | [`MemoryCache`] | in-process map | no |
//! | [`ZookeeperCache`] | one znode per variable, `{"val": ...}` envelope | yes |
//! | [`MarathonCache`] | JSON blob in one app environment variable | yes |

mod factory;
pub mod marathon;
pub mod memory;
pub mod zookeeper;

pub use factory::create_cache_manager;
pub use marathon::MarathonCache;
pub use memory::MemoryCache;
pub use zookeeper::{parse_host_list, NodeStore, ZkNodeStore, ZookeeperCache};

use crate::error::{CertcacheError, CertcacheResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Outcome of reading a cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheValue {
    /// The entry exists, possibly holding an empty string
    Found(String),
    /// The entry was never set or has been deleted
    NotFound,
}

impl CacheValue {
    /// The stored string, if any
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }

    /// Consume into the stored string, treating blank values as absent
    pub fn non_empty(self) -> Option<String> {
        match self {
            Self::Found(value) if !value.trim().is_empty() => Some(value),
            _ => None,
        }
    }
}

/// Storage primitives behind a [`CacheManager`]
///
/// Consumers never call these directly; they go through a [`CacheVariable`].
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs and errors
    fn kind(&self) -> &'static str;

    /// Prepare storage for `name` before its handle is bound
    async fn pre_add(&self, name: &str) -> CertcacheResult<()>;

    /// Called once after the handle for `name` has been bound
    async fn post_add(&self, _name: &str, _variable: &CacheVariable) -> CertcacheResult<()> {
        Ok(())
    }

    /// Read the value stored under `name`
    async fn get(&self, name: &str) -> CertcacheResult<CacheValue>;

    /// Store `value` under `name`
    async fn set(&self, name: &str, value: &str) -> CertcacheResult<()>;

    /// Remove `name`, returning what was stored
    async fn delete(&self, name: &str) -> CertcacheResult<CacheValue>;
}

struct VariableInner {
    name: String,
    backend: Arc<dyn CacheBackend>,
}

/// Named handle bound to one backend entry
///
/// Cloning is cheap; clones share the same binding.
#[derive(Clone)]
pub struct CacheVariable {
    inner: Arc<VariableInner>,
}

impl CacheVariable {
    fn bind(name: &str, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            inner: Arc::new(VariableInner {
                name: name.to_string(),
                backend,
            }),
        }
    }

    /// Variable name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Read the current value
    pub async fn read(&self) -> CertcacheResult<CacheValue> {
        self.inner.backend.get(&self.inner.name).await
    }

    /// Overwrite the value
    pub async fn write(&self, value: &str) -> CertcacheResult<()> {
        self.inner.backend.set(&self.inner.name, value).await
    }

    /// Delete the value, returning the previous one
    pub async fn delete(&self) -> CertcacheResult<CacheValue> {
        self.inner.backend.delete(&self.inner.name).await
    }

    /// Whether two handles are the same binding
    pub fn same_binding(&self, other: &CacheVariable) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for CacheVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheVariable")
            .field("name", &self.inner.name)
            .field("backend", &self.inner.backend.kind())
            .finish()
    }
}

/// Registry of cache variables over one backend
pub struct CacheManager {
    backend: Arc<dyn CacheBackend>,
    variables: Mutex<HashMap<String, CacheVariable>>,
}

impl CacheManager {
    /// Create a manager over `backend`
    pub fn new(backend: impl CacheBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
            variables: Mutex::new(HashMap::new()),
        }
    }

    /// Name of the backend in use
    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    /// Look up the handle for `name`, materializing it on first access
    pub async fn variable(&self, name: &str) -> CertcacheResult<CacheVariable> {
        let name = name.trim();
        if name.is_empty() || name.starts_with('/') || name.ends_with('/') {
            return Err(CertcacheError::InvalidVariableName(name.to_string()));
        }

        // Held across the hooks so concurrent first lookups bind only once
        let mut variables = self.variables.lock().await;
        if let Some(existing) = variables.get(name) {
            return Ok(existing.clone());
        }

        self.backend.pre_add(name).await?;
        let variable = CacheVariable::bind(name, Arc::clone(&self.backend));
        self.backend.post_add(name, &variable).await?;

        debug!("Bound cache variable {} on {}", name, self.backend.kind());
        variables.insert(name.to_string(), variable.clone());
        Ok(variable)
    }
}
