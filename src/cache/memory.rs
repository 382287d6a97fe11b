//! In-process cache backend

use super::{CacheBackend, CacheValue};
use crate::error::CertcacheResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Cache held in a process-local map
///
/// Nothing survives a restart. Every operation succeeds.
#[derive(Debug, Default)]
pub struct MemoryCache {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, String>> {
        // A panic mid-insert cannot leave a HashMap half-written
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn pre_add(&self, name: &str) -> CertcacheResult<()> {
        self.values().entry(name.to_string()).or_default();
        Ok(())
    }

    async fn get(&self, name: &str) -> CertcacheResult<CacheValue> {
        Ok(match self.values().get(name) {
            Some(value) => CacheValue::Found(value.clone()),
            None => CacheValue::NotFound,
        })
    }

    async fn set(&self, name: &str, value: &str) -> CertcacheResult<()> {
        self.values().insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, name: &str) -> CertcacheResult<CacheValue> {
        Ok(match self.values().remove(name) {
            Some(previous) => CacheValue::Found(previous),
            None => CacheValue::NotFound,
        })
    }
}
