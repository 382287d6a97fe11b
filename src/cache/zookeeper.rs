//! ZooKeeper cache backend
//!
//! Each variable lives in its own znode at `<prefix><name>`, holding a JSON
//! envelope `{"val": ...}`. A znode that is missing, or that another
//! instance deleted, reads as [`CacheValue::NotFound`].
//!
//! Node access goes through the [`NodeStore`] trait so the backend logic can
//! be exercised without a running ensemble.

use super::{CacheBackend, CacheValue};
use crate::config::schema::ZookeeperConfig;
use crate::error::{CertcacheError, CertcacheResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::Mutex;
use tracing::{debug, info};
use zookeeper_client as zk;

/// Minimal znode operations used by the cache
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Create `path` and all of its ancestors if they do not exist
    async fn ensure_path(&self, path: &str) -> CertcacheResult<()>;

    /// Node data, or `None` if the node does not exist
    async fn read(&self, path: &str) -> CertcacheResult<Option<Vec<u8>>>;

    /// Replace node data, creating the node if it has been removed
    async fn write(&self, path: &str, data: &[u8]) -> CertcacheResult<()>;

    /// Remove the node; `false` if it did not exist
    async fn remove(&self, path: &str) -> CertcacheResult<bool>;
}

/// [`NodeStore`] over a live ZooKeeper session
///
/// The session is opened by [`ZkNodeStore::connect`] and closed when the
/// store is dropped.
pub struct ZkNodeStore {
    client: zk::Client,
}

impl ZkNodeStore {
    /// Open a session to `cluster` (`host:port,host:port`)
    pub async fn connect(cluster: &str) -> CertcacheResult<Self> {
        info!("Connecting to ZooKeeper at {}", cluster);
        let client = zk::Client::connect(cluster)
            .await
            .map_err(|e| CertcacheError::cache_unavailable("zookeeper", e))?;
        Ok(Self { client })
    }

    async fn create(&self, path: &str, data: &[u8]) -> Result<(), zk::Error> {
        let options = zk::CreateMode::Persistent.with_acls(zk::Acls::anyone_all());
        match self.client.create(path, data, &options).await {
            Ok(_) | Err(zk::Error::NodeExists) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn unavailable(e: zk::Error) -> CertcacheError {
    CertcacheError::cache_unavailable("zookeeper", e)
}

#[async_trait]
impl NodeStore for ZkNodeStore {
    async fn ensure_path(&self, path: &str) -> CertcacheResult<()> {
        for ancestor in ancestors(path) {
            self.create(&ancestor, b"").await.map_err(unavailable)?;
        }
        Ok(())
    }

    async fn read(&self, path: &str) -> CertcacheResult<Option<Vec<u8>>> {
        match self.client.get_data(path).await {
            Ok((data, _stat)) => Ok(Some(data)),
            Err(zk::Error::NoNode) => Ok(None),
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> CertcacheResult<()> {
        match self.client.set_data(path, data, None).await {
            Ok(_) => Ok(()),
            Err(zk::Error::NoNode) => {
                debug!("Node {} vanished, recreating", path);
                self.ensure_path(path).await?;
                self.client
                    .set_data(path, data, None)
                    .await
                    .map(|_| ())
                    .map_err(unavailable)
            }
            Err(e) => Err(unavailable(e)),
        }
    }

    async fn remove(&self, path: &str) -> CertcacheResult<bool> {
        match self.client.delete(path, None).await {
            Ok(()) => Ok(true),
            Err(zk::Error::NoNode) => Ok(false),
            Err(e) => Err(unavailable(e)),
        }
    }
}

/// `/a/b/c` -> `["/a", "/a/b", "/a/b/c"]`
fn ancestors(path: &str) -> Vec<String> {
    let mut current = String::new();
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            current.push('/');
            current.push_str(segment);
            current.clone()
        })
        .collect()
}

/// Convert a list-literal host list into a ZooKeeper connect string
///
/// `"['10.0.0.1', 'zk2:2182']"` with default port 2181 becomes
/// `"10.0.0.1:2181,zk2:2182"`. A bare comma-separated list is accepted too.
/// IPv6 hosts must be bracketed (`[::1]`, `[::1]:2182`).
pub fn parse_host_list(raw: &str, default_port: u16) -> CertcacheResult<String> {
    let trimmed = raw.trim();
    let inner = match trimmed.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
        Some(inner) if inner.parse::<Ipv6Addr>().is_err() => inner,
        _ => trimmed,
    };

    let hosts = inner
        .split(',')
        .map(|h| h.trim().trim_matches(|c| c == '\'' || c == '"').trim())
        .filter(|h| !h.is_empty())
        .map(|h| with_port(h, default_port))
        .collect::<CertcacheResult<Vec<_>>>()?;

    if hosts.is_empty() {
        return Err(CertcacheError::ConfigMissing(format!(
            "ZooKeeper host list {:?} names no hosts",
            raw
        )));
    }

    Ok(hosts.join(","))
}

/// `host[:port]` or `[v6][:port]`, with the default port filled in
fn with_port(host: &str, default_port: u16) -> CertcacheResult<String> {
    let invalid = |reason| CertcacheError::InvalidHost {
        host: host.to_string(),
        reason,
    };

    let (name, port) = match host.strip_prefix('[') {
        Some(rest) => {
            let (addr, after) = rest.split_once(']').ok_or_else(|| invalid("unclosed '['"))?;
            addr.parse::<Ipv6Addr>()
                .map_err(|_| invalid("not an IPv6 address"))?;
            let port = match after {
                "" => None,
                _ => Some(after.strip_prefix(':').ok_or_else(|| invalid("junk after ']'"))?),
            };
            (&host[..addr.len() + 2], port)
        }
        None => match host.split_once(':') {
            Some((_, port)) if port.contains(':') => {
                return Err(invalid("IPv6 address without brackets"))
            }
            Some((name, port)) => (name, Some(port)),
            None => (host, None),
        },
    };

    if name.is_empty() {
        return Err(invalid("empty host name"));
    }
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid("invalid port"))?,
        None => default_port,
    };
    Ok(format!("{}:{}", name, port))
}

/// Cache backend storing variables as znodes
pub struct ZookeeperCache {
    store: Box<dyn NodeStore>,
    prefix: String,
    paths: Mutex<HashMap<String, String>>,
}

impl ZookeeperCache {
    /// Connect to the ensemble described by `config`
    pub async fn connect(config: &ZookeeperConfig) -> CertcacheResult<Self> {
        let raw = config.hosts.as_deref().ok_or_else(|| {
            CertcacheError::ConfigMissing("ZOOKEEPER cache requires ZOOKEEPER_HOST_LIST".into())
        })?;
        let cluster = parse_host_list(raw, config.default_port)?;
        let store = ZkNodeStore::connect(&cluster).await?;
        Ok(Self::with_store(store, &config.prefix))
    }

    /// Build over an existing node store
    pub fn with_store(store: impl NodeStore + 'static, prefix: &str) -> Self {
        let mut prefix = prefix.trim().to_string();
        if !prefix.starts_with('/') {
            prefix.insert(0, '/');
        }
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        Self {
            store: Box::new(store),
            prefix,
            paths: Mutex::new(HashMap::new()),
        }
    }

    /// Znode path backing `name`
    pub fn node_path(&self, name: &str) -> String {
        let mut paths = self.paths.lock().unwrap_or_else(|e| e.into_inner());
        paths
            .entry(name.to_string())
            .or_insert_with(|| format!("{}{}", self.prefix, name))
            .clone()
    }
}

fn decode_envelope(data: &[u8]) -> String {
    let text = String::from_utf8_lossy(data);
    if text.trim().is_empty() {
        return String::new();
    }
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(mut map)) if map.contains_key("val") => match map.remove("val") {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        },
        // Nodes written by other tools hold the raw string
        _ => text.into_owned(),
    }
}

#[async_trait]
impl CacheBackend for ZookeeperCache {
    fn kind(&self) -> &'static str {
        "zookeeper"
    }

    async fn pre_add(&self, name: &str) -> CertcacheResult<()> {
        let path = self.node_path(name);
        debug!("Ensuring znode {} for {}", path, name);
        self.store.ensure_path(&path).await
    }

    async fn get(&self, name: &str) -> CertcacheResult<CacheValue> {
        let path = self.node_path(name);
        Ok(match self.store.read(&path).await? {
            Some(data) => CacheValue::Found(decode_envelope(&data)),
            None => {
                debug!("Znode {} not found", path);
                CacheValue::NotFound
            }
        })
    }

    async fn set(&self, name: &str, value: &str) -> CertcacheResult<()> {
        let path = self.node_path(name);
        let envelope = serde_json::to_vec(&json!({ "val": value }))?;
        self.store.write(&path, &envelope).await
    }

    async fn delete(&self, name: &str) -> CertcacheResult<CacheValue> {
        let path = self.node_path(name);
        let previous = self.store.read(&path).await?;
        if !self.store.remove(&path).await? {
            return Ok(CacheValue::NotFound);
        }
        Ok(match previous {
            Some(data) => CacheValue::Found(decode_envelope(&data)),
            None => CacheValue::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Node tree kept in memory, shared so tests can mutate it out-of-band
    #[derive(Clone, Default)]
    struct FakeStore {
        nodes: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    }

    impl FakeStore {
        fn nodes(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
            self.nodes.lock().unwrap()
        }
    }

    #[async_trait]
    impl NodeStore for FakeStore {
        async fn ensure_path(&self, path: &str) -> CertcacheResult<()> {
            let mut nodes = self.nodes();
            for ancestor in ancestors(path) {
                nodes.entry(ancestor).or_default();
            }
            Ok(())
        }

        async fn read(&self, path: &str) -> CertcacheResult<Option<Vec<u8>>> {
            Ok(self.nodes().get(path).cloned())
        }

        async fn write(&self, path: &str, data: &[u8]) -> CertcacheResult<()> {
            self.nodes().insert(path.to_string(), data.to_vec());
            Ok(())
        }

        async fn remove(&self, path: &str) -> CertcacheResult<bool> {
            Ok(self.nodes().remove(path).is_some())
        }
    }

    fn manager(store: &FakeStore) -> CacheManager {
        CacheManager::new(ZookeeperCache::with_store(store.clone(), "/cache/"))
    }

    #[test]
    fn host_list_gets_default_port() {
        assert_eq!(
            parse_host_list("['10.0.0.1', '10.0.0.2']", 2181).unwrap(),
            "10.0.0.1:2181,10.0.0.2:2181"
        );
    }

    #[test]
    fn host_list_keeps_explicit_port() {
        assert_eq!(
            parse_host_list("[\"zk1:2182\", 'zk2']", 2181).unwrap(),
            "zk1:2182,zk2:2181"
        );
        assert_eq!(parse_host_list("zk1,zk2:3000", 2181).unwrap(), "zk1:2181,zk2:3000");
    }

    #[test]
    fn host_list_rejects_empty_port() {
        let err = parse_host_list("zk1:", 2181).unwrap_err();
        assert!(matches!(err, CertcacheError::InvalidHost { host, .. } if host == "zk1:"));
        assert!(parse_host_list("['zk1:abc']", 2181).is_err());
    }

    #[test]
    fn host_list_requires_brackets_for_ipv6() {
        assert!(matches!(
            parse_host_list("::1", 2181),
            Err(CertcacheError::InvalidHost { .. })
        ));
        assert_eq!(parse_host_list("[::1]", 2181).unwrap(), "[::1]:2181");
        assert_eq!(
            parse_host_list("['[::1]:2182', 'zk2']", 2181).unwrap(),
            "[::1]:2182,zk2:2181"
        );
        assert!(parse_host_list("[zk1]", 2181).unwrap() == "zk1:2181");
        assert!(parse_host_list("'[nothost]'", 2181).is_err());
    }

    #[test]
    fn empty_host_list_rejected() {
        assert!(parse_host_list("[]", 2181).is_err());
    }

    #[test]
    fn ancestors_of_nested_path() {
        assert_eq!(
            ancestors("/cache/refresh_token"),
            vec!["/cache".to_string(), "/cache/refresh_token".to_string()]
        );
    }

    #[tokio::test]
    async fn name_maps_under_prefix() {
        let store = FakeStore::default();
        let cache = ZookeeperCache::with_store(store.clone(), "cache");
        assert_eq!(cache.node_path("refresh_token"), "/cache/refresh_token");
    }

    #[tokio::test]
    async fn materializing_creates_node() {
        let store = FakeStore::default();
        let var = manager(&store).variable("refresh_token").await.unwrap();

        assert!(store.nodes().contains_key("/cache/refresh_token"));
        assert_eq!(var.read().await.unwrap(), CacheValue::Found(String::new()));
    }

    #[tokio::test]
    async fn set_writes_envelope() {
        let store = FakeStore::default();
        let var = manager(&store).variable("refresh_token").await.unwrap();

        var.write("rt-1").await.unwrap();

        let raw = store.nodes().get("/cache/refresh_token").cloned().unwrap();
        let parsed: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, json!({"val": "rt-1"}));
        assert_eq!(var.read().await.unwrap().as_deref(), Some("rt-1"));
    }

    #[tokio::test]
    async fn node_deleted_out_of_band_reads_not_found() {
        let store = FakeStore::default();
        let var = manager(&store).variable("refresh_token").await.unwrap();
        var.write("rt-1").await.unwrap();

        store.nodes().remove("/cache/refresh_token");

        assert_eq!(var.read().await.unwrap(), CacheValue::NotFound);
    }

    #[tokio::test]
    async fn delete_removes_node() {
        let store = FakeStore::default();
        let var = manager(&store).variable("refresh_token").await.unwrap();
        var.write("rt-1").await.unwrap();

        assert_eq!(
            var.delete().await.unwrap(),
            CacheValue::Found("rt-1".to_string())
        );
        assert!(!store.nodes().contains_key("/cache/refresh_token"));
        assert_eq!(var.delete().await.unwrap(), CacheValue::NotFound);
    }

    #[test]
    fn envelope_decoding() {
        assert_eq!(decode_envelope(br#"{"val": "x"}"#), "x");
        assert_eq!(decode_envelope(br#"{"val": 42}"#), "42");
        assert_eq!(decode_envelope(b"plain"), "plain");
        assert_eq!(decode_envelope(b""), "");
    }
}
