//! In-memory transport.
//!
//! Nodes created from the same [`MemoryNetwork`] can read each other's
//! drives, which makes it suitable for tests and single-process setups.
//!
//! # Thread Safety
//!
//! The network uses `RwLock` for shared access. A poisoned lock is recovered
//! rather than propagated since drive contents are plain JSON values.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::traits::{CreateOptions, Transport};
use crate::{Result, SlashpayError};

type Drive = HashMap<String, Value>;

/// Shared set of drives keyed by drive URL.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    drives: Arc<RwLock<HashMap<String, Drive>>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport with a freshly generated drive URL.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport::new(self)
    }

    /// Number of documents stored on a drive.
    pub fn document_count(&self, url: &str) -> usize {
        let drives = self.drives.read().unwrap_or_else(|e| e.into_inner());
        drives.get(normalize(url)).map_or(0, HashMap::len)
    }
}

/// Transport writing to one drive of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    network: MemoryNetwork,
    url: String,
}

impl MemoryTransport {
    /// Create a transport with a `slash:` URL derived from a random UUID.
    pub fn new(network: &MemoryNetwork) -> Self {
        Self::with_url(network, format!("slash:{}", uuid::Uuid::new_v4()))
    }

    /// Create a transport owning the drive at `url`.
    pub fn with_url(network: &MemoryNetwork, url: impl Into<String>) -> Self {
        let url = normalize(&url.into()).to_string();
        {
            let mut drives = network.drives.write().unwrap_or_else(|e| e.into_inner());
            drives.entry(url.clone()).or_default();
        }
        Self {
            network: network.clone(),
            url,
        }
    }

    fn with_drive<T>(&self, f: impl FnOnce(&mut Drive) -> T) -> T {
        let mut drives = self
            .network
            .drives
            .write()
            .unwrap_or_else(|e| e.into_inner());
        f(drives.entry(self.url.clone()).or_default())
    }
}

fn normalize(url: &str) -> &str {
    url.trim_end_matches('/')
}

#[async_trait]
impl Transport for MemoryTransport {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, value, _opts), fields(url = %self.url)))]
    async fn create(&self, path: &str, value: &Value, _opts: CreateOptions) -> Result<String> {
        self.with_drive(|drive| {
            if drive.contains_key(path) {
                return Err(SlashpayError::conflict("document", path));
            }
            drive.insert(path.to_string(), value.clone());
            Ok(())
        })?;
        Ok(format!("{}{}", self.url, path))
    }

    async fn read_local(&self, path: &str) -> Result<Option<Value>> {
        Ok(self.with_drive(|drive| drive.get(path).cloned()))
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    async fn read_remote(&self, url: &str, path: &str) -> Result<Option<Value>> {
        let drives = self
            .network
            .drives
            .read()
            .unwrap_or_else(|e| e.into_inner());
        Ok(drives
            .get(normalize(url))
            .and_then(|drive| drive.get(path))
            .cloned())
    }

    async fn update(&self, path: &str, value: &Value) -> Result<()> {
        self.with_drive(|drive| match drive.get_mut(path) {
            Some(existing) => {
                *existing = value.clone();
                Ok(())
            }
            None => Err(SlashpayError::not_found("document", path)),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.with_drive(|drive| {
            drive
                .remove(path)
                .map(|_| ())
                .ok_or_else(|| SlashpayError::not_found("document", path))
        })
    }

    fn get_url(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_and_read_remote() {
        let network = MemoryNetwork::new();
        let alice = network.transport();
        let bob = network.transport();

        let url = alice
            .create("/public/doc.json", &json!({"a": 1}), CreateOptions::default())
            .await
            .unwrap();
        assert!(url.starts_with("slash:"));
        assert!(url.ends_with("/public/doc.json"));

        let remote = bob
            .read_remote(&alice.get_url(), "/public/doc.json")
            .await
            .unwrap();
        assert_eq!(remote, Some(json!({"a": 1})));

        // Bob's own drive is untouched
        assert_eq!(bob.read_local("/public/doc.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_create_conflicts_on_existing_path() {
        let network = MemoryNetwork::new();
        let node = network.transport();
        node.create("/p", &json!(1), CreateOptions::default())
            .await
            .unwrap();

        let err = node
            .create("/p", &json!(2), CreateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SlashpayError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let network = MemoryNetwork::new();
        let node = MemoryTransport::with_url(&network, "slash:node/");
        assert_eq!(node.get_url(), "slash:node");

        assert!(node.update("/p", &json!(1)).await.is_err());
        node.create("/p", &json!(1), CreateOptions::awaiting_relay())
            .await
            .unwrap();
        node.update("/p", &json!(2)).await.unwrap();
        assert_eq!(node.read_local("/p").await.unwrap(), Some(json!(2)));

        node.delete("/p").await.unwrap();
        assert_eq!(network.document_count("slash:node"), 0);
        assert!(node.delete("/p").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_drive_reads_none() {
        let network = MemoryNetwork::new();
        let node = network.transport();
        let missing = node.read_remote("slash:nobody", "/p").await.unwrap();
        assert!(missing.is_none());
    }
}
