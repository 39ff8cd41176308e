use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// Options for [`Transport::create`].
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Wait until the write is visible to remote readers before returning.
    pub await_relay: bool,
}

impl CreateOptions {
    /// Options that wait for the write to propagate.
    pub fn awaiting_relay() -> Self {
        Self { await_relay: true }
    }
}

/// Trait describing the discovery/transport collaborator.
///
/// Each node owns a drive reachable at [`get_url`](Transport::get_url). Writes
/// (`create`, `update`, `delete`) always target the caller's own drive; reads
/// are either local or against another node's drive. Values are opaque JSON.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes a new document at `path` and returns its public URL.
    ///
    /// Fails with a conflict if a document already exists at `path`.
    async fn create(&self, path: &str, value: &Value, opts: CreateOptions) -> Result<String>;

    /// Reads a document from the local drive.
    ///
    /// Returns `Ok(None)` when nothing is stored at `path`.
    async fn read_local(&self, path: &str) -> Result<Option<Value>>;

    /// Reads a document at `path` from the drive at `url`.
    ///
    /// Returns `Ok(None)` when the drive or document does not exist.
    async fn read_remote(&self, url: &str, path: &str) -> Result<Option<Value>>;

    /// Replaces an existing document on the local drive.
    async fn update(&self, path: &str, value: &Value) -> Result<()>;

    /// Deletes a document from the local drive.
    async fn delete(&self, path: &str) -> Result<()>;

    /// URL of the local drive.
    fn get_url(&self) -> String;
}
