pub mod local_backend;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CairnError, Result};

pub use local_backend::LocalBackend;

/// Serializable description of how to reconnect to a block store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub kind: String,
    pub path: String,
}

/// Abstract key-value storage for opaque blocks.
/// Keys are `/`-separated string paths.
pub trait BlockStore: Send + Sync {
    /// Read a block by key. Returns `None` if not found.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a block. With `overwrite` false an existing key is left
    /// untouched, which makes repeated writes of identical content free.
    fn put(&self, key: &str, data: &[u8], overwrite: bool) -> Result<()>;

    /// Delete a block. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// List all keys under a prefix. Returns full key paths.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Release any resources held by the store.
    fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Connection descriptor suitable for persisting in a configuration
    /// file. `None` means the store cannot be reconnected from config.
    fn connection_info(&self) -> Option<ConnectionInfo> {
        None
    }
}

impl BlockStore for Arc<dyn BlockStore> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }
    fn put(&self, key: &str, data: &[u8], overwrite: bool) -> Result<()> {
        (**self).put(key, data, overwrite)
    }
    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }
    fn close(&self) -> Result<()> {
        (**self).close()
    }
    fn connection_info(&self) -> Option<ConnectionInfo> {
        (**self).connection_info()
    }
}

/// Rebuild a block store from a persisted connection descriptor.
pub fn connect(info: &ConnectionInfo) -> Result<Arc<dyn BlockStore>> {
    match info.kind.as_str() {
        "file" => Ok(Arc::new(LocalBackend::new(&info.path)?)),
        other => Err(CairnError::UnsupportedBackend(other.to_string())),
    }
}
