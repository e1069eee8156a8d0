pub mod object_id;

use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CairnError, Result};
use crate::storage::BlockStore;

pub use object_id::ObjectId;

type Blake2b256 = Blake2b<U32>;

pub const SUPPORTED_VERSION: u32 = 1;
pub const OBJECT_HASH_BLAKE2B_256: &str = "blake2b-256";

/// Repository format descriptor, persisted inside the vault's `repo` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Format {
    pub version: u32,
    pub object_hash: String,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION,
            object_hash: OBJECT_HASH_BLAKE2B_256.to_string(),
        }
    }
}

impl Format {
    pub fn validate(&self) -> Result<()> {
        if self.version != SUPPORTED_VERSION {
            return Err(CairnError::InvalidFormat(format!(
                "unsupported repository version: {}",
                self.version
            )));
        }
        if self.object_hash != OBJECT_HASH_BLAKE2B_256 {
            return Err(CairnError::UnsupportedAlgorithm(self.object_hash.clone()));
        }
        Ok(())
    }
}

/// Sink for one object's bytes. `result` finalizes the stream and returns
/// the content identifier.
pub trait ObjectWriter: Write {
    fn result(&mut self) -> Result<ObjectId>;
}

/// Stores and retrieves content-addressed objects.
pub trait ObjectManager: Send + Sync {
    /// Start writing a new object. `description` is used for logging only;
    /// `block_prefix` becomes the first character of the resulting id.
    fn new_writer<'a>(&'a self, description: &str, block_prefix: char) -> Box<dyn ObjectWriter + 'a>;

    /// Open a stored object for reading.
    fn open(&self, id: &ObjectId) -> Result<Box<dyn Read + Send>>;

    /// Re-read an object, confirm its bytes still match its identifier and
    /// return its length.
    fn verify(&self, id: &ObjectId) -> Result<u64>;
}

/// Whole-object content-addressed manager over an opaque block store.
/// Each object is one block stored under its own identifier, so repeated
/// writes of identical content store no new bytes.
pub struct BlockManager {
    store: Arc<dyn BlockStore>,
}

impl BlockManager {
    pub fn new(store: Arc<dyn BlockStore>) -> Self {
        Self { store }
    }

    fn content_hash(data: &[u8]) -> [u8; 32] {
        let mut hasher = Blake2b256::new();
        hasher.update(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }
}

impl ObjectManager for BlockManager {
    fn new_writer<'a>(&'a self, description: &str, block_prefix: char) -> Box<dyn ObjectWriter + 'a> {
        Box::new(BlockWriter {
            store: &self.store,
            description: description.to_string(),
            block_prefix,
            buf: Vec::new(),
            finished: None,
        })
    }

    fn open(&self, id: &ObjectId) -> Result<Box<dyn Read + Send>> {
        if id.is_null() {
            return Err(CairnError::ObjectNotFound(id.clone()));
        }
        match self.store.get(id.as_str())? {
            Some(data) => Ok(Box::new(Cursor::new(data))),
            None => Err(CairnError::ObjectNotFound(id.clone())),
        }
    }

    fn verify(&self, id: &ObjectId) -> Result<u64> {
        if id.is_null() {
            return Err(CairnError::ObjectNotFound(id.clone()));
        }
        let data = self
            .store
            .get(id.as_str())?
            .ok_or_else(|| CairnError::ObjectNotFound(id.clone()))?;

        let expected_hex = id.as_str().get(1..).unwrap_or_default();
        let actual_hex = hex::encode(Self::content_hash(&data));
        if actual_hex != expected_hex {
            return Err(CairnError::InvalidObject {
                id: id.clone(),
                reason: "content does not match identifier".into(),
            });
        }
        Ok(data.len() as u64)
    }
}

struct BlockWriter<'a> {
    store: &'a Arc<dyn BlockStore>,
    description: String,
    block_prefix: char,
    buf: Vec<u8>,
    finished: Option<ObjectId>,
}

impl Write for BlockWriter<'_> {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ObjectWriter for BlockWriter<'_> {
    fn result(&mut self) -> Result<ObjectId> {
        if let Some(id) = &self.finished {
            return Ok(id.clone());
        }
        let hash = BlockManager::content_hash(&self.buf);
        let id = ObjectId::from_content(self.block_prefix, &hash);
        // Identical content already has this exact block; skip the write.
        self.store.put(id.as_str(), &self.buf, false)?;
        debug!(description = %self.description, object_id = %id, size = self.buf.len(), "object stored");
        self.finished = Some(id.clone());
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryBackend;

    fn test_manager() -> (Arc<MemoryBackend>, BlockManager) {
        let store = Arc::new(MemoryBackend::new());
        let manager = BlockManager::new(store.clone() as Arc<dyn BlockStore>);
        (store, manager)
    }

    fn write_object(manager: &BlockManager, data: &[u8]) -> ObjectId {
        let mut writer = manager.new_writer("test", 'F');
        writer.write_all(data).unwrap();
        writer.result().unwrap()
    }

    #[test]
    fn write_open_roundtrip() {
        let (_store, manager) = test_manager();
        let id = write_object(&manager, b"hello object");
        let mut reader = manager.open(&id).unwrap();
        let mut back = Vec::new();
        reader.read_to_end(&mut back).unwrap();
        assert_eq!(back, b"hello object");
    }

    #[test]
    fn identical_content_stores_no_new_blocks() {
        let (store, manager) = test_manager();
        let id1 = write_object(&manager, b"same bytes");
        let count = store.key_count();
        let id2 = write_object(&manager, b"same bytes");
        assert_eq!(id1, id2);
        assert_eq!(store.key_count(), count);
    }

    #[test]
    fn prefix_distinguishes_ids() {
        let (_store, manager) = test_manager();
        let mut writer = manager.new_writer("dir", 'D');
        writer.write_all(b"payload").unwrap();
        let dir_id = writer.result().unwrap();
        let file_id = write_object(&manager, b"payload");
        assert_ne!(dir_id, file_id);
        assert!(dir_id.as_str().starts_with('D'));
        assert!(file_id.as_str().starts_with('F'));
    }

    #[test]
    fn verify_returns_length() {
        let (_store, manager) = test_manager();
        let id = write_object(&manager, b"12345");
        assert_eq!(manager.verify(&id).unwrap(), 5);
    }

    #[test]
    fn verify_detects_corruption() {
        let (store, manager) = test_manager();
        let id = write_object(&manager, b"pristine");
        store.put(id.as_str(), b"tampered", true).unwrap();
        let err = manager.verify(&id).unwrap_err();
        assert!(matches!(err, CairnError::InvalidObject { .. }));
    }

    #[test]
    fn open_missing_object_fails() {
        let (_store, manager) = test_manager();
        let err = manager
            .open(&ObjectId::from("Fdeadbeef"))
            .err()
            .expect("expected an error");
        assert!(matches!(err, CairnError::ObjectNotFound(_)));
        let err = manager
            .open(&ObjectId::NULL)
            .err()
            .expect("expected an error");
        assert!(matches!(err, CairnError::ObjectNotFound(_)));
    }

    #[test]
    fn result_is_idempotent() {
        let (store, manager) = test_manager();
        let mut writer = manager.new_writer("test", 'F');
        writer.write_all(b"once").unwrap();
        let id1 = writer.result().unwrap();
        let id2 = writer.result().unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.key_count(), 1);
    }
}
