//! Authenticated, encrypted storage for repository secrets and
//! configuration, layered over an opaque block store.

pub mod blockcipher;
pub mod credentials;

use std::sync::Arc;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::cas;
use crate::error::{CairnError, Result};
use crate::storage::{BlockStore, ConnectionInfo};

pub use blockcipher::{Checksum, Encryption};
pub use credentials::{Credentials, MasterKey};

use blockcipher::BlockCipher;

const FORMAT_BLOCK_ID: &str = "format";
const REPO_CONFIG_BLOCK_ID: &str = "repo";

/// Item-key prefix used when the vault shares a block store with the
/// repository.
pub const COLOCATED_ITEM_PREFIX: &str = "VLT";

const FORMAT_VERSION: &str = "1";
const UNIQUE_ID_LENGTH: usize = 32;

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Plaintext header of a vault. `unique_id` is drawn once at creation and
/// never regenerated; it salts all key derivation for this vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Format {
    pub version: String,
    #[serde(rename = "uniqueID", with = "base64_bytes", default)]
    pub unique_id: Vec<u8>,
    pub encryption: String,
    pub checksum: String,
}

impl Format {
    pub fn new(encryption: Encryption, checksum: Checksum) -> Self {
        Self {
            version: String::new(),
            unique_id: Vec::new(),
            encryption: encryption.as_str().to_string(),
            checksum: checksum.as_str().to_string(),
        }
    }
}

impl Default for Format {
    fn default() -> Self {
        Self::new(Encryption::Aes256, Checksum::HmacSha256)
    }
}

/// Encrypted payload persisted under the reserved `repo` item.
/// `connection` is absent iff vault and repository share storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    pub connection: Option<ConnectionInfo>,
    pub format: cas::Format,
}

/// Persistable vault connection bundle, suitable for a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub connection: ConnectionInfo,
    #[serde(with = "base64_bytes", default)]
    pub key: Vec<u8>,
}

/// An open vault.
pub struct Vault {
    storage: Arc<dyn BlockStore>,
    pub format: Format,
    pub repo_config: RepositoryConfig,

    master_key: MasterKey,
    cipher: BlockCipher,
    item_prefix: &'static str,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("format", &self.format)
            .field("repo_config", &self.repo_config)
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// Initialize a vault. With `repo_storage` of `None` the vault and the
    /// repository share one store and every vault item key gets the `VLT`
    /// prefix; otherwise the repository's connection info is embedded in
    /// the encrypted config so it can be reconnected later.
    pub fn create(
        vault_storage: Arc<dyn BlockStore>,
        format: &Format,
        creds: &Credentials,
        repo_storage: Option<Arc<dyn BlockStore>>,
        repo_format: &cas::Format,
    ) -> Result<Vault> {
        let (repo_storage, item_prefix) = match repo_storage {
            Some(storage) => (storage, ""),
            None => (Arc::clone(&vault_storage), COLOCATED_ITEM_PREFIX),
        };
        let colocated = !item_prefix.is_empty();

        let connection = repo_storage
            .connection_info()
            .ok_or(CairnError::ConfigNotSupported)?;

        let mut format = format.clone();
        format.version = FORMAT_VERSION.to_string();
        format.unique_id = vec![0u8; UNIQUE_ID_LENGTH];
        OsRng
            .try_fill_bytes(&mut format.unique_id)
            .map_err(|_| CairnError::RngFailure)?;

        let master_key = creds.master_key_for(&format.unique_id)?;
        let cipher = BlockCipher::new(
            format.encryption.parse()?,
            format.checksum.parse()?,
            &master_key,
            &format.unique_id,
        )?;

        let format_bytes = serde_json::to_vec(&format)?;
        vault_storage.put(
            &format!("{item_prefix}{FORMAT_BLOCK_ID}"),
            &format_bytes,
            true,
        )?;

        let repo_config = RepositoryConfig {
            connection: if colocated { None } else { Some(connection) },
            format: repo_format.clone(),
        };

        let vault = Vault {
            storage: vault_storage,
            format,
            repo_config,
            master_key,
            cipher,
            item_prefix,
        };

        let config_bytes = serde_json::to_vec(&vault.repo_config)?;
        vault.write_sealed_block(REPO_CONFIG_BLOCK_ID, &config_bytes)?;

        Ok(vault)
    }

    /// Open a vault, probing for both the dedicated and the colocated
    /// layout in one storage round-trip. The unprefixed variant wins when
    /// both exist.
    pub fn open(storage: Arc<dyn BlockStore>, creds: &Credentials) -> Result<Vault> {
        let keys = [
            FORMAT_BLOCK_ID.to_string(),
            REPO_CONFIG_BLOCK_ID.to_string(),
            format!("{COLOCATED_ITEM_PREFIX}{FORMAT_BLOCK_ID}"),
            format!("{COLOCATED_ITEM_PREFIX}{REPO_CONFIG_BLOCK_ID}"),
        ];

        let mut blocks: [Option<Vec<u8>>; 4] = [None, None, None, None];
        std::thread::scope(|scope| {
            let store = &storage;
            let handles = keys
                .each_ref()
                .map(|key| scope.spawn(move || store.get(key).ok().flatten()));
            for (slot, handle) in blocks.iter_mut().zip(handles) {
                *slot = handle.join().unwrap_or(None);
            }
        });

        let (offset, item_prefix) = if blocks[0].is_some() {
            (0, "")
        } else if blocks[2].is_some() {
            (2, COLOCATED_ITEM_PREFIX)
        } else {
            return Err(CairnError::VaultFormatMissing);
        };

        let format_bytes = blocks[offset].take().unwrap_or_default();
        let format: Format = serde_json::from_slice(&format_bytes)?;

        let master_key = creds.master_key_for(&format.unique_id)?;
        let cipher = BlockCipher::new(
            format.encryption.parse()?,
            format.checksum.parse()?,
            &master_key,
            &format.unique_id,
        )?;

        let config_bytes = blocks[offset + 1].take().ok_or_else(|| {
            CairnError::InvalidFormat("vault repository config block missing".into())
        })?;
        let config_plain = cipher.open(&config_bytes)?;
        let repo_config: RepositoryConfig = serde_json::from_slice(&config_plain)?;

        Ok(Vault {
            storage,
            format,
            repo_config,
            master_key,
            cipher,
            item_prefix,
        })
    }

    /// Save content in the vault under the given name.
    pub fn put(&self, item_id: &str, content: &[u8]) -> Result<()> {
        check_reserved_name(item_id)?;
        self.write_sealed_block(item_id, content)
    }

    /// Return the contents of a vault item.
    pub fn get(&self, item_id: &str) -> Result<Vec<u8>> {
        check_reserved_name(item_id)?;
        match self.storage.get(&self.item_key(item_id))? {
            Some(sealed) => self.cipher.open(&sealed),
            None => Err(CairnError::ItemNotFound(item_id.to_string())),
        }
    }

    /// List vault item ids matching the given prefix. Reserved names are
    /// never reported.
    pub fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let full_prefix = format!("{}{prefix}", self.item_prefix);
        let mut result = Vec::new();
        for key in self.storage.list(&full_prefix)? {
            let item_id = key
                .strip_prefix(self.item_prefix)
                .unwrap_or(key.as_str())
                .to_string();
            if !is_reserved_name(&item_id) {
                result.push(item_id);
            }
        }
        Ok(result)
    }

    /// Delete a vault item.
    pub fn remove(&self, item_id: &str) -> Result<()> {
        check_reserved_name(item_id)?;
        self.storage.delete(&self.item_key(item_id))
    }

    /// Return a persistable connection bundle for this vault, including
    /// the master key.
    pub fn config(&self) -> Result<Config> {
        let connection = self
            .storage
            .connection_info()
            .ok_or(CairnError::ConfigNotSupported)?;
        Ok(Config {
            connection,
            key: self.master_key.as_bytes().to_vec(),
        })
    }

    /// Release the underlying storage handle.
    pub fn close(self) -> Result<()> {
        self.storage.close()
    }

    /// The block store this vault lives on. For a colocated vault this is
    /// also the repository's store.
    pub fn storage(&self) -> Arc<dyn BlockStore> {
        Arc::clone(&self.storage)
    }

    pub fn item_prefix(&self) -> &str {
        self.item_prefix
    }

    fn item_key(&self, item_id: &str) -> String {
        format!("{}{item_id}", self.item_prefix)
    }

    fn write_sealed_block(&self, item_id: &str, content: &[u8]) -> Result<()> {
        let sealed = self.cipher.seal(content)?;
        self.storage.put(&self.item_key(item_id), &sealed, true)
    }
}

fn is_reserved_name(item_id: &str) -> bool {
    matches!(item_id, FORMAT_BLOCK_ID | REPO_CONFIG_BLOCK_ID)
}

fn check_reserved_name(item_id: &str) -> Result<()> {
    if is_reserved_name(item_id) {
        return Err(CairnError::ReservedName(item_id.to_string()));
    }
    Ok(())
}
