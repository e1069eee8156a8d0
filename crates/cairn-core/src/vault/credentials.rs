use argon2::{Argon2, Params};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CairnError, Result};

// Argon2id parameters for passphrase-derived keys.
const ARGON2_TIME_COST: u32 = 3;
const ARGON2_MEMORY_KIB: u32 = 65536; // 64 MiB
const ARGON2_PARALLELISM: u32 = 4;

/// The vault master key, never stored in plaintext outside the exported
/// connection config. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; 32]);

impl MasterKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CairnError::KeyDerivation(format!("master key must be 32 bytes, got {}", bytes.len())))?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// How a vault's master key is obtained.
pub enum Credentials {
    /// A raw 32-byte key, typically loaded from an exported config.
    Key(MasterKey),
    /// A passphrase; the key is derived with Argon2id salted by the vault's
    /// `unique_id`, so the same passphrase yields distinct keys per vault.
    Passphrase(String),
}

impl Credentials {
    pub fn master_key_for(&self, unique_id: &[u8]) -> Result<MasterKey> {
        match self {
            Credentials::Key(key) => Ok(key.clone()),
            Credentials::Passphrase(passphrase) => derive_from_passphrase(passphrase, unique_id),
        }
    }
}

fn derive_from_passphrase(passphrase: &str, salt: &[u8]) -> Result<MasterKey> {
    let params = Params::new(ARGON2_MEMORY_KIB, ARGON2_TIME_COST, ARGON2_PARALLELISM, Some(32))
        .map_err(|e| CairnError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut output)
        .map_err(|e| CairnError::KeyDerivation(format!("argon2 hash: {e}")))?;
    let key = MasterKey(output);
    output.zeroize();
    Ok(key)
}
