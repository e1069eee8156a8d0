use std::str::FromStr;

use aes::{Aes128, Aes192, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CairnError, Result};
use crate::vault::credentials::MasterKey;

type Aes128Ctr = Ctr128BE<Aes128>;
type Aes192Ctr = Ctr128BE<Aes192>;
type Aes256Ctr = Ctr128BE<Aes256>;
type HmacSha256 = Hmac<Sha256>;

// Subkey derivation labels.
const PURPOSE_AES_KEY: &[u8] = b"AES";
const PURPOSE_CHECKSUM_SECRET: &[u8] = b"CHECKSUM";

/// AES block size; sealed blocks carry the IV in their first bytes.
const IV_LENGTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encryption {
    None,
    Aes128,
    Aes192,
    Aes256,
}

impl Encryption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encryption::None => "none",
            Encryption::Aes128 => "aes-128",
            Encryption::Aes192 => "aes-192",
            Encryption::Aes256 => "aes-256",
        }
    }

    fn key_length(&self) -> usize {
        match self {
            Encryption::None => 0,
            Encryption::Aes128 => 16,
            Encryption::Aes192 => 24,
            Encryption::Aes256 => 32,
        }
    }
}

impl FromStr for Encryption {
    type Err = CairnError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Encryption::None),
            "aes-128" => Ok(Encryption::Aes128),
            "aes-192" => Ok(Encryption::Aes192),
            "aes-256" => Ok(Encryption::Aes256),
            other => Err(CairnError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    HmacSha256,
}

impl Checksum {
    pub fn as_str(&self) -> &'static str {
        match self {
            Checksum::HmacSha256 => "hmac-sha-256",
        }
    }

    /// Tag length follows the configured algorithm rather than a constant.
    fn tag_length(&self) -> usize {
        match self {
            Checksum::HmacSha256 => 32,
        }
    }

    fn key_length(&self) -> usize {
        match self {
            Checksum::HmacSha256 => 32,
        }
    }
}

impl FromStr for Checksum {
    type Err = CairnError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "hmac-sha-256" => Ok(Checksum::HmacSha256),
            other => Err(CairnError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Authenticated-encryption codec for vault blocks.
///
/// Sealed layout: `IV || CTR(key, IV, plaintext) || HMAC(mac_key, IV || ciphertext)`.
/// With `Encryption::None` both directions are the identity.
pub(crate) struct BlockCipher {
    encryption: Encryption,
    checksum: Checksum,
    cipher_key: Zeroizing<Vec<u8>>,
    mac_key: Zeroizing<Vec<u8>>,
}

impl BlockCipher {
    /// Derive the per-purpose subkeys for this vault's algorithms.
    pub fn new(
        encryption: Encryption,
        checksum: Checksum,
        master_key: &MasterKey,
        unique_id: &[u8],
    ) -> Result<Self> {
        let cipher_key = derive_key(master_key, unique_id, PURPOSE_AES_KEY, encryption.key_length())?;
        let mac_key = derive_key(master_key, unique_id, PURPOSE_CHECKSUM_SECRET, checksum.key_length())?;

        Ok(Self {
            encryption,
            checksum,
            cipher_key,
            mac_key,
        })
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if self.encryption == Encryption::None {
            return Ok(plaintext.to_vec());
        }

        let tag_length = self.checksum.tag_length();
        let body_length = IV_LENGTH + plaintext.len();
        let mut sealed = vec![0u8; body_length + tag_length];

        let mut iv = [0u8; IV_LENGTH];
        OsRng
            .try_fill_bytes(&mut iv)
            .map_err(|_| CairnError::RngFailure)?;
        sealed[..IV_LENGTH].copy_from_slice(&iv);

        sealed[IV_LENGTH..body_length].copy_from_slice(plaintext);
        self.apply_keystream(&iv, &mut sealed[IV_LENGTH..body_length])?;

        let tag = self.compute_mac(&sealed[..body_length]);
        sealed[body_length..].copy_from_slice(&tag);

        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if self.encryption == Encryption::None {
            return Ok(sealed.to_vec());
        }

        let tag_length = self.checksum.tag_length();
        if sealed.len() < IV_LENGTH + tag_length {
            return Err(CairnError::ChecksumMismatch);
        }

        let (body, tag) = sealed.split_at(sealed.len() - tag_length);
        self.verify_mac(body, tag)?;

        let mut iv = [0u8; IV_LENGTH];
        iv.copy_from_slice(&body[..IV_LENGTH]);

        let mut plaintext = body[IV_LENGTH..].to_vec();
        self.apply_keystream(&iv, &mut plaintext)?;
        Ok(plaintext)
    }

    fn apply_keystream(&self, iv: &[u8; IV_LENGTH], buf: &mut [u8]) -> Result<()> {
        match self.encryption {
            Encryption::None => {}
            Encryption::Aes128 => {
                let mut cipher = Aes128Ctr::new_from_slices(&self.cipher_key, iv)
                    .map_err(|e| CairnError::KeyDerivation(format!("cipher init: {e}")))?;
                cipher.apply_keystream(buf);
            }
            Encryption::Aes192 => {
                let mut cipher = Aes192Ctr::new_from_slices(&self.cipher_key, iv)
                    .map_err(|e| CairnError::KeyDerivation(format!("cipher init: {e}")))?;
                cipher.apply_keystream(buf);
            }
            Encryption::Aes256 => {
                let mut cipher = Aes256Ctr::new_from_slices(&self.cipher_key, iv)
                    .map_err(|e| CairnError::KeyDerivation(format!("cipher init: {e}")))?;
                cipher.apply_keystream(buf);
            }
        }
        Ok(())
    }

    fn compute_mac(&self, data: &[u8]) -> Vec<u8> {
        match self.checksum {
            Checksum::HmacSha256 => {
                let mut mac = HmacSha256::new_from_slice(&self.mac_key)
                    .expect("HMAC accepts any key length");
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        }
    }

    fn verify_mac(&self, data: &[u8], tag: &[u8]) -> Result<()> {
        match self.checksum {
            Checksum::HmacSha256 => {
                let mut mac = HmacSha256::new_from_slice(&self.mac_key)
                    .expect("HMAC accepts any key length");
                mac.update(data);
                // Constant-time comparison.
                mac.verify_slice(tag).map_err(|_| CairnError::ChecksumMismatch)
            }
        }
    }
}

/// HKDF-SHA256: salt is the vault's `unique_id`, ikm the master key, info
/// the purpose label.
fn derive_key(
    master_key: &MasterKey,
    unique_id: &[u8],
    purpose: &[u8],
    length: usize,
) -> Result<Zeroizing<Vec<u8>>> {
    let hkdf = Hkdf::<Sha256>::new(Some(unique_id), master_key.as_bytes());
    let mut okm = Zeroizing::new(vec![0u8; length]);
    hkdf.expand(purpose, &mut okm)
        .map_err(|e| CairnError::KeyDerivation(format!("HKDF expand: {e}")))?;
    Ok(okm)
}
