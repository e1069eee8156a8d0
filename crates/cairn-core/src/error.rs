use thiserror::Error;

use crate::cas::ObjectId;

pub type Result<T> = std::result::Result<T, CairnError>;

#[derive(Debug, Error)]
pub enum CairnError {
    #[error("vault item not found: '{0}'")]
    ItemNotFound(String),

    #[error("invalid vault item name: '{0}'")]
    ReservedName(String),

    #[error("vault format block not found")]
    VaultFormatMissing,

    #[error("storage does not support persisting connection configuration")]
    ConfigNotSupported,

    #[error("cannot read encrypted block: incorrect checksum")]
    ChecksumMismatch,

    #[error("unsupported algorithm: '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("cannot read from system random number generator")]
    RngFailure,

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("unable to get policy for '{path}': {message}")]
    PolicyLookup { path: String, message: String },

    #[error("unable to parse ignore entry in '{context}': {message}")]
    IgnoreParse { context: String, message: String },

    /// Carries the identifier the caller passed as `previous` so a valid
    /// prior state survives cancellation.
    #[error("upload cancelled")]
    UploadCancelled { previous: ObjectId },

    #[error("object not found: '{0}'")]
    ObjectNotFound(ObjectId),

    #[error("invalid object '{id}': {reason}")]
    InvalidObject { id: ObjectId, reason: String },

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("unsupported backend: '{0}'")]
    UnsupportedBackend(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}
