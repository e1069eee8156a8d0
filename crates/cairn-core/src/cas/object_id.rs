use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque address of a stored object: a block-name prefix character
/// followed by the hex content hash. The empty id is the null sentinel.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub const NULL: ObjectId = ObjectId(String::new());

    pub fn from_content(block_prefix: char, content_hash: &[u8]) -> Self {
        ObjectId(format!("{block_prefix}{}", hex::encode(content_hash)))
    }

    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectId {
    fn from(value: &str) -> Self {
        ObjectId(value.to_string())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}
