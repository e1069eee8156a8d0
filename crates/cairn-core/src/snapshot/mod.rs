use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::cas::ObjectId;
use crate::error::Result;
use crate::fs::{EntryMetadata, EntryType};

/// A single filesystem entry stored in a directory object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub size: u64,
    pub mode: u32,
    /// Modification time in nanoseconds since Unix epoch.
    pub mtime_ns: i64,
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub object_id: ObjectId,
}

impl DirEntry {
    pub fn from_metadata(metadata: &EntryMetadata) -> Self {
        Self {
            name: metadata.name.clone(),
            entry_type: metadata.entry_type,
            size: metadata.size,
            mode: metadata.mode,
            mtime_ns: metadata.mtime_ns,
            uid: metadata.uid,
            gid: metadata.gid,
            object_id: ObjectId::NULL,
        }
    }

    /// Whether stored metadata proves an entry's content is unchanged.
    /// Any field mismatch defeats reuse.
    pub fn metadata_equals(&self, other: &DirEntry) -> bool {
        self.name == other.name
            && self.entry_type == other.entry_type
            && self.size == other.size
            && self.mode == other.mode
            && self.mtime_ns == other.mtime_ns
            && self.uid == other.uid
            && self.gid == other.gid
    }
}

/// Ordered directory listing as persisted in a directory object. Order is
/// the filesystem adapter's listing order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub entries: Vec<DirEntry>,
}

impl Listing {
    pub fn find_entry(&self, name: &str) -> Option<&DirEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Serialize a listing into a directory object stream.
pub fn write_listing<W: Write>(writer: &mut W, listing: &Listing) -> Result<()> {
    rmp_serde::encode::write(writer, listing)?;
    Ok(())
}

/// Parse a directory object stream back into a listing.
pub fn read_listing<R: Read>(reader: R) -> Result<Listing> {
    Ok(rmp_serde::decode::from_read(reader)?)
}
