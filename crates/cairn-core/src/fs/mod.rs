pub mod local;

use std::io::Read;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use local::{LocalDirectory, LocalFile};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    File,
    Directory,
    Symlink,
    Other,
}

/// Stat-like metadata for one directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Path component, no separators.
    pub name: String,
    pub entry_type: EntryType,
    pub size: u64,
    pub mode: u32,
    /// Modification time in nanoseconds since Unix epoch.
    pub mtime_ns: i64,
    pub uid: u32,
    pub gid: u32,
}

/// One entry in a directory listing: metadata plus the capability needed to
/// descend into it (read a file's bytes, list a directory's children).
#[derive(Clone)]
pub struct Entry {
    pub metadata: EntryMetadata,
    pub kind: EntryKind,
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry").field("metadata", &self.metadata).finish()
    }
}

#[derive(Clone)]
pub enum EntryKind {
    File(Arc<dyn File>),
    /// Symlinks expose their target path bytes through the `File` capability.
    Symlink(Arc<dyn File>),
    Directory(Arc<dyn Directory>),
    Other,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        matches!(self.kind, EntryKind::Directory(_))
    }
}

/// A listable directory. Implementations define the listing order; callers
/// must not reorder it.
pub trait Directory: Send + Sync {
    fn readdir(&self) -> Result<Vec<Entry>>;
}

/// A readable file-like entry.
pub trait File: Send + Sync {
    fn open(&self) -> Result<Box<dyn Read + Send>>;
}
