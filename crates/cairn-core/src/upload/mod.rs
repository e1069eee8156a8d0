//! Cache-aware incremental upload of directory trees into the object store.

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::cas::{ObjectManager, ObjectId};
use crate::error::{CairnError, Result};
use crate::fs::{Directory, EntryKind, File, LocalFile};
use crate::snapshot::{self, DirEntry, Listing};

pub const FILE_BLOCK_PREFIX: char = 'F';
pub const DIRECTORY_BLOCK_PREFIX: char = 'D';

/// Uploads files and directories, reusing prior content identifiers
/// whenever entry metadata proves the content is unchanged.
pub struct Uploader {
    manager: Arc<dyn ObjectManager>,
    cancelled: AtomicBool,
}

impl Uploader {
    pub fn new(manager: Arc<dyn ObjectManager>) -> Self {
        Self {
            manager,
            cancelled: AtomicBool::new(false),
        }
    }

    /// Request cancellation. Idempotent and safe to call from any thread;
    /// the flag is observed at directory boundaries.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Hash a single file into the object store.
    pub fn upload_file(&self, path: &Path) -> Result<ObjectId> {
        let file = LocalFile::new(path);
        self.upload_file_stream(&file, &path.display().to_string())
    }

    fn upload_file_stream(&self, file: &dyn File, path: &str) -> Result<ObjectId> {
        let mut reader = file.open()?;
        self.write_object(&mut reader, &format!("FILE:{path}"), FILE_BLOCK_PREFIX)
    }

    fn write_object(
        &self,
        reader: &mut dyn Read,
        description: &str,
        block_prefix: char,
    ) -> Result<ObjectId> {
        let mut writer = self.manager.new_writer(description, block_prefix);
        std::io::copy(reader, &mut writer)?;
        writer.result()
    }

    /// Upload a directory tree, reusing `previous` (a prior snapshot of the
    /// same directory, possibly null) to skip unchanged entries. When the
    /// whole subtree is unchanged, `previous` itself is returned and no new
    /// directory object is written.
    pub fn upload_dir(
        &self,
        dir: &dyn Directory,
        path: &str,
        previous: &ObjectId,
    ) -> Result<ObjectId> {
        if self.is_cancelled() {
            return Err(CairnError::UploadCancelled {
                previous: previous.clone(),
            });
        }

        let entries = dir.readdir()?;

        let cached = if previous.is_null() {
            Listing::default()
        } else {
            self.read_cached_listing(previous, path)
        };

        let mut directory_matches_cache = cached.entries.len() == entries.len();
        let mut listing = Listing {
            entries: Vec::with_capacity(entries.len()),
        };

        for entry in &entries {
            let full_path = format!("{path}/{}", entry.metadata.name);

            // See if we had this name during the previous pass, and whether
            // its metadata is identical.
            let cached_entry = cached.find_entry(&entry.metadata.name);
            let mut stored = DirEntry::from_metadata(&entry.metadata);
            let metadata_matches =
                cached_entry.is_some_and(|cached| cached.metadata_equals(&stored));

            directory_matches_cache = directory_matches_cache && metadata_matches;

            match &entry.kind {
                EntryKind::Directory(subdir) => {
                    let previous_subdir = cached_entry
                        .map(|cached| cached.object_id.clone())
                        .unwrap_or(ObjectId::NULL);

                    stored.object_id =
                        self.upload_dir(subdir.as_ref(), &full_path, &previous_subdir)?;

                    if let Some(cached) = cached_entry {
                        if cached.object_id != stored.object_id {
                            directory_matches_cache = false;
                        }
                    }
                }
                EntryKind::File(file) | EntryKind::Symlink(file) => {
                    if metadata_matches {
                        // Avoid hashing by reusing the previous object ID.
                        stored.object_id = cached_entry
                            .map(|cached| cached.object_id.clone())
                            .unwrap_or(ObjectId::NULL);
                    } else {
                        stored.object_id = self.upload_file_stream(file.as_ref(), &full_path)?;
                    }
                }
                EntryKind::Other => {
                    debug!(path = %full_path, "skipping entry with no content");
                    continue;
                }
            }

            listing.entries.push(stored);
        }

        if directory_matches_cache && !previous.is_null() {
            return Ok(previous.clone());
        }

        let mut writer = self
            .manager
            .new_writer(&format!("DIR:{path}"), DIRECTORY_BLOCK_PREFIX);
        snapshot::write_listing(&mut writer, &listing)?;
        writer.result()
    }

    /// A malformed previous directory object is non-fatal: the upload
    /// continues without a cache and produces a correct, if slower, result.
    fn read_cached_listing(&self, previous: &ObjectId, path: &str) -> Listing {
        match self.manager.open(previous) {
            Ok(reader) => match snapshot::read_listing(reader) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(path, previous = %previous, error = %e, "unable to read cached directory");
                    Listing::default()
                }
            },
            Err(e) => {
                warn!(path, previous = %previous, error = %e, "unable to open cached directory");
                Listing::default()
            }
        }
    }
}
