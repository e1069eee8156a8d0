use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::fs::{Directory, Entry, EntryKind, EntryMetadata, EntryType, File};

/// Local filesystem directory. Listings are name-sorted; symlinks are not
/// followed; special files (sockets, fifos, devices) are omitted.
pub struct LocalDirectory {
    path: PathBuf,
}

impl LocalDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Directory for LocalDirectory {
    fn readdir(&self) -> Result<Vec<Entry>> {
        let mut dir_entries = std::fs::read_dir(&self.path)?.collect::<std::io::Result<Vec<_>>>()?;
        dir_entries.sort_by_key(|e| e.file_name());

        let mut entries = Vec::with_capacity(dir_entries.len());
        for de in dir_entries {
            let name = de.file_name().to_string_lossy().to_string();
            let path = de.path();
            let metadata = std::fs::symlink_metadata(&path)?;
            let file_type = metadata.file_type();

            let entry_type = if file_type.is_dir() {
                EntryType::Directory
            } else if file_type.is_symlink() {
                EntryType::Symlink
            } else if file_type.is_file() {
                EntryType::File
            } else {
                // Special files have no content to address.
                continue;
            };

            let kind = match entry_type {
                EntryType::Directory => EntryKind::Directory(Arc::new(LocalDirectory::new(&path))),
                EntryType::Symlink => EntryKind::Symlink(Arc::new(LocalSymlink { path: path.clone() })),
                EntryType::File => EntryKind::File(Arc::new(LocalFile::new(&path))),
                EntryType::Other => EntryKind::Other,
            };

            entries.push(Entry {
                metadata: summarize_metadata(name, entry_type, &metadata),
                kind,
            });
        }
        Ok(entries)
    }
}

pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl File for LocalFile {
    fn open(&self) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(std::fs::File::open(&self.path)?))
    }
}

/// A symlink's content is its target path, so re-pointing a link changes
/// its content identifier.
struct LocalSymlink {
    path: PathBuf,
}

impl File for LocalSymlink {
    fn open(&self) -> Result<Box<dyn Read + Send>> {
        let target = std::fs::read_link(&self.path)?;
        Ok(Box::new(Cursor::new(
            target.to_string_lossy().into_owned().into_bytes(),
        )))
    }
}

fn summarize_metadata(name: String, entry_type: EntryType, metadata: &std::fs::Metadata) -> EntryMetadata {
    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;

        EntryMetadata {
            name,
            entry_type,
            size: metadata.len(),
            mode: metadata.mode(),
            mtime_ns: metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec(),
            uid: metadata.uid(),
            gid: metadata.gid(),
        }
    }

    #[cfg(not(unix))]
    {
        let mode = if entry_type == EntryType::Directory {
            0o755
        } else {
            0o644
        };
        let mtime_ns = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::SystemTime::UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        EntryMetadata {
            name,
            entry_type,
            size: metadata.len(),
            mode,
            mtime_ns,
            uid: 0,
            gid: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readdir_is_name_sorted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zebra"), b"z").unwrap();
        std::fs::write(dir.path().join("alpha"), b"a").unwrap();
        std::fs::create_dir(dir.path().join("middle")).unwrap();

        let entries = LocalDirectory::new(dir.path()).readdir().unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.metadata.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "middle", "zebra"]);
    }

    #[test]
    fn entry_types_and_sizes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("file.txt"), b"12345").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let entries = LocalDirectory::new(dir.path()).readdir().unwrap();
        let file = entries.iter().find(|e| e.metadata.name == "file.txt").unwrap();
        assert_eq!(file.metadata.entry_type, EntryType::File);
        assert_eq!(file.metadata.size, 5);

        let sub = entries.iter().find(|e| e.metadata.name == "sub").unwrap();
        assert_eq!(sub.metadata.entry_type, EntryType::Directory);
        assert!(sub.is_dir());
    }

    #[test]
    fn file_open_reads_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("data"), b"file bytes").unwrap();

        let entries = LocalDirectory::new(dir.path()).readdir().unwrap();
        let EntryKind::File(f) = &entries[0].kind else {
            panic!("expected file entry");
        };
        let mut content = Vec::new();
        f.open().unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"file bytes");
    }

    #[cfg(unix)]
    #[test]
    fn symlink_content_is_target_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("target"), b"x").unwrap();
        std::os::unix::fs::symlink("target", dir.path().join("link")).unwrap();

        let entries = LocalDirectory::new(dir.path()).readdir().unwrap();
        let link = entries.iter().find(|e| e.metadata.name == "link").unwrap();
        assert_eq!(link.metadata.entry_type, EntryType::Symlink);
        let EntryKind::Symlink(f) = &link.kind else {
            panic!("expected symlink entry");
        };
        let mut content = Vec::new();
        f.open().unwrap().read_to_end(&mut content).unwrap();
        assert_eq!(content, b"target");
    }
}
