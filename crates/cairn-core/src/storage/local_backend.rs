use std::fs;
use std::path::{Component, PathBuf};

use crate::error::{CairnError, Result};
use crate::storage::{BlockStore, ConnectionInfo};

/// Block store rooted at a local directory, using `std::fs` directly.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Create a backend rooted at the given directory path.
    pub fn new(root: &str) -> Result<Self> {
        let root_path = PathBuf::from(root);
        // Canonicalize if the path already exists for clearer errors and
        // correct strip_prefix behavior with symlinked roots.
        let root = if root_path.exists() {
            fs::canonicalize(&root_path)?
        } else {
            fs::create_dir_all(&root_path)?;
            fs::canonicalize(&root_path)?
        };
        Ok(Self { root })
    }

    /// Reject storage keys that could escape the backend root.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CairnError::InvalidFormat("unsafe storage key: empty".into()));
        }
        if key.starts_with('/') || key.starts_with('\\') {
            return Err(CairnError::InvalidFormat(format!(
                "unsafe storage key: absolute path '{key}'"
            )));
        }
        if key.contains('\\') {
            return Err(CairnError::InvalidFormat(format!(
                "unsafe storage key: contains backslash '{key}'"
            )));
        }
        let path = std::path::Path::new(key);
        for component in path.components() {
            if component == Component::ParentDir {
                return Err(CairnError::InvalidFormat(format!(
                    "unsafe storage key: parent traversal '{key}'"
                )));
            }
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn list_recursive(&self, dir: &std::path::Path, keys: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.list_recursive(&entry.path(), keys)?;
            } else if file_type.is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        Ok(())
    }
}

impl BlockStore for LocalBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, data: &[u8], overwrite: bool) -> Result<()> {
        let path = self.resolve(key)?;
        if !overwrite && path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        // The prefix may end mid-filename, so walk from the deepest existing
        // parent directory and filter by string prefix.
        let mut keys = Vec::new();
        self.list_recursive(&self.root, &mut keys)?;
        keys.retain(|k| k.starts_with(prefix));
        keys.sort();
        Ok(keys)
    }

    fn connection_info(&self) -> Option<ConnectionInfo> {
        Some(ConnectionInfo {
            kind: "file".into(),
            path: self.root.to_string_lossy().to_string(),
        })
    }
}
