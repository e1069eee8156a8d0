use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::fs::{Directory, Entry, EntryKind, EntryMetadata, EntryType, File};
use crate::storage::{BlockStore, ConnectionInfo};

/// In-memory block store for testing. Thread-safe via Mutex.
pub struct MemoryBackend {
    data: Mutex<HashMap<String, Vec<u8>>>,
    connection: Option<ConnectionInfo>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            connection: None,
        }
    }

    /// A backend that advertises the given connection info.
    pub fn with_connection_info(connection: ConnectionInfo) -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
            connection: Some(connection),
        }
    }

    pub fn key_count(&self) -> usize {
        self.data.lock().unwrap().len()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.lock().unwrap().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl BlockStore for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8], overwrite: bool) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        if !overwrite && map.contains_key(key) {
            return Ok(());
        }
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.remove(key);
        Ok(())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let map = self.data.lock().unwrap();
        let mut keys: Vec<String> = map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn connection_info(&self) -> Option<ConnectionInfo> {
        self.connection.clone()
    }
}

/// In-memory file whose `open` calls are counted, so tests can prove that
/// metadata-matching entries are never re-read.
struct TestFile {
    content: Vec<u8>,
    opens: Arc<AtomicUsize>,
}

impl File for TestFile {
    fn open(&self) -> Result<Box<dyn Read + Send>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Cursor::new(self.content.clone())))
    }
}

struct TestDirectory {
    entries: Vec<Entry>,
}

impl Directory for TestDirectory {
    fn readdir(&self) -> Result<Vec<Entry>> {
        Ok(self.entries.clone())
    }
}

/// Build a file entry with deterministic metadata. Returns the entry and
/// its open-counter.
pub fn file_entry(name: &str, content: &[u8], mtime_ns: i64) -> (Entry, Arc<AtomicUsize>) {
    let opens = Arc::new(AtomicUsize::new(0));
    let entry = Entry {
        metadata: EntryMetadata {
            name: name.to_string(),
            entry_type: EntryType::File,
            size: content.len() as u64,
            mode: 0o644,
            mtime_ns,
            uid: 1000,
            gid: 1000,
        },
        kind: EntryKind::File(Arc::new(TestFile {
            content: content.to_vec(),
            opens: Arc::clone(&opens),
        })),
    };
    (entry, opens)
}

/// Build a directory entry holding the given children.
pub fn dir_entry(name: &str, children: Vec<Entry>, mtime_ns: i64) -> Entry {
    Entry {
        metadata: EntryMetadata {
            name: name.to_string(),
            entry_type: EntryType::Directory,
            size: 0,
            mode: 0o755,
            mtime_ns,
            uid: 1000,
            gid: 1000,
        },
        kind: EntryKind::Directory(Arc::new(TestDirectory { entries: children })),
    }
}

/// Build an unnamed root directory from the given entries.
pub fn root_dir(entries: Vec<Entry>) -> Arc<dyn Directory> {
    Arc::new(TestDirectory { entries })
}
