//! # Graph Economics Storage
//!
//! Named snapshot persistence for protocol state.
//!
//! ## Backends
//!
//! - `memory` - process-local map, for tests and replay
//! - `file` - one file per snapshot under a directory, checksummed
//!
//! Stores deal in opaque bytes; the envelope format and its versioning
//! belong to the protocol crate.

use graph_core::Result;

/// Backend for named state snapshots
pub trait SnapshotStore: Send + Sync {
    /// Write `bytes` under `name`, replacing any previous snapshot
    fn save(&self, name: &str, bytes: &[u8]) -> Result<()>;

    fn load(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Snapshot names in lexical order
    fn list(&self) -> Result<Vec<String>>;

    fn delete(&self, name: &str) -> Result<bool>;
}

pub mod memory {
    //! In-memory snapshot store

    use super::SnapshotStore;
    use graph_core::Result;
    use parking_lot::RwLock;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct MemorySnapshotStore {
        data: RwLock<HashMap<String, Vec<u8>>>,
    }

    impl MemorySnapshotStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.data.read().len()
        }

        pub fn is_empty(&self) -> bool {
            self.data.read().is_empty()
        }
    }

    impl SnapshotStore for MemorySnapshotStore {
        fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
            self.data.write().insert(name.to_string(), bytes.to_vec());
            Ok(())
        }

        fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
            Ok(self.data.read().get(name).cloned())
        }

        fn list(&self) -> Result<Vec<String>> {
            let mut names: Vec<String> = self.data.read().keys().cloned().collect();
            names.sort();
            Ok(names)
        }

        fn delete(&self, name: &str) -> Result<bool> {
            Ok(self.data.write().remove(name).is_some())
        }
    }
}

pub mod file {
    //! Directory-backed snapshot store
    //!
    //! Layout of `<dir>/<name>.snap`: 32-byte blake3 digest of the payload,
    //! then the payload. Writes go to a temporary file that is renamed into
    //! place, so a crash never leaves a half-written snapshot under the
    //! real name.

    use super::SnapshotStore;
    use graph_core::{GraphError, Result};
    use parking_lot::Mutex;
    use std::fs;
    use std::io::ErrorKind;
    use std::path::{Path, PathBuf};

    const EXTENSION: &str = "snap";
    const DIGEST_LEN: usize = 32;

    pub struct FileSnapshotStore {
        dir: PathBuf,
        /// Serializes writers within the process
        write_lock: Mutex<()>,
    }

    impl FileSnapshotStore {
        /// Open (creating if needed) a store rooted at `dir`
        pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
            let dir = dir.as_ref().to_path_buf();
            fs::create_dir_all(&dir).map_err(|e| storage_error(&dir, e))?;
            tracing::debug!(dir = %dir.display(), "snapshot store opened");
            Ok(Self {
                dir,
                write_lock: Mutex::new(()),
            })
        }

        pub fn dir(&self) -> &Path {
            &self.dir
        }

        fn path_for(&self, name: &str) -> Result<PathBuf> {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
                && !name.starts_with('.');
            if !valid {
                return Err(GraphError::Storage(format!("invalid snapshot name {name:?}")));
            }
            Ok(self.dir.join(format!("{name}.{EXTENSION}")))
        }
    }

    fn storage_error(path: &Path, e: std::io::Error) -> GraphError {
        GraphError::Storage(format!("{}: {e}", path.display()))
    }

    impl SnapshotStore for FileSnapshotStore {
        fn save(&self, name: &str, bytes: &[u8]) -> Result<()> {
            let path = self.path_for(name)?;
            let tmp = path.with_extension("tmp");

            let mut contents = Vec::with_capacity(DIGEST_LEN + bytes.len());
            contents.extend_from_slice(blake3::hash(bytes).as_bytes());
            contents.extend_from_slice(bytes);

            let _guard = self.write_lock.lock();
            fs::write(&tmp, &contents).map_err(|e| storage_error(&tmp, e))?;
            fs::rename(&tmp, &path).map_err(|e| storage_error(&path, e))?;
            tracing::debug!(name, bytes = bytes.len(), "snapshot saved");
            Ok(())
        }

        fn load(&self, name: &str) -> Result<Option<Vec<u8>>> {
            let path = self.path_for(name)?;
            let contents = match fs::read(&path) {
                Ok(contents) => contents,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(storage_error(&path, e)),
            };
            if contents.len() < DIGEST_LEN {
                return Err(GraphError::Storage(format!("{name}: truncated snapshot")));
            }
            let (digest, payload) = contents.split_at(DIGEST_LEN);
            if blake3::hash(payload).as_bytes() != digest {
                return Err(GraphError::Storage(format!("{name}: checksum mismatch")));
            }
            Ok(Some(payload.to_vec()))
        }

        fn list(&self) -> Result<Vec<String>> {
            let entries = fs::read_dir(&self.dir).map_err(|e| storage_error(&self.dir, e))?;
            let mut names = Vec::new();
            for entry in entries {
                let path = entry.map_err(|e| storage_error(&self.dir, e))?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
            names.sort();
            Ok(names)
        }

        fn delete(&self, name: &str) -> Result<bool> {
            let path = self.path_for(name)?;
            let _guard = self.write_lock.lock();
            match fs::remove_file(&path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
                Err(e) => Err(storage_error(&path, e)),
            }
        }
    }
}

// Re-export for convenience
pub use file::FileSnapshotStore;
pub use memory::MemorySnapshotStore;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn exercise(store: &dyn SnapshotStore) {
        assert_eq!(store.load("epoch-1").unwrap(), None);
        store.save("epoch-2", b"two").unwrap();
        store.save("epoch-1", b"one").unwrap();
        store.save("epoch-1", b"uno").unwrap();

        assert_eq!(store.load("epoch-1").unwrap().as_deref(), Some(&b"uno"[..]));
        assert_eq!(store.list().unwrap(), vec!["epoch-1".to_string(), "epoch-2".to_string()]);
        assert!(store.delete("epoch-2").unwrap());
        assert!(!store.delete("epoch-2").unwrap());
    }

    #[test]
    fn test_memory_store() {
        let store = MemorySnapshotStore::new();
        exercise(&store);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).unwrap();
        exercise(&store);

        // survives reopening
        let reopened = FileSnapshotStore::open(dir.path()).unwrap();
        assert_eq!(reopened.load("epoch-1").unwrap().as_deref(), Some(&b"uno"[..]));
    }

    #[test]
    fn test_file_store_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).unwrap();
        store.save("state", b"payload").unwrap();

        let path = dir.path().join("state.snap");
        let mut contents = fs::read(&path).unwrap();
        let last = contents.len() - 1;
        contents[last] ^= 0xff;
        fs::write(&path, contents).unwrap();

        assert!(store.load("state").is_err());
    }

    #[test]
    fn test_file_store_rejects_path_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::open(dir.path()).unwrap();
        assert!(store.save("../escape", b"x").is_err());
        assert!(store.save("", b"x").is_err());
    }
}
