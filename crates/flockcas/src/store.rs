//! Blob store backends.
//!
//! `FileStore` is the on-disk store used by a running node; layout is
//! sharded by hash prefix:
//!
//! ```text
//! {root}/
//! └── objects/
//!     ├── ab/
//!     │   └── cde123...   # content, filename = hash remainder
//!     └── 12/
//!         └── 3456789...
//! ```
//!
//! `MemoryStore` backs tests.

use std::fs;
use std::path::PathBuf;

use dashmap::DashMap;

use crate::hash::ContentHash;

/// Errors from blob store operations.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Content storage capability.
///
/// Implementations must be safe to share across tasks; a node holds one
/// store behind an `Arc<dyn BlobStore>`.
pub trait BlobStore: Send + Sync {
    /// Store bytes, returning their CID. Storing existing content is a
    /// no-op returning the same CID.
    fn put(&self, data: &[u8]) -> Result<ContentHash, BlobError>;

    /// Retrieve bytes by CID. `Ok(None)` when the CID is unknown.
    fn get(&self, cid: &ContentHash) -> Result<Option<Vec<u8>>, BlobError>;

    /// Check existence without reading.
    fn exists(&self, cid: &ContentHash) -> bool;
}

/// Filesystem-backed blob store.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, BlobError> {
        let root = root.into();
        let objects = root.join("objects");
        fs::create_dir_all(&objects).map_err(|source| BlobError::Io {
            path: objects.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    fn object_path(&self, cid: &ContentHash) -> PathBuf {
        self.root
            .join("objects")
            .join(cid.prefix())
            .join(cid.remainder())
    }
}

impl BlobStore for FileStore {
    fn put(&self, data: &[u8]) -> Result<ContentHash, BlobError> {
        let cid = ContentHash::from_data(data);
        let path = self.object_path(&cid);

        if path.exists() {
            return Ok(cid);
        }

        let dir = path.parent().expect("object path has a shard directory");
        fs::create_dir_all(dir).map_err(|source| BlobError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        // Write-then-rename so readers never observe a torn object.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, data).map_err(|source| BlobError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| BlobError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::debug!(cid = %cid, bytes = data.len(), "stored blob");
        Ok(cid)
    }

    fn get(&self, cid: &ContentHash) -> Result<Option<Vec<u8>>, BlobError> {
        let path = self.object_path(cid);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(BlobError::Io { path, source }),
        }
    }

    fn exists(&self, cid: &ContentHash) -> bool {
        self.object_path(cid).exists()
    }
}

/// In-memory blob store for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    objects: DashMap<ContentHash, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlobStore for MemoryStore {
    fn put(&self, data: &[u8]) -> Result<ContentHash, BlobError> {
        let cid = ContentHash::from_data(data);
        self.objects.entry(cid.clone()).or_insert_with(|| data.to_vec());
        Ok(cid)
    }

    fn get(&self, cid: &ContentHash) -> Result<Option<Vec<u8>>, BlobError> {
        Ok(self.objects.get(cid).map(|v| v.clone()))
    }

    fn exists(&self, cid: &ContentHash) -> bool {
        self.objects.contains_key(cid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(store: &dyn BlobStore) {
        let cid = store.put(b"blob body").unwrap();
        assert!(store.exists(&cid));
        assert_eq!(store.get(&cid).unwrap().unwrap(), b"blob body");
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        roundtrip(&store);
    }

    #[test]
    fn memory_store_roundtrip() {
        roundtrip(&MemoryStore::new());
    }

    #[test]
    fn put_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let a = store.put(b"same").unwrap();
        let b = store.put(b"same").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_cid_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let cid = ContentHash::from_data(b"never stored");
        assert!(!store.exists(&cid));
        assert!(store.get(&cid).unwrap().is_none());
    }

    #[test]
    fn objects_are_sharded_by_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let cid = store.put(b"sharded").unwrap();
        let expected = dir
            .path()
            .join("objects")
            .join(cid.prefix())
            .join(cid.remainder());
        assert!(expected.exists());
    }
}
