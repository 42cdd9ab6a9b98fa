//! Object store holding the published discovery documents
//!
//! Locations are URL-like: `gs://bucket/prefix`, `s3://bucket/prefix`,
//! `memfs://name`, `file:///dir` or a plain directory. Cloud buckets are
//! emulated on disk under the state dir, keeping the public URL the real
//! bucket would have so publication can be checked against the issuer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

/// Per-object ACL sidecar in a filesystem store
const ACL_FILE: &str = ".cloudup-acl.json";

/// Marker making every object in a filesystem store public
const PUBLIC_MARKER: &str = ".cloudup-public";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid store location {0:?}")]
    InvalidLocation(String),

    #[error("invalid object path {0:?}")]
    InvalidPath(String),

    #[error("corrupt ACL file {}: {source}", .path.display())]
    Acl {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub contents: Vec<u8>,
    /// Readable without authentication through its own ACL
    pub public: bool,
}

pub trait ObjectStore: Send + Sync {
    /// The location this store was opened from
    fn location(&self) -> &str;

    fn read(&self, path: &str) -> StoreResult<Option<StoredObject>>;

    fn write(&self, path: &str, contents: &[u8], public: bool) -> StoreResult<()>;

    /// Whether every object is already readable anonymously
    fn is_public(&self) -> StoreResult<bool>;

    /// HTTPS base URL objects are served from, if any
    fn public_url(&self) -> Option<&str>;
}

/// Reject absolute paths and parent segments
fn check_path(path: &str) -> StoreResult<&str> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.split('/').any(|s| s == ".." || s.is_empty()) {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(trimmed)
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Open the store for `location`. Bucket URLs map to directories under
/// `state_dir/buckets`.
pub fn open(location: &str, state_dir: &Path) -> StoreResult<Arc<dyn ObjectStore>> {
    let invalid = || StoreError::InvalidLocation(location.to_string());

    if location.starts_with("memfs://") {
        return Ok(Arc::new(MemStore::new(location)));
    }

    for (scheme, url_for) in [
        ("gs://", gcs_url as fn(&str, &str) -> String),
        ("s3://", s3_url),
    ] {
        if let Some(rest) = location.strip_prefix(scheme) {
            let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
            if bucket.is_empty() {
                return Err(invalid());
            }
            let prefix = prefix.trim_matches('/');
            let mut root = state_dir.join("buckets").join(bucket);
            if !prefix.is_empty() {
                root = root.join(prefix);
            }
            let store = FsStore::new(location, root).with_public_url(url_for(bucket, prefix));
            return Ok(Arc::new(store));
        }
    }

    let dir = location.strip_prefix("file://").unwrap_or(location);
    if dir.is_empty() || dir.contains("://") {
        return Err(invalid());
    }
    Ok(Arc::new(FsStore::new(location, crate::paths::expand(dir))))
}

fn gcs_url(bucket: &str, prefix: &str) -> String {
    let base = format!("https://storage.googleapis.com/{bucket}");
    if prefix.is_empty() { base } else { format!("{base}/{prefix}") }
}

fn s3_url(bucket: &str, prefix: &str) -> String {
    let base = format!("https://{bucket}.s3.amazonaws.com");
    if prefix.is_empty() { base } else { format!("{base}/{prefix}") }
}

/// Store backed by a local directory
pub struct FsStore {
    location: String,
    root: PathBuf,
    public_url: Option<String>,
    acl_lock: Mutex<()>,
}

impl FsStore {
    pub fn new(location: &str, root: impl Into<PathBuf>) -> Self {
        Self {
            location: location.to_string(),
            root: root.into(),
            public_url: None,
            acl_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    /// Make every object readable anonymously
    #[cfg(test)]
    pub fn make_public(&self) -> StoreResult<()> {
        let marker = self.root.join(PUBLIC_MARKER);
        fs::create_dir_all(&self.root).map_err(io_error(&self.root))?;
        fs::write(&marker, b"").map_err(io_error(&marker))
    }

    fn load_acl(&self) -> StoreResult<BTreeMap<String, bool>> {
        let path = self.root.join(ACL_FILE);
        match fs::read_to_string(&path) {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| StoreError::Acl { path, source })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    fn save_acl(&self, acl: &BTreeMap<String, bool>) -> StoreResult<()> {
        let path = self.root.join(ACL_FILE);
        let json = serde_json::to_string_pretty(acl)
            .map_err(|source| StoreError::Acl { path: path.clone(), source })?;
        fs::write(&path, json).map_err(io_error(&path))
    }
}

impl ObjectStore for FsStore {
    fn location(&self) -> &str {
        &self.location
    }

    fn read(&self, path: &str) -> StoreResult<Option<StoredObject>> {
        let path = check_path(path)?;
        let file = self.root.join(path);
        let contents = match fs::read(&file) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&file)(e)),
        };
        let public = self.load_acl()?.get(path).copied().unwrap_or(false);
        Ok(Some(StoredObject { contents, public }))
    }

    fn write(&self, path: &str, contents: &[u8], public: bool) -> StoreResult<()> {
        let path = check_path(path)?;
        let file = self.root.join(path);
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).map_err(io_error(parent))?;
        }
        fs::write(&file, contents).map_err(io_error(&file))?;

        let _guard = self.acl_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut acl = self.load_acl()?;
        let changed = if public {
            acl.insert(path.to_string(), true).is_none()
        } else {
            acl.remove(path).is_some()
        };
        if changed {
            self.save_acl(&acl)?;
        }
        log::debug!("wrote {} ({} bytes, public: {public})", file.display(), contents.len());
        Ok(())
    }

    fn is_public(&self) -> StoreResult<bool> {
        Ok(self.root.join(PUBLIC_MARKER).exists())
    }

    fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }
}

/// In-memory store, for tests and dry runs
#[derive(Default)]
pub struct MemStore {
    location: String,
    public: bool,
    public_url: Option<String>,
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemStore {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            ..Self::default()
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    #[cfg(test)]
    #[must_use]
    pub fn public(mut self) -> Self {
        self.public = true;
        self
    }
}

impl ObjectStore for MemStore {
    fn location(&self) -> &str {
        &self.location
    }

    fn read(&self, path: &str) -> StoreResult<Option<StoredObject>> {
        let path = check_path(path)?;
        let objects = self.objects.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(objects.get(path).cloned())
    }

    fn write(&self, path: &str, contents: &[u8], public: bool) -> StoreResult<()> {
        let path = check_path(path)?;
        let object = StoredObject {
            contents: contents.to_vec(),
            public,
        };
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), object);
        Ok(())
    }

    fn is_public(&self) -> StoreResult<bool> {
        Ok(self.public)
    }

    fn public_url(&self) -> Option<&str> {
        self.public_url.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_gcs_location() {
        let temp = TempDir::new().unwrap();
        let store = open("gs://issuer-bucket/cluster-a", temp.path()).unwrap();
        assert_eq!(
            store.public_url(),
            Some("https://storage.googleapis.com/issuer-bucket/cluster-a")
        );
        assert_eq!(store.location(), "gs://issuer-bucket/cluster-a");

        store.write("openid/v1/jwks", b"{}", false).unwrap();
        assert!(
            temp.path()
                .join("buckets/issuer-bucket/cluster-a/openid/v1/jwks")
                .exists()
        );
    }

    #[test]
    fn test_open_s3_and_plain_locations() {
        let temp = TempDir::new().unwrap();
        let store = open("s3://issuer", temp.path()).unwrap();
        assert_eq!(store.public_url(), Some("https://issuer.s3.amazonaws.com"));

        let dir = temp.path().join("plain");
        let store = open(dir.to_str().unwrap(), temp.path()).unwrap();
        assert_eq!(store.public_url(), None);

        assert!(open("gs://", temp.path()).is_err());
        assert!(open("ftp://host/dir", temp.path()).is_err());
    }

    #[test]
    fn test_fs_store_round_trip_with_acl() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new("test", temp.path());

        assert_eq!(store.read("a/b.json").unwrap(), None);
        store.write("a/b.json", b"one", true).unwrap();
        assert_eq!(
            store.read("a/b.json").unwrap(),
            Some(StoredObject {
                contents: b"one".to_vec(),
                public: true
            })
        );

        store.write("a/b.json", b"two", false).unwrap();
        let object = store.read("a/b.json").unwrap().unwrap();
        assert_eq!(object.contents, b"two");
        assert!(!object.public);
    }

    #[test]
    fn test_fs_store_public_marker() {
        let temp = TempDir::new().unwrap();
        let store = FsStore::new("test", temp.path().join("bucket"));
        assert!(!store.is_public().unwrap());
        store.make_public().unwrap();
        assert!(store.is_public().unwrap());
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let store = MemStore::new("memfs://t");
        assert!(matches!(
            store.write("../etc/passwd", b"", false),
            Err(StoreError::InvalidPath(_))
        ));
        assert!(store.read("a//b").is_err());
        assert!(store.write("/ok/leading-slash", b"x", false).is_ok());
        assert!(store.read("ok/leading-slash").unwrap().is_some());
    }
}
