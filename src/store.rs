//! Document store adapter: named blobs in logical containers.
//!
//! Every stage of the pipeline goes through [`DocumentStore`] — source PDFs
//! are read from it, page images and cached OCR results are written to it,
//! and the final extract lands in it. Two implementations ship with the
//! crate:
//!
//! * [`FsDocumentStore`] — one directory per container under a root path;
//!   what the CLI wires up.
//! * [`MemoryDocumentStore`] — a `HashMap`-backed store for tests and
//!   embedders that want to run the pipeline against in-process data.
//!
//! `list` returns names in lexicographic order on every implementation.
//! Discovery order feeds journal keys and the "first file" selection in the
//! analysis loop, so it must not depend on filesystem iteration order.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use crate::error::ActivityError;

/// Lists, reads, and writes named blobs in logical containers.
///
/// Containers are flat namespaces; `ensure_container` is create-if-absent
/// and must be idempotent. `put` overwrites silently — callers rely on
/// idempotent overwrite when concurrent runs race on the same derived
/// artifact.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create the container if it does not exist. Idempotent.
    async fn ensure_container(&self, container: &str) -> Result<(), ActivityError>;

    /// List blob names in the container starting with `prefix`, sorted
    /// lexicographically. A missing container yields an empty list.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, ActivityError>;

    /// Read a blob's bytes.
    async fn get(&self, container: &str, name: &str) -> Result<Vec<u8>, ActivityError>;

    /// Write a blob, overwriting any existing content.
    async fn put(&self, container: &str, name: &str, bytes: &[u8]) -> Result<(), ActivityError>;

    /// Whether a blob exists.
    async fn exists(&self, container: &str, name: &str) -> Result<bool, ActivityError>;
}

// ── Filesystem implementation ────────────────────────────────────────────

/// Filesystem-backed store: `<root>/<container>/<name>`.
pub struct FsDocumentStore {
    root: PathBuf,
}

impl FsDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn container_path(&self, container: &str) -> PathBuf {
        self.root.join(container)
    }
}

#[async_trait]
impl DocumentStore for FsDocumentStore {
    async fn ensure_container(&self, container: &str) -> Result<(), ActivityError> {
        tokio::fs::create_dir_all(self.container_path(container)).await?;
        Ok(())
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, ActivityError> {
        let dir = self.container_path(container);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(prefix) {
                names.push(name);
            }
        }
        names.sort_unstable();
        debug!(container, prefix, count = names.len(), "listed blobs");
        Ok(names)
    }

    async fn get(&self, container: &str, name: &str) -> Result<Vec<u8>, ActivityError> {
        let path = self.container_path(container).join(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ActivityError::BlobNotFound {
                    container: container.to_string(),
                    name: name.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, container: &str, name: &str, bytes: &[u8]) -> Result<(), ActivityError> {
        let dir = self.container_path(container);
        tokio::fs::create_dir_all(&dir).await?;

        // Atomic write: temp file + rename so readers never see a torn blob.
        let path = dir.join(name);
        let tmp_path = dir.join(format!("{name}.tmp"));
        tokio::fs::write(&tmp_path, bytes).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn exists(&self, container: &str, name: &str) -> Result<bool, ActivityError> {
        let path = self.container_path(container).join(name);
        Ok(tokio::fs::try_exists(&path).await?)
    }
}

// ── In-memory implementation ─────────────────────────────────────────────

/// In-memory store for tests and embedders.
///
/// Blob maps are `BTreeMap`s so listing order is inherently deterministic.
#[derive(Default)]
pub struct MemoryDocumentStore {
    containers: RwLock<HashMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all existing containers, sorted. Handy for asserting that
    /// repeated container checks create nothing new.
    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .containers
            .read()
            .expect("lock")
            .keys()
            .cloned()
            .collect();
        names.sort_unstable();
        names
    }

    /// Seed a blob directly, creating the container if needed.
    pub fn seed(&self, container: &str, name: &str, bytes: impl Into<Vec<u8>>) {
        self.containers
            .write()
            .expect("lock")
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), bytes.into());
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ensure_container(&self, container: &str) -> Result<(), ActivityError> {
        self.containers
            .write()
            .expect("lock")
            .entry(container.to_string())
            .or_default();
        Ok(())
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<String>, ActivityError> {
        let containers = self.containers.read().expect("lock");
        let Some(blobs) = containers.get(container) else {
            return Ok(Vec::new());
        };
        Ok(blobs
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn get(&self, container: &str, name: &str) -> Result<Vec<u8>, ActivityError> {
        self.containers
            .read()
            .expect("lock")
            .get(container)
            .and_then(|blobs| blobs.get(name))
            .cloned()
            .ok_or_else(|| ActivityError::BlobNotFound {
                container: container.to_string(),
                name: name.to_string(),
            })
    }

    async fn put(&self, container: &str, name: &str, bytes: &[u8]) -> Result<(), ActivityError> {
        self.containers
            .write()
            .expect("lock")
            .entry(container.to_string())
            .or_default()
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn exists(&self, container: &str, name: &str) -> Result<bool, ActivityError> {
        Ok(self
            .containers
            .read()
            .expect("lock")
            .get(container)
            .is_some_and(|blobs| blobs.contains_key(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryDocumentStore::new();
        store.put("c", "a.pdf", b"pdf bytes").await.unwrap();
        assert!(store.exists("c", "a.pdf").await.unwrap());
        assert_eq!(store.get("c", "a.pdf").await.unwrap(), b"pdf bytes");
    }

    #[tokio::test]
    async fn memory_store_missing_blob_is_not_found() {
        let store = MemoryDocumentStore::new();
        let err = store.get("c", "nope.pdf").await.unwrap_err();
        assert!(matches!(err, ActivityError::BlobNotFound { .. }));
    }

    #[tokio::test]
    async fn memory_store_list_filters_and_sorts() {
        let store = MemoryDocumentStore::new();
        store.seed("c", "b.pdf", b"");
        store.seed("c", "a.pdf", b"");
        store.seed("c", "a.txt", b"");
        store.seed("c", "other.pdf", b"");
        let names = store.list("c", "a").await.unwrap();
        assert_eq!(names, vec!["a.pdf", "a.txt"]);
    }

    #[tokio::test]
    async fn memory_store_list_missing_container_is_empty() {
        let store = MemoryDocumentStore::new();
        assert!(store.list("ghost", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_ensure_container_is_idempotent() {
        let store = MemoryDocumentStore::new();
        store.ensure_container("c").await.unwrap();
        store.seed("c", "kept.pdf", b"data");
        store.ensure_container("c").await.unwrap();
        // Re-ensuring must not wipe existing blobs.
        assert!(store.exists("c", "kept.pdf").await.unwrap());
        assert_eq!(store.container_names(), vec!["c"]);
    }

    #[tokio::test]
    async fn fs_store_round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());

        store.ensure_container("inbox").await.unwrap();
        store.put("inbox", "z.pdf", b"zzz").await.unwrap();
        store.put("inbox", "a.pdf", b"aaa").await.unwrap();

        assert_eq!(store.get("inbox", "a.pdf").await.unwrap(), b"aaa");
        assert_eq!(store.list("inbox", "").await.unwrap(), vec!["a.pdf", "z.pdf"]);
        assert_eq!(store.list("inbox", "z").await.unwrap(), vec!["z.pdf"]);
        assert!(store.list("missing", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn fs_store_ensure_container_twice_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        store.ensure_container("c").await.unwrap();
        store.ensure_container("c").await.unwrap();
    }

    #[tokio::test]
    async fn fs_store_put_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDocumentStore::new(dir.path());
        store.put("c", "x.json", b"old").await.unwrap();
        store.put("c", "x.json", b"new").await.unwrap();
        assert_eq!(store.get("c", "x.json").await.unwrap(), b"new");
    }
}
