//! Local filesystem cache: a read-only failover overlay plus a read-write
//! snapshot store, both keyed by [`Key`].
//!
//! Grounded on the `FileStorage` trait and its `LocalFileStorage` backend
//! used elsewhere in this codebase (content addressed by a path under a base
//! directory, `tokio::fs`, directories created on demand, a `NotFound` error
//! on missing keys). Writes are made atomic with a write-temp-then-rename
//! step, since a reader may race a writer refreshing the same key from a
//! background poll.

use std::path::{Path, PathBuf};

use crate::error::{ClientError, Result};
use crate::types::Key;

/// Turn a key into a relative path, one path segment per component. Path
/// separators inside a component are replaced so a malicious or malformed
/// `dataId`/`group`/`tenant` can't escape the base directory.
fn key_path(key: &Key) -> PathBuf {
    let sanitize = |s: &str| -> String {
        s.chars()
            .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
            .collect()
    };
    PathBuf::from(sanitize(&key.tenant))
        .join(sanitize(&key.group))
        .join(sanitize(&key.data_id))
}

/// A read-write cache directory populated by every successful fetch or
/// publish, consulted as a fallback when the control plane is unreachable.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    base: PathBuf,
}

impl SnapshotStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn full_path(&self, key: &Key) -> PathBuf {
        self.base.join(key_path(key))
    }

    /// Read cached content for `key`. Returns [`ClientError::ConfigNotFound`]
    /// if no entry exists, mirroring the network path's behavior for a
    /// missing key.
    pub async fn read(&self, key: &Key) -> Result<String> {
        let path = self.full_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ClientError::ConfigNotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically overwrite the cached entry for `key`: write to a sibling
    /// temp file in the same directory, then rename over the destination so
    /// a concurrent reader never observes a partial write.
    #[tracing::instrument(skip(self, content))]
    pub async fn write(&self, key: &Key, content: &str) -> Result<()> {
        let path = self.full_path(key);
        let dir = path.parent().unwrap_or(&self.base).to_path_buf();
        let content = content.to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            std::fs::create_dir_all(&dir)?;
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            use std::io::Write;
            tmp.write_all(content.as_bytes())?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path)
                .map_err(|e| ClientError::Io(e.error))?;
            Ok(())
        })
        .await
        .map_err(|e| ClientError::Io(std::io::Error::other(e)))??;

        Ok(())
    }

    /// Remove the cached entry for `key`, if present. Not an error if it's
    /// already gone.
    pub async fn delete(&self, key: &Key) -> Result<()> {
        let path = self.full_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// A read-only overlay directory, populated out of band by the operator
/// (e.g. baked into a container image), consulted before any network call.
///
/// Distinct from [`SnapshotStore`] mainly in intent: this store is never
/// written to by the client, so `write`/`delete` aren't exposed.
#[derive(Debug, Clone)]
pub struct FailoverStore {
    base: PathBuf,
}

impl FailoverStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn full_path(&self, key: &Key) -> PathBuf {
        self.base.join(key_path(key))
    }

    /// Read the operator-provided override for `key`, if one exists.
    pub async fn read(&self, key: &Key) -> Result<String> {
        let path = self.full_path(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ClientError::ConfigNotFound),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether an override is present for `key`, without reading its content.
    pub async fn exists(&self, key: &Key) -> bool {
        tokio::fs::metadata(self.full_path(key)).await.is_ok()
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}
