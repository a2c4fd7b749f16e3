//! Distribution artifact storage, keyed by epoch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::debug;

use chopshop_core::{ChopsError, EpochDistribution};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Artifact for epoch {0} already exists")]
    AlreadyExists(u64),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<StoreError> for ChopsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Io(msg) => ChopsError::Storage(msg),
            StoreError::Serialization(msg) => ChopsError::SerializationError(msg),
            e @ StoreError::AlreadyExists(_) => ChopsError::Storage(e.to_string()),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Blob storage for distribution artifacts.
///
/// Artifacts are write-once: a `put` for an epoch that already has one fails
/// with [`StoreError::AlreadyExists`] and leaves the stored bytes untouched.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, epoch: u64) -> StoreResult<bool>;

    async fn put(&self, epoch: u64, bytes: &[u8]) -> StoreResult<()>;

    async fn get(&self, epoch: u64) -> StoreResult<Option<Vec<u8>>>;

    /// Serialize and store `distribution`, returning the bytes written.
    async fn save(&self, distribution: &EpochDistribution) -> StoreResult<Vec<u8>> {
        let bytes = distribution
            .to_json_bytes()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.put(distribution.epoch, &bytes).await?;
        Ok(bytes)
    }

    async fn load(&self, epoch: u64) -> StoreResult<Option<EpochDistribution>> {
        match self.get(epoch).await? {
            Some(bytes) => EpochDistribution::from_json_bytes(&bytes)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<T: ArtifactStore + ?Sized> ArtifactStore for std::sync::Arc<T> {
    async fn exists(&self, epoch: u64) -> StoreResult<bool> {
        (**self).exists(epoch).await
    }

    async fn put(&self, epoch: u64, bytes: &[u8]) -> StoreResult<()> {
        (**self).put(epoch, bytes).await
    }

    async fn get(&self, epoch: u64) -> StoreResult<Option<Vec<u8>>> {
        (**self).get(epoch).await
    }
}

/// `epoch-{n}.json` files in one directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    dir: PathBuf,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, epoch: u64) -> PathBuf {
        self.dir.join(format!("epoch-{}.json", epoch))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn exists(&self, epoch: u64) -> StoreResult<bool> {
        Ok(tokio::fs::try_exists(self.path_for(epoch)).await?)
    }

    /// Write to a temp file, then hard-link it into place. The link fails if
    /// the target exists, so a reader never sees a partial artifact and an
    /// existing one is never replaced.
    async fn put(&self, epoch: u64, bytes: &[u8]) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(epoch);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => {
                debug!("Wrote artifact {} ({} bytes)", path.display(), bytes.len());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::AlreadyExists(epoch))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, epoch: u64) -> StoreResult<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(epoch)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process store with switchable failures.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<u64, Vec<u8>>>,
    fail_exists: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `exists` fail until reset.
    pub fn fail_exists(&self, fail: bool) {
        self.fail_exists.store(fail, Ordering::SeqCst);
    }

    /// Make `put` fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, epoch: u64) -> StoreResult<bool> {
        if self.fail_exists.load(Ordering::SeqCst) {
            return Err(StoreError::Io("existence check failed".to_string()));
        }
        Ok(self
            .artifacts
            .read()
            .expect("store lock poisoned")
            .contains_key(&epoch))
    }

    async fn put(&self, epoch: u64, bytes: &[u8]) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io("write failed".to_string()));
        }
        let mut artifacts = self.artifacts.write().expect("store lock poisoned");
        if artifacts.contains_key(&epoch) {
            return Err(StoreError::AlreadyExists(epoch));
        }
        artifacts.insert(epoch, bytes.to_vec());
        Ok(())
    }

    async fn get(&self, epoch: u64) -> StoreResult<Option<Vec<u8>>> {
        Ok(self
            .artifacts
            .read()
            .expect("store lock poisoned")
            .get(&epoch)
            .cloned())
    }
}
