use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Invalid storage path: {0}")]
    InvalidPath(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stream of file bytes handed to the HTTP layer
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Trait for blob storage of uploaded files (allows mocking for tests)
///
/// Paths are relative, `/`-separated keys such as `music/3_song_...mp3`.
#[async_trait::async_trait]
pub trait MediaStore: Send + Sync {
    /// Persist `data` under `path`, returning the number of bytes written
    async fn write(&self, path: &str, data: &[u8]) -> Result<u64, StorageError>;

    /// Size in bytes of the file at `path`
    async fn size(&self, path: &str) -> Result<u64, StorageError>;

    /// Stream `len` bytes starting at `start`
    async fn read_range(&self, path: &str, start: u64, len: u64)
        -> Result<ByteStream, StorageError>;

    /// Remove the file at `path`. Removing a missing file succeeds.
    async fn remove(&self, path: &str) -> Result<(), StorageError>;
}

/// Media store rooted at a directory on the local filesystem
pub struct LocalMediaStore {
    root: PathBuf,
}

impl LocalMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalMediaStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a storage key below the root, refusing anything that could escape it
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(path);
        if path.is_empty()
            || !relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn not_found_or_io(path: &str, e: std::io::Error) -> StorageError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::NotFound(path.to_string())
    } else {
        StorageError::Io(e)
    }
}

#[async_trait::async_trait]
impl MediaStore for LocalMediaStore {
    async fn write(&self, path: &str, data: &[u8]) -> Result<u64, StorageError> {
        let full_path = self.resolve(path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        if let Err(e) = fs::write(&full_path, data).await {
            // Drop whatever made it to disk
            let _ = fs::remove_file(&full_path).await;
            return Err(e.into());
        }

        debug!("Stored {} bytes at {}", data.len(), full_path.display());
        Ok(data.len() as u64)
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        let full_path = self.resolve(path)?;
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| not_found_or_io(path, e))?;
        Ok(metadata.len())
    }

    async fn read_range(
        &self,
        path: &str,
        start: u64,
        len: u64,
    ) -> Result<ByteStream, StorageError> {
        let full_path = self.resolve(path)?;
        let mut file = fs::File::open(&full_path)
            .await
            .map_err(|e| not_found_or_io(path, e))?;
        file.seek(SeekFrom::Start(start)).await?;

        Ok(ReaderStream::new(file.take(len)).boxed())
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let full_path = self.resolve(path)?;
        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("File already gone: {}", full_path.display());
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
