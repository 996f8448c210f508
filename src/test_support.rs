// Test support utilities for both unit and integration tests

use crate::auth::Claims;
use crate::db::OwnerId;
use crate::media_store::{ByteStream, MediaStore, StorageError};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use jsonwebtoken::{EncodingKey, Header};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Secret shared by test routers and [`mint_credential`]
pub const TEST_JWT_SECRET: &str = "songbox-test-secret";

/// Sign a credential for `user_id`, valid for an hour
pub fn mint_credential(user_id: OwnerId) -> String {
    let claims = Claims {
        user_id,
        username: format!("user{}", user_id),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

/// Mock media store for testing
///
/// Keeps files in memory instead of on disk. Removals can be made to fail
/// to exercise error paths.
#[derive(Default)]
pub struct MockMediaStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    fail_removals: AtomicBool,
}

impl MockMediaStore {
    #[allow(unused)] // Used in tests
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files.lock().unwrap().len()
    }

    /// Drop a file behind the library's back
    pub fn lose(&self, path: &str) {
        self.files.lock().unwrap().remove(path);
    }

    pub fn set_fail_removals(&self, fail: bool) {
        self.fail_removals.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl MediaStore for MockMediaStore {
    async fn write(&self, path: &str, data: &[u8]) -> Result<u64, StorageError> {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), data.to_vec());
        Ok(data.len() as u64)
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn read_range(
        &self,
        path: &str,
        start: u64,
        len: u64,
    ) -> Result<ByteStream, StorageError> {
        let data = self
            .get(path)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))?;
        let start = (start as usize).min(data.len());
        let end = start.saturating_add(len as usize).min(data.len());
        let slice = Bytes::copy_from_slice(&data[start..end]);
        Ok(stream::once(async move { Ok(slice) }).boxed())
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "removal disabled",
            )));
        }
        self.files.lock().unwrap().remove(path);
        Ok(())
    }
}
