//! In-memory [`StorageClient`] for tests.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::{ByteReader, FileEntity, StorageClient, StorageError, file_name};

#[derive(Debug, Default)]
struct Files {
    contents: BTreeMap<String, Vec<u8>>,
    requested: Vec<String>,
}

/// Serves byte buffers registered by URL. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<Mutex<Files>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Files> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `bytes` under `url`.
    pub fn insert(&self, url: &str, bytes: Vec<u8>) {
        self.lock().contents.insert(url.to_string(), bytes);
    }

    /// URLs requested so far, in order.
    #[must_use]
    pub fn requested(&self) -> Vec<String> {
        self.lock().requested.clone()
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn get_file_from_url(&self, url: &str) -> Result<Box<dyn FileEntity>, StorageError> {
        let mut files = self.lock();
        files.requested.push(url.to_string());

        let bytes = files
            .contents
            .get(url)
            .cloned()
            .ok_or_else(|| StorageError::Io {
                path: url.to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })?;
        drop(files);

        Ok(Box::new(MemoryFile {
            name: file_name(url).to_string(),
            bytes,
        }))
    }
}

struct MemoryFile {
    name: String,
    bytes: Vec<u8>,
}

#[async_trait]
impl FileEntity for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        u64::try_from(self.bytes.len()).ok()
    }

    async fn get_stream(self: Box<Self>) -> Result<ByteReader, StorageError> {
        Ok(Box::pin(Cursor::new(self.bytes)))
    }
}
