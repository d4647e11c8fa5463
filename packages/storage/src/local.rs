//! Local filesystem backend.

use std::path::Path;

use async_trait::async_trait;

use crate::{ByteReader, FileEntity, StorageError, file_name};

/// Opens files on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalStorage;

impl LocalStorage {
    /// Opens `path` for reading.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be opened.
    pub async fn open(&self, path: &Path) -> Result<Box<dyn FileEntity>, StorageError> {
        let io_err = |source| StorageError::Io {
            path: path.display().to_string(),
            source,
        };

        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let size = file.metadata().await.map_err(io_err)?.len();

        log::debug!("Opened {} ({size} bytes)", path.display());

        Ok(Box::new(LocalFile {
            name: file_name(&path.to_string_lossy()).to_string(),
            size,
            file,
        }))
    }
}

struct LocalFile {
    name: String,
    size: u64,
    file: tokio::fs::File,
}

#[async_trait]
impl FileEntity for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    async fn get_stream(self: Box<Self>) -> Result<ByteReader, StorageError> {
        Ok(Box::pin(self.file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_is_an_io_error() {
        let result = LocalStorage
            .open(Path::new("/definitely/not/here/upload.zip"))
            .await;

        assert!(matches!(result, Err(StorageError::Io { .. })));
    }
}
