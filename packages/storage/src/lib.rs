#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Object storage access for dataset archives.
//!
//! A [`StorageClient`] resolves an upload path to a [`FileEntity`], whose
//! contents are then read as a forward-only async byte stream. The concrete
//! backend is picked from the URL scheme by [`UrlStorageClient`].
//!
//! # Environment Variables
//!
//! | Variable | Required | Description |
//! |---|---|---|
//! | `AWS_ACCESS_KEY_ID` | For `s3://` | S3 access key; enables the S3 backend |
//! | `AWS_SECRET_ACCESS_KEY` | For `s3://` | S3 secret key |
//! | `AWS_REGION` | No | Region (default `us-east-1`) |
//! | `S3_ENDPOINT_URL` | No | S3-compatible endpoint (`MinIO`, R2, ...) |

pub mod http;
pub mod local;
pub mod location;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod s3;

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use location::Location;

/// Forward-only byte stream over a stored file.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Errors that can occur while resolving or reading stored files.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The path is empty or uses a scheme no backend handles.
    #[error("Unsupported storage URL: {url:?}")]
    UnsupportedUrl {
        /// The offending URL.
        url: String,
    },

    /// An `s3://` URL was given but no S3 credentials are configured.
    #[error("S3 storage is not configured (set AWS_ACCESS_KEY_ID) for {url}")]
    S3NotConfigured {
        /// The requested URL.
        url: String,
    },

    /// Missing required environment variable.
    #[error("Missing environment variable: {name}")]
    MissingEnv {
        /// Name of the missing environment variable.
        name: String,
    },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// S3 `GetObject` failed.
    #[error("Failed to download s3://{bucket}/{key}: {source}")]
    Download {
        /// Bucket name.
        bucket: String,
        /// Object key.
        key: String,
        /// Underlying SDK error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// I/O error on a local file.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Local path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// A resolved file whose contents can be streamed once.
#[async_trait]
pub trait FileEntity: Send {
    /// File name (last path segment).
    fn name(&self) -> &str;

    /// Size in bytes, when the backend reports it.
    fn size(&self) -> Option<u64>;

    /// Consumes the entity and returns its contents as a byte stream.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the stream cannot be opened.
    async fn get_stream(self: Box<Self>) -> Result<ByteReader, StorageError>;
}

/// Resolves upload paths to files.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Locates the file at `url`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the URL is unsupported or the file
    /// cannot be reached.
    async fn get_file_from_url(&self, url: &str) -> Result<Box<dyn FileEntity>, StorageError>;
}

/// Returns the last `/`-separated segment of `path`.
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// [`StorageClient`] that dispatches on the URL scheme.
#[derive(Debug)]
pub struct UrlStorageClient {
    local: local::LocalStorage,
    http: http::HttpStorage,
    s3: Option<s3::S3Storage>,
}

impl UrlStorageClient {
    /// Creates a client with the local and HTTP backends, plus S3 when
    /// given.
    #[must_use]
    pub fn new(http: http::HttpStorage, s3: Option<s3::S3Storage>) -> Self {
        Self {
            local: local::LocalStorage,
            http,
            s3,
        }
    }

    /// Creates a client from the environment. The S3 backend is enabled
    /// only when `AWS_ACCESS_KEY_ID` is set.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the HTTP client cannot be built or the
    /// S3 variables are incomplete.
    pub fn from_env() -> Result<Self, StorageError> {
        let s3 = if std::env::var("AWS_ACCESS_KEY_ID").is_ok() {
            Some(s3::S3Storage::from_env()?)
        } else {
            log::debug!("AWS_ACCESS_KEY_ID not set; s3:// URLs are disabled");
            None
        };

        Ok(Self::new(http::HttpStorage::new()?, s3))
    }
}

#[async_trait]
impl StorageClient for UrlStorageClient {
    async fn get_file_from_url(&self, url: &str) -> Result<Box<dyn FileEntity>, StorageError> {
        match Location::parse(url)? {
            Location::Local(path) => self.local.open(&path).await,
            Location::Http(target) => self.http.open(&target).await,
            Location::S3 { bucket, key } => match &self.s3 {
                Some(s3) => s3.open(&bucket, &key).await,
                None => Err(StorageError::S3NotConfigured {
                    url: url.to_string(),
                }),
            },
        }
    }
}
