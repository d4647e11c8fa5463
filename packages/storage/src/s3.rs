//! S3 backend, also usable against S3-compatible endpoints.

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::config::{Credentials, StalledStreamProtectionConfig};

use crate::{ByteReader, FileEntity, StorageError, file_name};

/// Region used when `AWS_REGION` is unset.
const DEFAULT_REGION: &str = "us-east-1";

/// Client for reading dataset archives from S3.
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: aws_sdk_s3::Client,
}

impl S3Storage {
    /// Creates a new client from environment variables.
    ///
    /// Reads `AWS_ACCESS_KEY_ID` and `AWS_SECRET_ACCESS_KEY`, plus the
    /// optional `AWS_REGION` and `S3_ENDPOINT_URL`. A custom endpoint
    /// switches to path-style addressing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::MissingEnv`] if a required variable is unset.
    pub fn from_env() -> Result<Self, StorageError> {
        let access_key = require_env("AWS_ACCESS_KEY_ID")?;
        let secret_key = require_env("AWS_SECRET_ACCESS_KEY")?;
        let region = std::env::var("AWS_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string());
        let creds = Credentials::new(&access_key, &secret_key, None, None, "dataset-loader-env");

        let mut builder = aws_sdk_s3::Config::builder()
            .region(Region::new(region))
            .credentials_provider(creds)
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled());

        if let Ok(endpoint) = std::env::var("S3_ENDPOINT_URL") {
            log::info!("Using S3 endpoint {endpoint}");
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(builder.build()),
        })
    }

    /// Starts a `GetObject` request. The body is streamed by
    /// [`FileEntity::get_stream`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Download`] if the request fails.
    pub async fn open(&self, bucket: &str, key: &str) -> Result<Box<dyn FileEntity>, StorageError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::Download {
                bucket: bucket.to_string(),
                key: key.to_string(),
                source: Box::new(e),
            })?;

        let size = output.content_length().and_then(|n| u64::try_from(n).ok());
        log::debug!("Opened s3://{bucket}/{key} ({size:?} bytes)");

        Ok(Box::new(S3File {
            name: file_name(key).to_string(),
            size,
            body: output.body,
        }))
    }
}

fn require_env(name: &str) -> Result<String, StorageError> {
    std::env::var(name).map_err(|_| StorageError::MissingEnv {
        name: name.to_string(),
    })
}

struct S3File {
    name: String,
    size: Option<u64>,
    body: aws_sdk_s3::primitives::ByteStream,
}

#[async_trait]
impl FileEntity for S3File {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    async fn get_stream(self: Box<Self>) -> Result<ByteReader, StorageError> {
        Ok(Box::pin(self.body.into_async_read()))
    }
}
