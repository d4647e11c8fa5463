//! HTTP(S) backend. The response body is streamed, never buffered whole.

use async_trait::async_trait;
use futures::TryStreamExt as _;
use tokio_util::io::StreamReader;

use crate::{ByteReader, FileEntity, StorageError, file_name};

/// Fetches files with streaming HTTP GET requests.
#[derive(Debug, Clone)]
pub struct HttpStorage {
    client: reqwest::Client,
}

impl HttpStorage {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Http`] if the client cannot be built.
    pub fn new() -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dataset-loader/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    /// Sends the GET request and checks the status. The body is left
    /// unread until [`FileEntity::get_stream`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Http`] if the request fails, or
    /// [`StorageError::HttpStatus`] on a non-success status.
    pub async fn open(&self, url: &str) -> Result<Box<dyn FileEntity>, StorageError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(StorageError::HttpStatus {
                url: redact(url).to_string(),
                status: response.status().as_u16(),
            });
        }

        let path = redact(url);
        log::debug!(
            "Opened {path} ({} bytes)",
            response
                .content_length()
                .map_or_else(|| "unknown".to_string(), |n| n.to_string())
        );

        Ok(Box::new(HttpFile {
            name: file_name(path).to_string(),
            response,
        }))
    }
}

/// Drops the query string, which may carry a signature.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

struct HttpFile {
    name: String,
    response: reqwest::Response,
}

#[async_trait]
impl FileEntity for HttpFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> Option<u64> {
        self.response.content_length()
    }

    async fn get_stream(self: Box<Self>) -> Result<ByteReader, StorageError> {
        let stream = self
            .response
            .bytes_stream()
            .map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_signatures() {
        assert_eq!(
            redact("https://host/container/osw.zip?sv=2020&sig=secret"),
            "https://host/container/osw.zip"
        );
        assert_eq!(redact("https://host/osw.zip"), "https://host/osw.zip");
    }
}
