//! Webhook topic: each message is POSTed as JSON.

use async_trait::async_trait;

use crate::{QueueError, RawMessage, Topic};

/// Publishes messages by POSTing them to a URL.
#[derive(Debug, Clone)]
pub struct HttpTopic {
    client: reqwest::Client,
    url: String,
}

impl HttpTopic {
    /// Creates a topic that posts to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Http`] if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>) -> Result<Self, QueueError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("dataset-loader/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Destination URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Topic for HttpTopic {
    async fn publish(&self, message: &RawMessage) -> Result<(), QueueError> {
        let response = self.client.post(&self.url).json(message).send().await?;

        if !response.status().is_success() {
            return Err(QueueError::HttpStatus {
                url: self.url.clone(),
                status: response.status().as_u16(),
            });
        }

        log::debug!("Published {} to {}", message.message_id, self.url);
        Ok(())
    }
}
