#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Message bus boundary for the dataset loader.
//!
//! Requests arrive as [`QueueMessage`] envelopes from a [`MessageSource`]
//! and results leave through a [`Topic`]. The transports here are
//! newline-delimited JSON over any async reader or writer, and JSON POSTs
//! to a webhook.

pub mod http;
pub mod jsonl;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod message;
pub mod subscribe;

use async_trait::async_trait;

pub use message::QueueMessage;
pub use subscribe::{DEFAULT_MAX_CONCURRENT_MESSAGES, subscribe};

/// Envelope with an untyped payload, as carried on the wire.
pub type RawMessage = QueueMessage<serde_json::Value>;

/// Errors that can occur while receiving or publishing messages.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// A message could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Reading or writing the transport failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The webhook answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Webhook URL.
        url: String,
        /// Response status code.
        status: u16,
    },
}

/// Publishes messages to one destination.
#[async_trait]
pub trait Topic: Send + Sync {
    /// Publishes one message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the message could not be delivered.
    async fn publish(&self, message: &RawMessage) -> Result<(), QueueError>;
}

/// Yields inbound messages one at a time.
#[async_trait]
pub trait MessageSource: Send {
    /// Waits for the next message. Returns `None` once the source is
    /// exhausted. A malformed message yields `Some(Err(_))` and the source
    /// stays usable.
    async fn next_message(&mut self) -> Option<Result<RawMessage, QueueError>>;
}
