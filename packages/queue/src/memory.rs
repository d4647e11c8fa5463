//! In-memory [`Topic`] for tests.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::{QueueError, RawMessage, Topic};

/// Records every published message. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryTopic {
    published: Arc<Mutex<Vec<RawMessage>>>,
    fail: bool,
}

impl MemoryTopic {
    /// Creates a topic that accepts every message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a topic that rejects every message.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Messages published so far, in order.
    #[must_use]
    pub fn published(&self) -> Vec<RawMessage> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Topic for MemoryTopic {
    async fn publish(&self, message: &RawMessage) -> Result<(), QueueError> {
        if self.fail {
            return Err(QueueError::Io(std::io::Error::other("topic unavailable")));
        }
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }
}
