//! Publishing load outcomes.

use std::sync::Arc;

use dataset_loader_load_models::{ExtractLoadRequest, ExtractLoadResponse};
use dataset_loader_queue::{QueueMessage, Topic};

/// Publishes one result message per load.
#[derive(Clone)]
pub struct ResultReporter {
    topic: Arc<dyn Topic>,
}

impl std::fmt::Debug for ResultReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultReporter").finish_non_exhaustive()
    }
}

impl ResultReporter {
    /// Creates a reporter that publishes to `topic`.
    #[must_use]
    pub fn new(topic: Arc<dyn Topic>) -> Self {
        Self { topic }
    }

    /// Publishes the outcome of `original`. The reply keeps the request's
    /// message id and type and echoes its `data_type` and
    /// `file_upload_path`. Publish failures are logged, never returned.
    pub async fn report(
        &self,
        original: &QueueMessage<ExtractLoadRequest>,
        success: bool,
        message: &str,
    ) {
        let reply = original.reply(ExtractLoadResponse {
            message: message.to_string(),
            success,
            data_type: original.data.data_type.clone(),
            file_upload_path: original.data.file_upload_path.clone(),
        });

        let raw = match reply.to_raw() {
            Ok(raw) => raw,
            Err(e) => {
                log::error!("Failed to encode result for {}: {e}", original.message_id);
                return;
            }
        };

        match self.topic.publish(&raw).await {
            Ok(()) => log::info!(
                "Published result for {} (success={success})",
                original.message_id
            ),
            Err(e) => log::error!(
                "Failed to publish result for {}: {e}",
                original.message_id
            ),
        }
    }
}
