//! Subscription loop.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt as _;

use crate::{MessageSource, RawMessage};

/// Messages handled at once when `MAX_CONCURRENT_MESSAGES` is unset.
pub const DEFAULT_MAX_CONCURRENT_MESSAGES: usize = 2;

/// Drains `source`, running `handler` on up to `max_concurrent` messages at
/// a time. Receive errors are logged and skipped. Returns once the source
/// is exhausted and every handler has finished, with the number of messages
/// handled.
pub async fn subscribe<S, F, Fut>(source: S, max_concurrent: usize, handler: F) -> u64
where
    S: MessageSource,
    F: Fn(RawMessage) -> Fut,
    Fut: Future<Output = ()>,
{
    let messages = async_stream::stream! {
        let mut source = source;
        while let Some(item) = source.next_message().await {
            yield item;
        }
    };

    let handled = AtomicU64::new(0);
    let limit = max_concurrent.max(1);
    log::info!("Subscribed (max {limit} concurrent messages)");

    messages
        .for_each_concurrent(limit, |item| {
            let handler = &handler;
            let handled = &handled;
            async move {
                match item {
                    Ok(message) => {
                        log::info!(
                            "Received message {} ({})",
                            message.message_id,
                            message.message_type
                        );
                        handler(message).await;
                        handled.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => log::error!("Failed to receive message: {e}"),
                }
            }
        })
        .await;

    let handled = handled.into_inner();
    log::info!("Subscription ended after {handled} messages");
    handled
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use super::*;
    use crate::jsonl::JsonLinesSource;

    #[tokio::test]
    async fn bounds_concurrency_and_skips_bad_messages() {
        let input = (0..6)
            .map(|i| format!("{{\"messageId\":\"m{i}\",\"data\":{{}}}}\n"))
            .chain(std::iter::once("garbage\n".to_string()))
            .collect::<String>();
        let source = JsonLinesSource::new(input.as_bytes());

        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let handled = subscribe(source, 2, |_message| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(handled, 6);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }
}
