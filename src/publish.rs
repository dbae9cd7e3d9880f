//! §4.5 Publish Ingester.

use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::Queue;
use crate::dispatch::TaskDispatcher;
use crate::domain::TopicUrl;
use crate::hooks::HookRegistry;
use crate::identity;
use crate::queue::ForkJoinQueue;
use crate::store::feed_to_fetch;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("invalid publish request: {0}")]
    Validation(String),
    #[error(transparent)]
    Transient(#[from] anyhow::Error),
}

/// Distinguishes a publisher-triggered ping from the §4.10 bootstrap sweep,
/// which routes its synthesized pings to the `polling` queue instead of
/// `feed-pulls` so polling work cannot starve real publish traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishSource {
    Publish,
    Polling,
}

impl PublishSource {
    fn fetch_queue(self) -> Queue {
        match self {
            Self::Publish => Queue::FeedPulls,
            Self::Polling => Queue::Polling,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct DrainBatchPayload {
    index: u64,
}

/// Validates and expands `raw_urls`, inserting one `FeedToFetch` per
/// surviving topic and scheduling a drain of the batch it lands in.
/// Returns the number of topics actually enqueued (0 is a valid success —
/// every URL aliased to a topic no one subscribes to).
#[tracing::instrument(skip(pool, dispatcher, fork_join, hooks), fields(source = ?source))]
pub async fn ingest_publish(
    pool: &PgPool,
    dispatcher: &TaskDispatcher,
    fork_join: &Arc<ForkJoinQueue<String>>,
    hooks: &HookRegistry,
    raw_urls: &[String],
    dev_env: bool,
    max_aliases: usize,
    source: PublishSource,
) -> Result<usize, PublishError> {
    if raw_urls.is_empty() {
        return Err(PublishError::Validation("missing hub.url".to_string()));
    }

    let raw_urls = hooks.preprocess_urls(raw_urls.to_vec());

    let mut topics = Vec::with_capacity(raw_urls.len());
    for raw in &raw_urls {
        let topic = TopicUrl::parse(raw, dev_env).map_err(PublishError::Validation)?;
        topics.push(topic.as_ref().to_string());
    }

    let expanded = identity::derive_additional_topics(pool, &topics, max_aliases)
        .await
        .map_err(|e| PublishError::Transient(e.into()))?;

    let mut surviving: Vec<String> = expanded.into_values().flatten().collect();
    surviving.sort();
    surviving.dedup();

    let mut enqueued = 0usize;
    for topic in surviving {
        let index = fork_join.next_index();
        feed_to_fetch::upsert(pool, &topic, &json!({}), index as i64)
            .await
            .map_err(|e| PublishError::Transient(e.into()))?;
        fork_join.put(index, vec![topic]).await;

        dispatcher
            .reschedule(
                source.fetch_queue(),
                &format!("drain-{}-{index}", source.fetch_queue().as_str()),
                Utc::now() + chrono::Duration::milliseconds(0),
                DrainBatchPayload { index },
            )
            .await
            .map_err(PublishError::Transient)?;
        enqueued += 1;
    }

    Ok(enqueued)
}

pub const TRANSIENT_RETRY_AFTER: Duration = Duration::from_secs(120);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_queue_routes_by_source() {
        assert_eq!(PublishSource::Publish.fetch_queue().as_str(), "feed-pulls");
        assert_eq!(PublishSource::Polling.fetch_queue().as_str(), "polling");
    }
}
