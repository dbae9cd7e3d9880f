//! §4.10 Polling Sweep: a singleton `PollingMarker` kicks off a self-chaining
//! task every `bootstrap_period_seconds` that pages through every
//! `KnownFeed` and synthesizes a durable publish ping for each.

use serde::Deserialize;
use serde::Serialize;
use std::sync::Arc;

use crate::dispatch::Queue;
use crate::dispatch::TaskDispatcher;
use crate::hooks::HookRegistry;
use crate::publish;
use crate::publish::PublishSource;
use crate::queue::ForkJoinQueue;
use crate::store::known_feed;
use crate::store::polling_marker;
use crate::utils::sha1_hex;

pub struct PollingConfig {
    pub bootstrap_period_seconds: i64,
    pub feed_chunk_size: i64,
    pub max_aliases: usize,
    pub dev_env: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PollingTaskPayload {
    pub sequence: String,
    pub current_key: Option<String>,
}

pub struct PollingSweeper {
    pool: sqlx::PgPool,
    dispatcher: TaskDispatcher,
    fork_join: Arc<ForkJoinQueue<String>>,
    hooks: Arc<HookRegistry>,
    config: PollingConfig,
}

impl PollingSweeper {
    pub fn new(
        pool: sqlx::PgPool,
        dispatcher: TaskDispatcher,
        fork_join: Arc<ForkJoinQueue<String>>,
        hooks: Arc<HookRegistry>,
        config: PollingConfig,
    ) -> Self {
        Self { pool, dispatcher, fork_join, hooks, config }
    }

    /// Checked on a short heartbeat (every few minutes); pushes `next_start`
    /// out and kicks off the page chain only if no other worker beat us to
    /// the claim this period.
    #[tracing::instrument(skip(self))]
    pub async fn maybe_start(&self) -> Result<(), anyhow::Error> {
        let marker = polling_marker::get(&self.pool).await?;
        let now = chrono::Utc::now();
        if marker.next_start >= now {
            return Ok(());
        }

        let new_next_start = now + chrono::Duration::seconds(self.config.bootstrap_period_seconds);
        let claimed = polling_marker::claim_sweep(&self.pool, marker.next_start, new_next_start).await?;
        if !claimed {
            tracing::debug!("another worker already claimed this polling cycle");
            return Ok(());
        }

        // Naming the task by the cycle's start time lets us enqueue the chain's
        // first task before any FeedToFetch rows exist; a crash between the
        // claim and the enqueue just means the next heartbeat retries the
        // enqueue against the same idempotent task name.
        let sequence = format!("poll-{}", marker.next_start.timestamp());
        tracing::info!(sequence = %sequence, "starting bootstrap polling cycle");
        self.dispatcher
            .enqueue(
                Queue::Polling,
                &sequence,
                now,
                PollingTaskPayload { sequence: sequence.clone(), current_key: None },
            )
            .await?;
        Ok(())
    }

    /// Handles one page of the chain: synthesize publish pings for this
    /// chunk of `KnownFeed`, then enqueue the next page (or stop at the end).
    #[tracing::instrument(skip(self, current_key), fields(sequence = %sequence))]
    pub async fn run_page(
        &self,
        sequence: &str,
        current_key: Option<String>,
    ) -> Result<(), anyhow::Error> {
        let feeds = known_feed::page(&self.pool, current_key.as_deref(), self.config.feed_chunk_size).await?;

        if feeds.is_empty() {
            tracing::info!("polling cycle complete");
            return Ok(());
        }

        let next_key = feeds.last().map(|f| f.key.clone()).expect("checked non-empty above");
        tracing::info!(found = feeds.len(), ended_at = %next_key, "found more feeds to poll");

        let continuation_name = format!("{sequence}-{}", sha1_hex(next_key.as_bytes()));
        self.dispatcher
            .enqueue(
                Queue::Polling,
                &continuation_name,
                chrono::Utc::now(),
                PollingTaskPayload { sequence: sequence.to_string(), current_key: Some(next_key) },
            )
            .await?;

        let topics: Vec<String> = feeds.into_iter().map(|f| f.topic).collect();
        publish::ingest_publish(
            &self.pool,
            &self.dispatcher,
            &self.fork_join,
            &self.hooks,
            &topics,
            self.config.dev_env,
            self.config.max_aliases,
            PublishSource::Polling,
        )
        .await?;

        Ok(())
    }
}
