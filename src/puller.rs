//! §4.6 Feed Puller.

use chrono::Utc;
use reqwest::Client;
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

use crate::dispatch::backoff_eta;
use crate::dispatch::Queue;
use crate::dispatch::TaskDispatcher;
use crate::event_builder;
use crate::event_builder::EventBuilderConfig;
use crate::scoring::FailureScorer;
use crate::store::feed_record;
use crate::store::feed_to_fetch;
use crate::store::feed_to_fetch::FeedToFetchRow;
use crate::store::known_feed;
use crate::store::known_feed_stats;
use crate::store::subscription;

pub struct PullerConfig {
    pub fetch_deadline_seconds: u64,
    pub max_redirects: u32,
    pub max_feed_pull_failures: u32,
    pub retry_backoff_base_seconds: i64,
    pub event_builder: EventBuilderConfig,
}

pub struct FeedPuller {
    pool: sqlx::PgPool,
    dispatcher: TaskDispatcher,
    http_client: Client,
    fetch_scorer: Arc<FailureScorer>,
    config: PullerConfig,
}

struct FetchedBody {
    body: String,
    content_type: Option<String>,
    last_modified: Option<String>,
    etag: Option<String>,
}

enum FetchStep {
    Built(FetchedBody),
    NotModified,
    Failed,
}

impl FeedPuller {
    pub fn new(
        pool: sqlx::PgPool,
        dispatcher: TaskDispatcher,
        fetch_scorer: Arc<FailureScorer>,
        config: PullerConfig,
    ) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(Duration::from_secs(config.fetch_deadline_seconds))
            .build()?;
        Ok(Self { pool, dispatcher, http_client, fetch_scorer, config })
    }

    /// §4.6 steps 1-6. Processes one `FeedToFetch` row to completion.
    #[tracing::instrument(skip(self, row), fields(topic = %row.topic))]
    pub async fn pull_one(
        &self,
        row: &FeedToFetchRow,
    ) -> Result<(), anyhow::Error> {
        let topic = row.topic.clone();

        let allowed = self.fetch_scorer.filter(std::slice::from_ref(&topic))[0].0;
        if !allowed {
            tracing::info!("fetch scorer denied topic, dropping without reporting");
            self.done(row).await?;
            return Ok(());
        }

        if !subscription::has_subscribers(&self.pool, &topic).await? {
            tracing::debug!("topic has no verified subscribers, dropping");
            self.done(row).await?;
            return Ok(());
        }

        let existing_record = feed_record::get(&self.pool, &topic).await?;
        let known_feed_key = known_feed::known_feed_key(&topic);
        let stats = known_feed_stats::get(&self.pool, &known_feed_key).await?;
        let subscriber_count = stats.map(|s| s.subscriber_count).unwrap_or(0);
        let user_agent = format!("Public Hub (+http://hub.example/; {subscriber_count} subscribers)");

        let outcome = self.fetch_with_redirects(&topic, existing_record.as_ref(), &user_agent, 0).await;

        let success = matches!(outcome, FetchStep::Built(_) | FetchStep::NotModified);
        self.fetch_scorer.report(
            if success { std::slice::from_ref(&topic) } else { &[] },
            if success { &[] } else { std::slice::from_ref(&topic) },
        );

        match outcome {
            FetchStep::Built(fetched) => {
                let content_type = fetched.content_type.unwrap_or_else(|| {
                    existing_record.as_ref().map(|r| r.content_type.clone()).unwrap_or_else(|| "text/xml".to_string())
                });
                let result = event_builder::diff_and_commit(
                    &self.pool,
                    &topic,
                    existing_record.as_ref(),
                    &content_type,
                    fetched.last_modified.as_deref(),
                    fetched.etag.as_deref(),
                    &fetched.body,
                    &self.config.event_builder,
                )
                .await?;
                if let Some(event_id) = result.event_id {
                    self.dispatcher
                        .enqueue(Queue::EventDelivery, &event_id.to_string(), Utc::now(), serde_json::json!({ "event_id": event_id }))
                        .await?;
                }
                self.done(row).await?;
                if result.partial {
                    tracing::info!("feed had more changed entries than fit one event; re-enqueuing for next page");
                    feed_to_fetch::upsert(&self.pool, &topic, &row.source_map, row.work_index).await?;
                }
            }
            FetchStep::NotModified => {
                self.done(row).await?;
            }
            FetchStep::Failed => {
                self.fetch_failed(row).await?;
            }
        }

        Ok(())
    }

    async fn fetch_with_redirects(
        &self,
        url: &str,
        existing_record: Option<&feed_record::FeedRecordRow>,
        user_agent: &str,
        hop: u32,
    ) -> FetchStep {
        if hop > self.config.max_redirects {
            tracing::info!(hop, "exceeded max redirect hops");
            return FetchStep::Failed;
        }

        let mut request = self
            .http_client
            .get(url)
            .header("User-Agent", user_agent)
            .header("Cache-Control", "no-cache no-store max-age=1")
            .header("Accept", "*/*");
        if let Some(record) = existing_record {
            if let Some(last_modified) = &record.last_modified {
                request = request.header("If-Modified-Since", last_modified);
            }
            if let Some(etag) = &record.etag {
                request = request.header("If-None-Match", etag);
            }
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::info!(error = %e, "fetch failed at transport level");
                return FetchStep::Failed;
            }
        };

        match response.status() {
            StatusCode::OK => {
                let content_type =
                    response.headers().get("content-type").and_then(|v| v.to_str().ok()).map(str::to_string);
                let last_modified =
                    response.headers().get("last-modified").and_then(|v| v.to_str().ok()).map(str::to_string);
                let etag = response.headers().get("etag").and_then(|v| v.to_str().ok()).map(str::to_string);
                match response.text().await {
                    Ok(body) => FetchStep::Built(FetchedBody { body, content_type, last_modified, etag }),
                    Err(e) => {
                        tracing::info!(error = %e, "response body too large or unreadable");
                        FetchStep::Failed
                    }
                }
            }
            StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT => {
                let Some(location) = response.headers().get("location").and_then(|v| v.to_str().ok()) else {
                    return FetchStep::Failed;
                };
                let next = match url::Url::parse(url).and_then(|base| base.join(location)) {
                    Ok(u) => u.to_string(),
                    Err(_) => location.to_string(),
                };
                Box::pin(self.fetch_with_redirects(&next, existing_record, user_agent, hop + 1)).await
            }
            StatusCode::NOT_MODIFIED => FetchStep::NotModified,
            other => {
                tracing::info!(status = %other, "unexpected status from feed fetch");
                FetchStep::Failed
            }
        }
    }

    /// §4.6 `done()`: delete the row iff its stored `eta` still matches.
    async fn done(
        &self,
        row: &FeedToFetchRow,
    ) -> Result<(), anyhow::Error> {
        feed_to_fetch::delete_if_eta_unchanged(&self.pool, &row.key, row.eta).await?;
        Ok(())
    }

    /// §4.6 `fetch_failed()`: bump failures, cap at `max_feed_pull_failures`.
    async fn fetch_failed(
        &self,
        row: &FeedToFetchRow,
    ) -> Result<(), anyhow::Error> {
        let failures = row.fetching_failures as u32 + 1;
        let totally_failed = failures > self.config.max_feed_pull_failures;
        let eta = backoff_eta(self.config.retry_backoff_base_seconds, failures);
        feed_to_fetch::record_fetch_failure(&self.pool, &row.key, eta, totally_failed).await?;
        if !totally_failed {
            self.dispatcher
                .reschedule(Queue::FeedPullsRetries, &row.key, eta, serde_json::json!({ "topic": row.topic }))
                .await?;
        }
        Ok(())
    }
}
