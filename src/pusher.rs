//! §4.8 Event Deliverer: `normal -> retry -> terminal (deleted | totally_failed)`.

use chrono::Utc;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::dispatch::backoff_eta;
use crate::dispatch::Queue;
use crate::dispatch::TaskDispatcher;
use crate::scoring::FailureScorer;
use crate::store::event;
use crate::store::event::DeliveryMode;
use crate::store::event::EventToDeliverRow;
use crate::store::event::FailedCallback;
use crate::store::subscription;
use crate::store::subscription::SubscriptionRow;
use crate::utils::sha1_hmac_hex;

pub struct PusherConfig {
    pub event_subscriber_chunk_size: i64,
    pub max_delivery_failures: i32,
    pub retry_backoff_base_seconds: i64,
    pub delivery_deadline_seconds: u64,
}

pub struct EventDeliverer {
    pool: sqlx::PgPool,
    dispatcher: TaskDispatcher,
    http_client: Client,
    delivery_scorer: Arc<FailureScorer>,
    config: PusherConfig,
}

struct Target {
    key: String,
    callback: String,
    callback_hash: String,
    secret: Option<String>,
    verify_token: String,
}

impl Target {
    fn from_subscription(row: SubscriptionRow) -> Self {
        Self { key: row.key, callback: row.callback, callback_hash: row.callback_hash, secret: row.secret, verify_token: row.verify_token }
    }

    fn signing_secret(&self) -> &str {
        self.secret.as_deref().filter(|s| !s.is_empty()).unwrap_or(&self.verify_token)
    }

    fn as_failed_callback(&self) -> FailedCallback {
        FailedCallback { key: self.key.clone(), callback_hash: self.callback_hash.clone() }
    }
}

impl EventDeliverer {
    pub fn new(
        pool: sqlx::PgPool,
        dispatcher: TaskDispatcher,
        delivery_scorer: Arc<FailureScorer>,
        config: PusherConfig,
    ) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder().timeout(Duration::from_secs(config.delivery_deadline_seconds)).build()?;
        Ok(Self { pool, dispatcher, http_client, delivery_scorer, config })
    }

    #[tracing::instrument(skip(self))]
    pub async fn deliver_one(
        &self,
        event_id: Uuid,
    ) -> Result<(), anyhow::Error> {
        let Some(row) = event::get(&self.pool, event_id).await? else {
            return Ok(());
        };

        let (targets, more, remaining_after_round) = match row.delivery_mode() {
            DeliveryMode::Normal => self.load_normal_chunk(&row).await?,
            DeliveryMode::Retry => self.load_retry_chunk(&row).await?,
        };

        let keys: Vec<String> = targets.iter().map(|t| t.callback.clone()).collect();
        let decisions = self.delivery_scorer.filter(&keys);
        let mut kept = Vec::new();
        for (target, (allow, _)) in targets.into_iter().zip(decisions) {
            if allow {
                kept.push(target);
            } else {
                tracing::info!(callback = %target.callback, "delivery scorer denied callback, dropping permanently");
            }
        }
        let targets = kept;

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let mut failed_callback_urls = Vec::new();
        for target in &targets {
            if self.deliver_to(target, &row).await {
                succeeded.push(target.callback.clone());
            } else {
                failed.push(target.as_failed_callback());
                failed_callback_urls.push(target.callback.clone());
            }
        }

        self.delivery_scorer.report(&succeeded, &failed_callback_urls);

        // §9: "sorted failed-callback list for wrap detection... maintained
        // sorted by callback_hash on every update" — the cursor both modes
        // persist (normal's `last_callback` and retry's wrap sentinel) is
        // always the last processed row's callback_hash.
        let cursor = targets.last().map(|t| t.callback_hash.clone());

        let mut new_failed = remaining_after_round;
        new_failed.extend(failed);
        event::sort_failed_callbacks(&mut new_failed);

        self.apply_outcome(&row, more, new_failed, cursor).await
    }

    async fn load_normal_chunk(
        &self,
        row: &EventToDeliverRow,
    ) -> Result<(Vec<Target>, bool, Vec<FailedCallback>), anyhow::Error> {
        let chunk = self.config.event_subscriber_chunk_size;
        let subs = subscription::get_subscribers(&self.pool, &row.topic, chunk + 1, row.last_callback.as_deref()).await?;
        let more = subs.len() as i64 > chunk;
        let active: Vec<SubscriptionRow> = subs.into_iter().take(chunk as usize).collect();
        if let Some(last) = active.last() {
            event::advance_cursor(&self.pool, row.id, &last.callback_hash).await?;
        }
        let targets = active.into_iter().map(Target::from_subscription).collect();
        Ok((targets, more, Vec::new()))
    }

    async fn load_retry_chunk(
        &self,
        row: &EventToDeliverRow,
    ) -> Result<(Vec<Target>, bool, Vec<FailedCallback>), anyhow::Error> {
        let chunk = self.config.event_subscriber_chunk_size as usize;
        let mut failed = row.failed_callback_list();
        event::sort_failed_callbacks(&mut failed);

        let mut candidates: Vec<FailedCallback> = failed.iter().take(chunk).cloned().collect();
        let mut more = failed.len() > candidates.len();

        // Wrap detection: if this chunk runs back into the sentinel left by
        // the previous round, this attempt has stalled — stop short instead
        // of looping forever over the same unreachable callbacks.
        if let Some(last_callback_hash) = &row.last_callback {
            if let Some(pos) = candidates.iter().position(|c| &c.callback_hash == last_callback_hash) {
                candidates.truncate(pos);
                more = false;
            }
        }

        let candidate_keys: std::collections::HashSet<&str> = candidates.iter().map(|c| c.key.as_str()).collect();
        let untouched: Vec<FailedCallback> = failed.into_iter().filter(|c| !candidate_keys.contains(c.key.as_str())).collect();

        let mut targets = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            if let Some(sub) = subscription::get_by_key(&self.pool, &candidate.key).await? {
                targets.push(Target::from_subscription(sub));
            }
        }

        Ok((targets, more, untouched))
    }

    async fn deliver_to(
        &self,
        target: &Target,
        row: &EventToDeliverRow,
    ) -> bool {
        let signature = sha1_hmac_hex(target.signing_secret().as_bytes(), &row.payload);
        let result = self
            .http_client
            .post(&target.callback)
            .header("Content-Type", row.content_type.clone())
            .header("X-Hub-Signature", format!("sha1={signature}"))
            .body(row.payload.clone())
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::info!(callback = %target.callback, error = %e, "delivery failed at transport level");
                false
            }
        }
    }

    async fn apply_outcome(
        &self,
        row: &EventToDeliverRow,
        more: bool,
        new_failed: Vec<FailedCallback>,
        cursor: Option<String>,
    ) -> Result<(), anyhow::Error> {
        if more {
            event::persist_retry_progress(&self.pool, row.id, &new_failed, cursor.as_deref()).await?;
            self.dispatcher.reschedule(Queue::EventDelivery, &row.id.to_string(), Utc::now(), serde_json::json!({ "event_id": row.id })).await?;
            return Ok(());
        }

        if new_failed.is_empty() {
            event::delete(&self.pool, row.id).await?;
            return Ok(());
        }

        match row.delivery_mode() {
            DeliveryMode::Normal => {
                event::switch_to_retry(&self.pool, row.id, &new_failed).await?;
                let eta = backoff_eta(self.config.retry_backoff_base_seconds, 0);
                self.dispatcher
                    .reschedule(Queue::EventDeliveryRetries, &row.id.to_string(), eta, serde_json::json!({ "event_id": row.id }))
                    .await?;
            }
            DeliveryMode::Retry => {
                let attempts = row.retry_attempts + 1;
                let totally_failed = attempts as u32 > self.config.max_delivery_failures as u32;
                event::record_retry_outcome(&self.pool, row.id, &new_failed, totally_failed).await?;
                if !totally_failed {
                    let eta = backoff_eta(self.config.retry_backoff_base_seconds, attempts as u32 - 1);
                    self.dispatcher
                        .reschedule(Queue::EventDeliveryRetries, &row.id.to_string(), eta, serde_json::json!({ "event_id": row.id }))
                        .await?;
                } else {
                    tracing::warn!(event_id = %row.id, "event delivery totally failed, retained for inspection");
                }
            }
        }
        Ok(())
    }
}
