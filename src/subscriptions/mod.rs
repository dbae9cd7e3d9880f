//! §4.4 Subscription Manager.

pub mod cleanup;
pub mod verification;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use sqlx::PgPool;

use crate::dispatch::backoff_eta;
use crate::dispatch::Queue;
use crate::dispatch::TaskDispatcher;
use crate::domain::CallbackUrl;
use crate::domain::Challenge;
use crate::domain::HubMode;
use crate::domain::TopicUrl;
use crate::domain::VerifyToken;
use crate::identity::MappingsTaskPayload;
use crate::store::subscription;
use crate::store::subscription::SubscriptionState;
use crate::utils::entity_key;

#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyTaskPayload {
    pub callback: String,
    pub topic: String,
    pub mode: String,
    pub verify_token: String,
    pub secret: Option<String>,
    pub lease_seconds: i64,
    pub hash_algo: String,
}

pub struct SubscriptionManager {
    pool: PgPool,
    dispatcher: TaskDispatcher,
    verify_client: Client,
    max_confirm_failures: u32,
    retry_backoff_base_seconds: i64,
}

impl SubscriptionManager {
    pub fn new(
        pool: PgPool,
        dispatcher: TaskDispatcher,
        verify_client: Client,
        max_confirm_failures: u32,
        retry_backoff_base_seconds: i64,
    ) -> Self {
        Self { pool, dispatcher, verify_client, max_confirm_failures, retry_backoff_base_seconds }
    }

    /// §4.4 `insert`: synchronous subscribe path — the caller has already
    /// performed (or is about to perform) the handshake itself; this commits
    /// straight to `verified`. Also enqueues the §4.9 mappings job for this
    /// topic, since a fresh subscriber is exactly when the hub most needs to
    /// know the feed's identity.
    pub async fn insert(
        &self,
        callback: &CallbackUrl,
        topic: &TopicUrl,
        verify_token: &VerifyToken,
        secret: Option<&str>,
        lease_seconds: i64,
        hash_algo: &str,
    ) -> Result<bool, anyhow::Error> {
        let created = subscription::upsert_verified(
            &self.pool,
            callback.as_ref(),
            topic.as_ref(),
            verify_token.as_ref(),
            secret,
            lease_seconds,
            hash_algo,
        )
        .await?;
        self.dispatcher
            .enqueue(
                Queue::Mappings,
                &format!("mappings:{}", entity_key(topic.as_ref())),
                Utc::now(),
                MappingsTaskPayload { topic: topic.as_ref().to_string() },
            )
            .await?;
        Ok(created)
    }

    /// Creates (or refreshes) the `not_verified` row backing a pending
    /// subscribe before a handshake runs, whether that handshake happens
    /// inline (sync `/subscribe`) or from a queued task (async). Without
    /// this, `confirm_failed` has no row to bump on a first-attempt failure.
    pub async fn ensure_pending(
        &self,
        callback: &CallbackUrl,
        topic: &TopicUrl,
        verify_token: &VerifyToken,
        secret: Option<&str>,
        lease_seconds: i64,
        hash_algo: &str,
    ) -> Result<(), anyhow::Error> {
        subscription::upsert_not_verified(
            &self.pool,
            callback.as_ref(),
            topic.as_ref(),
            verify_token.as_ref(),
            secret,
            lease_seconds,
            hash_algo,
        )
        .await?;
        Ok(())
    }

    /// §4.4 `request_insert`: asynchronous subscribe path.
    pub async fn request_insert(
        &self,
        callback: &CallbackUrl,
        topic: &TopicUrl,
        verify_token: &VerifyToken,
        secret: Option<&str>,
        lease_seconds: i64,
        hash_algo: &str,
    ) -> Result<bool, anyhow::Error> {
        self.ensure_pending(callback, topic, verify_token, secret, lease_seconds, hash_algo).await?;
        self.enqueue_verify_task(callback, topic, HubMode::Subscribe, verify_token, secret, lease_seconds, hash_algo)
            .await?;
        Ok(true)
    }

    /// §4.4 `request_remove`: asynchronous unsubscribe path.
    pub async fn request_remove(
        &self,
        callback: &CallbackUrl,
        topic: &TopicUrl,
        verify_token: &VerifyToken,
    ) -> Result<bool, anyhow::Error> {
        let Some(row) = subscription::get(&self.pool, callback.as_ref(), topic.as_ref()).await? else {
            return Ok(false);
        };
        self.enqueue_verify_task(
            callback,
            topic,
            HubMode::Unsubscribe,
            verify_token,
            row.secret.as_deref(),
            row.lease_seconds,
            &row.hash_algo,
        )
        .await?;
        Ok(true)
    }

    pub async fn remove(
        &self,
        callback: &CallbackUrl,
        topic: &TopicUrl,
    ) -> Result<bool, sqlx::Error> {
        subscription::delete(&self.pool, callback.as_ref(), topic.as_ref()).await
    }

    pub async fn get(
        &self,
        callback: &CallbackUrl,
        topic: &TopicUrl,
    ) -> Result<Option<subscription::SubscriptionRow>, sqlx::Error> {
        subscription::get(&self.pool, callback.as_ref(), topic.as_ref()).await
    }

    /// §4.4 `archive`: used when a callback 404s a confirmation.
    pub async fn archive(
        &self,
        callback: &CallbackUrl,
        topic: &TopicUrl,
    ) -> Result<(), sqlx::Error> {
        let key = subscription::subscription_key(callback.as_ref(), topic.as_ref());
        subscription::set_state(&self.pool, &key, SubscriptionState::ToDelete).await
    }

    pub async fn has_subscribers(
        &self,
        topic: &TopicUrl,
    ) -> Result<bool, sqlx::Error> {
        subscription::has_subscribers(&self.pool, topic.as_ref()).await
    }

    pub async fn get_subscribers(
        &self,
        topic: &TopicUrl,
        limit: i64,
        starting_at_callback_hash: Option<&str>,
    ) -> Result<Vec<subscription::SubscriptionRow>, sqlx::Error> {
        subscription::get_subscribers(&self.pool, topic.as_ref(), limit, starting_at_callback_hash).await
    }

    /// §4.4 `confirm_failed`: backoff and re-enqueue, or give up (caller
    /// archives). Returns `true` if a retry was scheduled.
    pub async fn confirm_failed(
        &self,
        key: &str,
        callback: &CallbackUrl,
        topic: &TopicUrl,
        mode: HubMode,
        verify_token: &VerifyToken,
        secret: Option<&str>,
        lease_seconds: i64,
        hash_algo: &str,
    ) -> Result<bool, anyhow::Error> {
        let failures = subscription::record_confirm_failure(&self.pool, key, Utc::now()).await?;
        if failures as u32 > self.max_confirm_failures {
            return Ok(false);
        }
        let eta = backoff_eta(self.retry_backoff_base_seconds, failures as u32);
        let payload = VerifyTaskPayload {
            callback: callback.as_ref().to_string(),
            topic: topic.as_ref().to_string(),
            mode: mode.as_str().to_string(),
            verify_token: verify_token.as_ref().to_string(),
            secret: secret.map(str::to_string),
            lease_seconds,
            hash_algo: hash_algo.to_string(),
        };
        self.dispatcher
            .reschedule(Queue::Subscriptions, &format!("{key}:verify"), eta, payload)
            .await?;
        Ok(true)
    }

    async fn enqueue_verify_task(
        &self,
        callback: &CallbackUrl,
        topic: &TopicUrl,
        mode: HubMode,
        verify_token: &VerifyToken,
        secret: Option<&str>,
        lease_seconds: i64,
        hash_algo: &str,
    ) -> Result<(), anyhow::Error> {
        let key = subscription::subscription_key(callback.as_ref(), topic.as_ref());
        let payload = VerifyTaskPayload {
            callback: callback.as_ref().to_string(),
            topic: topic.as_ref().to_string(),
            mode: mode.as_str().to_string(),
            verify_token: verify_token.as_ref().to_string(),
            secret: secret.map(str::to_string),
            lease_seconds,
            hash_algo: hash_algo.to_string(),
        };
        self.dispatcher.enqueue(Queue::Subscriptions, &format!("{key}:verify"), Utc::now(), payload).await
    }

    /// Runs the HTTP side of one verification handshake (§4.4) only — no
    /// state mutation. Split out from `run_verification` so the synchronous
    /// `/subscribe` path can decide its response status from the outcome
    /// directly, instead of re-reading the row after mutating it.
    #[tracing::instrument(skip(self, payload))]
    pub async fn verify_once(
        &self,
        payload: &VerifyTaskPayload,
    ) -> Result<(HubMode, verification::VerificationOutcome), anyhow::Error> {
        let mode: HubMode = payload.mode.parse().map_err(anyhow::Error::msg)?;
        let callback = CallbackUrl::parse(&payload.callback, true).map_err(anyhow::Error::msg)?;
        let topic = TopicUrl::parse(&payload.topic, true).map_err(anyhow::Error::msg)?;
        let verify_token = VerifyToken::new(payload.verify_token.clone());
        let challenge = Challenge::generate();

        let outcome = verification::verify(
            &self.verify_client,
            &callback,
            mode,
            &topic,
            &challenge,
            payload.lease_seconds,
            &verify_token,
        )
        .await;
        Ok((mode, outcome))
    }

    /// Applies the state-machine transition for a verification outcome
    /// (§4.4): insert/archive/remove/confirm_failed.
    #[tracing::instrument(skip(self, payload))]
    pub async fn apply_verification_outcome(
        &self,
        payload: &VerifyTaskPayload,
        mode: HubMode,
        outcome: verification::VerificationOutcome,
    ) -> Result<(), anyhow::Error> {
        let callback = CallbackUrl::parse(&payload.callback, true).map_err(anyhow::Error::msg)?;
        let topic = TopicUrl::parse(&payload.topic, true).map_err(anyhow::Error::msg)?;
        let verify_token = VerifyToken::new(payload.verify_token.clone());

        let key = subscription::subscription_key(&payload.callback, &payload.topic);
        match (mode, outcome) {
            (HubMode::Subscribe, verification::VerificationOutcome::Verified) => {
                self.insert(
                    &callback,
                    &topic,
                    &verify_token,
                    payload.secret.as_deref(),
                    payload.lease_seconds,
                    &payload.hash_algo,
                )
                .await?;
            }
            (HubMode::Subscribe, verification::VerificationOutcome::NotFound) => {
                self.archive(&callback, &topic).await?;
            }
            (HubMode::Unsubscribe, verification::VerificationOutcome::Verified) => {
                self.remove(&callback, &topic).await?;
            }
            (HubMode::Unsubscribe, verification::VerificationOutcome::NotFound) => {
                self.remove(&callback, &topic).await?;
            }
            (_, verification::VerificationOutcome::Failed) => {
                let retried = self
                    .confirm_failed(
                        &key,
                        &callback,
                        &topic,
                        mode,
                        &verify_token,
                        payload.secret.as_deref(),
                        payload.lease_seconds,
                        &payload.hash_algo,
                    )
                    .await?;
                if !retried {
                    self.archive(&callback, &topic).await?;
                }
            }
        }
        Ok(())
    }

    /// Runs one verification handshake end to end (§4.4); called by the
    /// `subscriptions` worker after it claims a queued verify task.
    pub async fn run_verification(
        &self,
        payload: &VerifyTaskPayload,
    ) -> Result<(), anyhow::Error> {
        let (mode, outcome) = self.verify_once(payload).await?;
        self.apply_verification_outcome(payload, mode, outcome).await
    }

    pub fn pool(&self) -> &PgPool { &self.pool }
}
