use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Transaction;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Normal,
    Retry,
}

impl DeliveryMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Retry => "retry",
        }
    }
}

impl std::str::FromStr for DeliveryMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "retry" => Ok(Self::Retry),
            other => Err(format!("unknown delivery mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventToDeliverRow {
    pub id: Uuid,
    pub feed_key: String,
    pub topic: String,
    pub topic_hash: String,
    pub payload: Vec<u8>,
    pub content_type: String,
    pub last_callback: Option<String>,
    pub failed_callbacks: Value,
    pub delivery_mode: String,
    pub retry_attempts: i32,
    pub last_modified: DateTime<Utc>,
    pub totally_failed: bool,
    pub max_failures: i32,
}

/// One entry of `failed_callbacks`: the Subscription key alongside its
/// `callback_hash`, the latter being the sort/iteration order §9 requires
/// ("sorted failed-callback list for wrap detection... maintained sorted by
/// callback_hash on every update so the `last_callback` sentinel uniquely
/// identifies a wrap").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedCallback {
    pub key: String,
    pub callback_hash: String,
}

pub fn sort_failed_callbacks(list: &mut Vec<FailedCallback>) {
    list.sort_by(|a, b| a.callback_hash.cmp(&b.callback_hash));
    list.dedup_by(|a, b| a.key == b.key);
}

impl EventToDeliverRow {
    pub fn delivery_mode(&self) -> DeliveryMode {
        self.delivery_mode.parse().expect("valid delivery_mode in db")
    }

    pub fn failed_callback_list(&self) -> Vec<FailedCallback> {
        serde_json::from_value(self.failed_callbacks.clone()).unwrap_or_default()
    }
}

/// §4.7 step 6: written in the same transaction as the new `FeedEntryRecord`
/// rows, after the diff produced at least one new/changed entry.
pub async fn insert_in_tx(
    tx: &mut Transaction<'static, Postgres>,
    feed_key: &str,
    topic: &str,
    topic_hash: &str,
    payload: &[u8],
    content_type: &str,
    max_failures: i32,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO event_to_deliver
            (id, feed_key, topic, topic_hash, payload, content_type, max_failures)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
    "#,
    )
    .bind(id)
    .bind(feed_key)
    .bind(topic)
    .bind(topic_hash)
    .bind(payload)
    .bind(content_type)
    .bind(max_failures)
    .execute(&mut **tx)
    .await?;
    Ok(id)
}

pub async fn get(
    pool: &PgPool,
    id: Uuid,
) -> Result<Option<EventToDeliverRow>, sqlx::Error> {
    sqlx::query_as::<_, EventToDeliverRow>("SELECT * FROM event_to_deliver WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// §4.8 pusher: advance the `last_callback` cursor for the next chunk of a
/// normal-mode delivery still in progress.
pub async fn advance_cursor(
    pool: &PgPool,
    id: Uuid,
    last_callback: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE event_to_deliver SET last_callback = $2 WHERE id = $1")
        .bind(id)
        .bind(last_callback)
        .execute(pool)
        .await?;
    Ok(())
}

/// §4.8 normal mode exhausted its subscriber page without finishing: switch
/// to `retry` mode carrying the chunk of callbacks that failed, dropping the
/// cursor since retry mode walks `failed_callbacks` directly. The normal
/// pass's failure is itself attempt 1 of the `max_failures` budget (ground
/// truth: `hub/main.py`'s `retry_attempts += 1` on the normal-completion
/// path too), so this starts `retry_attempts` at 1, not 0.
pub async fn switch_to_retry(
    pool: &PgPool,
    id: Uuid,
    failed_callbacks: &[FailedCallback],
) -> Result<(), sqlx::Error> {
    let payload = serde_json::to_value(failed_callbacks).unwrap_or_else(|_| Value::Array(vec![]));
    sqlx::query(
        r#"
        UPDATE event_to_deliver
        SET delivery_mode = 'retry', failed_callbacks = $2, last_callback = NULL, retry_attempts = 1
        WHERE id = $1
    "#,
    )
    .bind(id)
    .bind(payload)
    .execute(pool)
    .await?;
    Ok(())
}

/// §4.8 retry mode, `more=true`: persist this round's progress (the shrunk
/// failed list and the wrap-detection cursor) without bumping
/// `retry_attempts` — another chunk of the same attempt follows immediately.
pub async fn persist_retry_progress(
    pool: &PgPool,
    id: Uuid,
    failed_callbacks: &[FailedCallback],
    last_callback: Option<&str>,
) -> Result<(), sqlx::Error> {
    let payload = serde_json::to_value(failed_callbacks).unwrap_or_else(|_| Value::Array(vec![]));
    sqlx::query("UPDATE event_to_deliver SET failed_callbacks = $2, last_callback = $3 WHERE id = $1")
        .bind(id)
        .bind(payload)
        .bind(last_callback)
        .execute(pool)
        .await?;
    Ok(())
}

/// §4.8 retry mode: bump the attempt counter, replace the still-failing
/// subset of callbacks, and mark `totally_failed` once `max_failures` is hit.
pub async fn record_retry_outcome(
    pool: &PgPool,
    id: Uuid,
    still_failing: &[FailedCallback],
    totally_failed: bool,
) -> Result<(), sqlx::Error> {
    let payload = serde_json::to_value(still_failing).unwrap_or_else(|_| Value::Array(vec![]));
    sqlx::query(
        r#"
        UPDATE event_to_deliver
        SET failed_callbacks = $2, retry_attempts = retry_attempts + 1, totally_failed = $3
        WHERE id = $1
    "#,
    )
    .bind(id)
    .bind(payload)
    .bind(totally_failed)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn delete(
    pool: &PgPool,
    id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM event_to_deliver WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Diagnostics surface (§9 supplemented): events stuck in `retry` mode with
/// `totally_failed = true`, most recent first.
pub async fn list_totally_failed(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<EventToDeliverRow>, sqlx::Error> {
    sqlx::query_as::<_, EventToDeliverRow>(
        "SELECT * FROM event_to_deliver WHERE totally_failed = true ORDER BY last_modified DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
