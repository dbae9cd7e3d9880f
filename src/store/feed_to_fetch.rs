use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;

use crate::utils::entity_key;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedToFetchRow {
    pub key: String,
    pub topic: String,
    pub eta: DateTime<Utc>,
    pub fetching_failures: i32,
    pub totally_failed: bool,
    pub source_map: Value,
    pub work_index: i64,
}

pub fn feed_to_fetch_key(topic: &str) -> String { entity_key(topic) }

/// §4.5 publish ingester: one row per topic at a time (§3 invariant). A
/// publish of a topic already being fetched just refreshes `eta` to now, so
/// the in-flight fetch picks up the latest content.
pub async fn upsert(
    pool: &PgPool,
    topic: &str,
    source_map: &Value,
    work_index: i64,
) -> Result<FeedToFetchRow, sqlx::Error> {
    sqlx::query_as::<_, FeedToFetchRow>(
        r#"
        INSERT INTO feed_to_fetch (key, topic, eta, fetching_failures, totally_failed, source_map, work_index)
        VALUES ($1, $2, now(), 0, false, $3, $4)
        ON CONFLICT (key) DO UPDATE SET
            eta = now(),
            fetching_failures = 0,
            totally_failed = false,
            source_map = EXCLUDED.source_map,
            work_index = EXCLUDED.work_index
        RETURNING *
    "#,
    )
    .bind(feed_to_fetch_key(topic))
    .bind(topic)
    .bind(source_map)
    .bind(work_index)
    .fetch_one(pool)
    .await
}

pub async fn get(
    pool: &PgPool,
    topic: &str,
) -> Result<Option<FeedToFetchRow>, sqlx::Error> {
    sqlx::query_as::<_, FeedToFetchRow>("SELECT * FROM feed_to_fetch WHERE key = $1")
        .bind(feed_to_fetch_key(topic))
        .fetch_optional(pool)
        .await
}

/// §4.6 `fetch_failed`: bump the failure count; cap at `max_failures`.
pub async fn record_fetch_failure(
    pool: &PgPool,
    key: &str,
    eta: DateTime<Utc>,
    totally_failed: bool,
) -> Result<i32, sqlx::Error> {
    let row: (i32,) = sqlx::query_as(
        r#"
        UPDATE feed_to_fetch
        SET fetching_failures = fetching_failures + 1, eta = $2, totally_failed = $3
        WHERE key = $1
        RETURNING fetching_failures
    "#,
    )
    .bind(key)
    .bind(eta)
    .bind(totally_failed)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// §4.6 `done()`: delete iff the stored `eta` still equals the caller's
/// in-memory copy — guards against deleting a row a later publish re-created.
pub async fn delete_if_eta_unchanged(
    pool: &PgPool,
    key: &str,
    observed_eta: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM feed_to_fetch WHERE key = $1 AND eta = $2")
        .bind(key)
        .bind(observed_eta)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}
