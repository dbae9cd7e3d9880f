use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;

use crate::utils::entity_key;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KnownFeedRow {
    pub key: String,
    pub topic: String,
    pub feed_id: Option<String>,
    pub update_time: DateTime<Utc>,
}

pub fn known_feed_key(topic: &str) -> String { entity_key(topic) }

/// §4.9 identity index: remember which feed identity (if any) last claimed
/// `topic`, so a later `remove` can tell whether it's still current.
pub async fn upsert(
    pool: &PgPool,
    topic: &str,
    feed_id: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO known_feed (key, topic, feed_id, update_time)
        VALUES ($1, $2, $3, now())
        ON CONFLICT (key) DO UPDATE SET feed_id = EXCLUDED.feed_id, update_time = now()
    "#,
    )
    .bind(known_feed_key(topic))
    .bind(topic)
    .bind(feed_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get(
    pool: &PgPool,
    topic: &str,
) -> Result<Option<KnownFeedRow>, sqlx::Error> {
    sqlx::query_as::<_, KnownFeedRow>("SELECT * FROM known_feed WHERE key = $1")
        .bind(known_feed_key(topic))
        .fetch_optional(pool)
        .await
}

pub async fn get_by_key(
    pool: &PgPool,
    key: &str,
) -> Result<Option<KnownFeedRow>, sqlx::Error> {
    sqlx::query_as::<_, KnownFeedRow>("SELECT * FROM known_feed WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
}

/// §4.10 bootstrap sweep: page through every `KnownFeed` ordered by key,
/// `after_key` being the last key seen by the previous chunk (`None` starts
/// from the beginning).
pub async fn page(
    pool: &PgPool,
    after_key: Option<&str>,
    limit: i64,
) -> Result<Vec<KnownFeedRow>, sqlx::Error> {
    sqlx::query_as::<_, KnownFeedRow>(
        r#"
        SELECT * FROM known_feed
        WHERE key > $1
        ORDER BY key
        LIMIT $2
    "#,
    )
    .bind(after_key.unwrap_or(""))
    .bind(limit)
    .fetch_all(pool)
    .await
}
