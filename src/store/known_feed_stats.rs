use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KnownFeedStatsRow {
    pub known_feed_key: String,
    pub subscriber_count: i64,
    pub update_time: DateTime<Utc>,
}

pub async fn get(
    pool: &PgPool,
    known_feed_key: &str,
) -> Result<Option<KnownFeedStatsRow>, sqlx::Error> {
    sqlx::query_as::<_, KnownFeedStatsRow>(
        "SELECT * FROM known_feed_stats WHERE known_feed_key = $1",
    )
    .bind(known_feed_key)
    .fetch_optional(pool)
    .await
}

/// Diagnostics surface (§9 supplemented): subscriber-count snapshot, cheap to
/// serve since it avoids counting live `subscriptions` rows on every request.
pub async fn set_subscriber_count(
    pool: &PgPool,
    known_feed_key: &str,
    subscriber_count: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO known_feed_stats (known_feed_key, subscriber_count, update_time)
        VALUES ($1, $2, now())
        ON CONFLICT (known_feed_key) DO UPDATE SET
            subscriber_count = EXCLUDED.subscriber_count,
            update_time = now()
    "#,
    )
    .bind(known_feed_key)
    .bind(subscriber_count)
    .execute(pool)
    .await?;
    Ok(())
}
