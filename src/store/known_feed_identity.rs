use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct KnownFeedIdentityRow {
    pub feed_id: String,
    pub topics: Value,
    pub last_update: DateTime<Utc>,
}

impl KnownFeedIdentityRow {
    pub fn topic_list(&self) -> Vec<String> {
        serde_json::from_value(self.topics.clone()).unwrap_or_default()
    }
}

pub async fn get(
    pool: &PgPool,
    feed_id: &str,
) -> Result<Option<KnownFeedIdentityRow>, sqlx::Error> {
    sqlx::query_as::<_, KnownFeedIdentityRow>("SELECT * FROM known_feed_identity WHERE feed_id = $1")
        .bind(feed_id)
        .fetch_optional(pool)
        .await
}

/// §4.9 `update`: add `topic` to the identity's topic set, deriving the
/// feed's other aliases. Idempotent if `topic` is already a member.
pub async fn add_topic(
    pool: &PgPool,
    feed_id: &str,
    topic: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let existing = get(pool, feed_id).await?;
    let mut topics = existing.as_ref().map(KnownFeedIdentityRow::topic_list).unwrap_or_default();
    if !topics.iter().any(|t| t == topic) {
        topics.push(topic.to_string());
    }
    let payload = serde_json::to_value(&topics).unwrap_or(Value::Array(vec![]));
    sqlx::query(
        r#"
        INSERT INTO known_feed_identity (feed_id, topics, last_update)
        VALUES ($1, $2, now())
        ON CONFLICT (feed_id) DO UPDATE SET topics = $2, last_update = now()
    "#,
    )
    .bind(feed_id)
    .bind(&payload)
    .execute(pool)
    .await?;
    Ok(topics)
}

/// §4.9 `remove`: drop `topic` from the identity's topic set. Deletes the
/// identity row entirely once its topic set is empty.
pub async fn remove_topic(
    pool: &PgPool,
    feed_id: &str,
    topic: &str,
) -> Result<Vec<String>, sqlx::Error> {
    let Some(existing) = get(pool, feed_id).await? else {
        return Ok(Vec::new());
    };
    let topics: Vec<String> = existing.topic_list().into_iter().filter(|t| t != topic).collect();
    if topics.is_empty() {
        sqlx::query("DELETE FROM known_feed_identity WHERE feed_id = $1")
            .bind(feed_id)
            .execute(pool)
            .await?;
    } else {
        let payload = serde_json::to_value(&topics).unwrap_or(Value::Array(vec![]));
        sqlx::query("UPDATE known_feed_identity SET topics = $2, last_update = now() WHERE feed_id = $1")
            .bind(feed_id)
            .bind(&payload)
            .execute(pool)
            .await?;
    }
    Ok(topics)
}
