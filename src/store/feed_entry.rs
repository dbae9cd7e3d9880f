use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Transaction;
use std::collections::HashMap;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedEntryRow {
    pub feed_key: String,
    pub entry_id: String,
    pub entry_content_hash: String,
    pub update_time: DateTime<Utc>,
}

/// §4.7 diff step: look up the last-seen content hash for each candidate
/// entry id, chunked per `chunk_size` (`HubSettings::max_feed_entry_record_lookups`)
/// so a single feed with thousands of entries doesn't blow past Postgres's
/// bind-parameter limit.
pub async fn get_hashes(
    pool: &PgPool,
    feed_key: &str,
    entry_ids: &[String],
    chunk_size: usize,
) -> Result<HashMap<String, String>, sqlx::Error> {
    let mut out = HashMap::with_capacity(entry_ids.len());
    for chunk in entry_ids.chunks(chunk_size.max(1)) {
        let rows = sqlx::query_as::<_, FeedEntryRow>(
            "SELECT * FROM feed_entry_record WHERE feed_key = $1 AND entry_id = ANY($2)",
        )
        .bind(feed_key)
        .bind(chunk)
        .fetch_all(pool)
        .await?;
        for row in rows {
            out.insert(row.entry_id, row.entry_content_hash);
        }
    }
    Ok(out)
}

pub async fn upsert_in_tx(
    tx: &mut Transaction<'static, Postgres>,
    feed_key: &str,
    entry_id: &str,
    content_hash: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO feed_entry_record (feed_key, entry_id, entry_content_hash, update_time)
        VALUES ($1, $2, $3, now())
        ON CONFLICT (feed_key, entry_id) DO UPDATE SET
            entry_content_hash = EXCLUDED.entry_content_hash,
            update_time = now()
    "#,
    )
    .bind(feed_key)
    .bind(entry_id)
    .bind(content_hash)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
