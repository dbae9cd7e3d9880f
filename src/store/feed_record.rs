use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Transaction;

use crate::utils::entity_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Atom,
    Rss,
    Arbitrary,
}

impl FeedFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Atom => "atom",
            Self::Rss => "rss",
            Self::Arbitrary => "arbitrary",
        }
    }
}

impl std::str::FromStr for FeedFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "atom" => Ok(Self::Atom),
            "rss" => Ok(Self::Rss),
            "arbitrary" => Ok(Self::Arbitrary),
            other => Err(format!("unknown feed format: {other}")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FeedRecordRow {
    pub key: String,
    pub topic: String,
    pub header_footer: String,
    pub format: String,
    pub content_type: String,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl FeedRecordRow {
    pub fn format(&self) -> FeedFormat { self.format.parse().unwrap_or(FeedFormat::Arbitrary) }
}

pub fn feed_record_key(topic: &str) -> String { entity_key(topic) }

pub async fn get(
    pool: &PgPool,
    topic: &str,
) -> Result<Option<FeedRecordRow>, sqlx::Error> {
    sqlx::query_as::<_, FeedRecordRow>("SELECT * FROM feed_record WHERE key = $1")
        .bind(feed_record_key(topic))
        .fetch_optional(pool)
        .await
}

/// §4.7 step 5: written in the same transaction as new `FeedEntryRecord`s
/// and the `EventToDeliver`. Created lazily on first successful fetch.
pub async fn upsert_in_tx(
    tx: &mut Transaction<'static, Postgres>,
    topic: &str,
    header_footer: &str,
    format: FeedFormat,
    content_type: &str,
    last_modified: Option<&str>,
    etag: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO feed_record (key, topic, header_footer, format, content_type, last_modified, etag, last_updated)
        VALUES ($1, $2, $3, $4, $5, $6, $7, now())
        ON CONFLICT (key) DO UPDATE SET
            header_footer = EXCLUDED.header_footer,
            format = EXCLUDED.format,
            content_type = EXCLUDED.content_type,
            last_modified = EXCLUDED.last_modified,
            etag = EXCLUDED.etag,
            last_updated = now()
    "#,
    )
    .bind(feed_record_key(topic))
    .bind(topic)
    .bind(header_footer)
    .bind(format.as_str())
    .bind(content_type)
    .bind(last_modified)
    .bind(etag)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
