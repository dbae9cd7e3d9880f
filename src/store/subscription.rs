use chrono::DateTime;
use chrono::Duration as ChronoDuration;
use chrono::Utc;
use sqlx::PgPool;

use crate::utils::entity_key;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    NotVerified,
    Verified,
    ToDelete,
}

impl SubscriptionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotVerified => "not_verified",
            Self::Verified => "verified",
            Self::ToDelete => "to_delete",
        }
    }
}

impl std::str::FromStr for SubscriptionState {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_verified" => Ok(Self::NotVerified),
            "verified" => Ok(Self::Verified),
            "to_delete" => Ok(Self::ToDelete),
            other => Err(format!("unknown subscription state: {other}")),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRow {
    pub key: String,
    pub callback: String,
    pub topic: String,
    pub callback_hash: String,
    pub topic_hash: String,
    pub state: String,
    pub lease_seconds: i64,
    pub expiration_time: DateTime<Utc>,
    pub eta: DateTime<Utc>,
    pub confirm_failures: i32,
    pub verify_token: String,
    pub secret: Option<String>,
    pub hash_algo: String,
}

impl SubscriptionRow {
    pub fn state(&self) -> SubscriptionState { self.state.parse().expect("valid state in db") }
}

pub fn subscription_key(
    callback: &str,
    topic: &str,
) -> String {
    entity_key(&format!("{callback}\n{topic}"))
}

pub async fn get(
    pool: &PgPool,
    callback: &str,
    topic: &str,
) -> Result<Option<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions WHERE key = $1")
        .bind(subscription_key(callback, topic))
        .fetch_optional(pool)
        .await
}

/// §4.4 `insert`: create-or-update to `verified`, resetting
/// `confirm_failures` and `expiration_time = now + lease`.
pub async fn upsert_verified(
    pool: &PgPool,
    callback: &str,
    topic: &str,
    verify_token: &str,
    secret: Option<&str>,
    lease_seconds: i64,
    hash_algo: &str,
) -> Result<bool, sqlx::Error> {
    let key = subscription_key(callback, topic);
    let now = Utc::now();
    let expiration = now + ChronoDuration::seconds(lease_seconds);
    let result = sqlx::query(
        r#"
        INSERT INTO subscriptions
            (key, callback, topic, callback_hash, topic_hash, state, lease_seconds,
             expiration_time, eta, confirm_failures, verify_token, secret, hash_algo)
        VALUES ($1, $2, $3, $4, $5, 'verified', $6, $7, $7, 0, $8, $9, $10)
        ON CONFLICT (key) DO UPDATE SET
            state = 'verified',
            lease_seconds = EXCLUDED.lease_seconds,
            expiration_time = EXCLUDED.expiration_time,
            eta = EXCLUDED.eta,
            confirm_failures = 0,
            verify_token = EXCLUDED.verify_token,
            secret = EXCLUDED.secret,
            hash_algo = EXCLUDED.hash_algo
    "#,
    )
    .bind(&key)
    .bind(callback)
    .bind(topic)
    .bind(entity_key(callback))
    .bind(entity_key(topic))
    .bind(lease_seconds)
    .bind(expiration)
    .bind(verify_token)
    .bind(secret)
    .bind(hash_algo)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// §4.4 `request_insert`: create in `not_verified` if absent, zero failures.
/// Returns `true` if the row was newly created.
pub async fn upsert_not_verified(
    pool: &PgPool,
    callback: &str,
    topic: &str,
    verify_token: &str,
    secret: Option<&str>,
    lease_seconds: i64,
    hash_algo: &str,
) -> Result<bool, sqlx::Error> {
    let key = subscription_key(callback, topic);
    let now = Utc::now();
    let expiration = now + ChronoDuration::seconds(lease_seconds);
    let result = sqlx::query(
        r#"
        INSERT INTO subscriptions
            (key, callback, topic, callback_hash, topic_hash, state, lease_seconds,
             expiration_time, eta, confirm_failures, verify_token, secret, hash_algo)
        VALUES ($1, $2, $3, $4, $5, 'not_verified', $6, $7, $7, 0, $8, $9, $10)
        ON CONFLICT (key) DO UPDATE SET
            confirm_failures = 0,
            eta = EXCLUDED.eta,
            verify_token = EXCLUDED.verify_token,
            secret = EXCLUDED.secret,
            lease_seconds = EXCLUDED.lease_seconds,
            hash_algo = EXCLUDED.hash_algo
    "#,
    )
    .bind(&key)
    .bind(callback)
    .bind(topic)
    .bind(entity_key(callback))
    .bind(entity_key(topic))
    .bind(lease_seconds)
    .bind(expiration)
    .bind(verify_token)
    .bind(secret)
    .bind(hash_algo)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn set_state(
    pool: &PgPool,
    key: &str,
    state: SubscriptionState,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE subscriptions SET state = $1 WHERE key = $2")
        .bind(state.as_str())
        .bind(key)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(
    pool: &PgPool,
    callback: &str,
    topic: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM subscriptions WHERE key = $1")
        .bind(subscription_key(callback, topic))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// `confirm_failed`: bump the failure count and push `eta` out; returns the
/// new failure count.
pub async fn record_confirm_failure(
    pool: &PgPool,
    key: &str,
    eta: DateTime<Utc>,
) -> Result<i32, sqlx::Error> {
    let row: (i32,) = sqlx::query_as(
        r#"
        UPDATE subscriptions
        SET confirm_failures = confirm_failures + 1, eta = $2
        WHERE key = $1
        RETURNING confirm_failures
    "#,
    )
    .bind(key)
    .bind(eta)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

pub async fn has_subscribers(
    pool: &PgPool,
    topic: &str,
) -> Result<bool, sqlx::Error> {
    let row: (bool,) = sqlx::query_as(
        "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE topic_hash = $1 AND state = 'verified')",
    )
    .bind(entity_key(topic))
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}

/// §3 invariant: normal-mode delivery pages verified subscribers of a topic,
/// ordered by `callback_hash`, starting at (and including) `starting_at`.
pub async fn get_subscribers(
    pool: &PgPool,
    topic: &str,
    limit: i64,
    starting_at_callback_hash: Option<&str>,
) -> Result<Vec<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>(
        r#"
        SELECT * FROM subscriptions
        WHERE topic_hash = $1 AND state = 'verified' AND callback_hash >= $2
        ORDER BY callback_hash
        LIMIT $3
    "#,
    )
    .bind(entity_key(topic))
    .bind(starting_at_callback_hash.unwrap_or(""))
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn get_by_key(
    pool: &PgPool,
    key: &str,
) -> Result<Option<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions WHERE key = $1")
        .bind(key)
        .fetch_optional(pool)
        .await
}

/// §9 cleanup sweep support: rows past their grace period.
pub async fn to_delete_past(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>(
        "SELECT * FROM subscriptions WHERE state = 'to_delete' AND eta <= $1 LIMIT $2",
    )
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await
}

pub async fn not_verified_expired(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<SubscriptionRow>, sqlx::Error> {
    sqlx::query_as::<_, SubscriptionRow>(
        "SELECT * FROM subscriptions WHERE state = 'not_verified' AND expiration_time <= now() LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
}
