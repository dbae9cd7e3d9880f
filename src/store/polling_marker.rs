use chrono::DateTime;
use chrono::Utc;
use sqlx::PgPool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PollingMarkerRow {
    pub singleton: bool,
    pub last_start: DateTime<Utc>,
    pub next_start: DateTime<Utc>,
}

pub async fn get(pool: &PgPool) -> Result<PollingMarkerRow, sqlx::Error> {
    sqlx::query_as::<_, PollingMarkerRow>("SELECT * FROM polling_marker WHERE singleton = true")
        .fetch_one(pool)
        .await
}

/// §4.10: claim the sweep by pushing `next_start` out, but only if nobody
/// else has already claimed it (`next_start` caller observed is unchanged).
/// Returns `false` if the sweep was already claimed by a concurrent worker.
pub async fn claim_sweep(
    pool: &PgPool,
    observed_next_start: DateTime<Utc>,
    new_next_start: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE polling_marker
        SET last_start = now(), next_start = $2
        WHERE singleton = true AND next_start = $1
    "#,
    )
    .bind(observed_next_start)
    .bind(new_next_start)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}
