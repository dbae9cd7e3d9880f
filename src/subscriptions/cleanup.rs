//! §9 supplemented feature: the sweep that terminates `to_delete` rows and
//! expired `not_verified` rows — without it nothing ever leaves those states.

use chrono::Duration as ChronoDuration;
use chrono::Utc;
use sqlx::PgPool;

use crate::store::subscription;

const SWEEP_CHUNK: i64 = 200;

/// Deletes `to_delete` rows past their grace period, and `not_verified` rows
/// whose lease has already expired without ever confirming. Returns the
/// number of rows removed.
#[tracing::instrument(skip(pool))]
pub async fn sweep(
    pool: &PgPool,
    to_delete_grace_seconds: i64,
) -> Result<u64, anyhow::Error> {
    let cutoff = Utc::now() - ChronoDuration::seconds(to_delete_grace_seconds);
    let mut removed = 0u64;

    let to_delete = subscription::to_delete_past(pool, cutoff, SWEEP_CHUNK).await?;
    for row in &to_delete {
        if subscription::delete(pool, &row.callback, &row.topic).await? {
            removed += 1;
        }
    }

    let expired = subscription::not_verified_expired(pool, SWEEP_CHUNK).await?;
    for row in &expired {
        if subscription::delete(pool, &row.callback, &row.topic).await? {
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::info!(removed, "subscription cleanup sweep removed rows");
    }
    Ok(removed)
}
