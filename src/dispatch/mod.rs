use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use sqlx::Postgres;
use sqlx::Row;
use sqlx::Transaction;
use std::time::Duration;

/// §2 item 4: the named queues background work is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    Subscriptions,
    FeedPulls,
    FeedPullsRetries,
    EventDelivery,
    EventDeliveryRetries,
    Polling,
    Mappings,
}

impl Queue {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscriptions => "subscriptions",
            Self::FeedPulls => "feed-pulls",
            Self::FeedPullsRetries => "feed-pulls-retries",
            Self::EventDelivery => "event-delivery",
            Self::EventDeliveryRetries => "event-delivery-retries",
            Self::Polling => "polling",
            Self::Mappings => "mappings",
        }
    }
}

pub struct ScheduledTask {
    pub id: i64,
    pub task_name: String,
    pub payload: serde_json::Value,
}

/// Postgres-backed named/delayed/idempotent job table. Workers claim with
/// `FOR UPDATE SKIP LOCKED`; a claimed row is only deleted once its handler
/// finishes, so a crash mid-handler simply releases the lock for a later
/// retry rather than losing the task.
#[derive(Clone)]
pub struct TaskDispatcher {
    pool: PgPool,
}

impl TaskDispatcher {
    pub fn new(pool: PgPool) -> Self { Self { pool } }

    /// Enqueue `task_name` on `queue` to run at `run_at`. A second enqueue of
    /// the same `(queue, task_name)` is a no-op (§7 idempotency: "tasks are
    /// named deterministically... so replay is a no-op").
    #[tracing::instrument(skip(self, payload), fields(queue = queue.as_str()))]
    pub async fn enqueue(
        &self,
        queue: Queue,
        task_name: &str,
        run_at: DateTime<Utc>,
        payload: impl Serialize,
    ) -> Result<(), anyhow::Error> {
        let payload = serde_json::to_value(payload)?;
        let mut last_err = None;
        for _ in 0..3 {
            let result = sqlx::query(
                r#"
                INSERT INTO scheduled_task (queue, task_name, run_at, payload)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (queue, task_name) DO NOTHING
            "#,
            )
            .bind(queue.as_str())
            .bind(task_name)
            .bind(run_at)
            .bind(&payload)
            .execute(&self.pool)
            .await;
            match result {
                Ok(_) => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        Err(last_err.unwrap().into())
    }

    /// Claim at most one due task on `queue`, holding its row lock in an open
    /// transaction. Caller must call `complete` (success) to delete it, or
    /// drop/rollback the transaction to release the lock unprocessed.
    pub async fn claim_one(
        &self,
        queue: Queue,
    ) -> Result<Option<(Transaction<'static, Postgres>, ScheduledTask)>, anyhow::Error> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            r#"
            SELECT id, task_name, payload
            FROM scheduled_task
            WHERE queue = $1 AND run_at <= now()
            ORDER BY run_at
            FOR UPDATE SKIP LOCKED
            LIMIT 1
        "#,
        )
        .bind(queue.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        Ok(row.map(|r| {
            (
                tx,
                ScheduledTask {
                    id: r.get("id"),
                    task_name: r.get("task_name"),
                    payload: r.get("payload"),
                },
            )
        }))
    }

    /// Like `enqueue`, but an existing `(queue, task_name)` row has its
    /// `run_at`/`payload` replaced instead of being left alone. Used by
    /// retry state machines (§4.4/§4.6/§4.8) that re-enqueue themselves under
    /// the same task name with a later `run_at`.
    #[tracing::instrument(skip(self, payload), fields(queue = queue.as_str()))]
    pub async fn reschedule(
        &self,
        queue: Queue,
        task_name: &str,
        run_at: DateTime<Utc>,
        payload: impl Serialize,
    ) -> Result<(), anyhow::Error> {
        let payload = serde_json::to_value(payload)?;
        let mut last_err = None;
        for _ in 0..3 {
            let result = sqlx::query(
                r#"
                INSERT INTO scheduled_task (queue, task_name, run_at, payload)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (queue, task_name) DO UPDATE SET
                    run_at = EXCLUDED.run_at,
                    payload = EXCLUDED.payload
            "#,
            )
            .bind(queue.as_str())
            .bind(task_name)
            .bind(run_at)
            .bind(&payload)
            .execute(&self.pool)
            .await;
            match result {
                Ok(_) => return Ok(()),
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        Err(last_err.unwrap().into())
    }

    pub async fn complete(
        &self,
        mut tx: Transaction<'static, Postgres>,
        task_id: i64,
    ) -> Result<(), anyhow::Error> {
        sqlx::query("DELETE FROM scheduled_task WHERE id = $1")
            .bind(task_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool { &self.pool }
}

/// `now + base * 2^attempts_so_far` (§5 "Retry discipline", §8 retry-deadline law).
pub fn backoff_eta(
    base_seconds: i64,
    attempts_so_far: u32,
) -> DateTime<Utc> {
    let delay = base_seconds.saturating_mul(1i64 << attempts_so_far.min(32));
    Utc::now() + chrono::Duration::seconds(delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let t0 = backoff_eta(30, 0);
        let t1 = backoff_eta(30, 1);
        let t2 = backoff_eta(30, 2);
        assert!((t1 - t0).num_seconds() >= 25); // ~30s step, 0->1
        assert!((t2 - t1).num_seconds() >= 55); // ~60s step, 1->2
    }
}
