//! Background consumers for each named queue (§2 item 4, §4). Each one polls
//! `TaskDispatcher::claim_one`, does the work the claimed task names, and
//! `complete`s it; an empty claim just means the caller backs off briefly.
//! The `/work/*` HTTP surface (§6) drives the same `process_one` step for
//! callers that prefer to trigger drains externally (cron, an admin button)
//! instead of relying purely on these in-process loops.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::dispatch::Queue;
use crate::identity;
use crate::identity::MappingsTaskPayload;
use crate::polling::PollingTaskPayload;
use crate::startup::AppState;
use crate::store::feed_to_fetch;
use crate::subscriptions::VerifyTaskPayload;

const IDLE_SLEEP: Duration = Duration::from_millis(500);

async fn drain_fetch_batch(
    state: &AppState,
    index: u64,
) {
    let topics = state.fork_join.pop_request(index).await;
    for topic in topics {
        match feed_to_fetch::get(&state.pool, &topic).await {
            Ok(Some(row)) => {
                if let Err(e) = state.puller.pull_one(&row).await {
                    tracing::error!(topic = %topic, error = %e, "feed pull failed");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!(topic = %topic, error = %e, "failed to load feed_to_fetch row"),
        }
    }
    state.fork_join.forget(index);
}

async fn retry_single_topic(
    state: &AppState,
    topic: &str,
) {
    match feed_to_fetch::get(&state.pool, topic).await {
        Ok(Some(row)) => {
            if let Err(e) = state.puller.pull_one(&row).await {
                tracing::error!(topic, error = %e, "feed pull retry failed");
            }
        }
        Ok(None) => {}
        Err(e) => tracing::error!(topic, error = %e, "failed to load feed_to_fetch row for retry"),
    }
}

/// Claims and processes at most one task from `queue`. Returns `false` when
/// the queue had nothing due, so callers can decide whether to back off.
#[tracing::instrument(skip(state))]
pub async fn process_one(
    state: &AppState,
    queue: Queue,
) -> Result<bool, anyhow::Error> {
    let Some((tx, task)) = state.dispatcher.claim_one(queue).await? else {
        return Ok(false);
    };

    match queue {
        Queue::FeedPulls => {
            if let Some(index) = task.payload.get("index").and_then(|v| v.as_u64()) {
                drain_fetch_batch(state, index).await;
            }
        }
        Queue::FeedPullsRetries => {
            if let Some(topic) = task.payload.get("topic").and_then(|v| v.as_str()) {
                retry_single_topic(state, topic).await;
            }
        }
        Queue::Polling => {
            if task.payload.get("sequence").is_some() {
                match serde_json::from_value::<PollingTaskPayload>(task.payload.clone()) {
                    Ok(payload) => {
                        if let Err(e) = state.polling.run_page(&payload.sequence, payload.current_key).await {
                            tracing::error!(error = %e, "polling page failed");
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "malformed polling task payload"),
                }
            } else if let Some(index) = task.payload.get("index").and_then(|v| v.as_u64()) {
                drain_fetch_batch(state, index).await;
            }
        }
        Queue::EventDelivery | Queue::EventDeliveryRetries => {
            if let Some(event_id) =
                task.payload.get("event_id").and_then(|v| v.as_str()).and_then(|s| Uuid::parse_str(s).ok())
            {
                if let Err(e) = state.deliverer.deliver_one(event_id).await {
                    tracing::error!(event_id = %event_id, error = %e, "event delivery failed");
                }
            }
        }
        Queue::Subscriptions => match serde_json::from_value::<VerifyTaskPayload>(task.payload.clone()) {
            Ok(payload) => {
                if let Err(e) = state.subscriptions.run_verification(&payload).await {
                    tracing::error!(error = %e, "subscription verification failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "malformed verify task payload"),
        },
        Queue::Mappings => match serde_json::from_value::<MappingsTaskPayload>(task.payload.clone()) {
            Ok(payload) => {
                if let Err(e) = identity::record_feed(
                    &state.pool,
                    &state.identity_client,
                    state.identity_extractor.as_ref(),
                    &payload.topic,
                    state.hub.known_feed_refresh_period_days,
                )
                .await
                {
                    tracing::error!(error = %e, "mappings job failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "malformed mappings task payload"),
        },
    }

    state.dispatcher.complete(tx, task.id).await?;
    Ok(true)
}

async fn run_queue(
    state: Arc<AppState>,
    queue: Queue,
) {
    loop {
        match process_one(&state, queue).await {
            Ok(true) => {}
            Ok(false) => tokio::time::sleep(IDLE_SLEEP).await,
            Err(e) => {
                tracing::error!(queue = queue.as_str(), error = %e, "worker loop iteration failed, backing off");
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }
    }
}

/// One heartbeat tick of the §4.10 bootstrap sweep: starts a cycle if none
/// is running, otherwise no-ops. Actual page work flows through the
/// `polling` queue above.
async fn run_polling_heartbeat(
    state: Arc<AppState>,
    period: Duration,
) {
    loop {
        if let Err(e) = state.polling.maybe_start().await {
            tracing::error!(error = %e, "polling heartbeat failed");
        }
        tokio::time::sleep(period).await;
    }
}

/// One heartbeat tick of the §9 subscription cleanup sweep.
async fn run_cleanup_heartbeat(
    state: Arc<AppState>,
    period: Duration,
) {
    loop {
        match crate::subscriptions::cleanup::sweep(&state.pool, state.hub.subscription_to_delete_grace_seconds).await {
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "cleanup heartbeat failed"),
        }
        tokio::time::sleep(period).await;
    }
}

/// Spawns every background consumer loop. The returned handles run until the
/// process exits; `main` selects on them alongside the HTTP server so a
/// panicking worker brings the whole process down instead of silently
/// stalling a queue forever.
pub fn spawn_all(state: Arc<AppState>) -> Vec<tokio::task::JoinHandle<()>> {
    let queues = [
        Queue::Subscriptions,
        Queue::FeedPulls,
        Queue::FeedPullsRetries,
        Queue::EventDelivery,
        Queue::EventDeliveryRetries,
        Queue::Polling,
        Queue::Mappings,
    ];

    let mut handles: Vec<tokio::task::JoinHandle<()>> =
        queues.into_iter().map(|queue| tokio::spawn(run_queue(state.clone(), queue))).collect();

    let polling_period = Duration::from_secs((state.hub.polling_bootstrap_period_seconds / 10).clamp(5, 300) as u64);
    handles.push(tokio::spawn(run_polling_heartbeat(state.clone(), polling_period)));

    let cleanup_period = Duration::from_secs(state.hub.cleanup_sweep_period_seconds);
    handles.push(tokio::spawn(run_cleanup_heartbeat(state, cleanup_period)));

    handles
}
