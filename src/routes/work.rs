//! §6 `/work/*`: externally-triggered drain of one task per queue, gated by
//! `auth_gate::work_queue_only`. Mirrors the same `process_one` step the
//! in-process worker loops run continuously.

use actix_web::web;
use actix_web::HttpResponse;

use crate::dispatch::Queue;
use crate::startup::AppState;
use crate::subscriptions::cleanup;
use crate::workers;

async fn drain(
    state: &AppState,
    queue: Queue,
) -> HttpResponse {
    match workers::process_one(state, queue).await {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => {
            tracing::error!(queue = queue.as_str(), error = %e, "work queue drain failed");
            HttpResponse::ServiceUnavailable().finish()
        }
    }
}

pub async fn drain_subscriptions(state: web::Data<AppState>) -> HttpResponse { drain(&state, Queue::Subscriptions).await }
pub async fn drain_feed_pulls(state: web::Data<AppState>) -> HttpResponse { drain(&state, Queue::FeedPulls).await }
pub async fn drain_feed_pulls_retries(state: web::Data<AppState>) -> HttpResponse {
    drain(&state, Queue::FeedPullsRetries).await
}
pub async fn drain_event_delivery(state: web::Data<AppState>) -> HttpResponse { drain(&state, Queue::EventDelivery).await }
pub async fn drain_event_delivery_retries(state: web::Data<AppState>) -> HttpResponse {
    drain(&state, Queue::EventDeliveryRetries).await
}
pub async fn drain_polling(state: web::Data<AppState>) -> HttpResponse { drain(&state, Queue::Polling).await }
pub async fn drain_mappings(state: web::Data<AppState>) -> HttpResponse { drain(&state, Queue::Mappings).await }

pub async fn run_cleanup(state: web::Data<AppState>) -> HttpResponse {
    match cleanup::sweep(&state.pool, state.hub.subscription_to_delete_grace_seconds).await {
        Ok(_) => HttpResponse::NoContent().finish(),
        Err(e) => {
            tracing::error!(error = %e, "cleanup sweep failed");
            HttpResponse::ServiceUnavailable().finish()
        }
    }
}
