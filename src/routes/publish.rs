//! §6 `POST /publish`: publisher ping ingestion.

use actix_web::http::header::RETRY_AFTER;
use actix_web::web;
use actix_web::HttpResponse;

use crate::publish;
use crate::publish::PublishError;
use crate::publish::PublishSource;
use crate::routes::form;
use crate::startup::AppState;

#[tracing::instrument(skip(state, pairs))]
pub(crate) async fn ingest(
    pairs: &[(String, String)],
    state: &AppState,
) -> HttpResponse {
    if !state.publish_limiter.allow("publish") {
        return HttpResponse::ServiceUnavailable().insert_header((RETRY_AFTER, "1")).finish();
    }

    let urls: Vec<String> = form::all(pairs, "hub.url").into_iter().map(str::to_string).collect();

    match publish::ingest_publish(
        &state.pool,
        &state.dispatcher,
        &state.fork_join,
        &state.hooks,
        &urls,
        state.dev_env,
        state.hub.max_aliases,
        PublishSource::Publish,
    )
    .await
    {
        Ok(_enqueued) => HttpResponse::NoContent().finish(),
        Err(PublishError::Validation(reason)) => HttpResponse::BadRequest().body(reason),
        Err(PublishError::Transient(e)) => {
            tracing::warn!(error = %e, "publish ingestion hit a transient backend error");
            HttpResponse::ServiceUnavailable()
                .insert_header((RETRY_AFTER, publish::TRANSIENT_RETRY_AFTER.as_secs().to_string()))
                .finish()
        }
    }
}

pub async fn publish(
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let pairs = form::parse(&body);
    ingest(&pairs, &state).await
}
