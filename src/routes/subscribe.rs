//! §6 `POST /subscribe`: subscribe/unsubscribe, sync or async verification.

use actix_web::http::header::RETRY_AFTER;
use actix_web::web;
use actix_web::HttpResponse;

use crate::domain::CallbackUrl;
use crate::domain::HubMode;
use crate::domain::TopicUrl;
use crate::domain::VerifyMode;
use crate::domain::VerifyToken;
use crate::routes::form;
use crate::startup::AppState;
use crate::subscriptions::verification::VerificationOutcome;
use crate::subscriptions::VerifyTaskPayload;

const DEFAULT_LEASE_SECONDS: i64 = 432_000;
const DEFAULT_HASH_ALGO: &str = "sha1";

#[tracing::instrument(skip(state, pairs))]
pub(crate) async fn handle(
    pairs: &[(String, String)],
    state: &AppState,
) -> HttpResponse {
    let Some(mode_raw) = form::one(pairs, "hub.mode") else {
        return HttpResponse::BadRequest().body("missing hub.mode");
    };
    let mode: HubMode = match mode_raw.parse() {
        Ok(m) => m,
        Err(e) => return HttpResponse::BadRequest().body(e),
    };

    let Some(callback_raw) = form::one(pairs, "hub.callback") else {
        return HttpResponse::BadRequest().body("missing hub.callback");
    };
    let Some(topic_raw) = form::one(pairs, "hub.topic") else {
        return HttpResponse::BadRequest().body("missing hub.topic");
    };

    let callback = match CallbackUrl::parse(callback_raw, state.dev_env) {
        Ok(c) => c,
        Err(e) => return HttpResponse::BadRequest().body(e),
    };
    let topic = match TopicUrl::parse(topic_raw, state.dev_env) {
        Ok(t) => t,
        Err(e) => return HttpResponse::BadRequest().body(e),
    };

    if !state.subscribe_limiter.allow(callback.as_ref()) {
        return HttpResponse::ServiceUnavailable().insert_header((RETRY_AFTER, "1")).finish();
    }

    if mode == HubMode::Unsubscribe {
        match state.subscriptions.get(&callback, &topic).await {
            Ok(None) => return HttpResponse::NoContent().finish(),
            Ok(Some(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "looking up subscription for unsubscribe failed transiently");
                return HttpResponse::ServiceUnavailable().insert_header((RETRY_AFTER, "120")).finish();
            }
        }
    }

    let verify_mode = form::all(pairs, "hub.verify").into_iter().find_map(|v| v.parse::<VerifyMode>().ok());
    let Some(verify_mode) = verify_mode else {
        return HttpResponse::BadRequest().body("missing or unsupported hub.verify");
    };

    let lease_seconds = match form::one(pairs, "hub.lease_seconds") {
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) if n > 0 => n.min(state.hub.max_lease_seconds),
            _ => return HttpResponse::BadRequest().body("hub.lease_seconds must be a positive integer"),
        },
        None => DEFAULT_LEASE_SECONDS.min(state.hub.max_lease_seconds),
    };

    let verify_token = VerifyToken::new(form::one(pairs, "hub.verify_token").unwrap_or("").to_string());
    let secret = form::one(pairs, "hub.secret").map(str::to_string);

    match verify_mode {
        VerifyMode::Async => {
            let result = match mode {
                HubMode::Subscribe => {
                    state
                        .subscriptions
                        .request_insert(&callback, &topic, &verify_token, secret.as_deref(), lease_seconds, DEFAULT_HASH_ALGO)
                        .await
                }
                HubMode::Unsubscribe => state.subscriptions.request_remove(&callback, &topic, &verify_token).await,
            };
            match result {
                Ok(_) => HttpResponse::Accepted().finish(),
                Err(e) => {
                    tracing::warn!(error = %e, "async subscribe/unsubscribe enqueue failed transiently");
                    HttpResponse::ServiceUnavailable().insert_header((RETRY_AFTER, "120")).finish()
                }
            }
        }
        VerifyMode::Sync => {
            if mode == HubMode::Subscribe {
                if let Err(e) = state
                    .subscriptions
                    .ensure_pending(&callback, &topic, &verify_token, secret.as_deref(), lease_seconds, DEFAULT_HASH_ALGO)
                    .await
                {
                    tracing::warn!(error = %e, "failed to persist pending subscription before sync verification");
                    return HttpResponse::ServiceUnavailable().insert_header((RETRY_AFTER, "120")).finish();
                }
            }

            let payload = VerifyTaskPayload {
                callback: callback.as_ref().to_string(),
                topic: topic.as_ref().to_string(),
                mode: mode.as_str().to_string(),
                verify_token: verify_token.as_ref().to_string(),
                secret: secret.clone(),
                lease_seconds,
                hash_algo: DEFAULT_HASH_ALGO.to_string(),
            };
            let outcome = match state.subscriptions.verify_once(&payload).await {
                Ok(o) => o,
                Err(e) => {
                    tracing::warn!(error = %e, "sync verification request failed transiently");
                    return HttpResponse::ServiceUnavailable().insert_header((RETRY_AFTER, "120")).finish();
                }
            };
            let (mode, outcome) = outcome;
            if let Err(e) = state.subscriptions.apply_verification_outcome(&payload, mode, outcome).await {
                tracing::warn!(error = %e, "sync verification state transition failed transiently");
                return HttpResponse::ServiceUnavailable().insert_header((RETRY_AFTER, "120")).finish();
            }

            // §4.4: a subscribe callback that 404s is archived, "treated as
            // success for flow control" — the subscription was resolved
            // (moved to `to_delete`), not left pending, so this is a 204
            // like the other success arms, not a 409.
            let success = matches!(
                (mode, outcome),
                (HubMode::Subscribe, VerificationOutcome::Verified)
                    | (HubMode::Subscribe, VerificationOutcome::NotFound)
                    | (HubMode::Unsubscribe, VerificationOutcome::Verified)
                    | (HubMode::Unsubscribe, VerificationOutcome::NotFound)
            );
            if success {
                HttpResponse::NoContent().finish()
            } else {
                HttpResponse::Conflict().finish()
            }
        }
    }
}

pub async fn subscribe(
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let pairs = form::parse(&body);
    handle(&pairs, &state).await
}
