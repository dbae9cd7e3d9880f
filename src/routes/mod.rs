//! §6 HTTP surface.

pub mod diagnostics;
pub mod form;
pub mod health_check;
pub mod publish;
pub mod subscribe;
pub mod work;

use actix_web::web;
use actix_web::HttpResponse;

use crate::startup::AppState;

/// `POST /`: dispatches to publish or subscribe ingestion based on
/// `hub.mode`, so a caller can point a single URL at the hub for both.
pub async fn multiplex(
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    let pairs = form::parse(&body);
    match form::one(&pairs, "hub.mode") {
        Some("publish") => publish::ingest(&pairs, &state).await,
        Some("subscribe") | Some("unsubscribe") => subscribe::handle(&pairs, &state).await,
        _ => HttpResponse::BadRequest().body("missing or unrecognized hub.mode"),
    }
}
