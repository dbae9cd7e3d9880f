//! Guards `/work/*`: only the task dispatcher, a cron trigger, or a dev-env
//! request may call these (original_source `work_queue_only`/`is_dev_env`,
//! lines 627-655). The App Engine original keyed this off
//! `X-AppEngine-Cron`/`X-AppEngine-TaskName` headers and admin sessions; this
//! hub checks a single internal header the dispatcher sets on its own
//! outbound calls, or `application.dev_env` in configuration.

use actix_web::body::MessageBody;
use actix_web::dev::ServiceRequest;
use actix_web::dev::ServiceResponse;
use actix_web::error::InternalError;
use actix_web::web::Data;
use actix_web::HttpResponse;
use actix_web_lab::middleware::Next;

pub const INTERNAL_QUEUE_HEADER: &str = "X-Hub-Internal-Queue";

#[derive(Clone, Copy)]
pub struct DevEnv(pub bool);

pub async fn work_queue_only(
    req: ServiceRequest,
    next: Next<impl MessageBody>,
) -> Result<ServiceResponse<impl MessageBody>, actix_web::Error> {
    let dev_env = req.app_data::<Data<DevEnv>>().map(|d| d.0).unwrap_or(false);
    let from_queue = req.headers().contains_key(INTERNAL_QUEUE_HEADER);

    if dev_env || from_queue {
        return next.call(req).await;
    }

    let resp = HttpResponse::Unauthorized().body("Handler only accessible for work queues");
    let err = anyhow::anyhow!("request to /work/* missing {INTERNAL_QUEUE_HEADER} and dev_env is off");
    Err(InternalError::from_response(err, resp.map_into_boxed_body()).into())
}

#[cfg(test)]
mod tests {
    use actix_web::http::StatusCode;
    use actix_web::test;
    use actix_web::web;
    use actix_web::App;
    use actix_web_lab::middleware::from_fn;

    use super::*;

    async fn ping() -> HttpResponse { HttpResponse::NoContent().finish() }

    #[actix_web::test]
    async fn rejects_without_header_or_dev_env() {
        let app = test::init_service(
            App::new()
                .app_data(Data::new(DevEnv(false)))
                .service(web::scope("/work").wrap(from_fn(work_queue_only)).route("/ping", web::post().to(ping))),
        )
        .await;
        let req = test::TestRequest::post().uri("/work/ping").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn allows_with_internal_queue_header() {
        let app = test::init_service(
            App::new()
                .app_data(Data::new(DevEnv(false)))
                .service(web::scope("/work").wrap(from_fn(work_queue_only)).route("/ping", web::post().to(ping))),
        )
        .await;
        let req = test::TestRequest::post().uri("/work/ping").insert_header((INTERNAL_QUEUE_HEADER, "feed-pulls")).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[actix_web::test]
    async fn allows_in_dev_env() {
        let app = test::init_service(
            App::new()
                .app_data(Data::new(DevEnv(true)))
                .service(web::scope("/work").wrap(from_fn(work_queue_only)).route("/ping", web::post().to(ping))),
        )
        .await;
        let req = test::TestRequest::post().uri("/work/ping").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }
}
