//! §6 diagnostic HTML endpoints. Explicitly out of scope (§1 Non-goals) —
//! these exist only so the documented interface has something behind it.

use actix_web::HttpResponse;

pub async fn topic_details() -> HttpResponse {
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body("<html><body>topic details not implemented</body></html>")
}

pub async fn subscription_details() -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body("<html><body>subscription details not implemented</body></html>")
}

pub async fn stats() -> HttpResponse {
    HttpResponse::Ok().content_type("text/html; charset=utf-8").body("<html><body>stats not implemented</body></html>")
}
