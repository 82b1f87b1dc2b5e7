//! HTTP handlers and route configuration.

mod health;
mod limits;

use actix_web::{HttpResponse, web};

use crate::middleware::rate_limit::RateLimitMiddleware;
use crate::state::AppState;

/// Configure all application routes.
///
/// `/health` and `/limits/{resource}` are not rate limited; everything under
/// `/api` is.
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: &AppState) {
    cfg.route("/health", web::get().to(health::health_check))
        .route("/limits/{resource}", web::get().to(limits::window))
        .service(
            web::scope("/api")
                .wrap(RateLimitMiddleware::new(
                    state.limiter.clone(),
                    state.settings.clone(),
                ))
                .route("/ping", web::get().to(ping)),
        );
}

/// GET /api/ping
async fn ping() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "pong": true }))
}
