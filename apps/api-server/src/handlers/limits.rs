//! Window inspection endpoint.

use actix_web::{HttpRequest, HttpResponse, web};
use throttle_shared::ApiResponse;
use throttle_shared::dto::WindowResponse;

use crate::middleware::error::AppResult;
use crate::middleware::rate_limit::resolve_identity;
use crate::state::AppState;

/// Report the caller's current window for a resource, measured against the
/// service's configured limit. Does not count as a request.
///
/// GET /limits/{resource}
pub async fn window(
    req: HttpRequest,
    state: web::Data<AppState>,
    resource: web::Path<String>,
) -> AppResult<HttpResponse> {
    let resource = resource.into_inner();
    let identity = resolve_identity(&req, state.settings.trust_proxy_headers);
    let limit = state.settings.limit();

    let window = state.limiter.window(&identity, &resource).await?;
    let count = window.map_or(0, |w| w.count);

    let response = WindowResponse {
        resource,
        client: identity.to_string(),
        count,
        remaining: limit.remaining_after(count),
        reset_after_secs: window.map(|w| w.remaining.as_secs()),
    };

    Ok(HttpResponse::Ok().json(ApiResponse::ok(response)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitSettings;
    use actix_web::{App, test};
    use throttle_core::LimiterConfig;

    #[actix_web::test]
    async fn test_window_reflects_admissions() {
        let state = AppState::in_memory(LimiterConfig::default(), RateLimitSettings::default());
        let limiter = state.limiter.clone();
        let limit = state.settings.limit();

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/limits/{resource}", web::get().to(window)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/limits/api")
            .insert_header(("X-Forwarded-For", "192.0.2.44"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["count"], 0);
        assert!(body["data"].get("reset_after_secs").is_none());

        let who = throttle_core::ClientIdentity::parse("192.0.2.44").unwrap();
        for _ in 0..3 {
            limiter.admit(&who, "api", limit).await.unwrap();
        }

        let req = test::TestRequest::get()
            .uri("/limits/api")
            .insert_header(("X-Forwarded-For", "192.0.2.44"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["count"], 3);
        assert_eq!(body["data"]["remaining"], 98);
        assert_eq!(body["data"]["client"], "192.0.2.44");
    }

    #[actix_web::test]
    async fn test_zero_budget_reports_nothing_remaining() {
        let settings = RateLimitSettings {
            max_requests: 0,
            ..RateLimitSettings::default()
        };
        let state = AppState::in_memory(LimiterConfig::default(), settings);

        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(state))
                .route("/limits/{resource}", web::get().to(window)),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/limits/api")
            .insert_header(("X-Forwarded-For", "192.0.2.45"))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["count"], 0);
        assert_eq!(body["data"]["remaining"], 0);
    }
}
