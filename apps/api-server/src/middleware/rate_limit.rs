//! Rate limiting middleware.

use actix_web::{
    Error, HttpRequest, HttpResponse, ResponseError,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderName, HeaderValue},
};
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use throttle_core::{ClientIdentity, Decision, Denial, Limit, RateLimiter};

use crate::config::{FailurePolicy, RateLimitSettings};
use crate::middleware::error::AppError;

pub const CLIENT_IP_HEADER: &str = "Client-IP";
pub const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

/// Response produced in place of the default 429.
pub type Fallback = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Resolve the client identity of a request.
///
/// Proxy headers are only consulted when `trust_proxy_headers` is set.
/// Requests with no usable address share the "unknown" identity.
pub fn resolve_identity(req: &HttpRequest, trust_proxy_headers: bool) -> ClientIdentity {
    let (client_ip, forwarded_for) = if trust_proxy_headers {
        (
            header_value(req, CLIENT_IP_HEADER),
            header_value(req, FORWARDED_FOR_HEADER),
        )
    } else {
        (None, None)
    };
    let peer = req.peer_addr().map(|addr| addr.ip().to_string());

    ClientIdentity::resolve(client_ip, forwarded_for, peer.as_deref())
        .unwrap_or_else(|| ClientIdentity::Opaque("unknown".to_string()))
}

fn header_value<'a>(req: &'a HttpRequest, name: &str) -> Option<&'a str> {
    req.headers().get(name).and_then(|v| v.to_str().ok())
}

/// Rate limiting middleware factory.
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    settings: RateLimitSettings,
    fallback: Option<Fallback>,
}

impl RateLimitMiddleware {
    pub fn new(limiter: Arc<RateLimiter>, settings: RateLimitSettings) -> Self {
        Self {
            limiter,
            settings,
            fallback: None,
        }
    }

    /// Serve `fallback` to denied requests instead of a 429.
    pub fn with_fallback(mut self, fallback: Fallback) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimitMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddlewareService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            settings: Rc::new(self.settings.clone()),
            fallback: self.fallback.clone(),
        }))
    }
}

pub struct RateLimitMiddlewareService<S> {
    service: Rc<S>,
    limiter: Arc<RateLimiter>,
    settings: Rc<RateLimitSettings>,
    fallback: Option<Fallback>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let limiter = self.limiter.clone();
        let settings = self.settings.clone();
        let fallback = self.fallback.clone();

        Box::pin(async move {
            let identity = resolve_identity(req.request(), settings.trust_proxy_headers);
            let limit = settings.limit();

            let mut fallback_response = None;
            let result = match &fallback {
                Some(fallback) => {
                    let http_req = req.request();
                    limiter
                        .admit_or_else(&identity, &settings.resource, limit, || {
                            fallback_response = Some(fallback(http_req));
                        })
                        .await
                }
                None => limiter.admit(&identity, &settings.resource, limit).await,
            };

            let rejection = match result {
                Ok(Decision::Admitted { remaining, .. }) => {
                    let mut res = service.call(req).await?;
                    insert_limit_headers(&mut res, limit, remaining);
                    return Ok(res.map_into_left_body());
                }
                Ok(Decision::Denied(Denial::Fallback)) => {
                    tracing::debug!(
                        client = %identity,
                        resource = %settings.resource,
                        "Serving rate limit fallback"
                    );
                    fallback_response.unwrap_or_else(|| {
                        AppError::Internal("Fallback produced no response".to_string())
                            .error_response()
                    })
                }
                Ok(Decision::Denied(denial)) => {
                    // Rate limited - return 429 immediately
                    tracing::warn!(
                        client = %identity,
                        resource = %settings.resource,
                        "Rate limit exceeded"
                    );
                    let retry_after_secs = denial
                        .retry_after_secs()
                        .unwrap_or(limit.interval.as_secs());
                    AppError::TooManyRequests { retry_after_secs }.error_response()
                }
                Err(e) => match settings.failure_policy {
                    FailurePolicy::Open => {
                        tracing::error!(error = %e, "Rate limiter error, failing open");
                        let res = service.call(req).await?;
                        return Ok(res.map_into_left_body());
                    }
                    FailurePolicy::Closed => AppError::from(e).error_response(),
                },
            };

            let (http_req, _payload) = req.into_parts();
            let srv_response = ServiceResponse::new(http_req, rejection);
            Ok(srv_response.map_into_right_body())
        })
    }
}

fn insert_limit_headers<B>(res: &mut ServiceResponse<B>, limit: Limit, remaining: u64) {
    let headers = res.headers_mut();
    let allowance = limit.max_requests.saturating_add(1);

    headers.insert(
        HeaderName::from_static("x-ratelimit-limit"),
        HeaderValue::from(allowance),
    );
    headers.insert(
        HeaderName::from_static("x-ratelimit-remaining"),
        HeaderValue::from(remaining),
    );
}
