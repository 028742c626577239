use super::engine::RateLimiter;
use super::identity::RequestMeta;
use super::types::{Decision, RateLimitResult};
use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
pub const RESET_HEADER: &str = "X-RateLimit-Reset";

/// Axum middleware applying the tiered rate limit ahead of downstream handlers
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    let meta = RequestMeta::from_request(&request, &limiter.policy().trusted_proxy_header);

    match limiter.check(&meta).await {
        Decision::Allow(result) => {
            let mut response = next.run(request).await;
            add_rate_limit_headers(response.headers_mut(), &result);
            response
        }
        Decision::Reject(result) => {
            let retry_after = result.retry_after.unwrap_or(result.reset_after);
            let mut response = ApiError::TooManyRequests { retry_after }.into_response();
            add_rate_limit_headers(response.headers_mut(), &result);
            response
        }
        Decision::FailOpen => next.run(request).await,
    }
}

/// Set the limit, remaining and reset headers
pub fn add_rate_limit_headers(headers: &mut HeaderMap, result: &RateLimitResult) {
    headers.insert(LIMIT_HEADER, HeaderValue::from(result.limit));
    headers.insert(REMAINING_HEADER, HeaderValue::from(result.remaining));
    headers.insert(RESET_HEADER, HeaderValue::from(result.reset_after));
}
