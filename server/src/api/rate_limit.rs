//! Rate limiting middleware for API routes

use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::extractors::client_address;
use super::types::{ErrorBody, REASON_RATE_LIMITED};
use crate::data::ratelimit::{RateLimitDecision, RateLimiter, Scope};

/// Rate limit middleware state
#[derive(Clone)]
pub struct RateLimitState {
    pub limiter: Arc<RateLimiter>,
    pub scope: Scope,
}

/// Rate limit exceeded response
pub struct RateLimitExceeded(RateLimitDecision);

impl IntoResponse for RateLimitExceeded {
    fn into_response(self) -> Response {
        let decision = self.0;
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorBody::new(REASON_RATE_LIMITED)),
        )
            .into_response();

        add_rate_limit_headers(&mut response, &decision);
        if let Ok(v) = HeaderValue::from_str(&decision.retry_after.unwrap_or(1).to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, v);
        }
        response
    }
}

/// Add rate limit headers to response
fn add_rate_limit_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.reset_at.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}

/// Rate limiting middleware function
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, RateLimitExceeded> {
    let identity = client_address(request.headers(), request.extensions())
        .unwrap_or_else(|| "unknown".to_string());

    let decision = state.limiter.check(state.scope, &identity).await;

    if !decision.allowed {
        tracing::debug!(
            scope = state.scope.as_str(),
            %identity,
            retry_after = decision.retry_after,
            "Rate limit exceeded"
        );
        return Err(RateLimitExceeded(decision));
    }

    let mut response = next.run(request).await;
    add_rate_limit_headers(&mut response, &decision);
    Ok(response)
}
