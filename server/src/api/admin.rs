//! Admin guard for mutating and audit endpoints
//!
//! With no token configured every request is let through (opt-in guard).
//! Otherwise the presented credential must match exactly; the comparison is
//! done on SHA-256 digests in constant time. Every decision is written to the
//! access log without the credential itself.

use std::fmt;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use super::extractors::client_address;
use super::types::{ErrorBody, REASON_UNAUTHORIZED};
use crate::core::constants::{ACCESS_LOG_TARGET, ADMIN_TOKEN_HEADER};
use crate::utils::crypto::digest_eq;

/// Result of an admin check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOutcome {
    /// No token configured
    Open,
    Granted,
    Denied,
}

impl AccessOutcome {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Denied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

#[derive(Clone, Default)]
pub struct AdminGuard {
    token: Option<Arc<str>>,
}

impl fmt::Debug for AdminGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminGuard")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl AdminGuard {
    pub fn new(token: Option<&str>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()).map(Arc::from),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    pub fn check(&self, credential: Option<&str>) -> AccessOutcome {
        match (&self.token, credential) {
            (None, _) => AccessOutcome::Open,
            (Some(expected), Some(presented)) if digest_eq(presented, expected) => {
                AccessOutcome::Granted
            }
            (Some(_), _) => AccessOutcome::Denied,
        }
    }
}

/// Credential from `Authorization: Bearer <token>` or `X-Admin-Token`
pub fn presented_credential(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.get(..7)
                .filter(|scheme| scheme.eq_ignore_ascii_case("bearer "))
                .map(|_| v[7..].trim())
        });

    bearer
        .or_else(|| {
            headers
                .get(ADMIN_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
        })
        .filter(|t| !t.is_empty())
}

/// Admin denial response
pub struct Unauthorized;

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        let mut response = (
            StatusCode::UNAUTHORIZED,
            Json(ErrorBody::new(REASON_UNAUTHORIZED)),
        )
            .into_response();
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        response
    }
}

/// Admin guard middleware
pub async fn require_admin(
    State(guard): State<AdminGuard>,
    request: Request,
    next: Next,
) -> Result<Response, Unauthorized> {
    let credential = presented_credential(request.headers());
    let credential_present = credential.is_some();
    let outcome = guard.check(credential);

    let address = client_address(request.headers(), request.extensions());
    tracing::info!(
        target: ACCESS_LOG_TARGET,
        address = address.as_deref().unwrap_or("unknown"),
        method = %request.method(),
        path = request.uri().path(),
        outcome = outcome.as_str(),
        credential_present,
        "Admin access check"
    );

    if !outcome.is_allowed() {
        return Err(Unauthorized);
    }
    Ok(next.run(request).await)
}
