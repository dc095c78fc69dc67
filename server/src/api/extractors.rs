//! Request extractors with validation
//!
//! Provides caller identification (forwarded address, peer address, user
//! agent) and query/body extractors that reject with the API error shape.

use std::net::SocketAddr;
use std::ops::Deref;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, Query, Request};
use axum::http::header;
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};
use axum::response::{IntoResponse, Response};
use serde::de::DeserializeOwned;
use validator::Validate;

use super::admin::presented_credential;
use super::types::ApiError;
use crate::domain::audit::Actor;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Whether `X-Forwarded-For` names the caller.
///
/// The router inserts this into every request. Only enable it behind a
/// reverse proxy that overwrites the header; a direct caller can otherwise
/// pick a fresh address per request.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyTrust(pub bool);

/// Caller address: the socket peer, or the first `X-Forwarded-For` entry
/// when [`ProxyTrust`] is enabled.
///
/// The peer is read from the `ConnectInfo` extension when the server was
/// started with connect info; in-process callers have none.
pub fn client_address(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    let trusted = extensions.get::<ProxyTrust>().is_some_and(|t| t.0);
    trusted
        .then(|| forwarded_for(headers))
        .flatten()
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Who is making the request, as recorded in the audit log
#[derive(Debug, Clone)]
pub struct RequestActor(pub Actor);

impl<S> FromRequestParts<S> for RequestActor
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(Self(Actor {
            address: client_address(&parts.headers, &parts.extensions),
            user_agent,
            credential_present: presented_credential(&parts.headers).is_some(),
        }))
    }
}

/// Rejection for malformed query strings and bodies
pub enum ValidationRejection {
    /// Failed to parse query string
    Query(QueryRejection),
    /// Failed to parse JSON body
    Json(JsonRejection),
    /// Validation constraints not satisfied
    Validation(validator::ValidationErrors),
}

impl IntoResponse for ValidationRejection {
    fn into_response(self) -> Response {
        let message = match self {
            Self::Query(rejection) => rejection.body_text(),
            Self::Json(rejection) => rejection.body_text(),
            Self::Validation(errors) => format_validation_errors(&errors),
        };
        ApiError::invalid_request(message).into_response()
    }
}

fn format_validation_errors(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |e| {
                e.message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| format!("{}: validation failed", field))
            })
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Query extractor with automatic validation.
///
/// Deserializes query parameters and validates them using the `validator` crate.
#[derive(Debug)]
pub struct ValidatedQuery<T>(pub T);

impl<T> Deref for ValidatedQuery<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<S, T> FromRequestParts<S> for ValidatedQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ValidationRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(ValidationRejection::Query)?;
        value.validate().map_err(ValidationRejection::Validation)?;
        Ok(Self(value))
    }
}

/// JSON body extractor that rejects with `invalid_request`
#[derive(Debug)]
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ValidationRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(ValidationRejection::Json)?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn peer(a: u8, b: u8, c: u8, d: u8, trusted: bool) -> Extensions {
        let mut ext = Extensions::new();
        ext.insert(ConnectInfo(SocketAddr::from(([a, b, c, d], 4000))));
        ext.insert(ProxyTrust(trusted));
        ext
    }

    #[test]
    fn test_client_address_prefers_first_forwarded_when_trusted() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7, 10.0.0.2")]);
        let ext = peer(10, 0, 0, 2, true);
        assert_eq!(client_address(&h, &ext).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn test_client_address_ignores_forwarded_by_default() {
        let h = headers(&[("x-forwarded-for", "203.0.113.7")]);
        let ext = peer(10, 0, 0, 2, false);
        assert_eq!(client_address(&h, &ext).as_deref(), Some("10.0.0.2"));

        let mut no_policy = Extensions::new();
        no_policy.insert(ConnectInfo(SocketAddr::from(([10, 0, 0, 3], 4000))));
        assert_eq!(client_address(&h, &no_policy).as_deref(), Some("10.0.0.3"));
    }

    #[test]
    fn test_client_address_falls_back_to_peer() {
        let ext = peer(192, 168, 1, 5, true);
        assert_eq!(
            client_address(&HeaderMap::new(), &ext).as_deref(),
            Some("192.168.1.5")
        );
    }

    #[test]
    fn test_client_address_ignores_blank_forwarded() {
        let h = headers(&[("x-forwarded-for", " ")]);
        let mut ext = Extensions::new();
        ext.insert(ProxyTrust(true));
        assert_eq!(client_address(&h, &ext), None);
    }

    #[tokio::test]
    async fn test_request_actor_records_credential_presence_only() {
        let request = axum::http::Request::builder()
            .header("x-forwarded-for", "198.51.100.4")
            .header("user-agent", "bot/1.0")
            .header("x-admin-token", "tok123")
            .extension(ProxyTrust(true))
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();
        let RequestActor(actor) = RequestActor::from_request_parts(&mut parts, &())
            .await
            .unwrap();

        assert_eq!(actor.address.as_deref(), Some("198.51.100.4"));
        assert_eq!(actor.user_agent.as_deref(), Some("bot/1.0"));
        assert!(actor.credential_present);
        assert!(!serde_json::to_string(&actor).unwrap().contains("tok123"));
    }
}
