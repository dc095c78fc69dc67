//! Shared API types
//!
//! Every failure leaves the API as `{"ok": false, "reason": ...}` with a
//! stable reason string. Internal detail is logged, never returned.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::audit::AuditError;
use crate::domain::settings::SettingsError;

pub const REASON_VALIDATION: &str = "validation_error";
pub const REASON_PERSISTENCE: &str = "persistence_error";
pub const REASON_INTEGRITY: &str = "integrity_error";
pub const REASON_INVALID_REQUEST: &str = "invalid_request";
pub const REASON_RATE_LIMITED: &str = "rate_limited";
pub const REASON_UNAUTHORIZED: &str = "unauthorized";
pub const REASON_NOT_FOUND: &str = "not_found";
pub const REASON_INTERNAL: &str = "internal_error";

/// Error body shared by every endpoint
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub ok: bool,
    #[schema(value_type = String)]
    pub reason: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorBody {
    pub fn new(reason: &'static str) -> Self {
        Self {
            ok: false,
            reason,
            field: None,
            message: None,
        }
    }
}

/// Standard API error response
#[derive(Debug)]
pub enum ApiError {
    /// A key or value in the request was rejected; nothing changed
    Validation { field: String, detail: &'static str },
    /// Body or query could not be parsed
    InvalidRequest { message: String },
    NotFound,
    /// Backend write or read failed
    Persistence,
    /// Stored data failed its integrity check
    Integrity,
    Internal,
}

impl ApiError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Persistence => StatusCode::SERVICE_UNAVAILABLE,
            Self::Integrity | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(self) -> ErrorBody {
        match self {
            Self::Validation { field, detail } => ErrorBody {
                field: Some(field),
                message: Some(detail.to_string()),
                ..ErrorBody::new(REASON_VALIDATION)
            },
            Self::InvalidRequest { message } => ErrorBody {
                message: Some(message),
                ..ErrorBody::new(REASON_INVALID_REQUEST)
            },
            Self::NotFound => ErrorBody::new(REASON_NOT_FOUND),
            Self::Persistence => ErrorBody::new(REASON_PERSISTENCE),
            Self::Integrity => ErrorBody::new(REASON_INTEGRITY),
            Self::Internal => ErrorBody::new(REASON_INTERNAL),
        }
    }
}

impl From<SettingsError> for ApiError {
    fn from(e: SettingsError) -> Self {
        match e {
            SettingsError::Validation { field, reason } => {
                tracing::debug!(%field, reason, "Settings write rejected");
                Self::Validation {
                    field,
                    detail: reason,
                }
            }
            SettingsError::Persistence(e) => {
                tracing::error!(error = %e, backend = e.backend(), "Settings persistence failed");
                Self::Persistence
            }
            SettingsError::Integrity(e) => {
                tracing::error!(error = %e, "Settings integrity check failed");
                Self::Integrity
            }
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(e: AuditError) -> Self {
        tracing::error!(error = %e, "Audit log read failed");
        Self::Internal
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(self.body())).into_response()
    }
}
