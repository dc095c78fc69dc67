//! Settings API endpoints

use axum::extract::State;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::api::extractors::{JsonBody, RequestActor, ValidatedQuery};
use crate::api::types::{ApiError, ErrorBody};
use crate::core::constants::DEFAULT_AUDIT_PAGE_SIZE;
use crate::domain::audit::AuditEntry;
use crate::domain::settings::{Configuration, SettingsStore, StorageStatus, UpdateOutcome};

pub const SETTINGS_PATH: &str = "/api/v1/settings";
pub const RESET_PATH: &str = "/api/v1/settings/reset";
pub const AUDIT_PATH: &str = "/api/v1/settings/audit";
pub const REINITIALIZE_PATH: &str = "/api/v1/settings/storage/reinitialize";

/// Shared state for Settings API endpoints
#[derive(Clone)]
pub struct SettingsApiState {
    pub settings: SettingsStore,
}

/// Read-only settings routes
pub fn read_routes(settings: SettingsStore) -> Router<()> {
    Router::new()
        .route(SETTINGS_PATH, get(get_settings))
        .with_state(SettingsApiState { settings })
}

/// Routes that change settings or storage; the caller adds the admin guard
pub fn write_routes(settings: SettingsStore) -> Router<()> {
    Router::new()
        .route(SETTINGS_PATH, put(update_settings))
        .route(RESET_PATH, post(reset_settings))
        .route(REINITIALIZE_PATH, post(reinitialize_storage))
        .with_state(SettingsApiState { settings })
}

/// Audit log routes; the caller adds the admin guard
pub fn audit_routes(settings: SettingsStore) -> Router<()> {
    Router::new()
        .route(AUDIT_PATH, get(read_audit))
        .with_state(SettingsApiState { settings })
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SettingsResponse {
    pub ok: bool,
    /// Current settings, secrets masked
    #[schema(value_type = Object)]
    pub settings: Configuration,
    #[schema(value_type = Object)]
    pub storage: StorageStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UpdateResponse {
    pub ok: bool,
    /// Settings now in effect, secrets masked
    #[schema(value_type = Object)]
    pub settings: Configuration,
    /// Keys whose stored value changed
    pub changed: Vec<String>,
    /// False when the change was saved but the audit log could not record it
    pub audited: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StorageResponse {
    pub ok: bool,
    #[schema(value_type = Object)]
    pub storage: StorageStatus,
    pub audited: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuditResponse {
    pub ok: bool,
    pub page: usize,
    pub page_size: usize,
    /// Entries in the active log file
    pub total: usize,
    #[schema(value_type = Vec<Object>)]
    pub entries: Vec<AuditEntry>,
}

fn default_page_size() -> usize {
    DEFAULT_AUDIT_PAGE_SIZE
}

/// Audit pagination. `page` is 0-based; `pageSize` above the configured
/// maximum is clamped.
#[derive(Debug, Deserialize, Validate, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query, rename_all = "camelCase")]
pub struct AuditQuery {
    #[serde(default)]
    pub page: usize,
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, message = "pageSize must be at least 1"))]
    pub page_size: usize,
}

impl UpdateResponse {
    fn masked(store: &SettingsStore, outcome: UpdateOutcome) -> Self {
        Self {
            ok: true,
            settings: store.secrets().mask(&outcome.config),
            changed: outcome.changed,
            audited: outcome.audited,
        }
    }
}

/// Get current settings with secrets masked
#[utoipa::path(
    get,
    path = "/api/v1/settings",
    tag = "settings",
    responses(
        (status = 200, description = "Current settings", body = SettingsResponse),
        (status = 429, description = "Rate limited", body = ErrorBody)
    )
)]
pub async fn get_settings(State(state): State<SettingsApiState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        ok: true,
        settings: state.settings.masked(),
        storage: state.settings.status(),
    })
}

/// Apply a partial update
///
/// Secret fields sent as `""`, `null` or the mask sentinel keep their value.
#[utoipa::path(
    put,
    path = "/api/v1/settings",
    tag = "settings",
    request_body(content = Object, description = "Partial key to value map"),
    responses(
        (status = 200, description = "Settings updated", body = UpdateResponse),
        (status = 400, description = "Unknown key or wrong type", body = ErrorBody),
        (status = 401, description = "Admin credential missing or wrong", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
        (status = 503, description = "Backend unavailable", body = ErrorBody)
    )
)]
pub async fn update_settings(
    State(state): State<SettingsApiState>,
    RequestActor(actor): RequestActor,
    JsonBody(partial): JsonBody<Map<String, Value>>,
) -> Result<Json<UpdateResponse>, ApiError> {
    let outcome = state.settings.update(&partial, actor).await?;
    Ok(Json(UpdateResponse::masked(&state.settings, outcome)))
}

/// Restore defaults, secrets included
#[utoipa::path(
    post,
    path = "/api/v1/settings/reset",
    tag = "settings",
    responses(
        (status = 200, description = "Settings reset", body = UpdateResponse),
        (status = 401, description = "Admin credential missing or wrong", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
        (status = 503, description = "Backend unavailable", body = ErrorBody)
    )
)]
pub async fn reset_settings(
    State(state): State<SettingsApiState>,
    RequestActor(actor): RequestActor,
) -> Result<Json<UpdateResponse>, ApiError> {
    let outcome = state.settings.reset(actor).await?;
    Ok(Json(UpdateResponse::masked(&state.settings, outcome)))
}

/// Read the settings audit log, newest first
#[utoipa::path(
    get,
    path = "/api/v1/settings/audit",
    tag = "settings",
    params(AuditQuery),
    responses(
        (status = 200, description = "Audit entries", body = AuditResponse),
        (status = 400, description = "Invalid pagination", body = ErrorBody),
        (status = 401, description = "Admin credential missing or wrong", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody)
    )
)]
pub async fn read_audit(
    State(state): State<SettingsApiState>,
    query: ValidatedQuery<AuditQuery>,
) -> Result<Json<AuditResponse>, ApiError> {
    let page = state
        .settings
        .audit()
        .read(query.page, query.page_size)
        .await?;

    Ok(Json(AuditResponse {
        ok: true,
        page: page.page,
        page_size: page.page_size,
        total: page.total,
        entries: page.entries,
    }))
}

/// Re-run backend selection, promoting out of fallback when possible
#[utoipa::path(
    post,
    path = "/api/v1/settings/storage/reinitialize",
    tag = "settings",
    responses(
        (status = 200, description = "Storage status after selection", body = StorageResponse),
        (status = 401, description = "Admin credential missing or wrong", body = ErrorBody),
        (status = 429, description = "Rate limited", body = ErrorBody),
        (status = 503, description = "Backend unavailable", body = ErrorBody)
    )
)]
pub async fn reinitialize_storage(
    State(state): State<SettingsApiState>,
    RequestActor(actor): RequestActor,
) -> Result<Json<StorageResponse>, ApiError> {
    let outcome = state.settings.reinitialize(actor).await?;
    Ok(Json(StorageResponse {
        ok: true,
        storage: outcome.status,
        audited: outcome.audited,
    }))
}
