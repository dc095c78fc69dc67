//! Health check endpoint

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use utoipa::ToSchema;

use crate::data::ratelimit::RateLimiter;
use crate::domain::settings::{SettingsStore, StorageMode, StorageStatus};

#[derive(Clone)]
pub struct HealthState {
    pub settings: SettingsStore,
    pub rate_limiter: Option<Arc<RateLimiter>>,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when serving from the fallback backend or the
    /// rate limit store is not answering
    pub status: &'static str,
    pub version: &'static str,
    #[schema(value_type = Object)]
    pub storage: StorageStatus,
    /// `memory`, `redis` or `disabled`
    pub rate_limit_backend: &'static str,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    let storage = state.settings.status();
    let (rate_limit_backend, limiter_healthy) = match &state.rate_limiter {
        Some(limiter) => (limiter.backend_name(), limiter.is_healthy().await),
        None => ("disabled", true),
    };

    let status = if storage.mode == StorageMode::Primary && limiter_healthy {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        storage,
        rate_limit_backend,
    })
}
