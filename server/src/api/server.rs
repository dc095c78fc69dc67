//! API server initialization

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Extension, Router};
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::admin::{AdminGuard, require_admin};
use super::extractors::ProxyTrust;
use super::openapi::{openapi_json, swagger_ui_html};
use super::rate_limit::{RateLimitState, rate_limit_middleware};
use super::routes::health::{self, HealthState};
use super::routes::settings;
use super::types::ApiError;
use crate::core::CoreApp;
use crate::core::constants::DEFAULT_BODY_LIMIT;
use crate::data::ratelimit::{RateLimiter, Scope};
use crate::domain::settings::SettingsStore;

/// Services the HTTP layer needs
#[derive(Clone)]
pub struct ApiContext {
    pub settings: SettingsStore,
    /// `None` when rate limiting is disabled
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub admin: AdminGuard,
    /// Take caller addresses from `X-Forwarded-For`
    pub trust_proxy: bool,
}

impl ApiContext {
    fn rate_limited(&self, routes: Router, scope: Scope) -> Router {
        match &self.rate_limiter {
            Some(limiter) => routes.layer(axum::middleware::from_fn_with_state(
                RateLimitState {
                    limiter: limiter.clone(),
                    scope,
                },
                rate_limit_middleware,
            )),
            None => routes,
        }
    }

    fn admin_only(&self, routes: Router) -> Router {
        routes.layer(axum::middleware::from_fn_with_state(
            self.admin.clone(),
            require_admin,
        ))
    }
}

/// Build the full router.
///
/// The rate limit layer wraps the admin guard, so both run before any
/// handler touches the store.
pub fn router(ctx: &ApiContext) -> Router {
    let settings_routes = ctx.rate_limited(
        settings::read_routes(ctx.settings.clone())
            .merge(ctx.admin_only(settings::write_routes(ctx.settings.clone()))),
        Scope::Settings,
    );

    let audit_routes = ctx.rate_limited(
        ctx.admin_only(settings::audit_routes(ctx.settings.clone())),
        Scope::Audit,
    );

    let health_routes = ctx.rate_limited(
        Router::new()
            .route("/api/v1/health", get(health::health))
            .with_state(HealthState {
                settings: ctx.settings.clone(),
                rate_limiter: ctx.rate_limiter.clone(),
            }),
        Scope::Health,
    );

    Router::new()
        .route("/api/openapi.json", get(openapi_json))
        .route("/api/docs", get(swagger_ui_html))
        .route("/api/docs/", get(swagger_ui_html))
        .merge(settings_routes)
        .merge(audit_routes)
        .merge(health_routes)
        .fallback(handle_404)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(DEFAULT_BODY_LIMIT))
        .layer(Extension(ProxyTrust(ctx.trust_proxy)))
}

async fn handle_404() -> ApiError {
    ApiError::NotFound
}

pub struct ApiServer {
    app: CoreApp,
}

impl ApiServer {
    pub fn new(app: CoreApp) -> Self {
        Self { app }
    }

    /// Serve until shutdown is triggered. Returns CoreApp for graceful shutdown.
    pub async fn start(self) -> Result<CoreApp> {
        let Self { app } = self;

        let shutdown = app.shutdown.clone();
        let host = app.config.server.host.clone();
        let port = app.config.server.port;
        let ip: IpAddr = host
            .parse()
            .with_context(|| format!("Invalid server host: {}", host))?;
        let addr = SocketAddr::new(ip, port);

        let router = router(&ApiContext {
            settings: app.settings.clone(),
            rate_limiter: app.rate_limiter.clone(),
            admin: app.admin.clone(),
            trust_proxy: app.config.server.trust_proxy,
        });

        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        tracing::info!(%addr, "API server listening");

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown.wait())
        .await?;

        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::data::ratelimit::testing::memory_limiter;

    const CALLER: &str = "10.0.0.1";

    async fn test_app(dir: &Path, token: Option<&str>, settings_rate: Option<&str>) -> Router {
        proxied_app(dir, token, settings_rate, false).await
    }

    async fn proxied_app(
        dir: &Path,
        token: Option<&str>,
        settings_rate: Option<&str>,
        trust_proxy: bool,
    ) -> Router {
        let settings = SettingsStore::for_test(dir).await;
        let rate_limiter = settings_rate.map(|rate| Arc::new(memory_limiter(rate).0));
        router(&ApiContext {
            settings,
            rate_limiter,
            admin: AdminGuard::new(token),
            trust_proxy,
        })
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let peer = SocketAddr::new(CALLER.parse().unwrap(), 4000);
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .extension(axum::extract::ConnectInfo(peer));
        if let Some(token) = token {
            builder = builder.header("x-admin-token", token);
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    fn put_settings(token: Option<&str>, body: Value) -> Request<Body> {
        request("PUT", "/api/v1/settings", token, Some(body))
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn header<'a>(response: &'a Response, name: &str) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[tokio::test]
    async fn test_fourth_update_within_a_minute_is_rate_limited() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), None, Some("3/minute")).await;

        let mut statuses = Vec::new();
        let mut remaining = Vec::new();
        let mut last = None;
        for trades in 1..=4 {
            let response = app
                .clone()
                .oneshot(put_settings(None, json!({"max_open_trades": trades})))
                .await
                .unwrap();
            statuses.push(response.status());
            remaining.push(header(&response, "x-ratelimit-remaining").to_string());
            last = Some(response);
        }

        assert_eq!(
            statuses,
            vec![
                StatusCode::OK,
                StatusCode::OK,
                StatusCode::OK,
                StatusCode::TOO_MANY_REQUESTS
            ]
        );
        assert_eq!(remaining, vec!["2", "1", "0", "0"]);

        let denied = last.unwrap();
        assert_eq!(header(&denied, "x-ratelimit-limit"), "3");
        assert_eq!(header(&denied, "retry-after"), "20");
        assert_eq!(
            json_body(denied).await,
            json!({"ok": false, "reason": "rate_limited"})
        );
    }

    fn put_forwarded_for(address: &str, trades: i64) -> Request<Body> {
        let mut request = put_settings(None, json!({"max_open_trades": trades}));
        request
            .headers_mut()
            .insert("x-forwarded-for", address.parse().unwrap());
        request
    }

    #[tokio::test]
    async fn test_forwarded_for_cannot_dodge_rate_limit() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), None, Some("3/minute")).await;

        let mut statuses = Vec::new();
        for n in 1..=6 {
            let response = app
                .clone()
                .oneshot(put_forwarded_for(&format!("198.51.100.{n}"), n))
                .await
                .unwrap();
            statuses.push(response.status());
        }
        assert_eq!(&statuses[..3], &[StatusCode::OK; 3]);
        assert_eq!(&statuses[3..], &[StatusCode::TOO_MANY_REQUESTS; 3]);

        let audit = json_body(
            app.clone()
                .oneshot(request("GET", "/api/v1/settings/audit", None, None))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(audit["entries"][0]["actor"]["address"], CALLER);
    }

    #[tokio::test]
    async fn test_trusted_proxy_address_is_the_identity() {
        let dir = tempfile::tempdir().unwrap();
        let app = proxied_app(dir.path(), None, Some("1/minute"), true).await;

        let first = app
            .clone()
            .oneshot(put_forwarded_for("198.51.100.1", 1))
            .await
            .unwrap();
        let repeat = app
            .clone()
            .oneshot(put_forwarded_for("198.51.100.1", 2))
            .await
            .unwrap();
        let other = app
            .clone()
            .oneshot(put_forwarded_for("198.51.100.2", 3))
            .await
            .unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(repeat.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_denied_update_leaves_settings_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), None, Some("1/minute")).await;

        let first = app
            .clone()
            .oneshot(put_settings(None, json!({"max_open_trades": 5})))
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let second = app
            .clone()
            .oneshot(put_settings(None, json!({"max_open_trades": 9})))
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let store = SettingsStore::for_test(dir.path()).await;
        assert_eq!(
            store.get().get("max_open_trades"),
            Some(&crate::domain::settings::SettingValue::Integer(5))
        );
    }

    #[tokio::test]
    async fn test_admin_token_required_for_updates() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), Some("tok123"), None).await;
        let body = json!({"dry_run": false});

        let missing = app.clone().oneshot(put_settings(None, body.clone())).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            json_body(missing).await,
            json!({"ok": false, "reason": "unauthorized"})
        );

        let granted = app
            .clone()
            .oneshot(put_settings(Some("tok123"), body.clone()))
            .await
            .unwrap();
        assert_eq!(granted.status(), StatusCode::OK);
        assert_eq!(json_body(granted).await["changed"], json!(["dry_run"]));

        let wrong = app.clone().oneshot(put_settings(Some("wrong"), body)).await.unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(wrong).await["reason"], "unauthorized");
    }

    #[tokio::test]
    async fn test_bearer_credential_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), Some("tok123"), None).await;

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/settings/reset")
                    .header("authorization", "Bearer tok123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_reads_skip_admin_guard_but_audit_does_not() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), Some("tok123"), None).await;

        let read = app
            .clone()
            .oneshot(request("GET", "/api/v1/settings", None, None))
            .await
            .unwrap();
        assert_eq!(read.status(), StatusCode::OK);

        let audit = app
            .clone()
            .oneshot(request("GET", "/api/v1/settings/audit", None, None))
            .await
            .unwrap();
        assert_eq!(audit.status(), StatusCode::UNAUTHORIZED);

        for (method, uri) in [
            ("POST", "/api/v1/settings/reset"),
            ("POST", "/api/v1/settings/storage/reinitialize"),
        ] {
            let response = app
                .clone()
                .oneshot(request(method, uri, None, None))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn test_rate_limit_runs_before_admin_guard() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), Some("tok123"), Some("2/minute")).await;

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(put_settings(Some("wrong"), json!({"dry_run": false})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert!(response.headers().contains_key("x-ratelimit-remaining"));
        }

        let response = app
            .oneshot(put_settings(Some("tok123"), json!({"dry_run": false})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_secret_is_masked_and_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), None, None).await;

        let update = app
            .clone()
            .oneshot(put_settings(None, json!({"api_key": "s3cret"})))
            .await
            .unwrap();
        assert_eq!(update.status(), StatusCode::OK);
        let body = json_body(update).await;
        assert_eq!(body["settings"]["api_key"], "********");
        assert_eq!(body["changed"], json!(["api_key"]));
        assert_eq!(body["audited"], true);

        let read = app
            .clone()
            .oneshot(request("GET", "/api/v1/settings", None, None))
            .await
            .unwrap();
        let read = json_body(read).await;
        assert_eq!(read["ok"], true);
        assert_eq!(read["settings"]["api_key"], "********");
        assert_eq!(read["settings"]["api_secret"], "");
        assert!(!read.to_string().contains("s3cret"));

        // Echoing the masked value back keeps the secret
        let echo = app
            .clone()
            .oneshot(put_settings(None, json!({"api_key": "********"})))
            .await
            .unwrap();
        assert_eq!(json_body(echo).await["changed"], json!([]));

        let audit = app
            .clone()
            .oneshot(request("GET", "/api/v1/settings/audit", None, None))
            .await
            .unwrap();
        assert_eq!(audit.status(), StatusCode::OK);
        let audit = json_body(audit).await;
        assert!(!audit.to_string().contains("s3cret"));
        assert_eq!(audit["total"], 1);
        let change = &audit["entries"][0]["changes"]["api_key"];
        assert_eq!(change["old"], "[REDACTED]");
        assert_eq!(change["new"], "[REDACTED]");
        assert_eq!(audit["entries"][0]["actor"]["address"], CALLER);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), None, None).await;

        let unknown = app
            .clone()
            .oneshot(put_settings(None, json!({"leverage": 10, "dry_run": false})))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(unknown).await,
            json!({
                "ok": false,
                "reason": "validation_error",
                "field": "leverage",
                "message": "unknown_key"
            })
        );

        let mistyped = app
            .clone()
            .oneshot(put_settings(None, json!({"max_open_trades": "many"})))
            .await
            .unwrap();
        let body = json_body(mistyped).await;
        assert_eq!(body["field"], "max_open_trades");
        assert_eq!(body["message"], "invalid_type");

        let not_object = app
            .clone()
            .oneshot(put_settings(None, json!(["dry_run"])))
            .await
            .unwrap();
        assert_eq!(not_object.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(not_object).await["reason"], "invalid_request");

        // Nothing was applied by the rejected requests
        let read = app
            .oneshot(request("GET", "/api/v1/settings", None, None))
            .await
            .unwrap();
        assert_eq!(json_body(read).await["settings"]["dry_run"], true);
    }

    #[tokio::test]
    async fn test_reset_restores_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), None, None).await;

        app.clone()
            .oneshot(put_settings(None, json!({"timeframe": "5m", "api_key": "k"})))
            .await
            .unwrap();
        let reset = app
            .oneshot(request("POST", "/api/v1/settings/reset", None, None))
            .await
            .unwrap();
        assert_eq!(reset.status(), StatusCode::OK);
        let body = json_body(reset).await;
        assert_eq!(body["settings"]["timeframe"], "1h");
        assert_eq!(body["settings"]["api_key"], "");
        assert_eq!(body["changed"], json!(["api_key", "timeframe"]));
    }

    #[tokio::test]
    async fn test_audit_pagination_query() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), None, None).await;

        for trades in 1..=3 {
            app.clone()
                .oneshot(put_settings(None, json!({"max_open_trades": trades + 10})))
                .await
                .unwrap();
        }

        let page = app
            .clone()
            .oneshot(request(
                "GET",
                "/api/v1/settings/audit?page=1&pageSize=2",
                None,
                None,
            ))
            .await
            .unwrap();
        let page = json_body(page).await;
        assert_eq!(page["page"], 1);
        assert_eq!(page["page_size"], 2);
        assert_eq!(page["total"], 3);
        assert_eq!(page["entries"].as_array().unwrap().len(), 1);
        assert_eq!(page["entries"][0]["changes"]["max_open_trades"]["new"], 11);

        let bad = app
            .oneshot(request("GET", "/api/v1/settings/audit?pageSize=0", None, None))
            .await
            .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(bad).await["reason"], "invalid_request");
    }

    #[tokio::test]
    async fn test_reinitialize_reports_storage() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), None, None).await;

        let response = app
            .oneshot(request(
                "POST",
                "/api/v1/settings/storage/reinitialize",
                None,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({
                "ok": true,
                "storage": {"mode": "primary", "backend": "file"},
                "audited": true
            })
        );
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), None, Some("30/minute")).await;

        let response = app
            .oneshot(request("GET", "/api/v1/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-limit"), "120");
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["storage"], json!({"mode": "primary", "backend": "file"}));
        assert_eq!(body["rate_limit_backend"], "memory");
    }

    #[tokio::test]
    async fn test_health_without_rate_limiting() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), None, None).await;

        let response = app
            .oneshot(request("GET", "/api/v1/health", None, None))
            .await
            .unwrap();
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
        assert_eq!(json_body(response).await["rate_limit_backend"], "disabled");
    }

    #[tokio::test]
    async fn test_unknown_route_and_docs() {
        let dir = tempfile::tempdir().unwrap();
        let app = test_app(dir.path(), None, None).await;

        let missing = app
            .clone()
            .oneshot(request("GET", "/api/v1/nope", None, None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            json_body(missing).await,
            json!({"ok": false, "reason": "not_found"})
        );

        let doc = app
            .oneshot(request("GET", "/api/openapi.json", None, None))
            .await
            .unwrap();
        assert_eq!(doc.status(), StatusCode::OK);
        assert!(json_body(doc).await["paths"]["/api/v1/settings"].is_object());
    }
}
