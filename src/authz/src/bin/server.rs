//! # Gateway Authorization Server
//!
//! Forward-auth service for an API gateway: the gateway asks `/v1/check`
//! before routing a request to a protected backend.
//!
//! ## Endpoints
//!
//! - `POST /v1/check` - Authorization check (200 allow, 403 deny)
//! - `GET /v1/forward-auth` - Gateway forward-auth from `X-Forwarded-*` headers
//! - `POST /v1/permissions` - Methods a caller may use on a path
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics (metrics port)
//!
//! ## Configuration
//!
//! Environment variables:
//! - `PORT` - HTTP server port (default: 8080)
//! - `METRICS_PORT` - Metrics server port (default: 9090)
//! - `RUST_LOG` - Log level (default: info)
//! - `CACHE_ENABLED` / `CACHE_SIZE` / `CACHE_TTL` - Profile cache
//! - `DATABASE_URL` - PostgreSQL permission store
//! - `RULES_FILE` - JSON rules for the in-memory store
//! - `GROUPS_HEADER` - Header carrying caller groups (default: x-auth-groups)

use anyhow::Context;
use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    serve, Router,
};
use gateway_authz::middleware::{groups_from_headers, AccessDenied};
use gateway_authz::{
    normalize_path, Decision, DenyReason, HttpMethod, InMemoryPermissionStore, PermissionResolver,
    PermissionStore, ServerConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared application state
#[derive(Clone)]
struct AppState {
    resolver: Arc<PermissionResolver>,
    groups_header: HeaderName,
    start_time: std::time::Instant,
}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

/// Application error type
#[derive(Debug)]
enum AppError {
    Unavailable(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", msg),
        };

        let body = Json(ErrorResponse {
            error: error.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

impl From<gateway_authz::AuthzError> for AppError {
    fn from(err: gateway_authz::AuthzError) -> Self {
        AppError::Unavailable(err.to_string())
    }
}

/// Authorization check request sent by the gateway
#[derive(Debug, Deserialize)]
struct CheckRequest {
    #[serde(default)]
    groups: BTreeSet<String>,
    ip: String,
    method: String,
    path: String,
}

/// Authorization check response
#[derive(Debug, Serialize)]
struct CheckResponse {
    allowed: bool,
    decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PermissionsRequest {
    #[serde(default)]
    groups: BTreeSet<String>,
    ip: String,
    path: String,
}

#[derive(Debug, Serialize)]
struct PermissionsResponse {
    path: String,
    methods: Vec<HttpMethod>,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    uptime_seconds: u64,
    version: String,
}

/// Metrics response (Prometheus format)
struct MetricsResponse {
    metrics: String,
}

impl IntoResponse for MetricsResponse {
    fn into_response(self) -> Response {
        (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            self.metrics,
        )
            .into_response()
    }
}

/// POST /v1/check - Check authorization
async fn check_authorization(
    State(state): State<AppState>,
    Json(req): Json<CheckRequest>,
) -> (StatusCode, Json<CheckResponse>) {
    let decision = state
        .resolver
        .authorize_request(&req.groups, &req.ip, &req.method, &req.path)
        .await;

    let response = match &decision {
        Decision::Allow => CheckResponse {
            allowed: true,
            decision: "allow",
            reason: None,
            message: None,
        },
        Decision::Deny(reason) => CheckResponse {
            allowed: false,
            decision: "deny",
            reason: Some(reason.code()),
            message: Some(reason.to_string()),
        },
    };

    info!(
        "Authorization decision: {} {} {} -> {}",
        req.method,
        req.path,
        req.ip,
        decision.code()
    );

    let status = if response.allowed {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };

    (status, Json(response))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
}

/// Client address as observed by the gateway
///
/// Gateways append the peer they accepted the connection from, so only the
/// right-most `X-Forwarded-For` entry is trustworthy; anything to its left
/// is whatever the client sent.
fn forwarded_client_ip(headers: &HeaderMap) -> String {
    headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .last()
        .unwrap_or_default()
        .to_string()
}

/// GET /v1/forward-auth - Check the request the gateway is about to route
async fn forward_auth(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let groups = groups_from_headers(&headers, &state.groups_header);
    let ip = forwarded_client_ip(&headers);

    let (Some(method), Some(uri)) = (
        header_str(&headers, "x-forwarded-method"),
        header_str(&headers, "x-forwarded-uri"),
    ) else {
        warn!("Forward-auth request without X-Forwarded-Method/X-Forwarded-Uri, denying");
        return AccessDenied(DenyReason::NoMatchingGroup { no_rule: false }).into_response();
    };

    match state.resolver.authorize_request(&groups, &ip, method, uri).await {
        Decision::Allow => StatusCode::OK.into_response(),
        Decision::Deny(reason) => AccessDenied(reason).into_response(),
    }
}

/// POST /v1/permissions - List permitted methods
async fn effective_permissions(
    State(state): State<AppState>,
    Json(req): Json<PermissionsRequest>,
) -> Result<Json<PermissionsResponse>, AppError> {
    let methods = state
        .resolver
        .effective_methods(&req.groups, &req.ip, &req.path)
        .await?;

    Ok(Json(PermissionsResponse {
        path: normalize_path(&req.path).to_string(),
        methods,
    }))
}

/// GET /health - Health check endpoint
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: gateway_authz::VERSION.to_string(),
    })
}

/// GET /metrics - Prometheus metrics endpoint
async fn metrics(State(state): State<AppState>) -> MetricsResponse {
    let uptime = state.start_time.elapsed().as_secs();

    let metrics = format!(
        "# HELP authz_uptime_seconds Server uptime in seconds\n\
         # TYPE authz_uptime_seconds gauge\n\
         authz_uptime_seconds {}\n\
         \n\
         {}",
        uptime,
        state.resolver.export_prometheus().await
    );

    MetricsResponse { metrics }
}

/// Create the HTTP router with all endpoints
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace = TraceLayer::new_for_http()
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    Router::new()
        .route("/v1/check", post(check_authorization))
        .route("/v1/forward-auth", get(forward_auth))
        .route("/v1/permissions", post(effective_permissions))
        .route("/health", get(health_check))
        .layer(ServiceBuilder::new().layer(trace).layer(cors))
        .with_state(state)
}

/// Create the metrics router
fn create_metrics_router(state: AppState) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Pick the permission store from configuration
async fn build_store(config: &ServerConfig) -> anyhow::Result<Arc<dyn PermissionStore>> {
    if let Some(url) = &config.database_url {
        #[cfg(feature = "postgres")]
        {
            info!("Using PostgreSQL permission store");
            let store = gateway_authz::policy::PostgresPermissionStore::new(url)
                .await
                .context("connecting to permission database")?;
            store
                .run_migrations()
                .await
                .context("running permission migrations")?;
            return Ok(Arc::new(store));
        }

        #[cfg(not(feature = "postgres"))]
        {
            let _ = url;
            anyhow::bail!("DATABASE_URL set but the postgres feature is disabled");
        }
    }

    if let Some(path) = &config.rules_file {
        info!("Loading permission rules from {}", path.display());
        let store = InMemoryPermissionStore::from_json_file(path)
            .await
            .with_context(|| format!("loading rules from {}", path.display()))?;
        info!("Loaded {} permission rules", store.len().await);
        return Ok(Arc::new(store));
    }

    warn!("No DATABASE_URL or RULES_FILE configured; every request will be denied");
    Ok(Arc::new(InMemoryPermissionStore::new()))
}

/// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Starting graceful shutdown");
}

/// Main server entrypoint
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Gateway Authorization Server v{}", gateway_authz::VERSION);

    let config = ServerConfig::from_env().context("reading configuration")?;

    info!("Configuration:");
    info!("  Address: {}", config.bind_address());
    info!("  Metrics Address: {}", config.metrics_bind_address());
    info!("  Cache: enabled={} size={} ttl={}s", config.cache_enabled, config.cache_size, config.cache_ttl_secs);

    let store = build_store(&config).await?;
    let resolver = PermissionResolver::new(config.engine_config(), store);

    // Validated by ServerConfig::from_env
    let groups_header = HeaderName::try_from(config.groups_header.as_str())
        .context("parsing GROUPS_HEADER")?;

    let state = AppState {
        resolver: Arc::new(resolver),
        groups_header,
        start_time: std::time::Instant::now(),
    };

    let app = create_router(state.clone());
    let metrics_app = create_metrics_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("binding {}", config.bind_address()))?;
    let metrics_listener = tokio::net::TcpListener::bind(config.metrics_bind_address())
        .await
        .with_context(|| format!("binding {}", config.metrics_bind_address()))?;

    info!("Starting HTTP server on {}", config.bind_address());
    info!("Starting metrics server on {}", config.metrics_bind_address());

    let server = serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    let metrics_server = serve(metrics_listener, metrics_app.into_make_service())
        .with_graceful_shutdown(shutdown_signal());

    tokio::try_join!(
        async {
            server.await.map_err(|e| {
                error!("HTTP server error: {}", e);
                e
            })
        },
        async {
            metrics_server.await.map_err(|e| {
                error!("Metrics server error: {}", e);
                e
            })
        }
    )?;

    info!("Servers shut down gracefully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use gateway_authz::{AuthzError, EngineConfig, PermissionRule};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct UnreachableStore;

    #[async_trait]
    impl PermissionStore for UnreachableStore {
        async fn find_rules_for_path(
            &self,
            _path: &str,
        ) -> gateway_authz::Result<Vec<gateway_authz::PermissionRule>> {
            Err(AuthzError::DatabaseError("connection refused".to_string()))
        }
    }

    fn state_with(store: Arc<dyn PermissionStore>) -> AppState {
        AppState {
            resolver: Arc::new(PermissionResolver::new(EngineConfig::default(), store)),
            groups_header: HeaderName::from_static(gateway_authz::config::DEFAULT_GROUPS_HEADER),
            start_time: std::time::Instant::now(),
        }
    }

    async fn test_state() -> AppState {
        let store = InMemoryPermissionStore::with_rules(vec![
            PermissionRule::new("/api/reports/")
                .allow(HttpMethod::Get)
                .group("analysts")
                .ip("10.0.0.1"),
            PermissionRule::new("/").allow(HttpMethod::Get).group("users"),
        ])
        .await
        .unwrap();
        state_with(Arc::new(store))
    }

    fn forward_request(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().method("GET").uri("/v1/forward-auth");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    fn json_request(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_forwarded_client_ip_uses_gateway_entry() {
        let mut headers = HeaderMap::new();
        headers.append("x-forwarded-for", "10.0.0.1, 172.16.0.4".parse().unwrap());
        headers.append("x-forwarded-for", "9.9.9.9".parse().unwrap());
        assert_eq!(forwarded_client_ip(&headers), "9.9.9.9");

        assert_eq!(forwarded_client_ip(&HeaderMap::new()), "");
    }

    #[tokio::test]
    async fn test_forward_auth_allows() {
        let response = create_router(test_state().await)
            .oneshot(forward_request(&[
                ("x-forwarded-method", "GET"),
                ("x-forwarded-uri", "/api/reports/?year=2024"),
                ("x-forwarded-for", "10.0.0.1"),
                ("x-auth-groups", "analysts"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forward_auth_ignores_client_supplied_addresses() {
        // The client forged the allowed address; the gateway appended the real peer
        let response = create_router(test_state().await)
            .oneshot(forward_request(&[
                ("x-forwarded-method", "GET"),
                ("x-forwarded-uri", "/api/reports/"),
                ("x-forwarded-for", "10.0.0.1, 9.9.9.9"),
                ("x-auth-groups", "analysts"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["error"], "invalid_ip");
        assert_eq!(body["message"], "Invalid IP: 9.9.9.9");
    }

    #[tokio::test]
    async fn test_forward_auth_denies_without_uri() {
        let response = create_router(test_state().await)
            .oneshot(forward_request(&[
                ("x-forwarded-method", "GET"),
                ("x-forwarded-for", "10.0.0.1"),
                ("x-auth-groups", "users"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(response).await["error"], "no_matching_group");
    }

    #[tokio::test]
    async fn test_forward_auth_denies_without_method() {
        let response = create_router(test_state().await)
            .oneshot(forward_request(&[
                ("x-forwarded-uri", "/"),
                ("x-auth-groups", "users"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_forward_auth_audits_unrecognized_method() {
        let state = test_state().await;
        let response = create_router(state.clone())
            .oneshot(forward_request(&[
                ("x-forwarded-method", "HEAD"),
                ("x-forwarded-uri", "/"),
                ("x-auth-groups", "users"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let audit = state.resolver.recent_audit(1).await;
        assert_eq!(audit[0].method, "HEAD");
        assert_eq!(audit[0].reason, "no_matching_group");
    }

    #[tokio::test]
    async fn test_check_maps_decisions_to_status() {
        let app = create_router(test_state().await);

        let allowed = app
            .clone()
            .oneshot(json_request(
                "/v1/check",
                json!({"groups": ["analysts"], "ip": "10.0.0.1", "method": "get", "path": "/api/reports/"}),
            ))
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
        let body = body_json(allowed).await;
        assert_eq!(body["allowed"], true);
        assert_eq!(body["decision"], "allow");

        let denied = app
            .oneshot(json_request(
                "/v1/check",
                json!({"ip": "10.0.0.1", "method": "GET", "path": "/api/unknown/"}),
            ))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::FORBIDDEN);
        let body = body_json(denied).await;
        assert_eq!(body["allowed"], false);
        assert_eq!(body["reason"], "no_rule");
        assert_eq!(body["message"], "No rule for resource");
    }

    #[tokio::test]
    async fn test_permissions_lists_methods() {
        let response = create_router(test_state().await)
            .oneshot(json_request(
                "/v1/permissions",
                json!({"groups": ["analysts"], "ip": "10.0.0.1", "path": "/api/reports/?x=1"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["path"], "/api/reports/");
        assert_eq!(body["methods"], json!(["GET"]));
    }

    #[tokio::test]
    async fn test_permissions_store_failure_is_503() {
        let app = create_router(state_with(Arc::new(UnreachableStore)));

        let response = app
            .clone()
            .oneshot(json_request(
                "/v1/permissions",
                json!({"groups": ["analysts"], "ip": "10.0.0.1", "path": "/api/reports/"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "store_unavailable");

        let check = app
            .oneshot(json_request(
                "/v1/check",
                json!({"groups": ["analysts"], "ip": "10.0.0.1", "method": "GET", "path": "/api/reports/"}),
            ))
            .await
            .unwrap();
        assert_eq!(check.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(check).await["reason"], "store_unavailable");
    }

    #[tokio::test]
    async fn test_health() {
        let response = create_router(test_state().await)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "healthy");
    }
}
