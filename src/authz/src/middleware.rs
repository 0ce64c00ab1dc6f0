//! axum middleware enforcing permission rules in front of handlers
//!
//! ```no_run
//! use axum::{middleware, routing::get, Router};
//! use gateway_authz::middleware::{enforce_access, AccessGate};
//! use gateway_authz::{EngineConfig, InMemoryPermissionStore, PermissionResolver};
//! use std::net::SocketAddr;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryPermissionStore::new());
//! let gate = AccessGate::new(Arc::new(PermissionResolver::new(EngineConfig::default(), store)));
//!
//! let app = Router::new()
//!     .route("/api/reports/", get(|| async { "reports" }))
//!     .layer(middleware::from_fn_with_state(gate, enforce_access));
//!
//! // Connection info is the only source of the caller's address
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//! # Ok(())
//! # }
//! ```

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::DEFAULT_GROUPS_HEADER;
use crate::engine::{Decision, DenyReason, PermissionResolver};
use crate::types::GroupId;

/// Middleware state
#[derive(Clone)]
pub struct AccessGate {
    resolver: Arc<PermissionResolver>,
    groups_header: HeaderName,
}

impl AccessGate {
    pub fn new(resolver: Arc<PermissionResolver>) -> Self {
        Self {
            resolver,
            groups_header: HeaderName::from_static(DEFAULT_GROUPS_HEADER),
        }
    }

    /// Read caller groups from a different header
    pub fn with_groups_header(mut self, header: HeaderName) -> Self {
        self.groups_header = header;
        self
    }

    pub fn resolver(&self) -> &Arc<PermissionResolver> {
        &self.resolver
    }
}

/// Body of a 403 answer
#[derive(Debug, Serialize)]
pub struct DeniedBody {
    pub error: &'static str,
    pub message: String,
}

/// Access-denied response carrying the reason category only
pub struct AccessDenied(pub DenyReason);

impl IntoResponse for AccessDenied {
    fn into_response(self) -> Response {
        let body = DeniedBody {
            error: self.0.code(),
            message: self.0.to_string(),
        };
        (StatusCode::FORBIDDEN, Json(body)).into_response()
    }
}

/// Comma-separated group list from a header; repeated headers are merged
pub fn groups_from_headers(headers: &HeaderMap, name: &HeaderName) -> BTreeSet<GroupId> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|group| !group.is_empty())
        .map(str::to_string)
        .collect()
}

/// Authorize the request before it reaches the handler
pub async fn enforce_access(State(gate): State<AccessGate>, request: Request, next: Next) -> Response {
    let groups = groups_from_headers(request.headers(), &gate.groups_header);

    // Without connection info no IP restriction can be satisfied
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();

    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    // Methods outside the grantable set are denied (and audited) by the resolver
    let decision = gate
        .resolver
        .authorize_request(&groups, &ip, request.method().as_str(), &path)
        .await;

    match decision {
        Decision::Allow => next.run(request).await,
        Decision::Deny(reason) => AccessDenied(reason).into_response(),
    }
}
