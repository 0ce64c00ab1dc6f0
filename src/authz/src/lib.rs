//! # Gateway Authorization Core
//!
//! Decides, per incoming HTTP request, whether the caller's groups (and for
//! some resources, source IP address) authorize the requested path and
//! method.
//!
//! ## Features
//!
//! - **Per-path rules** granting methods to groups, with an optional IP
//!   allow-list unioned across every rule of the path
//! - **Fail-closed** resolution: unknown paths, missing groups and store
//!   faults all deny, with distinguishable reasons
//! - **Static policies** defined in code that take precedence over the store
//! - **Pluggable storage**: in-memory or PostgreSQL
//! - **Profile caching** invalidated by store revision
//! - **axum middleware** and a forward-auth server
//!
//! ## Example
//!
//! ```rust
//! use gateway_authz::{
//!     CallerContext, Decision, EngineConfig, HttpMethod, InMemoryPermissionStore,
//!     PermissionResolver, PermissionRule,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemoryPermissionStore::with_rules(vec![
//!         PermissionRule::new("/api/reports/")
//!             .allow(HttpMethod::Get)
//!             .group("analysts")
//!             .ip("192.168.1.10"),
//!     ])
//!     .await?;
//!
//!     let resolver = PermissionResolver::new(EngineConfig::default(), Arc::new(store));
//!
//!     let ctx = CallerContext::new("192.168.1.10", HttpMethod::Get, "/api/reports/?year=2024")
//!         .with_group("analysts");
//!
//!     assert_eq!(resolver.authorize(&ctx).await, Decision::Allow);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod middleware;
pub mod policy;
pub mod types;

// Re-export commonly used types
pub use config::ServerConfig;
pub use engine::{AccessProfile, Decision, DenyReason, EngineConfig, PermissionResolver};
pub use error::{AuthzError, Result};
pub use policy::{
    normalize_path, InMemoryPermissionStore, MethodFlags, PermissionRule, PermissionStore,
    StaticPolicyTable,
};
pub use types::{CallerContext, GroupId, HttpMethod};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
