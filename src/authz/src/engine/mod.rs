//! Permission resolver
//!
//! Turns a caller context plus the stored rules for a path into an
//! allow/deny decision, with optional profile caching, audit logging and
//! metrics around the pure evaluation.

pub mod audit;
pub mod cache;
pub mod decision;
pub mod metrics;
pub mod profile;

pub use audit::{AuditEntry, AuditLogger};
pub use cache::{CacheConfig, CacheStats, ProfileCache};
pub use decision::{Decision, DenyReason};
pub use metrics::{EngineMetrics, MetricsCollector};
pub use profile::AccessProfile;

use crate::error::{AuthzError, Result};
use crate::policy::{normalize_path, PermissionStore, StaticPolicyTable};
use crate::types::{CallerContext, GroupId, HttpMethod};

use futures::FutureExt;
use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Resolver configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cache aggregated profiles across requests (stores without a
    /// revision are never cached)
    pub enable_cache: bool,

    pub cache_config: CacheConfig,

    pub enable_metrics: bool,

    pub enable_audit: bool,

    /// Audit entries kept in memory
    pub audit_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_cache: true,
            cache_config: CacheConfig::default(),
            enable_metrics: true,
            enable_audit: true,
            audit_capacity: 1_000,
        }
    }
}

/// Decides whether a caller may use a method on a path
///
/// # Pipeline
///
/// ```text
/// path → normalize → static table? ─┐
///                    └→ cache? → PermissionStore → AccessProfile → evaluate → Decision
///                                                                               ↓
///                                                                   [Metrics] [Audit]
/// ```
///
/// Stateless apart from the optional cache; safe to share across tasks.
pub struct PermissionResolver {
    store: Arc<dyn PermissionStore>,

    /// Code-defined rules that take precedence over the store
    static_policies: StaticPolicyTable,

    cache: Option<ProfileCache>,

    metrics: Option<Arc<MetricsCollector>>,

    audit: Option<Arc<AuditLogger>>,

    config: EngineConfig,
}

impl PermissionResolver {
    /// Create a resolver over a permission store
    pub fn new(config: EngineConfig, store: Arc<dyn PermissionStore>) -> Self {
        let cache = config
            .enable_cache
            .then(|| ProfileCache::new(config.cache_config.clone()));
        let metrics = config
            .enable_metrics
            .then(|| Arc::new(MetricsCollector::new()));
        let audit = config
            .enable_audit
            .then(|| Arc::new(AuditLogger::new(config.audit_capacity)));

        info!(
            "PermissionResolver initialized with cache={}, metrics={}, audit={}",
            config.enable_cache, config.enable_metrics, config.enable_audit
        );

        Self {
            store,
            static_policies: StaticPolicyTable::new(),
            cache,
            metrics,
            audit,
            config,
        }
    }

    /// Attach code-defined policies
    pub fn with_static_policies(mut self, table: StaticPolicyTable) -> Self {
        self.static_policies = table;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Authorize a request
    ///
    /// Never fails: a store error or panic becomes
    /// [`DenyReason::StoreUnavailable`].
    pub async fn authorize(&self, ctx: &CallerContext) -> Decision {
        let start = Instant::now();
        let path = normalize_path(&ctx.path);

        debug!(
            "Authorization request: method={}, path={}, ip={}, groups={}",
            ctx.method,
            path,
            ctx.ip,
            ctx.groups.len()
        );

        let lookup = AssertUnwindSafe(self.resolve_profile(path))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(AuthzError::Internal("rule lookup panicked".to_string())));

        let decision = match lookup {
            Ok(profile) => {
                debug!(
                    "Profile for {}: {} rules, ip_restricted={}",
                    path,
                    profile.rule_count(),
                    profile.is_ip_restricted()
                );
                profile.evaluate(&ctx.groups, &ctx.ip, ctx.method)
            }
            Err(e) => {
                warn!("Permission store unavailable for {}: {}", path, e);
                Decision::store_unavailable(e.to_string())
            }
        };

        self.finalize_decision(ctx.method.as_str(), &ctx.ip, path, &decision, start)
            .await;
        decision
    }

    /// Authorize from raw request parts
    ///
    /// A method outside GET/POST/PUT/PATCH/DELETE can never be granted; it
    /// is denied without a store lookup but still audited and counted.
    pub async fn authorize_request(
        &self,
        groups: &BTreeSet<GroupId>,
        ip: &str,
        method: &str,
        path: &str,
    ) -> Decision {
        let method = match method.parse::<HttpMethod>() {
            Ok(method) => method,
            Err(_) => {
                let start = Instant::now();
                let path = normalize_path(path);
                debug!("Denying ungrantable method {:?} on {}", method, path);

                let decision = Decision::no_matching_group(false);
                self.finalize_decision(method, ip, path, &decision, start).await;
                return decision;
            }
        };

        let ctx = CallerContext {
            groups: groups.clone(),
            ip: ip.to_string(),
            method,
            path: path.to_string(),
        };
        self.authorize(&ctx).await
    }

    /// Methods a caller may use on a path
    pub async fn effective_methods(
        &self,
        groups: &BTreeSet<GroupId>,
        ip: &str,
        path: &str,
    ) -> Result<Vec<HttpMethod>> {
        let profile = self.resolve_profile(path).await?;
        Ok(profile.permitted_methods(groups, ip))
    }

    /// Aggregated profile for a path, from the static table, the cache or
    /// the store, in that order
    pub async fn resolve_profile(&self, path: &str) -> Result<Arc<AccessProfile>> {
        let path = normalize_path(path);

        if let Some(rules) = self.static_policies.rules_for(path) {
            debug!("Static policy governs {}", path);
            return Ok(Arc::new(AccessProfile::from_rules(rules)));
        }

        // Read before the rules so a concurrent write leaves the entry stale
        let revision = match &self.cache {
            Some(_) => self.store.revision().await,
            None => None,
        };

        if let (Some(cache), Some(revision)) = (&self.cache, revision) {
            if let Some(profile) = cache.get(path, revision) {
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_hit();
                }
                debug!("Cache hit for {}", path);
                return Ok(profile);
            }

            if let Some(metrics) = &self.metrics {
                metrics.record_cache_miss();
            }
        }

        let rules = self.store.find_rules_for_path(path).await?;
        let profile = Arc::new(AccessProfile::from_rules(&rules));

        if let (Some(cache), Some(revision)) = (&self.cache, revision) {
            cache.put(path, revision, Arc::clone(&profile));
        }

        Ok(profile)
    }

    /// Drop every cached profile
    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
            info!("Profile cache invalidated");
        }
    }

    pub async fn metrics(&self) -> Option<EngineMetrics> {
        match &self.metrics {
            Some(metrics) => Some(metrics.get_metrics().await),
            None => None,
        }
    }

    /// Metrics in Prometheus text format (empty when metrics are off)
    pub async fn export_prometheus(&self) -> String {
        match &self.metrics {
            Some(metrics) => metrics.export_prometheus().await,
            None => String::new(),
        }
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(ProfileCache::stats)
    }

    /// Most recent audit entries, newest last
    pub async fn recent_audit(&self, limit: usize) -> Vec<AuditEntry> {
        match &self.audit {
            Some(audit) => audit.recent(limit).await,
            None => Vec::new(),
        }
    }

    async fn finalize_decision(
        &self,
        method: &str,
        ip: &str,
        path: &str,
        decision: &Decision,
        start: Instant,
    ) {
        let latency = start.elapsed();

        if let Some(metrics) = &self.metrics {
            metrics.record_latency(latency).await;
            metrics.record_decision(decision);
        }

        if let Some(audit) = &self.audit {
            audit.log_decision(method, ip, path, decision, latency).await;
        }

        debug!(
            "Decision: {} for {} {} ({:?})",
            decision.code(),
            method,
            path,
            latency
        );
    }
}
