//! Permission rules and their storage

use crate::error::{AuthzError, Result};
use crate::types::{GroupId, HttpMethod};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

#[cfg(feature = "postgres")]
pub mod postgres;
pub mod static_table;

#[cfg(feature = "postgres")]
pub use postgres::PostgresPermissionStore;
pub use static_table::StaticPolicyTable;

/// Store-assigned rule identifier
pub type RuleId = u64;

/// Segment marking delete-style sub-routes that share their parent's rule
const DELETE_SEGMENT: &str = "/delete/";

/// Normalize a request path into the key rules are stored under
///
/// Drops the query string (and fragment), then truncates at the first
/// `/delete/` segment so `/api/widgets/delete/42/` resolves against the rule
/// for `/api/widgets/`. No other prefix or wildcard matching exists.
pub fn normalize_path(path: &str) -> &str {
    let end = path.find(|c: char| c == '?' || c == '#').unwrap_or(path.len());
    let path = &path[..end];

    match path.find(DELETE_SEGMENT) {
        Some(idx) => &path[..=idx],
        None => path,
    }
}

/// Per-method grant flags of a rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodFlags {
    #[serde(rename = "GET", default)]
    pub get: bool,
    #[serde(rename = "POST", default)]
    pub post: bool,
    #[serde(rename = "PUT", default)]
    pub put: bool,
    #[serde(rename = "PATCH", default)]
    pub patch: bool,
    #[serde(rename = "DELETE", default)]
    pub delete: bool,
}

impl MethodFlags {
    /// Flags granting exactly the given methods
    pub fn only(methods: &[HttpMethod]) -> Self {
        let mut flags = Self::default();
        for method in methods {
            flags.set(*method, true);
        }
        flags
    }

    pub fn allows(&self, method: HttpMethod) -> bool {
        match method {
            HttpMethod::Get => self.get,
            HttpMethod::Post => self.post,
            HttpMethod::Put => self.put,
            HttpMethod::Patch => self.patch,
            HttpMethod::Delete => self.delete,
        }
    }

    pub fn set(&mut self, method: HttpMethod, value: bool) {
        let flag = match method {
            HttpMethod::Get => &mut self.get,
            HttpMethod::Post => &mut self.post,
            HttpMethod::Put => &mut self.put,
            HttpMethod::Patch => &mut self.patch,
            HttpMethod::Delete => &mut self.delete,
        };
        *flag = value;
    }

    /// Methods flagged true
    pub fn granted(&self) -> impl Iterator<Item = HttpMethod> + '_ {
        HttpMethod::ALL.into_iter().filter(move |m| self.allows(*m))
    }
}

/// One authorization rule: which groups may use which methods on a path,
/// and which source addresses are additionally required
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    /// Path this rule governs (exact-match key, already normalized)
    pub resource_path: String,

    /// Allowed source IP literals; empty means no IP restriction
    #[serde(default, deserialize_with = "null_as_empty")]
    pub allowed_ip_addresses: BTreeSet<String>,

    /// Methods the rule's groups are granted
    #[serde(default)]
    pub method_flags: MethodFlags,

    /// Groups the rule grants to; a rule without groups grants nothing
    #[serde(default, deserialize_with = "null_as_empty")]
    pub groups: BTreeSet<GroupId>,
}

impl PermissionRule {
    /// Create a rule for a path granting nothing yet
    pub fn new(resource_path: impl Into<String>) -> Self {
        Self {
            resource_path: resource_path.into(),
            allowed_ip_addresses: BTreeSet::new(),
            method_flags: MethodFlags::default(),
            groups: BTreeSet::new(),
        }
    }

    /// Flag a method as granted
    pub fn allow(mut self, method: HttpMethod) -> Self {
        self.method_flags.set(method, true);
        self
    }

    /// Attach a group
    pub fn group(mut self, group: impl Into<GroupId>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Require a source IP
    pub fn ip(mut self, ip: impl Into<String>) -> Self {
        self.allowed_ip_addresses.insert(ip.into());
        self
    }

    /// Check the rule can be stored as-is
    pub fn validate(&self) -> Result<()> {
        if !self.resource_path.starts_with('/') {
            return Err(AuthzError::InvalidRule(format!(
                "resource path must start with '/': {:?}",
                self.resource_path
            )));
        }

        if normalize_path(&self.resource_path) != self.resource_path {
            return Err(AuthzError::InvalidRule(format!(
                "resource path is not normalized: {:?}",
                self.resource_path
            )));
        }

        if self.allowed_ip_addresses.iter().any(|ip| ip.trim().is_empty()) {
            return Err(AuthzError::InvalidRule(format!(
                "blank IP address in rule for {}",
                self.resource_path
            )));
        }

        if self.groups.iter().any(|g| g.trim().is_empty()) {
            return Err(AuthzError::InvalidRule(format!(
                "blank group name in rule for {}",
                self.resource_path
            )));
        }

        Ok(())
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Read interface to rule storage
///
/// Implementations must hand out a consistent snapshot of all rules for a
/// path: a lookup never observes half of a multi-rule update.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// All rules whose `resource_path` equals `path` (already normalized)
    ///
    /// Returns an empty vector when no rule exists; ordering is irrelevant.
    async fn find_rules_for_path(&self, path: &str) -> Result<Vec<PermissionRule>>;

    /// Counter bumped by every structural write
    ///
    /// `None` means the store cannot report one and its results must not be
    /// cached across requests.
    async fn revision(&self) -> Option<u64> {
        None
    }
}

#[derive(Debug, Default)]
struct StoreState {
    rules: BTreeMap<RuleId, PermissionRule>,
    next_id: RuleId,
    revision: u64,
}

impl StoreState {
    fn bump(&mut self) {
        self.revision += 1;
    }
}

/// In-memory permission store
///
/// All writes are serialized behind one lock and bump the revision before
/// the lock is released.
pub struct InMemoryPermissionStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryPermissionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
        }
    }

    /// Create a store seeded with rules
    pub async fn with_rules(rules: impl IntoIterator<Item = PermissionRule>) -> Result<Self> {
        let store = Self::new();
        store.replace_all(rules).await?;
        Ok(store)
    }

    /// Load a JSON array of rules from disk
    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await?;
        let rules: Vec<PermissionRule> = serde_json::from_str(&raw)?;

        debug!(
            "Loaded {} permission rules from {}",
            rules.len(),
            path.as_ref().display()
        );

        Self::with_rules(rules).await
    }

    /// Add a rule, returning its id
    pub async fn insert_rule(&self, rule: PermissionRule) -> Result<RuleId> {
        rule.validate()?;

        let mut state = self.state.write().await;
        state.next_id += 1;
        let id = state.next_id;
        state.rules.insert(id, rule);
        state.bump();
        Ok(id)
    }

    /// Remove a rule
    pub async fn remove_rule(&self, id: RuleId) -> Result<PermissionRule> {
        let mut state = self.state.write().await;
        let rule = state.rules.remove(&id).ok_or(AuthzError::RuleNotFound(id))?;
        state.bump();
        Ok(rule)
    }

    /// Attach a group to an existing rule
    pub async fn add_group(&self, id: RuleId, group: impl Into<GroupId>) -> Result<()> {
        let group = group.into();
        if group.trim().is_empty() {
            return Err(AuthzError::InvalidRule("blank group name".to_string()));
        }

        let mut state = self.state.write().await;
        let rule = state.rules.get_mut(&id).ok_or(AuthzError::RuleNotFound(id))?;
        rule.groups.insert(group);
        state.bump();
        Ok(())
    }

    /// Detach a group from an existing rule
    pub async fn remove_group(&self, id: RuleId, group: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let rule = state.rules.get_mut(&id).ok_or(AuthzError::RuleNotFound(id))?;
        rule.groups.remove(group);
        state.bump();
        Ok(())
    }

    /// Atomically swap the whole rule set
    ///
    /// Validation happens before the lock is taken; an invalid rule leaves
    /// the current set untouched.
    pub async fn replace_all(&self, rules: impl IntoIterator<Item = PermissionRule>) -> Result<()> {
        let rules: Vec<PermissionRule> = rules.into_iter().collect();
        for rule in &rules {
            rule.validate()?;
        }

        let mut state = self.state.write().await;
        state.rules.clear();
        for rule in rules {
            state.next_id += 1;
            let id = state.next_id;
            state.rules.insert(id, rule);
        }
        state.bump();
        Ok(())
    }

    /// Number of stored rules
    pub async fn len(&self) -> usize {
        self.state.read().await.rules.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryPermissionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn find_rules_for_path(&self, path: &str) -> Result<Vec<PermissionRule>> {
        let state = self.state.read().await;
        Ok(state
            .rules
            .values()
            .filter(|rule| rule.resource_path == path)
            .cloned()
            .collect())
    }

    async fn revision(&self) -> Option<u64> {
        Some(self.state.read().await.revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_query() {
        assert_eq!(normalize_path("/api/reports/?year=2024"), "/api/reports/");
        assert_eq!(normalize_path("/api/reports/#top"), "/api/reports/");
        assert_eq!(normalize_path("/api/reports/"), "/api/reports/");
    }

    #[test]
    fn test_normalize_delete_subroute() {
        assert_eq!(normalize_path("/api/widgets/delete/42/"), "/api/widgets/");
        assert_eq!(
            normalize_path("/api/backend_permissions/delete/"),
            "/api/backend_permissions/"
        );
        assert_eq!(normalize_path("/api/widgets/delete/42/?force=1"), "/api/widgets/");
    }

    #[test]
    fn test_normalize_only_matches_whole_segment() {
        assert_eq!(normalize_path("/api/undelete/7/"), "/api/undelete/7/");
        assert_eq!(normalize_path("/api/widgets/delete"), "/api/widgets/delete");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for path in ["/a/delete/b/delete/c", "/x/?q=delete/", "/", ""] {
            let once = normalize_path(path);
            assert_eq!(normalize_path(once), once);
        }
    }

    #[test]
    fn test_method_flags() {
        let flags = MethodFlags::only(&[HttpMethod::Get, HttpMethod::Put]);
        assert!(flags.allows(HttpMethod::Get));
        assert!(flags.allows(HttpMethod::Put));
        assert!(!flags.allows(HttpMethod::Post));
        assert_eq!(flags.granted().collect::<Vec<_>>(), vec![HttpMethod::Get, HttpMethod::Put]);
    }

    #[test]
    fn test_rule_json_defaults() {
        let rule: PermissionRule = serde_json::from_str(
            r#"{
                "resource_path": "/api/reports/",
                "allowed_ip_addresses": null,
                "method_flags": {"GET": true},
                "groups": ["analysts"]
            }"#,
        )
        .unwrap();

        assert!(rule.allowed_ip_addresses.is_empty());
        assert!(rule.method_flags.get);
        assert!(!rule.method_flags.delete);
        assert!(rule.groups.contains("analysts"));
    }

    #[test]
    fn test_rule_validation() {
        assert!(PermissionRule::new("/api/x/").validate().is_ok());
        assert!(PermissionRule::new("api/x/").validate().is_err());
        assert!(PermissionRule::new("/api/x/?a=1").validate().is_err());
        assert!(PermissionRule::new("/api/x/delete/1/").validate().is_err());
        assert!(PermissionRule::new("/api/x/").ip(" ").validate().is_err());
        assert!(PermissionRule::new("/api/x/").group("").validate().is_err());
    }

    #[tokio::test]
    async fn test_store_exact_lookup() {
        let store = InMemoryPermissionStore::new();
        store
            .insert_rule(PermissionRule::new("/api/a/").allow(HttpMethod::Get).group("g"))
            .await
            .unwrap();
        store
            .insert_rule(PermissionRule::new("/api/a/b/").allow(HttpMethod::Get).group("g"))
            .await
            .unwrap();

        assert_eq!(store.find_rules_for_path("/api/a/").await.unwrap().len(), 1);
        assert_eq!(store.find_rules_for_path("/api/a/b/").await.unwrap().len(), 1);
        assert!(store.find_rules_for_path("/api/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_writes_bump_revision() {
        let store = InMemoryPermissionStore::new();
        let r0 = store.revision().await.unwrap();

        let id = store.insert_rule(PermissionRule::new("/api/a/")).await.unwrap();
        let r1 = store.revision().await.unwrap();
        assert!(r1 > r0);

        store.add_group(id, "ops").await.unwrap();
        let r2 = store.revision().await.unwrap();
        assert!(r2 > r1);

        store.remove_group(id, "ops").await.unwrap();
        store.remove_rule(id).await.unwrap();
        assert!(store.revision().await.unwrap() > r2);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_missing_rule() {
        let store = InMemoryPermissionStore::new();
        assert!(matches!(
            store.remove_rule(99).await,
            Err(AuthzError::RuleNotFound(99))
        ));
        assert!(store.add_group(99, "ops").await.is_err());
    }

    #[tokio::test]
    async fn test_replace_all_rejects_invalid_without_change() {
        let store = InMemoryPermissionStore::with_rules(vec![PermissionRule::new("/api/a/")])
            .await
            .unwrap();
        let before = store.revision().await;

        let result = store
            .replace_all(vec![PermissionRule::new("/api/b/"), PermissionRule::new("bad")])
            .await;

        assert!(result.is_err());
        assert_eq!(store.len().await, 1);
        assert_eq!(store.revision().await, before);
    }
}
