//! Code-defined permission rules
//!
//! Some endpoints carry their policy in code instead of the store. When a
//! path has any static rule, the store is not consulted for that path.

use std::collections::HashMap;

use super::{normalize_path, PermissionRule};
use crate::error::Result;

/// Static rules keyed by normalized path
#[derive(Debug, Clone, Default)]
pub struct StaticPolicyTable {
    rules: HashMap<String, Vec<PermissionRule>>,
}

impl StaticPolicyTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule, builder style
    pub fn with_rule(mut self, rule: PermissionRule) -> Result<Self> {
        self.insert(rule)?;
        Ok(self)
    }

    /// Register a rule
    pub fn insert(&mut self, rule: PermissionRule) -> Result<()> {
        rule.validate()?;
        self.rules
            .entry(rule.resource_path.clone())
            .or_default()
            .push(rule);
        Ok(())
    }

    /// Rules for a path, if the path is statically governed
    pub fn rules_for(&self, path: &str) -> Option<&[PermissionRule]> {
        self.rules
            .get(normalize_path(path))
            .map(Vec::as_slice)
            .filter(|rules| !rules.is_empty())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.rules_for(path).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
