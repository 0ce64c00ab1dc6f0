//! Aggregated access profile of one path
//!
//! A profile is folded from every rule stored for a path, independent of
//! the caller, and then evaluated against a caller. The IP allow-set is the
//! union over every rule naming at least one group, and applies to every
//! group and method on the path.

use std::collections::{BTreeMap, BTreeSet};

use super::decision::Decision;
use crate::policy::PermissionRule;
use crate::types::{GroupId, HttpMethod};

/// Per-method allow-sets and the path-wide IP allow-set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessProfile {
    per_method_groups: BTreeMap<HttpMethod, BTreeSet<GroupId>>,
    allowed_ips: BTreeSet<String>,
    rule_count: usize,
}

impl AccessProfile {
    /// Fold rules into a profile; order does not matter
    pub fn from_rules<'a, I>(rules: I) -> Self
    where
        I: IntoIterator<Item = &'a PermissionRule>,
    {
        rules.into_iter().fold(Self::default(), Self::merge)
    }

    /// Profile extended with one more rule
    pub fn merge(mut self, rule: &PermissionRule) -> Self {
        self.rule_count += 1;

        // A rule without groups neither grants nor restricts
        if rule.groups.is_empty() {
            return self;
        }

        for method in rule.method_flags.granted() {
            self.per_method_groups
                .entry(method)
                .or_default()
                .extend(rule.groups.iter().cloned());
        }

        self.allowed_ips
            .extend(rule.allowed_ip_addresses.iter().cloned());
        self
    }

    /// Groups authorized for a method (empty when none)
    pub fn groups_for(&self, method: HttpMethod) -> impl Iterator<Item = &GroupId> {
        self.per_method_groups
            .get(&method)
            .into_iter()
            .flat_map(|groups| groups.iter())
    }

    pub fn allowed_ips(&self) -> &BTreeSet<String> {
        &self.allowed_ips
    }

    pub fn is_ip_restricted(&self) -> bool {
        !self.allowed_ips.is_empty()
    }

    /// Number of rules folded in
    pub fn rule_count(&self) -> usize {
        self.rule_count
    }

    pub fn has_rules(&self) -> bool {
        self.rule_count > 0
    }

    /// Decide a caller's access to `method` on this profile's path
    ///
    /// The first required group the caller holds wins when the path is not
    /// IP-restricted, or when the caller's address is allowed. An IP
    /// mismatch is recorded and the remaining groups are still checked.
    pub fn evaluate(
        &self,
        caller_groups: &BTreeSet<GroupId>,
        caller_ip: &str,
        method: HttpMethod,
    ) -> Decision {
        if !self.has_rules() {
            return Decision::no_matching_group(true);
        }

        let mut ip_mismatch = false;

        for group in self.groups_for(method) {
            if !caller_groups.contains(group) {
                continue;
            }

            if !self.is_ip_restricted() || self.allowed_ips.contains(caller_ip) {
                return Decision::Allow;
            }

            ip_mismatch = true;
        }

        if ip_mismatch {
            Decision::invalid_ip(caller_ip)
        } else {
            Decision::no_matching_group(false)
        }
    }

    /// Methods the caller would be allowed on this path
    pub fn permitted_methods(&self, caller_groups: &BTreeSet<GroupId>, caller_ip: &str) -> Vec<HttpMethod> {
        HttpMethod::ALL
            .into_iter()
            .filter(|method| self.evaluate(caller_groups, caller_ip, *method).is_allowed())
            .collect()
    }
}
