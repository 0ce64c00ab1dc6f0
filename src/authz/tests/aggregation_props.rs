//! Property tests for rule aggregation and path normalization

use gateway_authz::{
    normalize_path, AccessProfile, HttpMethod, MethodFlags, PermissionRule,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

const GROUPS: [&str; 4] = ["analysts", "ops", "admins", "guests"];
const IPS: [&str; 3] = ["10.0.0.1", "10.0.0.2", "192.168.1.10"];

fn method_strategy() -> impl Strategy<Value = HttpMethod> {
    prop::sample::select(HttpMethod::ALL.to_vec())
}

fn rule_strategy() -> impl Strategy<Value = PermissionRule> {
    (
        prop::collection::btree_set(prop::sample::select(GROUPS.to_vec()), 0..3),
        prop::collection::btree_set(prop::sample::select(IPS.to_vec()), 0..2),
        prop::collection::vec(method_strategy(), 0..4),
    )
        .prop_map(|(groups, ips, methods)| {
            let mut rule = PermissionRule::new("/api/resource/");
            rule.method_flags = MethodFlags::only(&methods);
            rule.groups = groups.into_iter().map(str::to_string).collect();
            rule.allowed_ip_addresses = ips.into_iter().map(str::to_string).collect();
            rule
        })
}

fn caller_groups_strategy() -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(prop::sample::select(GROUPS.to_vec()), 0..4)
        .prop_map(|groups| groups.into_iter().map(str::to_string).collect())
}

proptest! {
    #[test]
    fn aggregation_ignores_rule_order(
        rules in prop::collection::vec(rule_strategy(), 0..6),
        caller in caller_groups_strategy(),
        ip in prop::sample::select(IPS.to_vec()),
        method in method_strategy(),
    ) {
        let forward = AccessProfile::from_rules(&rules);
        let reversed = AccessProfile::from_rules(rules.iter().rev());

        prop_assert_eq!(&forward, &reversed);
        prop_assert_eq!(
            forward.evaluate(&caller, ip, method),
            reversed.evaluate(&caller, ip, method)
        );
    }

    #[test]
    fn caller_without_groups_is_never_allowed(
        rules in prop::collection::vec(rule_strategy(), 0..6),
        ip in prop::sample::select(IPS.to_vec()),
        method in method_strategy(),
    ) {
        let profile = AccessProfile::from_rules(&rules);
        prop_assert!(!profile.evaluate(&BTreeSet::new(), ip, method).is_allowed());
    }

    #[test]
    fn allow_requires_granting_group_and_allowed_ip(
        rules in prop::collection::vec(rule_strategy(), 1..6),
        caller in caller_groups_strategy(),
        ip in prop::sample::select(IPS.to_vec()),
        method in method_strategy(),
    ) {
        let profile = AccessProfile::from_rules(&rules);

        if profile.evaluate(&caller, ip, method).is_allowed() {
            let granted = rules.iter().any(|rule| {
                rule.method_flags.allows(method) && rule.groups.iter().any(|g| caller.contains(g))
            });
            let restricting: Vec<_> = rules.iter().filter(|rule| !rule.groups.is_empty()).collect();
            let ip_ok = restricting.iter().all(|rule| rule.allowed_ip_addresses.is_empty())
                || restricting.iter().any(|rule| rule.allowed_ip_addresses.contains(ip));

            prop_assert!(granted);
            prop_assert!(ip_ok);
        }
    }

    #[test]
    fn groupless_rules_never_change_decisions(
        rules in prop::collection::vec(rule_strategy(), 0..6),
        extra_ips in prop::collection::btree_set(prop::sample::select(IPS.to_vec()), 0..3),
        caller in caller_groups_strategy(),
        ip in prop::sample::select(IPS.to_vec()),
        method in method_strategy(),
    ) {
        let mut groupless = PermissionRule::new("/api/resource/");
        groupless.method_flags = MethodFlags::only(&HttpMethod::ALL);
        groupless.allowed_ip_addresses = extra_ips.into_iter().map(str::to_string).collect();

        let base = AccessProfile::from_rules(&rules);
        let extended = AccessProfile::from_rules(rules.iter().chain(std::iter::once(&groupless)));

        if base.has_rules() {
            prop_assert_eq!(
                base.evaluate(&caller, ip, method),
                extended.evaluate(&caller, ip, method)
            );
        }
    }

    #[test]
    fn normalization_is_idempotent(path in "(/[a-z]{1,6}){0,4}(/delete)?(/[a-z0-9]{1,4}){0,2}/?(\\?[a-z=&]{0,10})?") {
        let once = normalize_path(&path);
        prop_assert_eq!(normalize_path(once), once);
    }

    #[test]
    fn delete_subroutes_share_parent_path(
        parent in "(/[a-z]{1,6}){1,3}/",
        id in "[0-9]{1,5}",
    ) {
        let child = format!("{}delete/{}/", parent, id);
        prop_assert_eq!(normalize_path(&child), normalize_path(&parent));
    }
}
