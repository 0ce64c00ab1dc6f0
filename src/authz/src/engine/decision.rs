//! Authorization decision types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a request was denied
///
/// Reasons name a category only; they never carry the groups that would
/// have granted access.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DenyReason {
    /// Caller holds no group authorized for this method on this path.
    /// `no_rule` is set when the path has no rule at all.
    NoMatchingGroup { no_rule: bool },

    /// Caller holds a qualifying group but the source address is not allowed
    InvalidIp { ip: String },

    /// Rules could not be read; an infrastructure fault, not a policy verdict
    StoreUnavailable { detail: String },
}

impl DenyReason {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::NoMatchingGroup { no_rule: true } => "no_rule",
            DenyReason::NoMatchingGroup { no_rule: false } => "no_matching_group",
            DenyReason::InvalidIp { .. } => "invalid_ip",
            DenyReason::StoreUnavailable { .. } => "store_unavailable",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::NoMatchingGroup { no_rule: true } => write!(f, "No rule for resource"),
            DenyReason::NoMatchingGroup { no_rule: false } => write!(f, "Invalid User"),
            DenyReason::InvalidIp { ip } => write!(f, "Invalid IP: {}", ip),
            DenyReason::StoreUnavailable { .. } => write!(f, "Authorization temporarily unavailable"),
        }
    }
}

/// Outcome of one authorization check
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    Allow,
    Deny(DenyReason),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Decision::Allow => None,
            Decision::Deny(reason) => Some(reason),
        }
    }

    /// `allow`, or the deny reason's code
    pub fn code(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny(reason) => reason.code(),
        }
    }

    pub(crate) fn no_matching_group(no_rule: bool) -> Self {
        Decision::Deny(DenyReason::NoMatchingGroup { no_rule })
    }

    pub(crate) fn invalid_ip(ip: &str) -> Self {
        Decision::Deny(DenyReason::InvalidIp { ip: ip.to_string() })
    }

    pub(crate) fn store_unavailable(detail: impl Into<String>) -> Self {
        Decision::Deny(DenyReason::StoreUnavailable {
            detail: detail.into(),
        })
    }
}
