//! Core authorization types

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;

/// Group identifier (the group's name)
pub type GroupId = String;

/// HTTP methods a permission rule can grant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    /// Every method a rule can grant, in declaration order
    pub const ALL: [HttpMethod; 5] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
    ];

    /// Canonical upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = AuthzError;

    /// Parse a method name; HEAD, OPTIONS and friends are not grantable
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(AuthzError::InvalidInput(format!(
                "unrecognized HTTP method: {}",
                other
            ))),
        }
    }
}

/// Everything the resolver needs to know about one incoming request
///
/// Built by the HTTP layer per request and dropped with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    /// Groups the authenticated caller belongs to
    #[serde(default)]
    pub groups: BTreeSet<GroupId>,

    /// Remote address as seen by the transport layer
    pub ip: String,

    /// Requested method
    pub method: HttpMethod,

    /// Requested path, query string included
    pub path: String,
}

impl CallerContext {
    /// Create a context for a caller with no groups
    pub fn new(ip: impl Into<String>, method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            groups: BTreeSet::new(),
            ip: ip.into(),
            method,
            path: path.into(),
        }
    }

    /// Add a group membership
    pub fn with_group(mut self, group: impl Into<GroupId>) -> Self {
        self.groups.insert(group.into());
        self
    }

    /// Add several group memberships
    pub fn with_groups<I, G>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = G>,
        G: Into<GroupId>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("get".parse::<HttpMethod>().unwrap(), HttpMethod::Get);
        assert_eq!("PATCH".parse::<HttpMethod>().unwrap(), HttpMethod::Patch);
        assert_eq!(" Delete ".parse::<HttpMethod>().unwrap(), HttpMethod::Delete);
        assert!("HEAD".parse::<HttpMethod>().is_err());
        assert!("OPTIONS".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_method_serde_names() {
        let json = serde_json::to_string(&HttpMethod::Put).unwrap();
        assert_eq!(json, "\"PUT\"");

        let method: HttpMethod = serde_json::from_str("\"POST\"").unwrap();
        assert_eq!(method, HttpMethod::Post);
    }

    #[test]
    fn test_caller_context_builder() {
        let ctx = CallerContext::new("10.0.0.1", HttpMethod::Get, "/api/reports/")
            .with_group("analysts")
            .with_groups(["ops", "analysts"]);

        assert_eq!(ctx.groups.len(), 2);
        assert!(ctx.groups.contains("ops"));
        assert_eq!(ctx.method.to_string(), "GET");
    }
}
