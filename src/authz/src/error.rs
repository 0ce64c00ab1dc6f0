//! Error types for the gateway authorization core

use thiserror::Error;

/// Authorization core errors
///
/// These never escape [`crate::engine::PermissionResolver::authorize`]; the
/// resolver folds every failure into a deny decision. They surface from the
/// store, configuration and loading paths.
#[derive(Debug, Error)]
pub enum AuthzError {
    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid permission rule definition
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Rule with the given id does not exist
    #[error("Rule not found: {0}")]
    RuleNotFound(u64),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;
