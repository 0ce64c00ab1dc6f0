//! Audit trail of authorization decisions
//!
//! Every decision is emitted as a structured `tracing` event on the
//! `authz::audit` target and kept in a bounded in-memory ring for
//! inspection. Entries carry the reason code, never group names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::info;

use super::decision::Decision;

/// Audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,

    /// Normalized path the decision was made for
    pub path: String,

    pub method: String,

    /// Caller's source address
    pub ip: String,

    pub allowed: bool,

    /// `allow` or the deny reason code
    pub reason: String,

    pub latency_us: u64,

    pub timestamp: DateTime<Utc>,
}

/// Bounded audit logger
pub struct AuditLogger {
    buffer: Arc<RwLock<VecDeque<AuditEntry>>>,
    capacity: usize,
}

impl AuditLogger {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    /// Log an authorization decision
    pub async fn log_decision(
        &self,
        method: &str,
        ip: &str,
        path: &str,
        decision: &Decision,
        latency: Duration,
    ) -> AuditEntry {
        let entry = AuditEntry {
            id: uuid::Uuid::new_v4().to_string(),
            path: path.to_string(),
            method: method.to_string(),
            ip: ip.to_string(),
            allowed: decision.is_allowed(),
            reason: decision.code().to_string(),
            latency_us: latency.as_micros() as u64,
            timestamp: Utc::now(),
        };

        info!(
            target: "authz::audit",
            id = %entry.id,
            path = %entry.path,
            method = %entry.method,
            ip = %entry.ip,
            allowed = entry.allowed,
            reason = %entry.reason,
            latency_us = entry.latency_us,
            "authorization decision"
        );

        if self.capacity > 0 {
            let mut buffer = self.buffer.write().await;
            if buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(entry.clone());
        }

        entry
    }

    /// Most recent entries, newest last
    pub async fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let buffer = self.buffer.read().await;
        let skip = buffer.len().saturating_sub(limit);
        buffer.iter().skip(skip).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.buffer.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
