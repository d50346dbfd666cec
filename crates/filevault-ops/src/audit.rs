//! Audit trail for mutating calls.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use filevault_core::Actor;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
}

/// One audited action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub occurred_at: DateTime<Utc>,
    pub actor: Actor,
    pub status: AuditStatus,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn success(
        action: &str,
        actor: &Actor,
        resource: impl Into<String>,
        before: Option<Value>,
        after: Option<Value>,
    ) -> Self {
        Self {
            action: action.to_string(),
            occurred_at: Utc::now(),
            actor: actor.clone(),
            status: AuditStatus::Success,
            resource: resource.into(),
            before,
            after,
            error: None,
        }
    }

    pub fn failed(
        action: &str,
        actor: &Actor,
        resource: impl Into<String>,
        before: Option<Value>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            action: action.to_string(),
            occurred_at: Utc::now(),
            actor: actor.clone(),
            status: AuditStatus::Failed,
            resource: resource.into(),
            before,
            after: None,
            error: Some(error.into()),
        }
    }
}

/// Fire-and-forget audit destination.
pub trait AuditSink: Send + Sync {
    fn log(&self, entry: AuditEntry);
}

/// Emits every entry as a structured `tracing` event on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn log(&self, entry: AuditEntry) {
        let before = entry.before.as_ref().map(Value::to_string).unwrap_or_default();
        let after = entry.after.as_ref().map(Value::to_string).unwrap_or_default();

        match entry.status {
            AuditStatus::Success => info!(
                target: "audit",
                action = %entry.action,
                resource = %entry.resource,
                user = %entry.actor.username,
                ip = %entry.actor.ip,
                %before,
                %after,
                "success"
            ),
            AuditStatus::Failed => warn!(
                target: "audit",
                action = %entry.action,
                resource = %entry.resource,
                user = %entry.actor.username,
                ip = %entry.actor.ip,
                %before,
                error = entry.error.as_deref().unwrap_or_default(),
                "failed"
            ),
        }
    }
}

/// Keeps entries in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Entries recorded for one action, in order.
    pub fn entries_for(&self, action: &str) -> Vec<AuditEntry> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.action == action)
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn log(&self, entry: AuditEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}
