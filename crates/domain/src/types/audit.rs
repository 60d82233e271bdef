//! Append-only audit trail entries for security-relevant events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened. The set is closed; new event kinds are a schema change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Initiated,
    /// Outcome of a callback redemption, successful or not. Rejected
    /// callbacks (unknown, replayed, or expired state) are recorded under
    /// this action with `success: false` in the metadata, so the whole
    /// redemption history of an account sits under one action.
    Connected,
    Refreshed,
    Revoked,
    RefreshFailed,
}

impl AuditAction {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Connected => "CONNECTED",
            Self::Refreshed => "REFRESHED",
            Self::Revoked => "REVOKED",
            Self::RefreshFailed => "REFRESH_FAILED",
        }
    }

    /// Parse the storage representation back into the enum.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "INITIATED" => Some(Self::Initiated),
            "CONNECTED" => Some(Self::Connected),
            "REFRESHED" => Some(Self::Refreshed),
            "REVOKED" => Some(Self::Revoked),
            "REFRESH_FAILED" => Some(Self::RefreshFailed),
            _ => None,
        }
    }
}

/// One security-relevant event. Never updated or deleted once recorded.
///
/// `metadata` is free-form JSON for flow-specific context (state ids,
/// handles, failure reasons). It must never contain token material; callers
/// are responsible for what they put in it.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub id: Uuid,
    pub action: AuditAction,
    pub account_id: Option<Uuid>,
    pub actor_user_id: Option<Uuid>,
    pub source_ip: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Build an event timestamped now.
    #[must_use]
    pub fn new(action: AuditAction, actor_user_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            action,
            account_id: None,
            actor_user_id,
            source_ip: None,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_account(mut self, account_id: Uuid) -> Self {
        self.account_id = Some(account_id);
        self
    }

    #[must_use]
    pub fn with_source_ip(mut self, ip: Option<String>) -> Self {
        self.source_ip = ip;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}
