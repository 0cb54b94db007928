//! Activity log and notification models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::generate_uuid;

/// Audit trail entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    pub id: String,
    pub user_id: String,
    /// e.g. `DEPLOY_SUCCESS`
    pub action: String,
    /// ID of the affected entity
    pub target: String,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    pub fn new(user_id: &str, action: &str, target: &str, details: String) -> Self {
        Self {
            id: generate_uuid(),
            user_id: user_id.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            details,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
}

/// User-facing notification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(user_id: &str, kind: NotificationKind, title: String, message: String) -> Self {
        Self {
            id: generate_uuid(),
            user_id: user_id.to_string(),
            kind,
            title,
            message,
            read: false,
            created_at: Utc::now(),
        }
    }
}
