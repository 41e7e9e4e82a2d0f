use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session metadata as stored in the `sessions` table.
///
/// Everything here except the identity fields is a projection that the store
/// refreshes on mutation; the event log stays authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub workspace_id: String,
    pub working_directory: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    pub is_active: bool,
    pub is_archived: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Derived counters projected from the event log.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SessionStats {
    pub message_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
}
