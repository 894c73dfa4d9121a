use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Proactive notification addressed to one employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nudge {
    pub id: String,
    pub user_id: String,
    #[serde(rename = "type")]
    pub nudge_type: String,
    pub title: String,
    pub content: String,
    pub is_read: bool,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
