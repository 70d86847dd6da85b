use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Pending,
    Active,
    Rejected,
    Archived,
}

impl VersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VersionStatus::Pending => "pending",
            VersionStatus::Active => "active",
            VersionStatus::Rejected => "rejected",
            VersionStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(VersionStatus::Pending),
            "active" => Some(VersionStatus::Active),
            "rejected" => Some(VersionStatus::Rejected),
            "archived" => Some(VersionStatus::Archived),
            _ => None,
        }
    }
}

/// One governed revision of the master prompt. `content` is immutable once written;
/// only `status`, `approved_at` and `approved_by` move, and only through the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterPromptVersion {
    pub version_id: String,
    pub content: String,
    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub patterns_learned: Vec<String>,
}

/// Daily record written by the learning loop. Append-only apart from `approved`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LearningSummary {
    pub id: Uuid,
    pub date: NaiveDate,
    pub summary_text: String,
    pub patterns_extracted: Vec<String>,
    pub daily_insight: String,
    pub tokens_used: i64,
    pub candidate_version_id: Option<String>,
    pub approved: bool,
    pub created_at: DateTime<Utc>,
}
