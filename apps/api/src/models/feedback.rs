use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user's rating of the authoring experience. The learning cycle reads the last day of it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub id: Uuid,
    pub account_id: Uuid,
    /// The session being rated, when the feedback is about one agent.
    pub session_id: Option<Uuid>,
    /// 1 to 5 stars.
    pub rating: i16,
    pub comment: Option<String>,
    pub keywords: Vec<String>,
    pub created_at: DateTime<Utc>,
}
