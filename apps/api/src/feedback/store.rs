use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::db::StoreError;
use crate::models::feedback::Feedback;

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn insert_feedback(&self, feedback: &Feedback) -> Result<(), StoreError>;

    /// Oldest first.
    async fn feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<Feedback>, StoreError>;
}

#[derive(Default)]
pub struct MemoryFeedbackStore {
    entries: Mutex<Vec<Feedback>>,
}

impl MemoryFeedbackStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedbackStore for MemoryFeedbackStore {
    async fn insert_feedback(&self, feedback: &Feedback) -> Result<(), StoreError> {
        self.entries.lock().push(feedback.clone());
        Ok(())
    }

    async fn feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<Feedback>, StoreError> {
        let mut recent: Vec<Feedback> = self
            .entries
            .lock()
            .iter()
            .filter(|f| f.created_at >= since)
            .cloned()
            .collect();
        recent.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(recent)
    }
}
