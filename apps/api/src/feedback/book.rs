use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::db::StoreError;
use crate::errors::ErrorKind;
use crate::feedback::store::FeedbackStore;
use crate::models::feedback::Feedback;
use crate::session::store::SessionStore;
use crate::tokens::{LedgerError, TokenLedger};

const MAX_COMMENT_CHARS: usize = 2000;
const MAX_KEYWORDS: usize = 10;
const MAX_KEYWORD_CHARS: usize = 40;

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("rating must be between 1 and 5 (got {0})")]
    InvalidRating(i16),

    #[error("comment must be at most 2000 characters (got {0})")]
    CommentTooLong(usize),

    #[error("at most 10 keywords of up to 40 characters are allowed")]
    InvalidKeywords,

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FeedbackError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FeedbackError::InvalidRating(_)
            | FeedbackError::CommentTooLong(_)
            | FeedbackError::InvalidKeywords => ErrorKind::Validation,
            FeedbackError::SessionNotFound(_) => ErrorKind::NotFound,
            FeedbackError::Ledger(e) => e.kind(),
            FeedbackError::Store(_) => ErrorKind::Internal,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewFeedback {
    pub account_id: Uuid,
    pub session_id: Option<Uuid>,
    pub rating: i16,
    pub comment: Option<String>,
    pub keywords: Vec<String>,
}

/// Records feedback from known accounts. A referenced session must belong to the author.
#[derive(Clone)]
pub struct FeedbackBook {
    store: Arc<dyn FeedbackStore>,
    sessions: Arc<dyn SessionStore>,
    tokens: TokenLedger,
}

impl FeedbackBook {
    pub fn new(
        store: Arc<dyn FeedbackStore>,
        sessions: Arc<dyn SessionStore>,
        tokens: TokenLedger,
    ) -> Self {
        Self {
            store,
            sessions,
            tokens,
        }
    }

    pub async fn submit(&self, new: NewFeedback) -> Result<Feedback, FeedbackError> {
        if !(1..=5).contains(&new.rating) {
            return Err(FeedbackError::InvalidRating(new.rating));
        }
        let comment = new
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if let Some(chars) = comment.as_ref().map(|c| c.chars().count()) {
            if chars > MAX_COMMENT_CHARS {
                return Err(FeedbackError::CommentTooLong(chars));
            }
        }
        let keywords = clean_keywords(&new.keywords)?;

        self.tokens.account(new.account_id).await?;
        if let Some(session_id) = new.session_id {
            match self.sessions.session(session_id).await? {
                Some(session) if session.account_id == new.account_id => {}
                _ => return Err(FeedbackError::SessionNotFound(session_id)),
            }
        }

        let feedback = Feedback {
            id: Uuid::new_v4(),
            account_id: new.account_id,
            session_id: new.session_id,
            rating: new.rating,
            comment,
            keywords,
            created_at: Utc::now(),
        };
        self.store.insert_feedback(&feedback).await?;
        info!(
            "Feedback {} from account {}: {}/5",
            feedback.id, feedback.account_id, feedback.rating
        );
        Ok(feedback)
    }

    /// Oldest first.
    pub async fn since(&self, since: DateTime<Utc>) -> Result<Vec<Feedback>, FeedbackError> {
        Ok(self.store.feedback_since(since).await?)
    }
}

/// Trims, drops blanks and repeats (case-insensitive), keeping first-seen order.
fn clean_keywords(raw: &[String]) -> Result<Vec<String>, FeedbackError> {
    let mut cleaned: Vec<String> = Vec::new();
    for keyword in raw.iter().map(|k| k.trim()).filter(|k| !k.is_empty()) {
        if keyword.chars().count() > MAX_KEYWORD_CHARS {
            return Err(FeedbackError::InvalidKeywords);
        }
        if !cleaned.iter().any(|k| k.eq_ignore_ascii_case(keyword)) {
            cleaned.push(keyword.to_string());
        }
    }
    if cleaned.len() > MAX_KEYWORDS {
        return Err(FeedbackError::InvalidKeywords);
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Harness, INTENT, QUESTIONS_JSON};

    fn rating(account_id: Uuid, stars: i16) -> NewFeedback {
        NewFeedback {
            account_id,
            session_id: None,
            rating: stars,
            comment: None,
            keywords: Vec::new(),
        }
    }

    #[test]
    fn test_keywords_are_trimmed_and_deduplicated() {
        let raw: Vec<String> = [" tone ", "", "Tone", "speed"]
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(clean_keywords(&raw).unwrap(), vec!["tone", "speed"]);

        let many: Vec<String> = (0..11).map(|i| format!("k{i}")).collect();
        assert!(matches!(clean_keywords(&many), Err(FeedbackError::InvalidKeywords)));
    }

    #[tokio::test]
    async fn test_submit_validates_rating_and_comment() {
        let h = Harness::new(100).await;
        let account_id = Uuid::new_v4();
        h.tokens.open_account(account_id).await.unwrap();

        assert!(matches!(
            h.feedback.submit(rating(account_id, 0)).await,
            Err(FeedbackError::InvalidRating(0))
        ));
        assert!(matches!(
            h.feedback.submit(rating(account_id, 6)).await,
            Err(FeedbackError::InvalidRating(6))
        ));
        let long = NewFeedback {
            comment: Some("x".repeat(2001)),
            ..rating(account_id, 4)
        };
        assert!(matches!(
            h.feedback.submit(long).await,
            Err(FeedbackError::CommentTooLong(2001))
        ));
        let recent = h
            .feedback
            .since(Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert!(recent.is_empty());
    }

    #[tokio::test]
    async fn test_submit_requires_known_account_and_own_session() {
        let h = Harness::new(100).await;
        let account_id = Uuid::new_v4();
        h.tokens.open_account(account_id).await.unwrap();
        h.gateway.reply(QUESTIONS_JSON, 10);
        let session_id = h.sessions.start(account_id, INTENT, None).await.unwrap().session.id;

        assert!(matches!(
            h.feedback.submit(rating(Uuid::new_v4(), 5)).await,
            Err(FeedbackError::Ledger(LedgerError::AccountNotFound(_)))
        ));

        let stranger = Uuid::new_v4();
        h.tokens.open_account(stranger).await.unwrap();
        let foreign = NewFeedback {
            session_id: Some(session_id),
            ..rating(stranger, 2)
        };
        assert!(matches!(
            h.feedback.submit(foreign).await,
            Err(FeedbackError::SessionNotFound(id)) if id == session_id
        ));

        let own = NewFeedback {
            session_id: Some(session_id),
            comment: Some("  Great questions  ".to_string()),
            keywords: vec!["clarity".to_string()],
            ..rating(account_id, 5)
        };
        let stored = h.feedback.submit(own).await.unwrap();

        assert_eq!(stored.comment.as_deref(), Some("Great questions"));
        let recent = h
            .feedback
            .since(Utc::now() - chrono::Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(recent, vec![stored]);
    }
}
