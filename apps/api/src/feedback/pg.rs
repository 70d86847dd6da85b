use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::db::{classify_write_error, StoreError};
use crate::feedback::store::FeedbackStore;
use crate::models::feedback::Feedback;

#[derive(Debug, FromRow)]
struct FeedbackRow {
    id: Uuid,
    account_id: Uuid,
    session_id: Option<Uuid>,
    rating: i16,
    comment: Option<String>,
    keywords: Json<Vec<String>>,
    created_at: DateTime<Utc>,
}

impl From<FeedbackRow> for Feedback {
    fn from(row: FeedbackRow) -> Self {
        Feedback {
            id: row.id,
            account_id: row.account_id,
            session_id: row.session_id,
            rating: row.rating,
            comment: row.comment,
            keywords: row.keywords.0,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgFeedbackStore {
    pool: PgPool,
}

impl PgFeedbackStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FeedbackStore for PgFeedbackStore {
    async fn insert_feedback(&self, feedback: &Feedback) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO feedback (id, account_id, session_id, rating, comment, keywords, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(feedback.id)
        .bind(feedback.account_id)
        .bind(feedback.session_id)
        .bind(feedback.rating)
        .bind(&feedback.comment)
        .bind(Json(&feedback.keywords))
        .bind(feedback.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| classify_write_error(e, &format!("feedback {}", feedback.id)))?;
        Ok(())
    }

    async fn feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<Feedback>, StoreError> {
        Ok(sqlx::query_as::<_, FeedbackRow>(
            "SELECT * FROM feedback WHERE created_at >= $1 ORDER BY created_at, id",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Feedback::from)
        .collect())
    }
}
