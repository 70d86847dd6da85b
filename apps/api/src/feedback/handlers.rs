use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;
use crate::feedback::NewFeedback;
use crate::models::feedback::Feedback;
use crate::state::AppState;

const MAX_WINDOW_HOURS: i64 = 24 * 30;

#[derive(Deserialize)]
pub struct FeedbackRequest {
    pub account_id: Uuid,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub rating: i16,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Deserialize)]
pub struct WindowQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    24
}

/// POST /api/v1/feedback
pub async fn handle_submit_feedback(
    State(state): State<AppState>,
    Json(req): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<Feedback>), AppError> {
    let feedback = state
        .feedback
        .submit(NewFeedback {
            account_id: req.account_id,
            session_id: req.session_id,
            rating: req.rating,
            comment: req.comment,
            keywords: req.keywords,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(feedback)))
}

/// GET /api/v1/admin/feedback?hours=24
pub async fn handle_recent_feedback(
    State(state): State<AppState>,
    Query(query): Query<WindowQuery>,
) -> Result<Json<Vec<Feedback>>, AppError> {
    let hours = query.hours.clamp(1, MAX_WINDOW_HOURS);
    let since = Utc::now() - Duration::hours(hours);
    Ok(Json(state.feedback.since(since).await?))
}
