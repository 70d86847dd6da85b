use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::governance::diff::{DiffMode, SideBySideRow};
use crate::models::master_prompt::{LearningSummary, MasterPromptVersion};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct DiffQuery {
    #[serde(default)]
    pub mode: DiffMode,
}

#[derive(Serialize)]
pub struct DiffResponse {
    pub from_version: String,
    pub to_version: String,
    pub mode: DiffMode,
    pub added: usize,
    pub removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unified: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<Vec<SideBySideRow>>,
}

#[derive(Serialize)]
pub struct ActiveResponse {
    pub version: MasterPromptVersion,
    pub approvals_halted: bool,
}

#[derive(Deserialize)]
pub struct TriageRequest {
    pub approver_id: String,
}

#[derive(Deserialize)]
pub struct ReconcileRequest {
    pub operator_id: String,
}

#[derive(Serialize)]
pub struct TriggerResponse {
    pub started: bool,
}

/// GET /api/v1/admin/master-prompts
pub async fn handle_list_versions(
    State(state): State<AppState>,
) -> Result<Json<Vec<MasterPromptVersion>>, AppError> {
    Ok(Json(state.prompts.list_versions().await?))
}

/// GET /api/v1/admin/master-prompts/active
pub async fn handle_active_version(
    State(state): State<AppState>,
) -> Result<Json<ActiveResponse>, AppError> {
    let version = state.prompts.active().await?;
    Ok(Json(ActiveResponse {
        version,
        approvals_halted: state.prompts.approvals_halted(),
    }))
}

/// GET /api/v1/admin/master-prompts/:version/diff?mode=unified|side_by_side
pub async fn handle_diff(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<DiffResponse>, AppError> {
    let diff = state.prompts.diff(&version).await?;
    let (unified, rows) = match query.mode {
        DiffMode::Unified => (Some(diff.unified()), None),
        DiffMode::SideBySide => (None, Some(diff.side_by_side())),
    };
    Ok(Json(DiffResponse {
        from_version: diff.from_version,
        to_version: diff.to_version,
        mode: query.mode,
        added: diff.added,
        removed: diff.removed,
        unified,
        rows,
    }))
}

/// POST /api/v1/admin/master-prompts/:version/approve
pub async fn handle_approve(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Json(req): Json<TriageRequest>,
) -> Result<Json<MasterPromptVersion>, AppError> {
    Ok(Json(state.prompts.approve(&version, &req.approver_id).await?))
}

/// POST /api/v1/admin/master-prompts/:version/reject
pub async fn handle_reject(
    State(state): State<AppState>,
    Path(version): Path<String>,
    Json(req): Json<TriageRequest>,
) -> Result<Json<MasterPromptVersion>, AppError> {
    Ok(Json(state.prompts.reject(&version, &req.approver_id).await?))
}

/// POST /api/v1/admin/master-prompts/reconcile
pub async fn handle_reconcile(
    State(state): State<AppState>,
    Json(req): Json<ReconcileRequest>,
) -> Result<Json<ActiveResponse>, AppError> {
    let version = state.prompts.reconcile(&req.operator_id).await?;
    Ok(Json(ActiveResponse {
        version,
        approvals_halted: state.prompts.approvals_halted(),
    }))
}

/// POST /api/v1/admin/learning/trigger
/// Fire-and-forget. The outcome shows up later in the version list and summaries.
pub async fn handle_trigger_learning(
    State(state): State<AppState>,
) -> (StatusCode, Json<TriggerResponse>) {
    let started = state.learning.trigger();
    (StatusCode::ACCEPTED, Json(TriggerResponse { started }))
}

/// GET /api/v1/admin/learning-summaries
pub async fn handle_learning_summaries(
    State(state): State<AppState>,
) -> Result<Json<Vec<LearningSummary>>, AppError> {
    Ok(Json(state.prompts.learning_summaries().await?))
}
