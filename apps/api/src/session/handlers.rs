use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::session::{AgentArtifact, AgentSession};
use crate::session::machine::{
    FinalizeOutcome, SessionOutcome, SessionView, SharedAgent, StageReceipt, V9Outcome,
};
use crate::session::templates::AgentTemplate;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct StartRequest {
    pub account_id: Uuid,
    pub intent_text: String,
    pub template_id: Option<String>,
}

#[derive(Deserialize)]
pub struct AccountQuery {
    pub account_id: Uuid,
}

#[derive(Deserialize)]
pub struct RefineRequest {
    pub account_id: Uuid,
    pub answers: Vec<String>,
}

#[derive(Deserialize)]
pub struct FinalizeRequest {
    pub account_id: Uuid,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Deserialize)]
pub struct V9Request {
    pub account_id: Uuid,
}

#[derive(Deserialize)]
pub struct ShareRequest {
    pub account_id: Uuid,
    pub enabled: bool,
}

#[derive(Serialize)]
pub struct V9Response {
    pub artifact: AgentArtifact,
    pub already_transformed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<StageReceipt>,
}

impl From<V9Outcome> for V9Response {
    fn from(outcome: V9Outcome) -> Self {
        match outcome {
            V9Outcome::Transformed { artifact, receipt } => V9Response {
                artifact,
                already_transformed: false,
                receipt: Some(receipt),
            },
            V9Outcome::AlreadyTransformed { artifact } => V9Response {
                artifact,
                already_transformed: true,
                receipt: None,
            },
        }
    }
}

/// GET /api/v1/agents/templates
pub async fn handle_templates(State(state): State<AppState>) -> Json<&'static [AgentTemplate]> {
    Json(state.sessions.templates())
}

/// POST /api/v1/agents
pub async fn handle_start(
    State(state): State<AppState>,
    Json(req): Json<StartRequest>,
) -> Result<(StatusCode, Json<SessionOutcome>), AppError> {
    let outcome = state
        .sessions
        .start(req.account_id, &req.intent_text, req.template_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /api/v1/agents?account_id=
pub async fn handle_list(
    State(state): State<AppState>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<Vec<AgentSession>>, AppError> {
    Ok(Json(state.sessions.list_for_account(query.account_id).await?))
}

/// GET /api/v1/agents/:id?account_id=
pub async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AccountQuery>,
) -> Result<Json<SessionView>, AppError> {
    Ok(Json(state.sessions.get(id, query.account_id).await?))
}

/// POST /api/v1/agents/:id/refine
pub async fn handle_refine(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<RefineRequest>,
) -> Result<Json<SessionOutcome>, AppError> {
    Ok(Json(
        state.sessions.refine(id, req.account_id, req.answers).await?,
    ))
}

/// POST /api/v1/agents/:id/finalize
pub async fn handle_finalize(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<FinalizeRequest>,
) -> Result<Json<FinalizeOutcome>, AppError> {
    Ok(Json(
        state.sessions.finalize(id, req.account_id, req.confirm).await?,
    ))
}

/// POST /api/v1/agents/:id/v9-transform
pub async fn handle_v9_transform(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<V9Request>,
) -> Result<Json<V9Response>, AppError> {
    let outcome = state.sessions.transform_v9(id, req.account_id).await?;
    Ok(Json(outcome.into()))
}

/// PATCH /api/v1/agents/:id/share
pub async fn handle_share(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ShareRequest>,
) -> Result<Json<AgentArtifact>, AppError> {
    Ok(Json(
        state.sessions.set_sharing(id, req.account_id, req.enabled).await?,
    ))
}

/// GET /api/v1/shared/:token
pub async fn handle_shared(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<SharedAgent>, AppError> {
    Ok(Json(state.sessions.shared(&token).await?))
}
