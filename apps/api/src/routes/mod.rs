pub mod health;

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::feedback::handlers as feedback;
use crate::governance::handlers as governance;
use crate::session::handlers as agents;
use crate::state::AppState;
use crate::tokens::handlers as accounts;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Agent authoring sessions
        .route("/api/v1/agents/templates", get(agents::handle_templates))
        .route(
            "/api/v1/agents",
            post(agents::handle_start).get(agents::handle_list),
        )
        .route("/api/v1/agents/:id", get(agents::handle_get))
        .route("/api/v1/agents/:id/refine", post(agents::handle_refine))
        .route("/api/v1/agents/:id/finalize", post(agents::handle_finalize))
        .route(
            "/api/v1/agents/:id/v9-transform",
            post(agents::handle_v9_transform),
        )
        .route("/api/v1/agents/:id/share", patch(agents::handle_share))
        .route("/api/v1/shared/:token", get(agents::handle_shared))
        // Feedback
        .route("/api/v1/feedback", post(feedback::handle_submit_feedback))
        .route(
            "/api/v1/admin/feedback",
            get(feedback::handle_recent_feedback),
        )
        // Token accounts
        .route("/api/v1/accounts", post(accounts::handle_open_account))
        .route("/api/v1/accounts/:id/balance", get(accounts::handle_balance))
        .route(
            "/api/v1/accounts/:id/transactions",
            get(accounts::handle_transactions),
        )
        .route("/api/v1/accounts/:id/credit", post(accounts::handle_credit))
        .route(
            "/api/v1/accounts/:id/package-prices",
            post(accounts::handle_lock_package_price),
        )
        .route(
            "/api/v1/admin/accounts/:id/adjust",
            post(accounts::handle_adjust),
        )
        // Master prompt governance
        .route(
            "/api/v1/admin/master-prompts",
            get(governance::handle_list_versions),
        )
        .route(
            "/api/v1/admin/master-prompts/active",
            get(governance::handle_active_version),
        )
        .route(
            "/api/v1/admin/master-prompts/reconcile",
            post(governance::handle_reconcile),
        )
        .route(
            "/api/v1/admin/master-prompts/:version/diff",
            get(governance::handle_diff),
        )
        .route(
            "/api/v1/admin/master-prompts/:version/approve",
            post(governance::handle_approve),
        )
        .route(
            "/api/v1/admin/master-prompts/:version/reject",
            post(governance::handle_reject),
        )
        .route(
            "/api/v1/admin/learning/trigger",
            post(governance::handle_trigger_learning),
        )
        .route(
            "/api/v1/admin/learning-summaries",
            get(governance::handle_learning_summaries),
        )
        .with_state(state)
}
