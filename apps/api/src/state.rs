use std::sync::Arc;

use crate::config::Config;
use crate::feedback::FeedbackBook;
use crate::governance::MasterPromptLedger;
use crate::learning::LearningLoop;
use crate::session::SessionService;
use crate::tokens::TokenLedger;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub tokens: TokenLedger,
    pub prompts: MasterPromptLedger,
    pub sessions: Arc<SessionService>,
    pub learning: Arc<LearningLoop>,
    pub feedback: FeedbackBook,
}
