//! Test doubles shared by unit tests across modules.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::Config;
use crate::feedback::store::MemoryFeedbackStore;
use crate::feedback::FeedbackBook;
use crate::governance::prompts::INITIAL_MASTER_PROMPT;
use crate::governance::store::MemoryMasterPromptStore;
use crate::governance::MasterPromptLedger;
use crate::learning::LearningLoop;
use crate::llm_client::{Completion, CompletionGateway, CompletionRequest, GatewayError};
use crate::session::store::MemorySessionStore;
use crate::session::SessionService;
use crate::state::AppState;
use crate::tokens::store::MemoryLedgerStore;
use crate::tokens::TokenLedger;

/// Replays queued replies in order and records every request it receives.
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Result<Completion, GatewayError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
    delay: Mutex<Option<Duration>>,
}

impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, text: &str, tokens_used: i64) -> &Self {
        self.replies.lock().push_back(Ok(Completion {
            text: text.to_string(),
            tokens_used,
        }));
        self
    }

    pub fn fail(&self, err: GatewayError) -> &Self {
        self.replies.lock().push_back(Err(err));
        self
    }

    /// Every call sleeps this long before answering.
    pub fn delay(&self, delay: Duration) -> &Self {
        *self.delay.lock() = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionGateway for ScriptedGateway {
    async fn generate(&self, request: CompletionRequest) -> Result<Completion, GatewayError> {
        self.requests.lock().push(request);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().pop_front();
        next.unwrap_or_else(|| Err(GatewayError::Provider("no scripted reply".to_string())))
    }
}

pub const QUESTIONS_JSON: &str =
    r#"{"questions": ["Who will use the agent?", "Which channels?", "What tone?"]}"#;

pub const CONCEPTS_JSON: &str = r#"{"concepts": [
    {"id": "core", "label": "Core function", "description": "Answers tickets"},
    {"id": "output", "label": "Output", "description": "Short replies"}
], "follow_up_questions": null}"#;

pub const FINAL_MARKDOWN: &str = "# Ω-Support-Agentv1.0\n\n## ROLE\nSupport desk\n\n\
    ## AGENT_SUMMARY\nHandles first-line support tickets.\n";

pub const INTENT: &str = "I need an agent that answers customer support tickets politely";

/// In-memory services wired together, with the baseline master prompt seeded.
pub struct Harness {
    pub tokens: TokenLedger,
    pub prompts: MasterPromptLedger,
    pub prompt_store: Arc<MemoryMasterPromptStore>,
    pub sessions: Arc<SessionService>,
    pub session_store: Arc<MemorySessionStore>,
    pub feedback: FeedbackBook,
    pub feedback_store: Arc<MemoryFeedbackStore>,
    pub gateway: Arc<ScriptedGateway>,
}

impl Harness {
    pub async fn new(initial_grant: i64) -> Self {
        Self::with_timeout(initial_grant, Duration::from_secs(90)).await
    }

    pub async fn with_timeout(initial_grant: i64, generation_timeout: Duration) -> Self {
        let tokens = TokenLedger::new(Arc::new(MemoryLedgerStore::new()), initial_grant);
        let prompt_store = Arc::new(MemoryMasterPromptStore::new());
        let prompts = MasterPromptLedger::new(prompt_store.clone());
        prompts
            .bootstrap(INITIAL_MASTER_PROMPT)
            .await
            .expect("bootstrap master prompt");
        let session_store = Arc::new(MemorySessionStore::new());
        let gateway = ScriptedGateway::new();
        let sessions = Arc::new(SessionService::new(
            session_store.clone(),
            tokens.clone(),
            prompts.clone(),
            gateway.clone(),
            generation_timeout,
        ));
        let feedback_store = Arc::new(MemoryFeedbackStore::new());
        let feedback = FeedbackBook::new(
            feedback_store.clone(),
            session_store.clone(),
            tokens.clone(),
        );
        Self {
            tokens,
            prompts,
            prompt_store,
            sessions,
            session_store,
            feedback,
            feedback_store,
            gateway,
        }
    }

    pub fn app_state(&self) -> AppState {
        let learning = Arc::new(LearningLoop::new(
            self.session_store.clone(),
            self.feedback_store.clone(),
            self.prompts.clone(),
            self.gateway.clone(),
        ));
        AppState {
            config: test_config(),
            tokens: self.tokens.clone(),
            prompts: self.prompts.clone(),
            sessions: self.sessions.clone(),
            learning,
            feedback: self.feedback.clone(),
        }
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: None,
        anthropic_api_key: "test-key".to_string(),
        anthropic_base_url: crate::llm_client::DEFAULT_BASE_URL.to_string(),
        port: 0,
        rust_log: "debug".to_string(),
        gateway_timeout_secs: 90,
        initial_token_grant: 10_000,
        learning_enabled: false,
        learning_run_at: chrono::NaiveTime::from_hms_opt(3, 20, 0).unwrap_or_default(),
    }
}
