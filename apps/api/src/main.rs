mod config;
mod db;
mod errors;
mod feedback;
mod governance;
mod learning;
mod llm_client;
mod models;
mod routes;
mod session;
mod state;
#[cfg(test)]
mod testing;
mod tokens;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::db::create_pool;
use crate::feedback::pg::PgFeedbackStore;
use crate::feedback::store::{FeedbackStore, MemoryFeedbackStore};
use crate::feedback::FeedbackBook;
use crate::governance::pg::PgMasterPromptStore;
use crate::governance::prompts::INITIAL_MASTER_PROMPT;
use crate::governance::store::{MasterPromptStore, MemoryMasterPromptStore};
use crate::governance::MasterPromptLedger;
use crate::learning::{spawn_scheduler, LearningLoop};
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::session::pg::PgSessionStore;
use crate::session::store::{MemorySessionStore, SessionStore};
use crate::session::SessionService;
use crate::state::AppState;
use crate::tokens::pg::PgLedgerStore;
use crate::tokens::store::{LedgerStore, MemoryLedgerStore};
use crate::tokens::TokenLedger;

struct Stores {
    ledger: Arc<dyn LedgerStore>,
    prompts: Arc<dyn MasterPromptStore>,
    sessions: Arc<dyn SessionStore>,
    feedback: Arc<dyn FeedbackStore>,
}

async fn build_stores(config: &Config) -> Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let pool = create_pool(url).await?;
            Ok(Stores {
                ledger: Arc::new(PgLedgerStore::new(pool.clone())),
                prompts: Arc::new(PgMasterPromptStore::new(pool.clone())),
                sessions: Arc::new(PgSessionStore::new(pool.clone())),
                feedback: Arc::new(PgFeedbackStore::new(pool)),
            })
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory stores (data is lost on restart)");
            Ok(Stores {
                ledger: Arc::new(MemoryLedgerStore::new()),
                prompts: Arc::new(MemoryMasterPromptStore::new()),
                sessions: Arc::new(MemorySessionStore::new()),
                feedback: Arc::new(MemoryFeedbackStore::new()),
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("omega_api={}", &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Omega API v{}", env!("CARGO_PKG_VERSION"));

    let stores = build_stores(&config).await?;

    // Initialize LLM client
    let llm = Arc::new(LlmClient::new(
        config.anthropic_api_key.clone(),
        config.anthropic_base_url.clone(),
    ));
    info!("LLM client initialized (model: {})", llm_client::MODEL);

    let tokens = TokenLedger::new(stores.ledger, config.initial_token_grant);

    let prompts = MasterPromptLedger::new(stores.prompts);
    if let Some(seeded) = prompts.bootstrap(INITIAL_MASTER_PROMPT).await? {
        info!("Seeded baseline master prompt {}", seeded.version_id);
    }

    let sessions = Arc::new(SessionService::new(
        stores.sessions.clone(),
        tokens.clone(),
        prompts.clone(),
        llm.clone(),
        Duration::from_secs(config.gateway_timeout_secs),
    ));

    let feedback = FeedbackBook::new(
        stores.feedback.clone(),
        stores.sessions.clone(),
        tokens.clone(),
    );

    let learning = Arc::new(LearningLoop::new(
        stores.sessions,
        stores.feedback,
        prompts.clone(),
        llm,
    ));
    if config.learning_enabled {
        spawn_scheduler(learning.clone(), config.learning_run_at);
    } else {
        info!("Nightly learning disabled; cycles run only on admin trigger");
    }

    // Build app state
    let state = AppState {
        config: config.clone(),
        tokens,
        prompts,
        sessions,
        learning,
        feedback,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the admin UI has a fixed host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
