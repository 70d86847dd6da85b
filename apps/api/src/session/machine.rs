use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::StoreError;
use crate::errors::ErrorKind;
use crate::governance::{GovernanceError, MasterPromptLedger};
use crate::llm_client::gateway::parse_json_reply;
use crate::llm_client::{Completion, CompletionGateway, CompletionRequest, GatewayError};
use crate::models::session::{AgentArtifact, AgentSession, ConceptCard, Stage};
use crate::session::prompts;
use crate::session::store::SessionStore;
use crate::session::templates::{self, AgentTemplate};
use crate::tokens::{LedgerError, TokenLedger};

pub const MIN_INTENT_CHARS: usize = 20;
pub const MAX_INTENT_CHARS: usize = 4000;
const MAX_QUESTIONS: usize = 3;
const MIN_QUESTIONS: usize = 2;
const SUMMARY_MAX_CHARS: usize = 200;
const SUMMARY_FALLBACK_CHARS: usize = 100;
const SUMMARY_HEADING: &str = "## AGENT_SUMMARY";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("intent must be between 20 and 4000 characters (got {0})")]
    InvalidIntent(usize),

    #[error("unknown template '{0}'")]
    UnknownTemplate(String),

    #[error("all {questions} questions must be answered ({unanswered} open); got {received} answers")]
    IncompleteAnswers {
        questions: usize,
        unanswered: usize,
        received: usize,
    },

    #[error("finalization must be confirmed")]
    ConfirmationRequired,

    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("shared agent not found")]
    ShareNotFound,

    #[error("cannot {operation} a session in stage {}", .stage.as_str())]
    InvalidTransition {
        stage: Stage,
        operation: &'static str,
    },

    #[error("session is already finalized")]
    AlreadyFinalized,

    #[error("session is not finalized yet")]
    NotFinalized,

    #[error("another operation on this session is in progress")]
    SessionBusy,

    #[error("session was modified concurrently; reload and retry")]
    ConcurrentModification,

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("generation returned unusable content; {tokens_charged} tokens were charged (balance {balance_after})")]
    GenerationDegraded {
        tokens_charged: i64,
        balance_after: i64,
    },

    #[error("generation timed out; {tokens_charged} tokens were charged")]
    GenerationTimeout { tokens_charged: i64 },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::InvalidIntent(_)
            | SessionError::UnknownTemplate(_)
            | SessionError::IncompleteAnswers { .. }
            | SessionError::ConfirmationRequired => ErrorKind::Validation,
            SessionError::SessionNotFound(_) | SessionError::ShareNotFound => ErrorKind::NotFound,
            SessionError::InvalidTransition { .. }
            | SessionError::AlreadyFinalized
            | SessionError::NotFinalized
            | SessionError::SessionBusy
            | SessionError::ConcurrentModification => ErrorKind::State,
            SessionError::GenerationFailed(_)
            | SessionError::GenerationDegraded { .. }
            | SessionError::GenerationTimeout { .. } => ErrorKind::Resource,
            SessionError::Ledger(e) => e.kind(),
            SessionError::Governance(e) => e.kind(),
            SessionError::Store(_) => ErrorKind::Internal,
        }
    }
}

/// What one stage call cost.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageReceipt {
    pub tokens_charged: i64,
    pub balance_after: i64,
    /// Balance at or below zero. A prompt to buy more, never a block.
    pub low_balance: bool,
}

impl StageReceipt {
    fn new(tokens_charged: i64, balance_after: i64) -> Self {
        Self {
            tokens_charged,
            balance_after,
            low_balance: balance_after <= 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub session: AgentSession,
    pub receipt: StageReceipt,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeOutcome {
    pub session: AgentSession,
    pub artifact: AgentArtifact,
    pub receipt: StageReceipt,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum V9Outcome {
    Transformed {
        artifact: AgentArtifact,
        receipt: StageReceipt,
    },
    /// No net charge. A rendition that lost the write race is refunded.
    AlreadyTransformed { artifact: AgentArtifact },
}

impl V9Outcome {
    pub fn artifact(&self) -> &AgentArtifact {
        match self {
            V9Outcome::Transformed { artifact, .. } | V9Outcome::AlreadyTransformed { artifact } => {
                artifact
            }
        }
    }

    pub fn already_transformed(&self) -> bool {
        matches!(self, V9Outcome::AlreadyTransformed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session: AgentSession,
    pub artifact: Option<AgentArtifact>,
}

/// Public projection of a shared artifact. Carries no account data.
#[derive(Debug, Clone, Serialize)]
pub struct SharedAgent {
    pub summary: String,
    pub base_prompt_markdown: String,
    pub v9_prompt_markdown: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct QuestionsReply {
    questions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RefinementReply {
    concepts: Vec<ConceptCard>,
    #[serde(default)]
    follow_up_questions: Option<Vec<String>>,
}

/// A completion that either parsed into something usable or did not.
enum Generated<T> {
    Usable(T),
    Unusable,
}

/// Runs authoring sessions: validates each transition, calls the gateway with the pinned
/// master prompt, bills the reported cost and persists the result.
///
/// Operations on one session never overlap; a second caller gets `SessionBusy` instead
/// of waiting. Different sessions proceed in parallel.
pub struct SessionService {
    store: Arc<dyn SessionStore>,
    tokens: TokenLedger,
    prompts: MasterPromptLedger,
    gateway: Arc<dyn CompletionGateway>,
    generation_timeout: Duration,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

/// One session's operation lock. Dropping it releases the lock and removes the registry
/// entry unless another caller still holds a handle to it.
struct SessionLock<'a> {
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    session_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SessionLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl SessionService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        tokens: TokenLedger,
        prompts: MasterPromptLedger,
        gateway: Arc<dyn CompletionGateway>,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            tokens,
            prompts,
            gateway,
            generation_timeout,
            locks: DashMap::new(),
        }
    }

    pub fn templates(&self) -> &'static [AgentTemplate] {
        templates::TEMPLATES
    }

    /// Creates a session from the user's description, pins the active master prompt and
    /// asks the first clarifying questions. Nothing is stored unless generation succeeds.
    pub async fn start(
        &self,
        account_id: Uuid,
        intent_text: &str,
        template_id: Option<&str>,
    ) -> Result<SessionOutcome, SessionError> {
        let intent_text = intent_text.trim();
        let chars = intent_text.chars().count();
        if !(MIN_INTENT_CHARS..=MAX_INTENT_CHARS).contains(&chars) {
            return Err(SessionError::InvalidIntent(chars));
        }
        let template = match template_id {
            Some(id) => {
                Some(templates::find(id).ok_or_else(|| SessionError::UnknownTemplate(id.to_string()))?)
            }
            None => None,
        };

        self.warn_if_overdrawn(account_id).await?;

        let pinned = self.prompts.active().await?;
        let request = prompts::questions_request(&pinned.content, template, intent_text);
        let completion = self.generate(account_id, "clarify", request).await?;
        let parsed = parse_questions(&completion.text);
        let (questions, receipt) = self
            .bill(account_id, &completion, "Agent creation: clarifying questions", parsed)
            .await?;

        let now = Utc::now();
        let mut session = AgentSession {
            id: Uuid::new_v4(),
            account_id,
            pinned_master_prompt_version: pinned.version_id,
            template_id: template.map(|t| t.id.to_string()),
            stage: Stage::Describing,
            intent_text: intent_text.to_string(),
            answers: vec![String::new(); questions.len()],
            clarifying_questions: questions,
            concepts: Vec::new(),
            tokens_spent_total: 0,
            revision: 1,
            created_at: now,
            updated_at: now,
        };
        advance(&mut session, Stage::Clarifying, "start")?;
        session.tokens_spent_total = completion.tokens_used;

        self.store.insert_session(&session).await?;
        info!(
            "Session {} started for account {account_id} on master prompt {}",
            session.id, session.pinned_master_prompt_version
        );
        Ok(SessionOutcome { session, receipt })
    }

    /// Merges the caller's answers, then either asks follow-up questions (staying in
    /// `Clarifying`) or moves to `Refining` with a concept map.
    pub async fn refine(
        &self,
        session_id: Uuid,
        account_id: Uuid,
        answers: Vec<String>,
    ) -> Result<SessionOutcome, SessionError> {
        let _guard = self.acquire(session_id)?;
        let session = self.owned_session(session_id, account_id).await?;
        if session.stage != Stage::Clarifying {
            return Err(transition_error(session.stage, "refine"));
        }
        let merged = merge_answers(&session.answers, &answers)?;

        let pinned = self.pinned_content(&session).await?;
        let template = session.template_id.as_deref().and_then(templates::find);
        let request = prompts::refine_request(&pinned, template, &session, &merged);
        let completion = self.generate(account_id, "refine", request).await?;
        let parsed = parse_refinement(&completion.text);
        let ((concepts, follow_ups), receipt) = self
            .bill(account_id, &completion, "Agent creation: concept refinement", parsed)
            .await?;

        let mut next = session.clone();
        next.answers = merged;
        next.concepts = concepts;
        if follow_ups.is_empty() {
            advance(&mut next, Stage::Refining, "refine")?;
        } else {
            advance(&mut next, Stage::Clarifying, "refine")?;
            next.answers
                .extend(std::iter::repeat(String::new()).take(follow_ups.len()));
            next.clarifying_questions.extend(follow_ups);
        }
        next.tokens_spent_total += completion.tokens_used;
        if let Err(err) = self.persist(&mut next, session.revision).await {
            if matches!(err, SessionError::ConcurrentModification) {
                self.refund(account_id, session_id, receipt.tokens_charged)
                    .await?;
            }
            return Err(err);
        }

        info!("Session {session_id} refined, now {}", next.stage.as_str());
        Ok(SessionOutcome {
            session: next,
            receipt,
        })
    }

    /// Produces the artifact from the pinned master prompt. Not idempotent: a second
    /// call fails with `AlreadyFinalized` and is never billed.
    pub async fn finalize(
        &self,
        session_id: Uuid,
        account_id: Uuid,
        confirm: bool,
    ) -> Result<FinalizeOutcome, SessionError> {
        if !confirm {
            return Err(SessionError::ConfirmationRequired);
        }
        let _guard = self.acquire(session_id)?;
        let session = self.owned_session(session_id, account_id).await?;
        match session.stage {
            Stage::Refining => {}
            Stage::Finalized => return Err(SessionError::AlreadyFinalized),
            stage => return Err(transition_error(stage, "finalize")),
        }

        let pinned = self.pinned_content(&session).await?;
        let template = session.template_id.as_deref().and_then(templates::find);
        let request = prompts::finalize_request(&pinned, template, &session);
        let completion = self.generate(account_id, "finalize", request).await?;
        let parsed = usable_markdown(&completion.text);
        let (markdown, receipt) = self
            .bill(account_id, &completion, "Agent creation: final prompt", parsed)
            .await?;

        let mut next = session.clone();
        advance(&mut next, Stage::Finalized, "finalize")?;
        next.tokens_spent_total += completion.tokens_used;
        next.revision += 1;
        next.updated_at = Utc::now();

        let artifact = AgentArtifact {
            session_id,
            account_id,
            summary: extract_summary(&markdown, &session.intent_text),
            base_prompt_markdown: markdown,
            v9_prompt_markdown: None,
            tokens_used_base: completion.tokens_used,
            tokens_used_v9: 0,
            share_token: None,
            created_at: next.updated_at,
        };
        if let Err(err) = self
            .store
            .finalize_session(&next, session.revision, &artifact)
            .await
            .map_err(conflict_as_state)
        {
            if matches!(err, SessionError::ConcurrentModification) {
                self.refund(account_id, session_id, receipt.tokens_charged)
                    .await?;
            }
            return Err(err);
        }

        info!("Session {session_id} finalized ({} tokens in total)", next.tokens_spent_total);
        Ok(FinalizeOutcome {
            session: next,
            artifact,
            receipt,
        })
    }

    /// Deepens the finalized prompt once. Repeat calls return the stored rendition and
    /// charge nothing.
    pub async fn transform_v9(
        &self,
        session_id: Uuid,
        account_id: Uuid,
    ) -> Result<V9Outcome, SessionError> {
        let _guard = self.acquire(session_id)?;
        let session = self.owned_session(session_id, account_id).await?;
        if session.stage != Stage::Finalized {
            return Err(SessionError::NotFinalized);
        }
        let artifact = self.artifact_of(session_id).await?;
        if artifact.v9_prompt_markdown.is_some() {
            return Ok(V9Outcome::AlreadyTransformed { artifact });
        }

        let request = prompts::v9_request(&session.intent_text, &artifact.base_prompt_markdown);
        let completion = self.generate(account_id, "v9", request).await?;
        let parsed = usable_markdown(&completion.text);
        let (markdown, receipt) = self
            .bill(account_id, &completion, "Agent v9 transformation", parsed)
            .await?;

        match self
            .store
            .store_v9(session_id, &markdown, completion.tokens_used)
            .await?
        {
            Some(artifact) => {
                info!("Session {session_id} transformed to v9");
                Ok(V9Outcome::Transformed { artifact, receipt })
            }
            None => {
                // Another instance wrote it first; the stored rendition and its charge stand.
                warn!("Session {session_id} already had a v9 rendition, keeping the stored one");
                self.refund(account_id, session_id, receipt.tokens_charged)
                    .await?;
                Ok(V9Outcome::AlreadyTransformed {
                    artifact: self.artifact_of(session_id).await?,
                })
            }
        }
    }

    /// Turns public sharing on or off. Enabling keeps an existing token.
    pub async fn set_sharing(
        &self,
        session_id: Uuid,
        account_id: Uuid,
        enabled: bool,
    ) -> Result<AgentArtifact, SessionError> {
        let _guard = self.acquire(session_id)?;
        let session = self.owned_session(session_id, account_id).await?;
        if session.stage != Stage::Finalized {
            return Err(SessionError::NotFinalized);
        }
        let artifact = self.artifact_of(session_id).await?;

        let token = match (enabled, artifact.share_token) {
            (true, Some(existing)) => Some(existing),
            (true, None) => Some(Uuid::new_v4().simple().to_string()),
            (false, _) => None,
        };
        self.store
            .set_share_token(session_id, token.as_deref())
            .await?
            .ok_or(SessionError::NotFinalized)
    }

    pub async fn shared(&self, token: &str) -> Result<SharedAgent, SessionError> {
        let artifact = self
            .store
            .artifact_by_share_token(token)
            .await?
            .ok_or(SessionError::ShareNotFound)?;
        Ok(SharedAgent {
            summary: artifact.summary,
            base_prompt_markdown: artifact.base_prompt_markdown,
            v9_prompt_markdown: artifact.v9_prompt_markdown,
            created_at: artifact.created_at,
        })
    }

    pub async fn get(&self, session_id: Uuid, account_id: Uuid) -> Result<SessionView, SessionError> {
        let session = self.owned_session(session_id, account_id).await?;
        let artifact = match session.stage {
            Stage::Finalized => self.store.artifact(session_id).await?,
            _ => None,
        };
        Ok(SessionView { session, artifact })
    }

    pub async fn list_for_account(&self, account_id: Uuid) -> Result<Vec<AgentSession>, SessionError> {
        Ok(self.store.sessions_for_account(account_id).await?)
    }

    fn acquire(&self, session_id: Uuid) -> Result<SessionLock<'_>, SessionError> {
        let lock = Arc::clone(&self.locks.entry(session_id).or_default());
        let guard = lock
            .try_lock_owned()
            .map_err(|_| SessionError::SessionBusy)?;
        Ok(SessionLock {
            locks: &self.locks,
            session_id,
            guard: Some(guard),
        })
    }

    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.len()
    }

    /// Sessions of other accounts are reported as missing.
    async fn owned_session(
        &self,
        session_id: Uuid,
        account_id: Uuid,
    ) -> Result<AgentSession, SessionError> {
        match self.store.session(session_id).await? {
            Some(session) if session.account_id == account_id => Ok(session),
            _ => Err(SessionError::SessionNotFound(session_id)),
        }
    }

    async fn artifact_of(&self, session_id: Uuid) -> Result<AgentArtifact, SessionError> {
        self.store.artifact(session_id).await?.ok_or_else(|| {
            SessionError::Store(StoreError::Corrupt(format!(
                "finalized session {session_id} has no artifact"
            )))
        })
    }

    async fn pinned_content(&self, session: &AgentSession) -> Result<String, SessionError> {
        Ok(self
            .prompts
            .version(&session.pinned_master_prompt_version)
            .await?
            .content)
    }

    async fn warn_if_overdrawn(&self, account_id: Uuid) -> Result<(), SessionError> {
        let balance = self.tokens.balance(account_id).await?;
        if balance <= 0 {
            warn!("Account {account_id} starts a session with balance {balance}");
        }
        Ok(())
    }

    /// Calls the gateway under the generation deadline. A timeout that came with a
    /// reported cost is still billed.
    async fn generate(
        &self,
        account_id: Uuid,
        stage: &str,
        request: CompletionRequest,
    ) -> Result<Completion, SessionError> {
        match tokio::time::timeout(self.generation_timeout, self.gateway.generate(request)).await {
            Ok(Ok(completion)) => Ok(completion),
            Ok(Err(GatewayError::Provider(message))) => {
                warn!("Generation failed at {stage}: {message}");
                Err(SessionError::GenerationFailed(message))
            }
            Ok(Err(GatewayError::Timeout { tokens_used })) => {
                let tokens_charged = tokens_used.unwrap_or(0).max(0);
                if tokens_charged > 0 {
                    self.tokens
                        .debit(account_id, tokens_charged, &format!("Timed out generation ({stage})"))
                        .await?;
                }
                Err(SessionError::GenerationTimeout { tokens_charged })
            }
            Err(_) => {
                warn!(
                    "Generation at {stage} exceeded {}s, abandoned",
                    self.generation_timeout.as_secs()
                );
                Err(SessionError::GenerationTimeout { tokens_charged: 0 })
            }
        }
    }

    /// Debits the reported cost whatever the content looks like, then fails the call if
    /// the content was unusable.
    async fn bill<T>(
        &self,
        account_id: Uuid,
        completion: &Completion,
        description: &str,
        parsed: Generated<T>,
    ) -> Result<(T, StageReceipt), SessionError> {
        let tokens = completion.tokens_used.max(0);
        let balance_after = self.tokens.debit(account_id, tokens, description).await?;
        match parsed {
            Generated::Usable(value) => Ok((value, StageReceipt::new(tokens, balance_after))),
            Generated::Unusable if tokens > 0 => Err(SessionError::GenerationDegraded {
                tokens_charged: tokens,
                balance_after,
            }),
            Generated::Unusable => Err(SessionError::GenerationFailed(
                "empty or malformed completion".to_string(),
            )),
        }
    }

    /// Billing happens before the revision check, so the instance that loses the race
    /// for a transition gets its charge back. The winner's debit is the one that stands.
    async fn refund(
        &self,
        account_id: Uuid,
        session_id: Uuid,
        tokens: i64,
    ) -> Result<(), SessionError> {
        if tokens > 0 {
            let description = format!("Refund: session {session_id} was advanced concurrently");
            self.tokens.credit(account_id, tokens, &description).await?;
        }
        warn!("Session {session_id} lost a revision race, refunded {tokens} tokens");
        Ok(())
    }

    async fn persist(&self, next: &mut AgentSession, expected_revision: i64) -> Result<(), SessionError> {
        next.revision = expected_revision + 1;
        next.updated_at = Utc::now();
        self.store
            .update_session(next, expected_revision)
            .await
            .map_err(conflict_as_state)
    }
}

fn conflict_as_state(err: StoreError) -> SessionError {
    match err {
        StoreError::Conflict(_) => SessionError::ConcurrentModification,
        other => SessionError::Store(other),
    }
}

fn transition_error(stage: Stage, operation: &'static str) -> SessionError {
    match stage {
        Stage::Finalized => SessionError::AlreadyFinalized,
        stage => SessionError::InvalidTransition { stage, operation },
    }
}

fn advance(
    session: &mut AgentSession,
    next: Stage,
    operation: &'static str,
) -> Result<(), SessionError> {
    if !session.stage.can_advance_to(next) {
        return Err(transition_error(session.stage, operation));
    }
    session.stage = next;
    Ok(())
}

/// Applies submitted answers to the stored ones.
///
/// Either a full set aligned with every question, where a blank entry keeps the stored
/// answer, or exactly one answer per open slot, filled in order. Every slot must end up
/// answered.
pub fn merge_answers(stored: &[String], submitted: &[String]) -> Result<Vec<String>, SessionError> {
    let open = stored.iter().filter(|a| a.trim().is_empty()).count();
    let incomplete = |unanswered| SessionError::IncompleteAnswers {
        questions: stored.len(),
        unanswered,
        received: submitted.len(),
    };

    let merged: Vec<String> = if submitted.len() == stored.len() {
        stored
            .iter()
            .zip(submitted)
            .map(|(old, new)| {
                if new.trim().is_empty() {
                    old.clone()
                } else {
                    new.trim().to_string()
                }
            })
            .collect()
    } else if submitted.len() == open && open > 0 {
        let mut fills = submitted.iter();
        stored
            .iter()
            .map(|old| {
                if old.trim().is_empty() {
                    fills.next().map(|a| a.trim().to_string()).unwrap_or_default()
                } else {
                    old.clone()
                }
            })
            .collect()
    } else {
        return Err(incomplete(open));
    };

    let still_open = merged.iter().filter(|a| a.is_empty()).count();
    if still_open > 0 {
        return Err(incomplete(still_open));
    }
    Ok(merged)
}

fn clean_questions(questions: Vec<String>) -> Vec<String> {
    questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(MAX_QUESTIONS)
        .collect()
}

fn parse_questions(text: &str) -> Generated<Vec<String>> {
    let questions = parse_json_reply::<QuestionsReply>(text)
        .map(|r| r.questions)
        .or_else(|| parse_json_reply::<Vec<String>>(text))
        .map(clean_questions)
        .unwrap_or_default();
    if questions.len() < MIN_QUESTIONS {
        return Generated::Unusable;
    }
    Generated::Usable(questions)
}

fn parse_refinement(text: &str) -> Generated<(Vec<ConceptCard>, Vec<String>)> {
    match parse_json_reply::<RefinementReply>(text) {
        Some(reply) if !reply.concepts.is_empty() => Generated::Usable((
            reply.concepts,
            clean_questions(reply.follow_up_questions.unwrap_or_default()),
        )),
        _ => Generated::Unusable,
    }
}

fn usable_markdown(text: &str) -> Generated<String> {
    let text = text.trim();
    if text.is_empty() {
        return Generated::Unusable;
    }
    Generated::Usable(text.to_string())
}

/// The `## AGENT_SUMMARY` section if present, otherwise the start of the intent.
pub fn extract_summary(markdown: &str, intent_text: &str) -> String {
    let section = markdown
        .split_once(SUMMARY_HEADING)
        .map(|(_, rest)| rest.split("##").next().unwrap_or_default().trim())
        .filter(|s| !s.is_empty());
    match section {
        Some(summary) => summary.chars().take(SUMMARY_MAX_CHARS).collect(),
        None if intent_text.chars().count() > SUMMARY_FALLBACK_CHARS => {
            let head: String = intent_text.chars().take(SUMMARY_FALLBACK_CHARS).collect();
            format!("{head}...")
        }
        None => intent_text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::account::TransactionKind;
    use crate::testing::{Harness, CONCEPTS_JSON, FINAL_MARKDOWN, INTENT, QUESTIONS_JSON};

    fn answers(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn account(h: &Harness) -> Uuid {
        let id = Uuid::new_v4();
        h.tokens.open_account(id).await.unwrap();
        id
    }

    #[test]
    fn test_merge_accepts_full_set_with_blank_fallbacks() {
        let stored = answers(&["web", "", ""]);
        let merged = merge_answers(&stored, &answers(&["", "email", "formal"])).unwrap();
        assert_eq!(merged, answers(&["web", "email", "formal"]));
    }

    #[test]
    fn test_merge_accepts_delta_for_open_slots() {
        let stored = answers(&["web", "email", "formal", "", ""]);
        let merged = merge_answers(&stored, &answers(&["daily", "en"])).unwrap();
        assert_eq!(merged[3], "daily");
        assert_eq!(merged[4], "en");
    }

    #[test]
    fn test_merge_rejects_short_and_blank_submissions() {
        let stored = answers(&["", "", ""]);
        assert!(matches!(
            merge_answers(&stored, &answers(&["a", "b"])),
            Err(SessionError::IncompleteAnswers {
                questions: 3,
                received: 2,
                ..
            })
        ));
        assert!(matches!(
            merge_answers(&stored, &answers(&["a", " ", "c"])),
            Err(SessionError::IncompleteAnswers { unanswered: 1, .. })
        ));
    }

    #[test]
    fn test_questions_are_capped_and_need_two() {
        let Generated::Usable(q) = parse_questions(r#"{"questions": ["a?", "b?", "c?", "d?"]}"#)
        else {
            panic!("expected usable questions");
        };
        assert_eq!(q.len(), 3);
        assert!(matches!(
            parse_questions(r#"{"questions": ["only one?", ""]}"#),
            Generated::Unusable
        ));
        assert!(matches!(parse_questions("not json"), Generated::Unusable));
    }

    #[test]
    fn test_summary_extraction_and_fallback() {
        assert_eq!(
            extract_summary(FINAL_MARKDOWN, INTENT),
            "Handles first-line support tickets."
        );
        assert_eq!(extract_summary("# Agent", "short intent"), "short intent");
        let long = "x".repeat(150);
        assert_eq!(extract_summary("", &long).chars().count(), 103);
    }

    #[tokio::test]
    async fn test_balance_scenario_through_full_lifecycle() {
        let h = Harness::new(500).await;
        let account_id = account(&h).await;
        h.gateway
            .reply(QUESTIONS_JSON, 120)
            .reply(CONCEPTS_JSON, 200)
            .reply(FINAL_MARKDOWN, 150)
            .reply("You are now\n\n# Ω-Support-v9", 300);

        let started = h.sessions.start(account_id, INTENT, None).await.unwrap();
        assert_eq!(started.receipt.balance_after, 380);
        assert_eq!(started.session.stage, Stage::Clarifying);
        let id = started.session.id;

        let refined = h
            .sessions
            .refine(id, account_id, answers(&["agents", "email", "friendly"]))
            .await
            .unwrap();
        assert_eq!(refined.receipt.balance_after, 180);
        assert_eq!(refined.session.stage, Stage::Refining);

        let finalized = h.sessions.finalize(id, account_id, true).await.unwrap();
        assert_eq!(finalized.receipt.balance_after, 30);
        assert_eq!(finalized.session.tokens_spent_total, 470);

        let first = h.sessions.transform_v9(id, account_id).await.unwrap();
        assert!(!first.already_transformed());
        assert_eq!(h.tokens.balance(account_id).await.unwrap(), -270);

        let second = h.sessions.transform_v9(id, account_id).await.unwrap();
        assert!(second.already_transformed());
        assert_eq!(second.artifact(), first.artifact());
        assert_eq!(h.tokens.balance(account_id).await.unwrap(), -270);
        assert_eq!(h.gateway.calls(), 4);
    }

    #[tokio::test]
    async fn test_incomplete_answers_change_nothing() {
        let h = Harness::new(500).await;
        let account_id = account(&h).await;
        h.gateway.reply(QUESTIONS_JSON, 120);
        let started = h.sessions.start(account_id, INTENT, None).await.unwrap();

        let err = h
            .sessions
            .refine(started.session.id, account_id, answers(&["a", "b"]))
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::IncompleteAnswers { .. }));
        let view = h.sessions.get(started.session.id, account_id).await.unwrap();
        assert_eq!(view.session, started.session);
        assert_eq!(h.tokens.balance(account_id).await.unwrap(), 380);
        assert_eq!(h.gateway.calls(), 1);
    }

    #[tokio::test]
    async fn test_follow_up_questions_loop_in_clarifying() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway.reply(QUESTIONS_JSON, 10).reply(
            r#"{"concepts": [{"id": "core", "label": "Core"}], "follow_up_questions": ["Which CRM?"]}"#,
            10,
        );
        let id = h.sessions.start(account_id, INTENT, None).await.unwrap().session.id;

        let refined = h
            .sessions
            .refine(id, account_id, answers(&["a", "b", "c"]))
            .await
            .unwrap();

        assert_eq!(refined.session.stage, Stage::Clarifying);
        assert_eq!(refined.session.clarifying_questions.len(), 4);
        assert_eq!(refined.session.answers, answers(&["a", "b", "c", ""]));
        assert_eq!(refined.session.unanswered(), 1);
        assert_eq!(refined.session.revision, 2);
    }

    #[tokio::test]
    async fn test_pinned_version_survives_approval() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway
            .reply(QUESTIONS_JSON, 10)
            .reply(CONCEPTS_JSON, 10)
            .reply(FINAL_MARKDOWN, 10);
        let started = h.sessions.start(account_id, INTENT, None).await.unwrap();
        let pinned = started.session.pinned_master_prompt_version.clone();
        let id = started.session.id;

        let candidate = h
            .prompts
            .propose_candidate("NEW MASTER PROMPT", vec![])
            .await
            .unwrap();
        h.prompts.approve(&candidate, "admin").await.unwrap();

        h.sessions
            .refine(id, account_id, answers(&["a", "b", "c"]))
            .await
            .unwrap();
        let finalized = h.sessions.finalize(id, account_id, true).await.unwrap();

        assert_eq!(finalized.session.pinned_master_prompt_version, pinned);
        let finalize_request = h.gateway.requests().pop().unwrap();
        assert!(finalize_request.instruction.starts_with("MASTER_AGENT:Ω-Agent-Architect"));
        assert!(!finalize_request.instruction.contains("NEW MASTER PROMPT"));
    }

    #[tokio::test]
    async fn test_finalize_twice_is_rejected_without_billing() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway
            .reply(QUESTIONS_JSON, 10)
            .reply(CONCEPTS_JSON, 10)
            .reply(FINAL_MARKDOWN, 10);
        let id = h.sessions.start(account_id, INTENT, None).await.unwrap().session.id;
        h.sessions
            .refine(id, account_id, answers(&["a", "b", "c"]))
            .await
            .unwrap();
        h.sessions.finalize(id, account_id, true).await.unwrap();

        let err = h.sessions.finalize(id, account_id, true).await.unwrap_err();

        assert!(matches!(err, SessionError::AlreadyFinalized));
        assert_eq!(h.tokens.balance(account_id).await.unwrap(), 970);
        assert_eq!(h.gateway.calls(), 3);
    }

    #[tokio::test]
    async fn test_finalize_requires_confirmation_and_refining_stage() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway.reply(QUESTIONS_JSON, 10);
        let id = h.sessions.start(account_id, INTENT, None).await.unwrap().session.id;

        assert!(matches!(
            h.sessions.finalize(id, account_id, false).await,
            Err(SessionError::ConfirmationRequired)
        ));
        assert!(matches!(
            h.sessions.finalize(id, account_id, true).await,
            Err(SessionError::InvalidTransition {
                stage: Stage::Clarifying,
                ..
            })
        ));
        assert!(matches!(
            h.sessions.transform_v9(id, account_id).await,
            Err(SessionError::NotFinalized)
        ));
    }

    #[tokio::test]
    async fn test_start_validates_intent_and_template() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;

        assert!(matches!(
            h.sessions.start(account_id, "too short", None).await,
            Err(SessionError::InvalidIntent(9))
        ));
        assert!(matches!(
            h.sessions.start(account_id, &"x".repeat(4001), None).await,
            Err(SessionError::InvalidIntent(4001))
        ));
        assert!(matches!(
            h.sessions.start(account_id, INTENT, Some("astrology")).await,
            Err(SessionError::UnknownTemplate(_))
        ));
        assert_eq!(h.gateway.calls(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_leaves_nothing_behind() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway
            .fail(GatewayError::Provider("overloaded".to_string()))
            .reply(QUESTIONS_JSON, 10);

        assert!(matches!(
            h.sessions.start(account_id, INTENT, Some("customer-support")).await,
            Err(SessionError::GenerationFailed(_))
        ));
        assert!(h.sessions.list_for_account(account_id).await.unwrap().is_empty());
        assert_eq!(h.tokens.balance(account_id).await.unwrap(), 1_000);

        let retried = h
            .sessions
            .start(account_id, INTENT, Some("customer-support"))
            .await
            .unwrap();
        assert_eq!(retried.session.template_id.as_deref(), Some("customer-support"));
    }

    #[tokio::test]
    async fn test_unusable_content_with_cost_is_billed_as_degraded() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway.reply(QUESTIONS_JSON, 100).reply("I cannot help", 40);
        let started = h.sessions.start(account_id, INTENT, None).await.unwrap();
        let id = started.session.id;

        let err = h
            .sessions
            .refine(id, account_id, answers(&["a", "b", "c"]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SessionError::GenerationDegraded {
                tokens_charged: 40,
                balance_after: 860
            }
        ));
        let view = h.sessions.get(id, account_id).await.unwrap();
        assert_eq!(view.session, started.session);
        assert_eq!(view.session.tokens_spent_total, 100);

        let charge = &h.tokens.transactions(account_id).await.unwrap()[0];
        assert_eq!(charge.kind, TransactionKind::Debit);
        assert_eq!(charge.amount, -40);
        assert_eq!(charge.description, "Agent creation: concept refinement");
    }

    #[tokio::test]
    async fn test_unusable_content_without_cost_is_a_plain_failure() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway.reply("", 0);

        assert!(matches!(
            h.sessions.start(account_id, INTENT, None).await,
            Err(SessionError::GenerationFailed(_))
        ));
        assert_eq!(h.tokens.balance(account_id).await.unwrap(), 1_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_gateway_times_out_without_debit() {
        let h = Harness::with_timeout(1_000, Duration::from_secs(5)).await;
        let account_id = account(&h).await;
        h.gateway.delay(Duration::from_secs(60)).reply(QUESTIONS_JSON, 120);

        let err = h.sessions.start(account_id, INTENT, None).await.unwrap_err();

        assert!(matches!(
            err,
            SessionError::GenerationTimeout { tokens_charged: 0 }
        ));
        assert_eq!(h.tokens.balance(account_id).await.unwrap(), 1_000);
    }

    #[tokio::test]
    async fn test_gateway_timeout_with_reported_cost_is_billed() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway.fail(GatewayError::Timeout {
            tokens_used: Some(25),
        });

        assert!(matches!(
            h.sessions.start(account_id, INTENT, None).await,
            Err(SessionError::GenerationTimeout { tokens_charged: 25 })
        ));
        assert_eq!(h.tokens.balance(account_id).await.unwrap(), 975);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_operations_are_rejected_as_busy() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway.reply(QUESTIONS_JSON, 10);
        let id = h.sessions.start(account_id, INTENT, None).await.unwrap().session.id;
        h.gateway
            .delay(Duration::from_secs(1))
            .reply(CONCEPTS_JSON, 10);

        let sessions = h.sessions.clone();
        let first = tokio::spawn(async move {
            sessions
                .refine(id, account_id, answers(&["a", "b", "c"]))
                .await
        });
        tokio::task::yield_now().await;
        let second = h
            .sessions
            .refine(id, account_id, answers(&["a", "b", "c"]))
            .await;

        assert!(matches!(second, Err(SessionError::SessionBusy)));
        assert_eq!(first.await.unwrap().unwrap().session.stage, Stage::Refining);
        assert_eq!(h.sessions.lock_entries(), 0);
    }

    #[tokio::test]
    async fn test_lock_registry_is_empty_after_operations() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway
            .reply(QUESTIONS_JSON, 10)
            .reply(CONCEPTS_JSON, 10)
            .reply(FINAL_MARKDOWN, 10);
        let id = h.sessions.start(account_id, INTENT, None).await.unwrap().session.id;
        h.sessions
            .refine(id, account_id, answers(&["a", "b", "c"]))
            .await
            .unwrap();
        h.sessions.finalize(id, account_id, true).await.unwrap();
        assert!(h.sessions.finalize(id, account_id, true).await.is_err());
        h.sessions.set_sharing(id, account_id, true).await.unwrap();

        for _ in 0..20 {
            let missing = Uuid::new_v4();
            assert!(matches!(
                h.sessions.finalize(missing, account_id, true).await,
                Err(SessionError::SessionNotFound(_))
            ));
            assert!(h
                .sessions
                .refine(missing, account_id, answers(&["a"]))
                .await
                .is_err());
            assert!(h.sessions.transform_v9(missing, account_id).await.is_err());
            assert!(h.sessions.set_sharing(missing, account_id, true).await.is_err());
        }

        assert_eq!(h.sessions.lock_entries(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refine_that_loses_the_revision_race_is_refunded() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway.reply(QUESTIONS_JSON, 100);
        let started = h.sessions.start(account_id, INTENT, None).await.unwrap();
        let id = started.session.id;
        h.gateway.delay(Duration::from_secs(1)).reply(CONCEPTS_JSON, 50);

        let sessions = h.sessions.clone();
        let refine = tokio::spawn(async move {
            sessions
                .refine(id, account_id, answers(&["a", "b", "c"]))
                .await
        });
        tokio::task::yield_now().await;

        // Another instance advances the session while the gateway call is in flight.
        let mut winner = started.session.clone();
        winner.revision += 1;
        h.session_store
            .update_session(&winner, started.session.revision)
            .await
            .unwrap();

        let err = refine.await.unwrap().unwrap_err();

        assert!(matches!(err, SessionError::ConcurrentModification));
        assert_eq!(h.tokens.balance(account_id).await.unwrap(), 900);
        let refund = &h.tokens.transactions(account_id).await.unwrap()[0];
        assert_eq!(refund.kind, TransactionKind::Credit);
        assert_eq!(refund.amount, 50);
        assert_eq!(h.session_store.session(id).await.unwrap(), Some(winner));
    }

    #[tokio::test(start_paused = true)]
    async fn test_finalize_that_loses_the_revision_race_is_refunded() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway
            .reply(QUESTIONS_JSON, 100)
            .reply(CONCEPTS_JSON, 100);
        let id = h.sessions.start(account_id, INTENT, None).await.unwrap().session.id;
        let refined = h
            .sessions
            .refine(id, account_id, answers(&["a", "b", "c"]))
            .await
            .unwrap()
            .session;
        h.gateway.delay(Duration::from_secs(1)).reply(FINAL_MARKDOWN, 250);

        let sessions = h.sessions.clone();
        let finalize = tokio::spawn(async move { sessions.finalize(id, account_id, true).await });
        tokio::task::yield_now().await;

        let mut winner = refined.clone();
        winner.revision += 1;
        h.session_store
            .update_session(&winner, refined.revision)
            .await
            .unwrap();

        let err = finalize.await.unwrap().unwrap_err();

        assert!(matches!(err, SessionError::ConcurrentModification));
        assert_eq!(h.tokens.balance(account_id).await.unwrap(), 800);
        assert!(h.session_store.artifact(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sharing_exposes_only_the_artifact() {
        let h = Harness::new(1_000).await;
        let account_id = account(&h).await;
        h.gateway
            .reply(QUESTIONS_JSON, 10)
            .reply(CONCEPTS_JSON, 10)
            .reply(FINAL_MARKDOWN, 10);
        let id = h.sessions.start(account_id, INTENT, None).await.unwrap().session.id;
        h.sessions
            .refine(id, account_id, answers(&["a", "b", "c"]))
            .await
            .unwrap();
        h.sessions.finalize(id, account_id, true).await.unwrap();

        assert!(matches!(
            h.sessions.set_sharing(id, Uuid::new_v4(), true).await,
            Err(SessionError::SessionNotFound(_))
        ));
        let shared = h.sessions.set_sharing(id, account_id, true).await.unwrap();
        let token = shared.share_token.clone().unwrap();
        let again = h.sessions.set_sharing(id, account_id, true).await.unwrap();
        assert_eq!(again.share_token.as_deref(), Some(token.as_str()));

        let public = h.sessions.shared(&token).await.unwrap();
        assert_eq!(public.summary, "Handles first-line support tickets.");

        h.sessions.set_sharing(id, account_id, false).await.unwrap();
        assert!(matches!(
            h.sessions.shared(&token).await,
            Err(SessionError::ShareNotFound)
        ));
    }
}
