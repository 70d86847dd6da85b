use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::StoreError;
use crate::feedback::store::FeedbackStore;
use crate::governance::{GovernanceError, MasterPromptLedger};
use crate::learning::prompts;
use crate::llm_client::gateway::parse_json_reply;
use crate::llm_client::{CompletionGateway, CompletionRequest, GatewayError};
use crate::models::master_prompt::LearningSummary;
use crate::session::store::SessionStore;

const LOOKBACK_HOURS: i64 = 24;

#[derive(Debug, Error)]
pub enum LearningError {
    #[error("learning step '{step}' failed: {source}")]
    Generation {
        step: &'static str,
        #[source]
        source: GatewayError,
    },

    #[error("proposed master prompt was empty")]
    UnusableProposal,

    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoRecentActivity,
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Skipped(SkipReason),
    Proposed { version_id: String, tokens_used: i64 },
}

#[derive(Deserialize)]
struct PatternsReply {
    patterns: Vec<String>,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Turns a day of finalized sessions and user feedback into a pending master prompt
/// candidate.
///
/// Learning tokens are a system cost and are never debited from any account.
pub struct LearningLoop {
    sessions: Arc<dyn SessionStore>,
    feedback: Arc<dyn FeedbackStore>,
    prompts: MasterPromptLedger,
    gateway: Arc<dyn CompletionGateway>,
    running: Arc<AtomicBool>,
}

impl LearningLoop {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        feedback: Arc<dyn FeedbackStore>,
        prompts: MasterPromptLedger,
        gateway: Arc<dyn CompletionGateway>,
    ) -> Self {
        Self {
            sessions,
            feedback,
            prompts,
            gateway,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn claim(&self) -> Option<RunningGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunningGuard(Arc::clone(&self.running)))
    }

    /// Runs one cycle in the background. Returns false if a cycle is already in flight.
    pub fn trigger(self: &Arc<Self>) -> bool {
        let Some(guard) = self.claim() else {
            warn!("Learning cycle already running, trigger ignored");
            return false;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            log_outcome(this.execute().await);
        });
        true
    }

    /// Runs one cycle to completion on the caller's task.
    pub async fn run_cycle(&self) -> Result<CycleOutcome, LearningError> {
        let Some(_guard) = self.claim() else {
            warn!("Learning cycle already running, skipping");
            return Ok(CycleOutcome::Skipped(SkipReason::AlreadyRunning));
        };
        self.execute().await
    }

    async fn execute(&self) -> Result<CycleOutcome, LearningError> {
        let since = Utc::now() - Duration::hours(LOOKBACK_HOURS);
        let recent = self.sessions.finalized_since(since).await?;
        let feedback = self.feedback.feedback_since(since).await?;
        if recent.is_empty() && feedback.is_empty() {
            info!("No sessions or feedback in the last {LOOKBACK_HOURS}h, skipping learning cycle");
            return Ok(CycleOutcome::Skipped(SkipReason::NoRecentActivity));
        }
        info!(
            "Learning cycle started over {} finalized sessions and {} feedback entries",
            recent.len(),
            feedback.len()
        );

        let mut tokens_used = 0;

        let summary = self
            .step(
                "summarize",
                prompts::summarize_request(&recent, &feedback),
                &mut tokens_used,
            )
            .await?;

        let raw_patterns = self
            .step("patterns", prompts::patterns_request(&summary), &mut tokens_used)
            .await?;
        let patterns = parse_patterns(&raw_patterns);
        if patterns.is_empty() {
            warn!("Pattern extraction returned nothing usable, proposing without patterns");
        }

        let current = self.prompts.active().await?;
        let proposal = self
            .step(
                "propose",
                prompts::propose_request(&current.content, &patterns, &summary),
                &mut tokens_used,
            )
            .await?;
        if proposal.is_empty() {
            return Err(LearningError::UnusableProposal);
        }

        let insight = self
            .step("insight", prompts::insight_request(&summary, &patterns), &mut tokens_used)
            .await?;

        // The summary references the candidate, so the candidate goes in first.
        let version_id = self
            .prompts
            .propose_candidate(&proposal, patterns.clone())
            .await?;
        let now = Utc::now();
        self.prompts
            .record_summary(&LearningSummary {
                id: Uuid::new_v4(),
                date: now.date_naive(),
                summary_text: summary,
                patterns_extracted: patterns,
                daily_insight: insight,
                tokens_used,
                candidate_version_id: Some(version_id.clone()),
                approved: false,
                created_at: now,
            })
            .await?;

        info!(
            "Learning cycle proposed {version_id} based on {} (pending approval, {tokens_used} tokens)",
            current.version_id
        );
        Ok(CycleOutcome::Proposed {
            version_id,
            tokens_used,
        })
    }

    async fn step(
        &self,
        step: &'static str,
        request: CompletionRequest,
        tokens_used: &mut i64,
    ) -> Result<String, LearningError> {
        let completion = self
            .gateway
            .generate(request)
            .await
            .map_err(|source| LearningError::Generation { step, source })?;
        *tokens_used += completion.tokens_used.max(0);
        Ok(completion.text.trim().to_string())
    }
}

pub(crate) fn log_outcome(result: Result<CycleOutcome, LearningError>) {
    match result {
        Ok(CycleOutcome::Proposed { version_id, .. }) => {
            info!("Learning cycle finished, {version_id} awaits review");
        }
        Ok(CycleOutcome::Skipped(reason)) => info!("Learning cycle skipped: {reason:?}"),
        Err(e) => error!("Learning cycle failed: {e}"),
    }
}

fn parse_patterns(text: &str) -> Vec<String> {
    parse_json_reply::<PatternsReply>(text)
        .map(|r| r.patterns)
        .or_else(|| parse_json_reply::<Vec<String>>(text))
        .unwrap_or_default()
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::NewFeedback;
    use crate::models::master_prompt::VersionStatus;
    use crate::testing::{Harness, CONCEPTS_JSON, FINAL_MARKDOWN, INTENT, QUESTIONS_JSON};

    fn learning(h: &Harness) -> Arc<LearningLoop> {
        Arc::new(LearningLoop::new(
            h.session_store.clone(),
            h.feedback_store.clone(),
            h.prompts.clone(),
            h.gateway.clone(),
        ))
    }

    async fn finalize_one(h: &Harness) -> Uuid {
        let account_id = Uuid::new_v4();
        h.tokens.open_account(account_id).await.unwrap();
        h.gateway
            .reply(QUESTIONS_JSON, 10)
            .reply(CONCEPTS_JSON, 10)
            .reply(FINAL_MARKDOWN, 10);
        let id = h.sessions.start(account_id, INTENT, None).await.unwrap().session.id;
        let answers = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        h.sessions.refine(id, account_id, answers).await.unwrap();
        h.sessions.finalize(id, account_id, true).await.unwrap();
        account_id
    }

    fn script_cycle(h: &Harness) {
        h.gateway
            .reply("Mostly support agents.", 100)
            .reply(r#"{"patterns": ["Support dominates", "Tone matters"]}"#, 50)
            .reply("MASTER_AGENT:Ω-Agent-Architect v2", 300)
            .reply("Today I learned that people want kind agents.", 40);
    }

    #[test]
    fn test_parse_patterns_accepts_object_or_array() {
        assert_eq!(parse_patterns(r#"{"patterns": ["a", " "]}"#), vec!["a"]);
        assert_eq!(parse_patterns(r#"["a", "b"]"#), vec!["a", "b"]);
        assert!(parse_patterns("no json here").is_empty());
    }

    #[tokio::test]
    async fn test_cycle_without_sessions_is_skipped() {
        let h = Harness::new(1_000).await;

        let outcome = learning(&h).run_cycle().await.unwrap();

        assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::NoRecentActivity));
        assert_eq!(h.gateway.calls(), 0);
        assert_eq!(h.prompts.list_versions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_proposes_pending_candidate_without_touching_active() {
        let h = Harness::new(1_000).await;
        let account_id = finalize_one(&h).await;
        let balance_before = h.tokens.balance(account_id).await.unwrap();
        script_cycle(&h);

        let outcome = learning(&h).run_cycle().await.unwrap();

        assert_eq!(
            outcome,
            CycleOutcome::Proposed {
                version_id: "Ω_v1.1".to_string(),
                tokens_used: 490
            }
        );
        let candidate = h.prompts.version("Ω_v1.1").await.unwrap();
        assert_eq!(candidate.status, VersionStatus::Pending);
        assert_eq!(candidate.patterns_learned, vec!["Support dominates", "Tone matters"]);
        assert_eq!(h.prompts.active().await.unwrap().version_id, "Ω_v1.0");

        let summaries = h.prompts.learning_summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].candidate_version_id.as_deref(), Some("Ω_v1.1"));
        assert!(!summaries[0].approved);
        assert_eq!(h.tokens.balance(account_id).await.unwrap(), balance_before);
    }

    #[tokio::test]
    async fn test_recent_feedback_reaches_the_summary_prompt() {
        let h = Harness::new(1_000).await;
        let account_id = Uuid::new_v4();
        h.tokens.open_account(account_id).await.unwrap();
        h.feedback
            .submit(NewFeedback {
                account_id,
                session_id: None,
                rating: 2,
                comment: Some("Too many questions before anything happened".to_string()),
                keywords: vec!["slow".to_string()],
            })
            .await
            .unwrap();
        script_cycle(&h);

        let outcome = learning(&h).run_cycle().await.unwrap();

        assert!(matches!(outcome, CycleOutcome::Proposed { .. }));
        let summarize = &h.gateway.requests()[0];
        assert!(summarize.context.contains("No sessions finalized."));
        assert!(summarize.context.contains(
            "Rating: 2/5 | Keywords: slow | Comment: Too many questions before anything happened"
        ));
    }

    #[tokio::test]
    async fn test_failed_step_records_nothing() {
        let h = Harness::new(1_000).await;
        finalize_one(&h).await;
        h.gateway
            .reply("Mostly support agents.", 100)
            .fail(GatewayError::Provider("overloaded".to_string()));

        let err = learning(&h).run_cycle().await.unwrap_err();

        assert!(matches!(err, LearningError::Generation { step: "patterns", .. }));
        assert_eq!(h.prompts.list_versions().await.unwrap().len(), 1);
        assert!(h.prompts.learning_summaries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_proposal_is_not_filed() {
        let h = Harness::new(1_000).await;
        finalize_one(&h).await;
        h.gateway
            .reply("summary", 1)
            .reply(r#"["p"]"#, 1)
            .reply("   ", 1);

        let err = learning(&h).run_cycle().await.unwrap_err();

        assert!(matches!(err, LearningError::UnusableProposal));
        assert_eq!(h.prompts.list_versions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_while_running_is_ignored() {
        let h = Harness::new(1_000).await;
        let learning = learning(&h);
        let guard = learning.claim().unwrap();

        assert!(!learning.trigger());
        assert_eq!(
            learning.run_cycle().await.unwrap(),
            CycleOutcome::Skipped(SkipReason::AlreadyRunning)
        );

        drop(guard);
        assert!(!learning.is_running());
        assert!(learning.trigger());
    }
}
