use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Describing,
    Clarifying,
    Refining,
    Finalized,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Describing => "describing",
            Stage::Clarifying => "clarifying",
            Stage::Refining => "refining",
            Stage::Finalized => "finalized",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "describing" => Some(Stage::Describing),
            "clarifying" => Some(Stage::Clarifying),
            "refining" => Some(Stage::Refining),
            "finalized" => Some(Stage::Finalized),
            _ => None,
        }
    }

    /// Forward-only progression. `Clarifying` may loop while follow-up questions arrive.
    pub fn can_advance_to(self, next: Stage) -> bool {
        matches!(
            (self, next),
            (Stage::Describing, Stage::Clarifying)
                | (Stage::Clarifying, Stage::Clarifying)
                | (Stage::Clarifying, Stage::Refining)
                | (Stage::Refining, Stage::Finalized)
        )
    }
}

/// A node of the concept map produced during refinement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConceptCard {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// Server-owned authoring session.
///
/// `answers` is index-aligned with `clarifying_questions`; an empty string marks an
/// unanswered slot. `revision` increases by one on every persisted transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSession {
    pub id: Uuid,
    pub account_id: Uuid,
    pub pinned_master_prompt_version: String,
    pub template_id: Option<String>,
    pub stage: Stage,
    pub intent_text: String,
    pub clarifying_questions: Vec<String>,
    pub answers: Vec<String>,
    pub concepts: Vec<ConceptCard>,
    /// Cost of the stage calls that advanced this session. Degraded and timed-out calls
    /// are billed to the account but change no session field; the account's transaction
    /// history is the complete record of what was charged.
    pub tokens_spent_total: i64,
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentSession {
    pub fn unanswered(&self) -> usize {
        self.answers.iter().filter(|a| a.trim().is_empty()).count()
    }
}

/// Output of a finalized session. One per session; the base prompt never changes and
/// the v9 rendition is written at most once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentArtifact {
    pub session_id: Uuid,
    pub account_id: Uuid,
    pub base_prompt_markdown: String,
    pub summary: String,
    pub v9_prompt_markdown: Option<String>,
    pub tokens_used_base: i64,
    pub tokens_used_v9: i64,
    pub share_token: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A finalized session joined with its artifact, as read by the learning loop.
#[derive(Debug, Clone)]
pub struct FinalizedSession {
    pub session: AgentSession,
    pub artifact: AgentArtifact,
}
