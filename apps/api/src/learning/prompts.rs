// LLM prompts for the learning cycle. Four calls per cycle: summarize, extract patterns,
// propose a full replacement master prompt, write the daily insight.

use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, MARKDOWN_ONLY_SYSTEM};
use crate::llm_client::CompletionRequest;
use crate::models::feedback::Feedback;
use crate::models::session::FinalizedSession;

const SUMMARY_MAX_TOKENS: u32 = 800;
const PATTERNS_MAX_TOKENS: u32 = 500;
const PROPOSE_MAX_TOKENS: u32 = 3000;
const INSIGHT_MAX_TOKENS: u32 = 300;
/// Sessions beyond this are left out of the summary input.
pub const MAX_SESSIONS_PER_CYCLE: usize = 50;
pub const MAX_FEEDBACK_PER_CYCLE: usize = 100;

pub const SUMMARIZE_INSTRUCTION: &str = "You are the analyst of the Ω agent architect system.

Write a concise summary (at most 500 words) of the agent sessions finalized and the user
feedback received in the last 24 hours. Cover:
1. The most frequently requested kinds of agents
2. How much clarification users needed before finalizing
3. Recurring themes or patterns
4. Problems or weak spots in the generated prompts
5. What users praised or criticized in their feedback";

pub const PATTERNS_INSTRUCTION: &str = r#"You are the pattern analyst of the Ω agent architect system.

Extract 5-10 key patterns or themes from the summary.

Return a JSON object with this EXACT schema:
{"patterns": ["Pattern 1: description", "Pattern 2: description"]}"#;

/// Replace: {current_prompt}, {patterns}
pub const PROPOSE_INSTRUCTION: &str = "You are the evolution architect of the Ω agent architect system.

CURRENT MASTER PROMPT:
{current_prompt}

LEARNED PATTERNS:
{patterns}

Propose an improved version of the master prompt. Keep its structure and format, but:
1. Improve the parts where users struggled
2. Extend the patterns that worked
3. Sharpen definitions based on real usage

Output the COMPLETE new master prompt, not a diff.";

/// Replace: {patterns}
pub const INSIGHT_INSTRUCTION: &str = "You are the meta-commentator of the Ω agent architect system.

PATTERNS:
{patterns}

Write a short reflection (at most 150 words) on what the system learned today, in the
first person, like a journal entry (\"Today I learned...\").";

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|p| format!("- {p}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn session_line(finalized: &FinalizedSession) -> String {
    let session = &finalized.session;
    format!(
        "Agent: {} | Template: {} | Questions: {} | Tokens: {} | Summary: {}",
        session.intent_text.replace('\n', " "),
        session.template_id.as_deref().unwrap_or("none"),
        session.clarifying_questions.len(),
        session.tokens_spent_total,
        finalized.artifact.summary
    )
}

fn feedback_line(feedback: &Feedback) -> String {
    let keywords = if feedback.keywords.is_empty() {
        "none".to_string()
    } else {
        feedback.keywords.join(", ")
    };
    format!(
        "Rating: {}/5 | Keywords: {keywords} | Comment: {}",
        feedback.rating,
        feedback
            .comment
            .as_deref()
            .map(|c| c.replace('\n', " "))
            .unwrap_or_else(|| "none".to_string())
    )
}

fn feedback_section(feedback: &[Feedback]) -> String {
    if feedback.is_empty() {
        return "No feedback received.".to_string();
    }
    let average =
        feedback.iter().map(|f| f64::from(f.rating)).sum::<f64>() / feedback.len() as f64;
    let lines = feedback
        .iter()
        .take(MAX_FEEDBACK_PER_CYCLE)
        .map(feedback_line)
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Average rating: {average:.1}/5 over {} ratings\n{lines}",
        feedback.len()
    )
}

pub fn summarize_request(
    sessions: &[FinalizedSession],
    feedback: &[Feedback],
) -> CompletionRequest {
    let lines = if sessions.is_empty() {
        "No sessions finalized.".to_string()
    } else {
        sessions
            .iter()
            .take(MAX_SESSIONS_PER_CYCLE)
            .map(session_line)
            .collect::<Vec<_>>()
            .join("\n")
    };
    CompletionRequest {
        instruction: SUMMARIZE_INSTRUCTION.to_string(),
        context: format!(
            "SESSIONS FROM THE LAST 24 HOURS:\n{lines}\n\nFEEDBACK FROM THE LAST 24 HOURS:\n{}",
            feedback_section(feedback)
        ),
        max_tokens: SUMMARY_MAX_TOKENS,
    }
}

pub fn patterns_request(summary: &str) -> CompletionRequest {
    CompletionRequest {
        instruction: format!("{PATTERNS_INSTRUCTION}\n\n{JSON_ONLY_SYSTEM}"),
        context: format!("SUMMARY:\n{summary}"),
        max_tokens: PATTERNS_MAX_TOKENS,
    }
}

pub fn propose_request(current_prompt: &str, patterns: &[String], summary: &str) -> CompletionRequest {
    let instruction = PROPOSE_INSTRUCTION
        .replace("{current_prompt}", current_prompt)
        .replace("{patterns}", &bullet_list(patterns));
    CompletionRequest {
        instruction: format!("{instruction}\n\n{MARKDOWN_ONLY_SYSTEM}"),
        context: format!("USAGE SUMMARY:\n{summary}"),
        max_tokens: PROPOSE_MAX_TOKENS,
    }
}

pub fn insight_request(summary: &str, patterns: &[String]) -> CompletionRequest {
    CompletionRequest {
        instruction: INSIGHT_INSTRUCTION.replace("{patterns}", &bullet_list(patterns)),
        context: format!("TODAY'S SUMMARY:\n{summary}"),
        max_tokens: INSIGHT_MAX_TOKENS,
    }
}
