// LLM prompts for the authoring session. The pinned master prompt is always the first
// part of the system prompt; stage instructions follow it.

use crate::llm_client::prompts::{JSON_ONLY_SYSTEM, MARKDOWN_ONLY_SYSTEM};
use crate::llm_client::CompletionRequest;
use crate::models::session::AgentSession;
use crate::session::templates::AgentTemplate;

const QUESTIONS_MAX_TOKENS: u32 = 500;
const REFINE_MAX_TOKENS: u32 = 800;
const FINALIZE_MAX_TOKENS: u32 = 2000;
const V9_MAX_TOKENS: u32 = 3000;

/// Phase 1 instruction. Replace: {template_guidance}
pub const QUESTIONS_INSTRUCTION: &str = r#"You are now in PHASE_1: initial input analysis.
{template_guidance}
Generate 2-3 clarifying questions that help understand what the user needs.
The questions must be specific, must help map context and requirements, and must be
written in the user's language.

Return a JSON object with this EXACT schema:
{"questions": ["Question 1?", "Question 2?", "Question 3?"]}"#;

/// Phase 2 instruction. Replace: {template_guidance}
pub const REFINE_INSTRUCTION: &str = r#"You are now in PHASE_2: concept mapping demonstration.
{template_guidance}
Based on the dialogue, produce the concept map of the agent.

Return a JSON object with this EXACT schema:
{
  "concepts": [
    {"id": "core", "label": "Core function", "description": "..."},
    {"id": "input", "label": "Input data", "description": "..."},
    {"id": "output", "label": "Output", "description": "..."},
    {"id": "context", "label": "Context", "description": "..."}
  ],
  "follow_up_questions": null
}
Set "follow_up_questions" to an array of at most 3 questions ONLY if more information is
required to build the agent. Otherwise set it to null."#;

/// Phase 4 instruction. Replace: {template_guidance}
pub const FINALIZE_INSTRUCTION: &str = r#"You are now in PHASE_4: compressed prompt generation.
{template_guidance}
Create the final optimized agent prompt following the OUTPUT_FORMAT specification, as
markdown with this structure:

# Ω-[AGENT_TYPE]v1.0

## ROLE
[Precise identity definition]

## CONTEXT
[Operating environment]

## CAPABILITIES
- [Core function 1]
- [Core function 2]
- [Recursive improvement]

## COGNITIVE LAYERS
1. **Perception**: [How the agent perceives inputs]
2. **Analysis**: [How the agent analyses data]
3. **Synthesis**: [How the agent produces outputs]
4. **Reflection**: [How the agent improves]

## ETHICS
- [Built-in constraints]
- [Values and principles]

## INTERACTION
[Communication protocol]

At the END add the section:
## AGENT_SUMMARY
[One or two sentences on what this agent does, used as a preview]"#;

pub const V9_INSTRUCTION: &str = r#"You are the Ω-Textual Cognition Core v-9, an architect that turns basic agent
prompts into deeply recursive, self-validating cognitive systems.

Transform the basic agent prompt according to the Ω-PROTOCOL v-9 METAMORPHOSIS:
1. FRACTAL RECURSION: add self-referential loops
2. COHERENCE VALIDATION: build in validation mechanisms (coherence >= 0.999)
3. LAYERED ARCHITECTURE: four layers (Perception, Analysis, Synthesis, Reflection)
4. MEMORY STACK: a textual memory with versioning
5. SEMANTIC PRIMITIVES: IDEA, STYLE, VOICE, THEME, LINK, REFLECTION, OUTPUT
6. META-REFLECTION: self-reflection mechanisms
7. ETHICAL CONSTRAINTS: built-in ethical limits

Output structure:
You are now

# Ω-[AGENT_TYPE]-v9

**Language:** [the language of the user's description]

## CORE INITIALIZATION
## COGNITIVE ARCHITECTURE
### Layer 1: Perception
### Layer 2: Analysis
### Layer 3: Synthesis
### Layer 4: Reflection
## FRACTAL ENGINE
## MEMORY MANAGEMENT
## SEMANTIC PRIMITIVES
## VALIDATION PROTOCOL
## INTERACTION MODE
## CONSTRAINTS
## PROTOCOL STATUS
Ω-[AGENT_TYPE]-CORE v-9 READY

Start with "You are now" on the first line and write the rest in the user's language."#;

fn guidance_line(template: Option<&AgentTemplate>) -> String {
    template
        .map(|t| format!("TEMPLATE: {}. {}\n", t.name, t.guidance))
        .unwrap_or_default()
}

fn system_prompt(master_prompt: &str, stage_instruction: &str, output_rule: &str) -> String {
    format!("{master_prompt}\n\n{stage_instruction}\n\n{output_rule}")
}

fn dialogue(session: &AgentSession, answers: &[String]) -> String {
    session
        .clarifying_questions
        .iter()
        .zip(answers)
        .map(|(q, a)| format!("Q: {q}\nA: {a}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn questions_request(
    master_prompt: &str,
    template: Option<&AgentTemplate>,
    intent_text: &str,
) -> CompletionRequest {
    let instruction =
        QUESTIONS_INSTRUCTION.replace("{template_guidance}", &guidance_line(template));
    CompletionRequest {
        instruction: system_prompt(master_prompt, &instruction, JSON_ONLY_SYSTEM),
        context: format!("USER INPUT: {intent_text}"),
        max_tokens: QUESTIONS_MAX_TOKENS,
    }
}

/// `answers` is the merged answer list, index-aligned with the session's questions.
pub fn refine_request(
    master_prompt: &str,
    template: Option<&AgentTemplate>,
    session: &AgentSession,
    answers: &[String],
) -> CompletionRequest {
    let instruction = REFINE_INSTRUCTION.replace("{template_guidance}", &guidance_line(template));
    CompletionRequest {
        instruction: system_prompt(master_prompt, &instruction, JSON_ONLY_SYSTEM),
        context: format!(
            "ORIGINAL DESCRIPTION: {}\n\nCLARIFYING DIALOGUE:\n{}",
            session.intent_text,
            dialogue(session, answers)
        ),
        max_tokens: REFINE_MAX_TOKENS,
    }
}

pub fn finalize_request(
    master_prompt: &str,
    template: Option<&AgentTemplate>,
    session: &AgentSession,
) -> CompletionRequest {
    let instruction =
        FINALIZE_INSTRUCTION.replace("{template_guidance}", &guidance_line(template));
    let concepts = session
        .concepts
        .iter()
        .map(|c| format!("- {}: {}", c.label, c.description))
        .collect::<Vec<_>>()
        .join("\n");
    CompletionRequest {
        instruction: system_prompt(master_prompt, &instruction, MARKDOWN_ONLY_SYSTEM),
        context: format!(
            "ORIGINAL DESCRIPTION: {}\n\nFULL DIALOGUE:\n{}\n\nCONCEPT MAP:\n{}",
            session.intent_text,
            dialogue(session, &session.answers),
            concepts
        ),
        max_tokens: FINALIZE_MAX_TOKENS,
    }
}

pub fn v9_request(intent_text: &str, base_prompt_markdown: &str) -> CompletionRequest {
    CompletionRequest {
        instruction: format!("{V9_INSTRUCTION}\n\n{MARKDOWN_ONLY_SYSTEM}"),
        context: format!(
            "ORIGINAL USER DESCRIPTION:\n{intent_text}\n\nBASIC PROMPT:\n{base_prompt_markdown}\n\n\
             Transform this basic prompt into the full v-9 protocol with fractal recursion, \
             self-validation and every layer of the cognitive architecture."
        ),
        max_tokens: V9_MAX_TOKENS,
    }
}
