// Cross-cutting prompt fragments. Each domain keeps its own prompts.rs alongside it.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Appended to every markdown-producing instruction.
pub const MARKDOWN_ONLY_SYSTEM: &str = "Respond with the markdown document only. \
    Do NOT wrap it in code fences and do NOT add commentary before or after it.";
