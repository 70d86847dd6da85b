use serde::Serialize;

/// A recommended starting point. `guidance` is added to the generation context for
/// every stage of a session that picked the template.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct AgentTemplate {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    #[serde(skip)]
    pub guidance: &'static str,
}

pub const TEMPLATES: &[AgentTemplate] = &[
    AgentTemplate {
        id: "customer-support",
        name: "Customer support",
        description: "Answers customer questions, resolves common issues and escalates the rest.",
        guidance: "The agent serves customers directly. Cover tone of voice, the knowledge it \
            may rely on, escalation rules and what it must never promise.",
    },
    AgentTemplate {
        id: "lead-qualification",
        name: "Lead qualification",
        description: "Scores inbound leads and decides which ones reach the sales team.",
        guidance: "The agent qualifies sales leads. Cover the ideal customer profile, the \
            qualifying questions, scoring criteria and the hand-off format.",
    },
    AgentTemplate {
        id: "content-planning",
        name: "Content planning",
        description: "Builds editorial calendars and briefs from business goals.",
        guidance: "The agent plans content. Cover audience, channels, cadence, brand voice \
            and how each brief should be structured.",
    },
    AgentTemplate {
        id: "market-research",
        name: "Market research",
        description: "Collects and condenses market, competitor and customer signals.",
        guidance: "The agent researches markets. Cover the questions to answer, acceptable \
            sources, how to weigh conflicting evidence and the report layout.",
    },
];

pub fn find(template_id: &str) -> Option<&'static AgentTemplate> {
    TEMPLATES.iter().find(|t| t.id == template_id)
}
