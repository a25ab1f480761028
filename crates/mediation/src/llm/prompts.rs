use super::gateway::ModelTier;

pub const LEGAL_ANSWER_SYSTEM_INSTRUCTION: &str = "You are a legal operations assistant for a law firm. Answer using only the supplied matter context. Do not give definitive legal advice; flag uncertainty. Return JSON with text, confidence (0-1) and internal_references (document ids you relied on).";

pub const RESEARCH_SYSTEM_INSTRUCTION: &str = "You are a legal research assistant. Ground every statement in the search results you cite and say when no authority was found.";

pub const COMPLIANCE_SYSTEM_INSTRUCTION: &str = "You are a regulatory compliance classifier. Estimate, for each rule, the likelihood that the response text violates the rule's intent. Block when any likelihood meets or exceeds that rule's block threshold. Return JSON with is_blocked and, when blocked, triggered_rule set to the rule id.";

pub const REDACTION_SYSTEM_INSTRUCTION: &str = "You are a redaction engine. Rewrite the text verbatim except: replace every personal name with [NAME], every date with [DATE], every monetary amount with [VALUE]. Return only the rewritten text.";

pub const METADATA_SYSTEM_INSTRUCTION: &str = "You are a document intake clerk. Infer the document's metadata from its name and excerpt. Return JSON only.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NarrativeTemplate {
    pub tier: ModelTier,
    pub system_instruction: &'static str,
    pub task: &'static str,
}

pub const EXECUTIVE_BRIEFING_TEMPLATE: NarrativeTemplate = NarrativeTemplate {
    tier: ModelTier::Private,
    system_instruction: "You are a chief-of-staff for a general counsel. Write a concise executive briefing in plain prose.",
    task: "Summarize the portfolio below for an executive audience: exposure, deadlines and recommended next steps.",
};

pub const COMPLIANCE_REPORT_TEMPLATE: NarrativeTemplate = NarrativeTemplate {
    tier: ModelTier::Private,
    system_instruction: "You are a compliance officer. Write a factual compliance status report in plain prose.",
    task: "Report on the compliance posture of the documents below and note any gaps.",
};

pub const BILLING_NARRATIVE_TEMPLATE: NarrativeTemplate = NarrativeTemplate {
    tier: ModelTier::Fast,
    system_instruction: "You are a legal billing specialist. Rewrite raw activity notes as a professional time-entry narrative.",
    task: "Turn the activity note below into a one-paragraph billing narrative using active voice.",
};

pub fn context_block(serialized_context: &str) -> &str {
    if serialized_context.is_empty() {
        return "(no documents in scope)";
    }

    serialized_context
}
