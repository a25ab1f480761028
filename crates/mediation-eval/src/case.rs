use mediation::models::{
    ContextDocument, OutcomeKind, Query, RegulatoryRule,
};
use mediation::pipeline::{CompliancePosture, MetadataRequest, NarrativeKind, NarrativeRequest};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct EvalCaseFixture {
    pub case_id: String,
    pub description: String,
    #[serde(default)]
    pub include_in_live_smoke: bool,
    #[serde(default)]
    pub kill_switch_active: bool,
    #[serde(default)]
    pub compliance_posture: Option<CompliancePosture>,
    pub pipeline: EvalPipeline,
    #[serde(default)]
    pub documents: Vec<ContextDocument>,
    #[serde(default)]
    pub rules: Vec<RegulatoryRule>,
    #[serde(default)]
    pub mocked_replies: MockedReplies,
    #[serde(default)]
    pub expectations: EvalExpectations,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum EvalPipeline {
    InteractiveChat {
        query: Query,
    },
    Narrative {
        kind: NarrativeKind,
        request: NarrativeRequest,
    },
    MetadataInference {
        request: MetadataRequest,
    },
    EgressSanitization {
        text: String,
    },
}

/// Scripted provider replies, keyed by the kind of call the pipeline makes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockedReplies {
    #[serde(default)]
    pub answer: Option<MockedReply>,
    #[serde(default)]
    pub compliance: Option<MockedReply>,
    #[serde(default)]
    pub redaction: Option<MockedReply>,
    #[serde(default)]
    pub metadata: Option<MockedReply>,
    #[serde(default)]
    pub narrative: Option<MockedReply>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MockedReply {
    Text(String),
    /// Serialized before it is handed back as model text.
    Json(Value),
    Fail,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvalExpectations {
    #[serde(default)]
    pub outcome: Option<OutcomeKind>,
    #[serde(default)]
    pub expect_error: bool,
    #[serde(default)]
    pub min_invocations: Option<u32>,
    #[serde(default)]
    pub max_invocations: Option<u32>,
    #[serde(default)]
    pub redactor_invoked: Option<bool>,
    #[serde(default)]
    pub triggered_rule: Option<String>,
    #[serde(default)]
    pub required_substrings: Vec<String>,
    #[serde(default)]
    pub forbidden_substrings: Vec<String>,
}
