use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::llm::contracts::DocumentMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequesterRole {
    TenantAdmin,
    InternalCounsel,
    Operations,
    OutsideCollaborator,
    Client,
}

impl RequesterRole {
    pub const fn role_class(self) -> RoleClass {
        match self {
            Self::TenantAdmin | Self::InternalCounsel | Self::Operations => RoleClass::Internal,
            Self::OutsideCollaborator | Self::Client => RoleClass::Restricted,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TenantAdmin => "tenant_admin",
            Self::InternalCounsel => "internal_counsel",
            Self::Operations => "operations",
            Self::OutsideCollaborator => "outside_collaborator",
            Self::Client => "client",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleClass {
    Internal,
    Restricted,
}

/// Content-level privilege tag. Ordered so the most sensitive class wins
/// when several sources are combined.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeClass {
    #[default]
    None,
    Internal,
    Privileged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub matter_id: Option<String>,
    #[serde(default)]
    pub knowledge_base_ids: Option<Vec<String>>,
    pub requester: RequesterRole,
    #[serde(default)]
    pub privilege: PrivilegeClass,
    #[serde(default)]
    pub use_private_model: bool,
    #[serde(default)]
    pub use_external_search: bool,
}

impl Query {
    pub fn new(text: impl Into<String>, requester: RequesterRole) -> Self {
        Self {
            text: text.into(),
            matter_id: None,
            knowledge_base_ids: None,
            requester,
            privilege: PrivilegeClass::None,
            use_private_model: false,
            use_external_search: false,
        }
    }

    pub fn with_matter(mut self, matter_id: impl Into<String>) -> Self {
        self.matter_id = Some(matter_id.into());
        self
    }

    pub fn with_privilege(mut self, privilege: PrivilegeClass) -> Self {
        self.privilege = privilege;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDocument {
    pub id: String,
    pub name: String,
    pub matter_id: String,
    #[serde(default)]
    pub jurisdiction: String,
    #[serde(default)]
    pub privilege: PrivilegeClass,
    #[serde(default)]
    pub region: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatoryRule {
    pub id: String,
    pub name: String,
    pub authority: String,
    #[serde(default)]
    pub trigger_keywords: Vec<String>,
    pub block_threshold: f64,
    #[serde(default = "default_rule_active")]
    pub active: bool,
}

fn default_rule_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleEvaluation {
    pub is_blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub triggered_rule: Option<String>,
}

impl RuleEvaluation {
    pub fn not_blocked() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionResult {
    pub text: String,
    pub entities_removed: usize,
    pub fell_back: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroundingSource {
    pub title: String,
    pub uri: String,
}

/// Tenant posture captured once at the start of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TenantPolicySnapshot {
    pub kill_switch_active: bool,
    pub captured_at: DateTime<Utc>,
}

impl TenantPolicySnapshot {
    pub fn new(kill_switch_active: bool) -> Self {
        Self {
            kill_switch_active,
            captured_at: Utc::now(),
        }
    }

    pub fn open() -> Self {
        Self::new(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedactionSummary {
    pub entities_removed: usize,
    pub fell_back: bool,
}

impl From<&RedactionResult> for RedactionSummary {
    fn from(result: &RedactionResult) -> Self {
        Self {
            entities_removed: result.entities_removed,
            fell_back: result.fell_back,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeliveredResponse {
    pub text: String,
    pub confidence: f64,
    pub provider: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub grounding_sources: Vec<GroundingSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redaction: Option<RedactionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Delivered(DeliveredResponse),
    Blocked {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        triggered_rule: Option<String>,
    },
    Killed,
}

impl PipelineOutcome {
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::Delivered(_) => OutcomeKind::Delivered,
            Self::Blocked { .. } => OutcomeKind::Blocked,
            Self::Killed => OutcomeKind::Killed,
        }
    }

    pub fn delivered(&self) -> Option<&DeliveredResponse> {
        match self {
            Self::Delivered(response) => Some(response),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Delivered,
    Blocked,
    Killed,
}

impl OutcomeKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Blocked => "blocked",
            Self::Killed => "killed",
        }
    }
}
