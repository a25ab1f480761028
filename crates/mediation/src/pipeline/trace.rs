use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::models::{OutcomeKind, PipelineOutcome, RedactionSummary, RuleEvaluation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineVariant {
    InteractiveChat,
    ExecutiveBriefing,
    ComplianceReport,
    BillingNarrative,
    MetadataInference,
    EgressSanitization,
}

impl PipelineVariant {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InteractiveChat => "interactive_chat",
            Self::ExecutiveBriefing => "executive_briefing",
            Self::ComplianceReport => "compliance_report",
            Self::BillingNarrative => "billing_narrative",
            Self::MetadataInference => "metadata_inference",
            Self::EgressSanitization => "egress_sanitization",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    GateCheck,
    ContextAssembly,
    ModelInvoke,
    Parse,
    ComplianceCheck,
    Redact,
    Deliver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Skipped,
    ShortCircuited,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: PipelineStage,
    pub status: StageStatus,
}

/// Audit fields for one pipeline run, handed back to the caller alongside the
/// outcome. Carries digests and counts, never prompt or response text.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineTrace {
    pub run_id: Uuid,
    pub variant: PipelineVariant,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageRecord>,
    pub model_invocations: u32,
    pub context_digest: Option<String>,
    pub rule_evaluation: Option<RuleEvaluation>,
    pub redaction: Option<RedactionSummary>,
    pub outcome: Option<OutcomeKind>,
}

impl PipelineTrace {
    pub fn start(variant: PipelineVariant) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            variant,
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            model_invocations: 0,
            context_digest: None,
            rule_evaluation: None,
            redaction: None,
            outcome: None,
        }
    }

    pub fn record(&mut self, stage: PipelineStage, status: StageStatus) {
        self.stages.push(StageRecord { stage, status });
    }

    pub fn note_invocation(&mut self) {
        self.model_invocations = self.model_invocations.saturating_add(1);
    }

    pub fn status_of(&self, stage: PipelineStage) -> Option<StageStatus> {
        self.stages
            .iter()
            .rev()
            .find(|record| record.stage == stage)
            .map(|record| record.status)
    }

    pub fn ran(&self, stage: PipelineStage) -> bool {
        matches!(
            self.status_of(stage),
            Some(StageStatus::Completed | StageStatus::Degraded | StageStatus::Failed)
        )
    }

    pub(crate) fn finish(mut self, outcome: &PipelineOutcome) -> Self {
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome.kind());
        self.emit();
        self
    }

    fn emit(&self) {
        let duration_ms = self
            .finished_at
            .map(|finished_at| (finished_at - self.started_at).num_milliseconds())
            .unwrap_or_default();

        info!(
            run_id = %self.run_id,
            variant = self.variant.as_str(),
            outcome = self.outcome.map(OutcomeKind::as_str),
            model_invocations = self.model_invocations,
            context_digest = self.context_digest.as_deref(),
            rule_blocked = self.rule_evaluation.as_ref().map(|evaluation| evaluation.is_blocked),
            triggered_rule = self
                .rule_evaluation
                .as_ref()
                .and_then(|evaluation| evaluation.triggered_rule.as_deref()),
            entities_removed = self
                .redaction
                .as_ref()
                .map(|redaction| redaction.entities_removed as u64),
            duration_ms,
            "mediation pipeline run finished"
        );
    }
}
