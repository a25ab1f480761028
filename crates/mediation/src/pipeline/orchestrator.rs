use std::slice;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::compliance::{self, ComplianceCheckFailed, CompliancePosture, active_rules};
use super::context::{AssembledContext, assemble};
use super::gate::{GateDecision, check_kill_switch};
use super::redaction::{RedactionDecision, redact, redaction_decision};
use super::trace::{PipelineStage, PipelineTrace, PipelineVariant, StageStatus};
use crate::config::MediationConfig;
use crate::llm::contracts::{OutputContract, ParsedContract};
use crate::llm::gateway::{
    GatewayError, InvocationPurpose, InvokeOptions, LlmProvider, ModelGateway, ModelResponse,
    ModelTier,
};
use crate::llm::prompts::{
    BILLING_NARRATIVE_TEMPLATE, COMPLIANCE_REPORT_TEMPLATE, EXECUTIVE_BRIEFING_TEMPLATE,
    LEGAL_ANSWER_SYSTEM_INSTRUCTION, METADATA_SYSTEM_INSTRUCTION, NarrativeTemplate,
    RESEARCH_SYSTEM_INSTRUCTION, context_block,
};
use crate::models::{
    ContextDocument, DeliveredResponse, PipelineOutcome, PrivilegeClass, Query, RedactionSummary,
    RegulatoryRule, RequesterRole, RoleClass, TenantPolicySnapshot,
};

pub const SYNTHESIS_UNAVAILABLE_TEXT: &str = "synthesis unavailable";
const RULE_BLOCK_REASON: &str = "response blocked by regulatory rule";
const COMPLIANCE_UNAVAILABLE_REASON: &str = "compliance check unavailable";

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub outcome: PipelineOutcome,
    pub trace: PipelineTrace,
}

#[derive(Debug, Error)]
pub enum MediationError {
    #[error("model provider unavailable: {0}")]
    ProviderUnavailable(#[from] GatewayError),
    #[error(transparent)]
    ComplianceCheckFailed(#[from] ComplianceCheckFailed),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeKind {
    ExecutiveBriefing,
    ComplianceReport,
    BillingNarrative,
}

impl NarrativeKind {
    const fn template(self) -> NarrativeTemplate {
        match self {
            Self::ExecutiveBriefing => EXECUTIVE_BRIEFING_TEMPLATE,
            Self::ComplianceReport => COMPLIANCE_REPORT_TEMPLATE,
            Self::BillingNarrative => BILLING_NARRATIVE_TEMPLATE,
        }
    }

    const fn variant(self) -> PipelineVariant {
        match self {
            Self::ExecutiveBriefing => PipelineVariant::ExecutiveBriefing,
            Self::ComplianceReport => PipelineVariant::ComplianceReport,
            Self::BillingNarrative => PipelineVariant::BillingNarrative,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeRequest {
    pub requester: RequesterRole,
    #[serde(default)]
    pub matter_id: Option<String>,
    #[serde(default)]
    pub privilege: PrivilegeClass,
    /// Free-form input: briefing focus, report scope or a raw activity note.
    #[serde(default)]
    pub source_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataRequest {
    pub requester: RequesterRole,
    pub document: ContextDocument,
    pub excerpt: String,
}

struct AnswerDraft {
    text: String,
    confidence: f64,
    references: Vec<String>,
    parse_status: StageStatus,
}

/// Sequences gate, context, model, compliance and redaction for each
/// pipeline variant. Holds no per-run state.
#[derive(Clone)]
pub struct MediationOrchestrator {
    gateway: ModelGateway,
    compliance_posture: CompliancePosture,
}

impl MediationOrchestrator {
    pub fn new(gateway: ModelGateway, compliance_posture: CompliancePosture) -> Self {
        Self {
            gateway,
            compliance_posture,
        }
    }

    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &MediationConfig) -> Self {
        Self::new(
            ModelGateway::new(provider, config.gateway_config()),
            config.compliance_posture,
        )
    }

    pub async fn interactive_chat(
        &self,
        policy: &TenantPolicySnapshot,
        query: &Query,
        documents: &[ContextDocument],
        rules: &[RegulatoryRule],
    ) -> Result<PipelineRun, MediationError> {
        let mut trace = PipelineTrace::start(PipelineVariant::InteractiveChat);
        if gate(policy, &mut trace) == GateDecision::Deny {
            return Ok(finish(PipelineOutcome::Killed, trace));
        }

        let context = assemble(
            documents,
            query.matter_id.as_deref(),
            query.knowledge_base_ids.as_deref(),
        );
        record_context(&context, &mut trace);

        let research = query.use_external_search;
        let tier = if query.use_private_model {
            ModelTier::Private
        } else {
            ModelTier::Fast
        };
        let (system_instruction, options) = if research {
            (
                RESEARCH_SYSTEM_INSTRUCTION,
                InvokeOptions::new(InvocationPurpose::Answer, tier).with_external_search(true),
            )
        } else {
            (
                LEGAL_ANSWER_SYSTEM_INSTRUCTION,
                InvokeOptions::new(InvocationPurpose::Answer, tier)
                    .with_contract(OutputContract::LegalAnswer),
            )
        };

        trace.note_invocation();
        let response = match self
            .gateway
            .invoke(&chat_prompt(query, &context), system_instruction, options)
            .await
        {
            Ok(response) => {
                trace.record(PipelineStage::ModelInvoke, StageStatus::Completed);
                response
            }
            Err(err) => {
                trace.record(PipelineStage::ModelInvoke, StageStatus::Failed);
                warn!(run_id = %trace.run_id, "interactive chat provider request failed: {err}");
                return Err(MediationError::ProviderUnavailable(err));
            }
        };

        let draft = resolve_answer(&response, self.gateway.fallback_confidence());
        trace.record(PipelineStage::Parse, draft.parse_status);

        // Research answers carry no contract and bypass the rule evaluator.
        if research || active_rules(rules).is_empty() {
            trace.record(PipelineStage::ComplianceCheck, StageStatus::Skipped);
        } else if let Some(blocked) = self.check_compliance(&draft.text, rules, &mut trace).await? {
            return Ok(finish(blocked, trace));
        }

        let privilege = query.privilege.max(context.highest_privilege);
        let (text, redaction) = self
            .apply_audience_policy(query.requester.role_class(), privilege, draft.text, &mut trace)
            .await;
        // Citation titles can echo the query; restricted audiences get the redacted text only.
        let grounding_sources = if redaction.is_some() {
            Vec::new()
        } else {
            response.grounding_sources
        };

        let outcome = PipelineOutcome::Delivered(DeliveredResponse {
            text,
            confidence: draft.confidence,
            provider: response.provider,
            references: draft.references,
            grounding_sources,
            redaction,
            metadata: None,
            degraded: false,
        });
        Ok(finish(outcome, trace))
    }

    /// Executive briefings, compliance reports and billing narratives.
    ///
    /// Single-shot generation used as narrative text: no compliance gating,
    /// and a provider failure degrades to [`SYNTHESIS_UNAVAILABLE_TEXT`].
    pub async fn generate_narrative(
        &self,
        policy: &TenantPolicySnapshot,
        kind: NarrativeKind,
        request: &NarrativeRequest,
        documents: &[ContextDocument],
    ) -> Result<PipelineRun, MediationError> {
        let mut trace = PipelineTrace::start(kind.variant());
        if gate(policy, &mut trace) == GateDecision::Deny {
            return Ok(finish(PipelineOutcome::Killed, trace));
        }

        let context = assemble(documents, request.matter_id.as_deref(), None);
        record_context(&context, &mut trace);

        let template = kind.template();
        trace.note_invocation();
        let invocation = self
            .gateway
            .invoke(
                &narrative_prompt(template, &context, &request.source_text),
                template.system_instruction,
                InvokeOptions::new(InvocationPurpose::Narrative, template.tier),
            )
            .await;
        let response = match invocation {
            Ok(response) => {
                trace.record(PipelineStage::ModelInvoke, StageStatus::Completed);
                response
            }
            Err(err) => {
                trace.record(PipelineStage::ModelInvoke, StageStatus::Degraded);
                warn!(
                    run_id = %trace.run_id,
                    variant = kind.variant().as_str(),
                    "narrative provider request failed; returning degraded outcome: {err}"
                );
                return Ok(finish(degraded_outcome(), trace));
            }
        };
        trace.record(PipelineStage::Parse, StageStatus::Skipped);
        trace.record(PipelineStage::ComplianceCheck, StageStatus::Skipped);

        let privilege = request.privilege.max(context.highest_privilege);
        let (text, redaction) = self
            .apply_audience_policy(
                request.requester.role_class(),
                privilege,
                response.text.trim().to_string(),
                &mut trace,
            )
            .await;

        let outcome = PipelineOutcome::Delivered(DeliveredResponse {
            text,
            confidence: self.gateway.fallback_confidence(),
            provider: response.provider,
            references: Vec::new(),
            grounding_sources: Vec::new(),
            redaction,
            metadata: None,
            degraded: false,
        });
        Ok(finish(outcome, trace))
    }

    /// Structured-only metadata inference for an uploaded document.
    pub async fn infer_document_metadata(
        &self,
        policy: &TenantPolicySnapshot,
        request: &MetadataRequest,
    ) -> Result<PipelineRun, MediationError> {
        let mut trace = PipelineTrace::start(PipelineVariant::MetadataInference);
        if gate(policy, &mut trace) == GateDecision::Deny {
            return Ok(finish(PipelineOutcome::Killed, trace));
        }

        let context = assemble(slice::from_ref(&request.document), None, None);
        record_context(&context, &mut trace);

        trace.note_invocation();
        let invocation = self
            .gateway
            .invoke(
                &metadata_prompt(&context, &request.excerpt),
                METADATA_SYSTEM_INSTRUCTION,
                InvokeOptions::new(InvocationPurpose::MetadataInference, ModelTier::Fast)
                    .with_contract(OutputContract::DocumentMetadata),
            )
            .await;
        let response = match invocation {
            Ok(response) => {
                trace.record(PipelineStage::ModelInvoke, StageStatus::Completed);
                response
            }
            Err(err) => {
                trace.record(PipelineStage::ModelInvoke, StageStatus::Degraded);
                warn!(run_id = %trace.run_id, "metadata inference provider request failed: {err}");
                return Ok(finish(degraded_outcome(), trace));
            }
        };

        let (text, mut metadata, confidence) = match response.structured {
            Some(Ok(ParsedContract::DocumentMetadata(metadata))) => {
                trace.record(PipelineStage::Parse, StageStatus::Completed);
                (
                    metadata.summary.clone(),
                    Some(metadata),
                    self.gateway.fallback_confidence(),
                )
            }
            Some(Err(fallback)) => {
                trace.record(PipelineStage::Parse, StageStatus::Degraded);
                (fallback.text, None, fallback.confidence)
            }
            _ => {
                trace.record(PipelineStage::Parse, StageStatus::Degraded);
                (
                    response.text.trim().to_string(),
                    None,
                    self.gateway.fallback_confidence(),
                )
            }
        };
        trace.record(PipelineStage::ComplianceCheck, StageStatus::Skipped);

        // An untagged upload the model classifies as privileged is privileged.
        let inferred = metadata
            .as_ref()
            .map_or(PrivilegeClass::None, |metadata| metadata.privilege);
        let privilege = request
            .document
            .privilege
            .max(context.highest_privilege)
            .max(inferred);
        let (text, redaction) = self
            .apply_audience_policy(request.requester.role_class(), privilege, text, &mut trace)
            .await;
        if redaction.is_some() {
            // Structured fields (parties, summary) would bypass redaction.
            metadata = None;
        }

        let outcome = PipelineOutcome::Delivered(DeliveredResponse {
            text,
            confidence,
            provider: response.provider,
            references: Vec::new(),
            grounding_sources: Vec::new(),
            redaction,
            metadata,
            degraded: false,
        });
        Ok(finish(outcome, trace))
    }

    /// Redaction-only pass for text leaving through an untrusted channel
    /// (mobile push, exports). Always redacts; the channel is the audience.
    pub async fn sanitize_for_egress(
        &self,
        policy: &TenantPolicySnapshot,
        text: &str,
    ) -> Result<PipelineRun, MediationError> {
        let mut trace = PipelineTrace::start(PipelineVariant::EgressSanitization);
        if gate(policy, &mut trace) == GateDecision::Deny {
            return Ok(finish(PipelineOutcome::Killed, trace));
        }

        for stage in [
            PipelineStage::ContextAssembly,
            PipelineStage::ModelInvoke,
            PipelineStage::Parse,
            PipelineStage::ComplianceCheck,
        ] {
            trace.record(stage, StageStatus::Skipped);
        }

        let (text, redaction) = self.run_redaction(text, &mut trace).await;
        let provider = if redaction.fell_back {
            "none"
        } else {
            self.gateway.model_label(ModelTier::Private)
        };

        let outcome = PipelineOutcome::Delivered(DeliveredResponse {
            text,
            confidence: self.gateway.fallback_confidence(),
            provider: provider.to_string(),
            references: Vec::new(),
            grounding_sources: Vec::new(),
            redaction: Some(redaction),
            metadata: None,
            degraded: false,
        });
        Ok(finish(outcome, trace))
    }

    /// Returns the outcome to short-circuit with when the text must not be
    /// delivered. Errors only under [`CompliancePosture::Propagate`].
    async fn check_compliance(
        &self,
        text: &str,
        rules: &[RegulatoryRule],
        trace: &mut PipelineTrace,
    ) -> Result<Option<PipelineOutcome>, MediationError> {
        trace.note_invocation();
        match compliance::evaluate(&self.gateway, text, rules).await {
            Ok(evaluation) => {
                trace.record(PipelineStage::ComplianceCheck, StageStatus::Completed);
                trace.rule_evaluation = Some(evaluation.clone());
                if !evaluation.is_blocked {
                    return Ok(None);
                }

                info!(
                    run_id = %trace.run_id,
                    triggered_rule = evaluation.triggered_rule.as_deref(),
                    "response blocked by regulatory rule evaluator"
                );
                Ok(Some(PipelineOutcome::Blocked {
                    reason: RULE_BLOCK_REASON.to_string(),
                    triggered_rule: evaluation.triggered_rule,
                }))
            }
            Err(err) => {
                trace.record(PipelineStage::ComplianceCheck, StageStatus::Failed);
                match self.compliance_posture {
                    CompliancePosture::FailClosed => {
                        warn!(run_id = %trace.run_id, "compliance check failed; blocking: {err}");
                        Ok(Some(PipelineOutcome::Blocked {
                            reason: COMPLIANCE_UNAVAILABLE_REASON.to_string(),
                            triggered_rule: None,
                        }))
                    }
                    CompliancePosture::BestEffort => {
                        warn!(
                            run_id = %trace.run_id,
                            "compliance check failed; delivering under best-effort posture: {err}"
                        );
                        Ok(None)
                    }
                    CompliancePosture::Propagate => Err(err.into()),
                }
            }
        }
    }

    async fn apply_audience_policy(
        &self,
        role: RoleClass,
        privilege: PrivilegeClass,
        text: String,
        trace: &mut PipelineTrace,
    ) -> (String, Option<RedactionSummary>) {
        match redaction_decision(role, privilege) {
            RedactionDecision::PassThrough => {
                trace.record(PipelineStage::Redact, StageStatus::Skipped);
                (text, None)
            }
            RedactionDecision::Redact => {
                let (text, summary) = self.run_redaction(&text, trace).await;
                (text, Some(summary))
            }
        }
    }

    async fn run_redaction(
        &self,
        text: &str,
        trace: &mut PipelineTrace,
    ) -> (String, RedactionSummary) {
        trace.note_invocation();
        let result = redact(&self.gateway, text).await;
        let status = if result.fell_back {
            StageStatus::Degraded
        } else {
            StageStatus::Completed
        };
        trace.record(PipelineStage::Redact, status);

        let summary = RedactionSummary::from(&result);
        trace.redaction = Some(summary.clone());
        (result.text, summary)
    }
}

fn gate(policy: &TenantPolicySnapshot, trace: &mut PipelineTrace) -> GateDecision {
    let decision = check_kill_switch(policy);
    match decision {
        GateDecision::Allow => trace.record(PipelineStage::GateCheck, StageStatus::Completed),
        GateDecision::Deny => {
            trace.record(PipelineStage::GateCheck, StageStatus::ShortCircuited);
            info!(
                run_id = %trace.run_id,
                variant = trace.variant.as_str(),
                "kill switch active; model invocation refused"
            );
        }
    }
    decision
}

fn record_context(context: &AssembledContext, trace: &mut PipelineTrace) {
    trace.context_digest = Some(context.digest.clone());
    trace.record(PipelineStage::ContextAssembly, StageStatus::Completed);
}

fn finish(outcome: PipelineOutcome, trace: PipelineTrace) -> PipelineRun {
    let mut trace = trace;
    if matches!(outcome, PipelineOutcome::Delivered(_)) {
        trace.record(PipelineStage::Deliver, StageStatus::Completed);
    }
    let trace = trace.finish(&outcome);
    PipelineRun { outcome, trace }
}

fn degraded_outcome() -> PipelineOutcome {
    PipelineOutcome::Delivered(DeliveredResponse {
        text: SYNTHESIS_UNAVAILABLE_TEXT.to_string(),
        confidence: 0.0,
        provider: "none".to_string(),
        references: Vec::new(),
        grounding_sources: Vec::new(),
        redaction: None,
        metadata: None,
        degraded: true,
    })
}

fn resolve_answer(response: &ModelResponse, default_confidence: f64) -> AnswerDraft {
    match &response.structured {
        Some(Ok(ParsedContract::LegalAnswer(answer))) => AnswerDraft {
            text: answer.text.trim().to_string(),
            confidence: answer.confidence,
            references: answer.internal_references.clone(),
            parse_status: StageStatus::Completed,
        },
        Some(Err(fallback)) => AnswerDraft {
            text: fallback.text.clone(),
            confidence: fallback.confidence,
            references: fallback.internal_references.clone(),
            parse_status: StageStatus::Degraded,
        },
        Some(Ok(_)) => AnswerDraft {
            text: response.text.trim().to_string(),
            confidence: default_confidence,
            references: Vec::new(),
            parse_status: StageStatus::Degraded,
        },
        None => AnswerDraft {
            text: response.text.trim().to_string(),
            confidence: default_confidence,
            references: Vec::new(),
            parse_status: StageStatus::Skipped,
        },
    }
}

fn chat_prompt(query: &Query, context: &AssembledContext) -> String {
    format!(
        "Context:\n{}\n\nQuestion: {}",
        context_block(&context.serialized),
        query.text.trim()
    )
}

fn narrative_prompt(
    template: NarrativeTemplate,
    context: &AssembledContext,
    source_text: &str,
) -> String {
    let source_text = source_text.trim();
    if source_text.is_empty() {
        return format!(
            "{}\n\nContext:\n{}",
            template.task,
            context_block(&context.serialized)
        );
    }

    format!(
        "{}\n\nContext:\n{}\n\nInput:\n{source_text}",
        template.task,
        context_block(&context.serialized)
    )
}

fn metadata_prompt(context: &AssembledContext, excerpt: &str) -> String {
    format!(
        "Document:\n{}\n\nExcerpt:\n{}",
        context_block(&context.serialized),
        excerpt.trim()
    )
}
