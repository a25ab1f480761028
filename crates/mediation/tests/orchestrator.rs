use std::sync::{Arc, Mutex};

use mediation::llm::gateway::{GroundingChunk, GroundingMetadata, WebChunk};
use mediation::llm::prompts::{
    COMPLIANCE_SYSTEM_INSTRUCTION, LEGAL_ANSWER_SYSTEM_INSTRUCTION, METADATA_SYSTEM_INSTRUCTION,
    REDACTION_SYSTEM_INSTRUCTION, RESEARCH_SYSTEM_INSTRUCTION,
};
use mediation::llm::{
    LlmProvider, LlmProviderError, LlmProviderFuture, ModelGateway, ModelGatewayConfig,
    ProviderCandidate, ProviderRequest, ProviderResponse, ProviderTool,
};
use mediation::models::{
    ContextDocument, PipelineOutcome, PrivilegeClass, Query, RegulatoryRule, RequesterRole,
    TenantPolicySnapshot,
};
use mediation::pipeline::{
    CompliancePosture, MediationError, MediationOrchestrator, MetadataRequest, NarrativeKind,
    NarrativeRequest, PipelineStage, SYNTHESIS_UNAVAILABLE_TEXT, StageStatus,
};
use serde_json::json;

const MATTER: &str = "MT-772";
const RAW_ANSWER: &str =
    "Clause 4.2 of the Supply Agreement requires Jane Roe to give notice by March 1.";
const REDACTED_ANSWER: &str =
    "Clause 4.2 of the Supply Agreement requires [NAME] to give notice by [DATE].";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Answer,
    Research,
    Compliance,
    Redaction,
    Metadata,
    Narrative,
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Grounded(String, Vec<(&'static str, &'static str)>),
    Fail,
}

#[derive(Debug, Clone)]
struct SeenCall {
    kind: CallKind,
    model: String,
    has_schema: bool,
    tools: Vec<ProviderTool>,
    contents: String,
}

#[derive(Debug)]
struct Script {
    answer: Reply,
    compliance: Reply,
    redaction: Reply,
    metadata: Reply,
    narrative: Reply,
    calls: Vec<SeenCall>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            answer: Reply::Text(
                json!({
                    "text": RAW_ANSWER,
                    "confidence": 0.82,
                    "internal_references": ["D-3"]
                })
                .to_string(),
            ),
            compliance: Reply::Text(json!({ "is_blocked": false }).to_string()),
            redaction: Reply::Text(REDACTED_ANSWER.to_string()),
            metadata: Reply::Text(
                json!({
                    "title": "Supply Agreement",
                    "document_type": "contract",
                    "jurisdiction": "US-NY",
                    "privilege": "privileged",
                    "parties": ["Acme Corp", "Jane Roe"],
                    "summary": "Supply terms between Acme Corp and Jane Roe."
                })
                .to_string(),
            ),
            narrative: Reply::Text("Matter MT-772 remains on track.".to_string()),
            calls: Vec::new(),
        }
    }
}

#[derive(Clone, Default)]
struct ScriptedProvider {
    script: Arc<Mutex<Script>>,
}

impl ScriptedProvider {
    fn with(configure: impl FnOnce(&mut Script)) -> Self {
        let provider = Self::default();
        configure(&mut provider.script.lock().expect("script lock"));
        provider
    }

    fn calls(&self) -> Vec<SeenCall> {
        self.script.lock().expect("script lock").calls.clone()
    }

    fn count(&self, kind: CallKind) -> usize {
        self.calls().iter().filter(|call| call.kind == kind).count()
    }
}

fn classify(system_instruction: &str) -> CallKind {
    match system_instruction {
        LEGAL_ANSWER_SYSTEM_INSTRUCTION => CallKind::Answer,
        RESEARCH_SYSTEM_INSTRUCTION => CallKind::Research,
        COMPLIANCE_SYSTEM_INSTRUCTION => CallKind::Compliance,
        REDACTION_SYSTEM_INSTRUCTION => CallKind::Redaction,
        METADATA_SYSTEM_INSTRUCTION => CallKind::Metadata,
        _ => CallKind::Narrative,
    }
}

impl LlmProvider for ScriptedProvider {
    fn generate<'a>(&'a self, request: ProviderRequest) -> LlmProviderFuture<'a> {
        Box::pin(async move {
            let kind = classify(&request.system_instruction);
            let reply = {
                let mut script = self.script.lock().expect("script lock");
                script.calls.push(SeenCall {
                    kind,
                    model: request.model.clone(),
                    has_schema: request.response_schema.is_some(),
                    tools: request.tools.clone(),
                    contents: request.contents.clone(),
                });
                match kind {
                    CallKind::Answer | CallKind::Research => script.answer.clone(),
                    CallKind::Compliance => script.compliance.clone(),
                    CallKind::Redaction => script.redaction.clone(),
                    CallKind::Metadata => script.metadata.clone(),
                    CallKind::Narrative => script.narrative.clone(),
                }
            };

            match reply {
                Reply::Text(text) => Ok(ProviderResponse {
                    model: request.model,
                    text,
                    ..ProviderResponse::default()
                }),
                Reply::Grounded(text, sources) => Ok(ProviderResponse {
                    model: request.model,
                    text,
                    candidates: vec![ProviderCandidate {
                        grounding_metadata: Some(GroundingMetadata {
                            grounding_chunks: sources
                                .into_iter()
                                .map(|(uri, title)| GroundingChunk {
                                    web: Some(WebChunk {
                                        uri: Some(uri.to_string()),
                                        title: Some(title.to_string()),
                                    }),
                                })
                                .collect(),
                        }),
                    }],
                    ..ProviderResponse::default()
                }),
                Reply::Fail => Err(LlmProviderError::ProviderFailure(
                    "status=503 code=scripted".to_string(),
                )),
            }
        })
    }
}

fn orchestrator(provider: &ScriptedProvider, posture: CompliancePosture) -> MediationOrchestrator {
    MediationOrchestrator::new(
        ModelGateway::new(
            Arc::new(provider.clone()),
            ModelGatewayConfig::new("private-model", "fast-model"),
        ),
        posture,
    )
}

fn document(id: &str, name: &str, matter: &str, privilege: PrivilegeClass) -> ContextDocument {
    ContextDocument {
        id: id.to_string(),
        name: name.to_string(),
        matter_id: matter.to_string(),
        jurisdiction: "US-NY".to_string(),
        privilege,
        region: "us-east".to_string(),
    }
}

fn documents() -> Vec<ContextDocument> {
    vec![
        document("D-3", "Supply Agreement", MATTER, PrivilegeClass::Privileged),
        document("D-9", "Board Minutes", "MT-100", PrivilegeClass::Internal),
    ]
}

fn public_documents() -> Vec<ContextDocument> {
    vec![document("D-2", "Press Release", MATTER, PrivilegeClass::None)]
}

fn rule(id: &str, active: bool) -> RegulatoryRule {
    RegulatoryRule {
        id: id.to_string(),
        name: "Unauthorized practice of law".to_string(),
        authority: "State Bar".to_string(),
        trigger_keywords: vec!["you should sue".to_string()],
        block_threshold: 0.7,
        active,
    }
}

fn clause_query(requester: RequesterRole) -> Query {
    Query::new("What does clause 4.2 require?", requester).with_matter(MATTER)
}

#[tokio::test]
async fn kill_switch_refuses_every_variant_without_model_calls() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);
    let killed = TenantPolicySnapshot::new(true);

    let chat = orchestrator
        .interactive_chat(
            &killed,
            &clause_query(RequesterRole::InternalCounsel),
            &documents(),
            &[rule("UPL-1", true)],
        )
        .await
        .expect("kill switch should not error");
    let briefing = orchestrator
        .generate_narrative(
            &killed,
            NarrativeKind::ExecutiveBriefing,
            &NarrativeRequest {
                requester: RequesterRole::TenantAdmin,
                matter_id: None,
                privilege: PrivilegeClass::None,
                source_text: String::new(),
            },
            &documents(),
        )
        .await
        .expect("kill switch should not error");
    let metadata = orchestrator
        .infer_document_metadata(
            &killed,
            &MetadataRequest {
                requester: RequesterRole::Operations,
                document: documents().remove(0),
                excerpt: "This Supply Agreement...".to_string(),
            },
        )
        .await
        .expect("kill switch should not error");
    let egress = orchestrator
        .sanitize_for_egress(&killed, RAW_ANSWER)
        .await
        .expect("kill switch should not error");

    for run in [chat, briefing, metadata, egress] {
        assert_eq!(run.outcome, PipelineOutcome::Killed);
        assert_eq!(run.trace.model_invocations, 0);
        assert_eq!(
            run.trace.status_of(PipelineStage::GateCheck),
            Some(StageStatus::ShortCircuited)
        );
        assert!(!run.trace.ran(PipelineStage::ModelInvoke));
    }
    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn internal_counsel_receives_unredacted_structured_answer() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::InternalCounsel),
            &documents(),
            &[],
        )
        .await
        .expect("chat should succeed");

    let delivered = run.outcome.delivered().expect("answer should be delivered");
    assert_eq!(delivered.text, RAW_ANSWER);
    assert_eq!(delivered.confidence, 0.82);
    assert_eq!(delivered.references, vec!["D-3".to_string()]);
    assert_eq!(delivered.provider, "fast-model");
    assert!(delivered.redaction.is_none());
    assert!(!delivered.degraded);

    assert_eq!(provider.count(CallKind::Redaction), 0);
    assert_eq!(provider.count(CallKind::Compliance), 0);
    assert_eq!(run.trace.model_invocations, 1);
    assert_eq!(
        run.trace.status_of(PipelineStage::Redact),
        Some(StageStatus::Skipped)
    );

    let answer_call = &provider.calls()[0];
    assert!(answer_call.has_schema);
    assert!(answer_call.tools.is_empty());
    assert!(answer_call.contents.contains("Doc: Supply Agreement (D-3), Matter: MT-772"));
    assert!(!answer_call.contents.contains("Board Minutes"));
}

#[tokio::test]
async fn client_receives_redacted_answer_for_privileged_matter() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::Client),
            &documents(),
            &[],
        )
        .await
        .expect("chat should succeed");

    let delivered = run.outcome.delivered().expect("answer should be delivered");
    assert_eq!(delivered.text, REDACTED_ANSWER);
    assert!(!delivered.text.contains("Jane Roe"));
    let redaction = delivered.redaction.as_ref().expect("redaction summary");
    assert_eq!(redaction.entities_removed, 2);
    assert!(!redaction.fell_back);

    assert_eq!(provider.count(CallKind::Redaction), 1);
    let redaction_call = provider
        .calls()
        .into_iter()
        .find(|call| call.kind == CallKind::Redaction)
        .expect("redaction call recorded");
    assert_eq!(redaction_call.model, "private-model");
    assert!(redaction_call.contents.contains(RAW_ANSWER));
    assert_eq!(run.trace.model_invocations, 2);
}

#[tokio::test]
async fn restricted_role_sees_unprivileged_content_without_redaction() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::OutsideCollaborator),
            &public_documents(),
            &[],
        )
        .await
        .expect("chat should succeed");

    assert_eq!(
        run.outcome.delivered().map(|delivered| delivered.text.as_str()),
        Some(RAW_ANSWER)
    );
    assert_eq!(provider.count(CallKind::Redaction), 0);
}

#[tokio::test]
async fn query_privilege_tag_raises_redaction_requirement() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let query = clause_query(RequesterRole::Client).with_privilege(PrivilegeClass::Internal);
    orchestrator
        .interactive_chat(&TenantPolicySnapshot::open(), &query, &public_documents(), &[])
        .await
        .expect("chat should succeed");

    assert_eq!(provider.count(CallKind::Redaction), 1);
}

#[tokio::test]
async fn blocking_rule_withholds_text_and_skips_redaction() {
    let provider = ScriptedProvider::with(|script| {
        script.compliance =
            Reply::Text(json!({ "is_blocked": true, "triggered_rule": "UPL-1" }).to_string());
    });
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::Client),
            &documents(),
            &[rule("UPL-1", true)],
        )
        .await
        .expect("chat should complete");

    match &run.outcome {
        PipelineOutcome::Blocked {
            reason,
            triggered_rule,
        } => {
            assert!(!reason.contains("Jane Roe"));
            assert_eq!(triggered_rule.as_deref(), Some("UPL-1"));
        }
        other => panic!("expected blocked outcome, got {other:?}"),
    }
    assert!(!run.outcome.to_value().to_string().contains("Jane Roe"));
    assert_eq!(provider.count(CallKind::Redaction), 0);
    assert_eq!(
        run.trace.rule_evaluation.as_ref().map(|evaluation| evaluation.is_blocked),
        Some(true)
    );
    assert!(!run.trace.ran(PipelineStage::Redact));

    let compliance_call = provider
        .calls()
        .into_iter()
        .find(|call| call.kind == CallKind::Compliance)
        .expect("compliance call recorded");
    assert!(compliance_call.has_schema);
    assert!(compliance_call.contents.contains(RAW_ANSWER));
}

#[tokio::test]
async fn inactive_rules_do_not_invoke_compliance_check() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::InternalCounsel),
            &documents(),
            &[rule("UPL-1", false)],
        )
        .await
        .expect("chat should succeed");

    assert!(run.outcome.delivered().is_some());
    assert_eq!(provider.count(CallKind::Compliance), 0);
    assert_eq!(
        run.trace.status_of(PipelineStage::ComplianceCheck),
        Some(StageStatus::Skipped)
    );
}

#[tokio::test]
async fn compliance_failure_follows_configured_posture() {
    let failing = |script: &mut Script| script.compliance = Reply::Fail;

    let closed_provider = ScriptedProvider::with(failing);
    let closed = orchestrator(&closed_provider, CompliancePosture::FailClosed)
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::InternalCounsel),
            &documents(),
            &[rule("UPL-1", true)],
        )
        .await
        .expect("chat should complete");
    assert!(matches!(
        closed.outcome,
        PipelineOutcome::Blocked {
            triggered_rule: None,
            ..
        }
    ));
    assert_eq!(
        closed.trace.status_of(PipelineStage::ComplianceCheck),
        Some(StageStatus::Failed)
    );

    let open_provider = ScriptedProvider::with(failing);
    let open = orchestrator(&open_provider, CompliancePosture::BestEffort)
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::InternalCounsel),
            &documents(),
            &[rule("UPL-1", true)],
        )
        .await
        .expect("chat should complete");
    assert_eq!(
        open.outcome.delivered().map(|delivered| delivered.text.as_str()),
        Some(RAW_ANSWER)
    );

    let propagate_provider = ScriptedProvider::with(failing);
    let err = orchestrator(&propagate_provider, CompliancePosture::Propagate)
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::InternalCounsel),
            &documents(),
            &[rule("UPL-1", true)],
        )
        .await
        .expect_err("propagate posture should surface the failure");
    assert!(matches!(err, MediationError::ComplianceCheckFailed(_)));
}

#[tokio::test]
async fn unreadable_verdict_counts_as_compliance_failure() {
    let provider = ScriptedProvider::with(|script| {
        script.compliance = Reply::Text("looks fine to me".to_string());
    });

    let run = orchestrator(&provider, CompliancePosture::FailClosed)
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::InternalCounsel),
            &documents(),
            &[rule("UPL-1", true)],
        )
        .await
        .expect("chat should complete");

    assert!(matches!(run.outcome, PipelineOutcome::Blocked { .. }));
}

#[tokio::test]
async fn non_json_answer_is_wrapped_with_fallback_confidence() {
    let provider = ScriptedProvider::with(|script| {
        script.answer = Reply::Text("Clause 4.2 requires written notice.".to_string());
    });
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::InternalCounsel),
            &documents(),
            &[],
        )
        .await
        .expect("unparseable output should not error");

    let delivered = run.outcome.delivered().expect("answer should be delivered");
    assert_eq!(delivered.text, "Clause 4.2 requires written notice.");
    assert!((0.85..=0.9).contains(&delivered.confidence));
    assert!(delivered.references.is_empty());
    assert_eq!(
        run.trace.status_of(PipelineStage::Parse),
        Some(StageStatus::Degraded)
    );
}

#[tokio::test]
async fn chat_surfaces_provider_failure() {
    let provider = ScriptedProvider::with(|script| script.answer = Reply::Fail);
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let err = orchestrator
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::InternalCounsel),
            &documents(),
            &[],
        )
        .await
        .expect_err("provider failure should surface in chat");

    assert!(matches!(err, MediationError::ProviderUnavailable(_)));
    assert_eq!(provider.count(CallKind::Redaction), 0);
}

#[tokio::test]
async fn research_mode_attaches_search_and_skips_compliance() {
    let provider = ScriptedProvider::with(|script| {
        script.answer = Reply::Grounded(
            "Regulators updated the guidance in March.".to_string(),
            vec![
                ("https://regulator.example/notice", "Notice"),
                ("https://regulator.example/notice", "Notice (mirror)"),
            ],
        );
    });
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let mut query = clause_query(RequesterRole::InternalCounsel);
    query.use_external_search = true;
    let run = orchestrator
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &query,
            &documents(),
            &[rule("UPL-1", true)],
        )
        .await
        .expect("research chat should succeed");

    let delivered = run.outcome.delivered().expect("answer should be delivered");
    assert_eq!(delivered.grounding_sources.len(), 1);
    assert_eq!(delivered.grounding_sources[0].title, "Notice");
    assert!((0.85..=0.9).contains(&delivered.confidence));

    let research_call = &provider.calls()[0];
    assert_eq!(research_call.kind, CallKind::Research);
    assert!(!research_call.has_schema);
    assert_eq!(research_call.tools, vec![ProviderTool::WebSearch]);
    assert_eq!(provider.count(CallKind::Compliance), 0);
}

#[tokio::test]
async fn research_citations_are_withheld_from_redacted_audiences() {
    let provider = ScriptedProvider::with(|script| {
        script.answer = Reply::Grounded(
            RAW_ANSWER.to_string(),
            vec![("https://courts.example/roe-v-acme", "Roe v. Acme Corp")],
        );
    });
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let mut query = clause_query(RequesterRole::Client);
    query.use_external_search = true;
    let run = orchestrator
        .interactive_chat(&TenantPolicySnapshot::open(), &query, &documents(), &[])
        .await
        .expect("research chat should succeed");

    let delivered = run.outcome.delivered().expect("answer should be delivered");
    assert_eq!(delivered.text, REDACTED_ANSWER);
    assert!(delivered.redaction.is_some());
    assert!(delivered.grounding_sources.is_empty());
    assert_eq!(provider.count(CallKind::Research), 1);
    assert_eq!(provider.count(CallKind::Redaction), 1);
}

#[tokio::test]
async fn private_model_flag_selects_private_tier() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let mut query = clause_query(RequesterRole::InternalCounsel);
    query.use_private_model = true;
    orchestrator
        .interactive_chat(&TenantPolicySnapshot::open(), &query, &documents(), &[])
        .await
        .expect("chat should succeed");

    assert_eq!(provider.calls()[0].model, "private-model");
}

#[tokio::test]
async fn redaction_failure_substitutes_placeholder() {
    let provider = ScriptedProvider::with(|script| script.redaction = Reply::Fail);
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .interactive_chat(
            &TenantPolicySnapshot::open(),
            &clause_query(RequesterRole::Client),
            &documents(),
            &[],
        )
        .await
        .expect("redaction failure should not error");

    let delivered = run.outcome.delivered().expect("placeholder should be delivered");
    assert_eq!(delivered.text, "[CONTENT REDACTED]");
    assert!(delivered.redaction.as_ref().is_some_and(|summary| summary.fell_back));
    assert_eq!(
        run.trace.status_of(PipelineStage::Redact),
        Some(StageStatus::Degraded)
    );
}

#[tokio::test]
async fn narrative_failure_degrades_instead_of_erroring() {
    let provider = ScriptedProvider::with(|script| script.narrative = Reply::Fail);
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .generate_narrative(
            &TenantPolicySnapshot::open(),
            NarrativeKind::ComplianceReport,
            &NarrativeRequest {
                requester: RequesterRole::TenantAdmin,
                matter_id: Some(MATTER.to_string()),
                privilege: PrivilegeClass::None,
                source_text: String::new(),
            },
            &documents(),
        )
        .await
        .expect("narrative failure should degrade");

    let delivered = run.outcome.delivered().expect("degraded narrative");
    assert_eq!(delivered.text, SYNTHESIS_UNAVAILABLE_TEXT);
    assert_eq!(delivered.confidence, 0.0);
    assert!(delivered.degraded);
}

#[tokio::test]
async fn narratives_route_to_template_tiers_without_compliance() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);
    let request = NarrativeRequest {
        requester: RequesterRole::InternalCounsel,
        matter_id: Some(MATTER.to_string()),
        privilege: PrivilegeClass::None,
        source_text: "call w/ client re clause 4.2, 0.5h".to_string(),
    };

    let briefing = orchestrator
        .generate_narrative(
            &TenantPolicySnapshot::open(),
            NarrativeKind::ExecutiveBriefing,
            &request,
            &documents(),
        )
        .await
        .expect("briefing should succeed");
    let billing = orchestrator
        .generate_narrative(
            &TenantPolicySnapshot::open(),
            NarrativeKind::BillingNarrative,
            &request,
            &documents(),
        )
        .await
        .expect("billing narrative should succeed");

    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].model, "private-model");
    assert_eq!(calls[1].model, "fast-model");
    assert!(calls.iter().all(|call| !call.has_schema));
    assert!(calls[1].contents.contains("call w/ client re clause 4.2"));

    for run in [briefing, billing] {
        let delivered = run.outcome.delivered().expect("narrative delivered");
        assert_eq!(delivered.text, "Matter MT-772 remains on track.");
        assert!((0.85..=0.9).contains(&delivered.confidence));
        assert!(!run.trace.ran(PipelineStage::ComplianceCheck));
    }
}

#[tokio::test]
async fn metadata_inference_returns_structured_fields() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .infer_document_metadata(
            &TenantPolicySnapshot::open(),
            &MetadataRequest {
                requester: RequesterRole::Operations,
                document: documents().remove(0),
                excerpt: "This Supply Agreement is entered into by Acme Corp and Jane Roe."
                    .to_string(),
            },
        )
        .await
        .expect("metadata inference should succeed");

    let delivered = run.outcome.delivered().expect("metadata delivered");
    let metadata = delivered.metadata.as_ref().expect("structured metadata");
    assert_eq!(metadata.document_type, "contract");
    assert_eq!(metadata.privilege, PrivilegeClass::Privileged);
    assert_eq!(metadata.parties.len(), 2);

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, CallKind::Metadata);
    assert_eq!(calls[0].model, "fast-model");
    assert!(calls[0].has_schema);
}

#[tokio::test]
async fn metadata_for_restricted_requester_drops_structured_fields() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .infer_document_metadata(
            &TenantPolicySnapshot::open(),
            &MetadataRequest {
                requester: RequesterRole::OutsideCollaborator,
                document: documents().remove(0),
                excerpt: "This Supply Agreement is entered into by Acme Corp and Jane Roe."
                    .to_string(),
            },
        )
        .await
        .expect("metadata inference should succeed");

    let delivered = run.outcome.delivered().expect("metadata delivered");
    assert!(delivered.metadata.is_none());
    assert_eq!(delivered.text, REDACTED_ANSWER);
    assert_eq!(provider.count(CallKind::Redaction), 1);
}

#[tokio::test]
async fn inferred_privilege_redacts_untagged_upload() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .infer_document_metadata(
            &TenantPolicySnapshot::open(),
            &MetadataRequest {
                requester: RequesterRole::Client,
                document: document("D-12", "Upload", MATTER, PrivilegeClass::None),
                excerpt: "This Supply Agreement is entered into by Acme Corp and Jane Roe."
                    .to_string(),
            },
        )
        .await
        .expect("metadata inference should succeed");

    let delivered = run.outcome.delivered().expect("metadata delivered");
    assert!(!delivered.text.contains("Jane Roe"));
    assert!(delivered.metadata.is_none());
    assert!(delivered.redaction.is_some());
    assert_eq!(provider.count(CallKind::Metadata), 1);
    assert_eq!(provider.count(CallKind::Redaction), 1);
}

#[tokio::test]
async fn egress_sanitization_always_redacts_once() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .sanitize_for_egress(&TenantPolicySnapshot::open(), RAW_ANSWER)
        .await
        .expect("egress sanitization should succeed");

    let delivered = run.outcome.delivered().expect("sanitized text delivered");
    assert_eq!(delivered.text, REDACTED_ANSWER);
    assert_eq!(delivered.provider, "private-model");

    let calls = provider.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].kind, CallKind::Redaction);
    assert_eq!(run.trace.model_invocations, 1);
}

#[tokio::test]
async fn egress_fallback_reports_no_provider() {
    let provider = ScriptedProvider::with(|script| script.redaction = Reply::Fail);
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let run = orchestrator
        .sanitize_for_egress(&TenantPolicySnapshot::open(), RAW_ANSWER)
        .await
        .expect("redaction failure should not error");

    let delivered = run.outcome.delivered().expect("placeholder should be delivered");
    assert_eq!(delivered.text, "[CONTENT REDACTED]");
    assert_eq!(delivered.provider, "none");
    assert!(delivered.redaction.as_ref().is_some_and(|summary| summary.fell_back));
    assert_eq!(
        run.trace.status_of(PipelineStage::Redact),
        Some(StageStatus::Degraded)
    );
}

#[tokio::test]
async fn concurrent_runs_do_not_share_state() {
    let provider = ScriptedProvider::default();
    let orchestrator = orchestrator(&provider, CompliancePosture::FailClosed);

    let mut tasks = Vec::new();
    for index in 0..8 {
        let orchestrator = orchestrator.clone();
        let requester = if index % 2 == 0 {
            RequesterRole::InternalCounsel
        } else {
            RequesterRole::Client
        };
        tasks.push(tokio::spawn(async move {
            orchestrator
                .interactive_chat(
                    &TenantPolicySnapshot::open(),
                    &clause_query(requester),
                    &documents(),
                    &[],
                )
                .await
        }));
    }

    let mut run_ids = Vec::new();
    for task in tasks {
        let run = task
            .await
            .expect("task should join")
            .expect("chat should succeed");
        assert!(run.outcome.delivered().is_some());
        run_ids.push(run.trace.run_id);
    }

    run_ids.sort();
    run_ids.dedup();
    assert_eq!(run_ids.len(), 8);
    assert_eq!(provider.count(CallKind::Redaction), 4);
}
