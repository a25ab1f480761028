use std::sync::Arc;

use mediation::llm::{
    LlmProvider, ModelGateway, OpenRouterConfigError, OpenRouterProvider,
    OpenRouterProviderConfig,
};
use mediation::models::{OutcomeKind, PipelineOutcome, TenantPolicySnapshot};
use mediation::pipeline::{MediationError, MediationOrchestrator, PipelineRun, PipelineStage};
use mediation::{ConfigError, MediationConfig};
use thiserror::Error;
use tracing::info;

use crate::case::{EvalCaseFixture, EvalExpectations, EvalPipeline};
use crate::cli::{CliOptions, EvalMode};
use crate::fixture_io::{FixtureIoError, load_cases};
use crate::scripted::ScriptedProvider;

#[derive(Debug)]
pub struct EvalSummary {
    mode: EvalMode,
    results: Vec<CaseResult>,
}

impl EvalSummary {
    pub fn has_failures(&self) -> bool {
        self.results
            .iter()
            .any(|result| !result.failures.is_empty())
    }

    pub fn print(&self) {
        println!("Mediation Eval Harness ({})", self.mode.as_str());

        let mut passed = 0usize;
        for result in &self.results {
            if result.failures.is_empty() {
                passed += 1;
                println!("[PASS] {}: {}", result.case_id, result.description);
            } else {
                println!("[FAIL] {}: {}", result.case_id, result.description);
                for failure in &result.failures {
                    println!("  - {failure}");
                }
            }
        }

        let total = self.results.len();
        let failed = total.saturating_sub(passed);
        println!(
            "Summary: {} total, {} passed, {} failed",
            total, passed, failed
        );
    }
}

#[derive(Debug)]
struct CaseResult {
    case_id: String,
    description: String,
    failures: Vec<String>,
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Fixtures(#[from] FixtureIoError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to initialize OpenRouter in live mode: {0}")]
    OpenRouterConfig(#[from] OpenRouterConfigError),
    #[error("no fixture with case_id {0}")]
    UnknownCase(String),
    #[error("live mode requires at least one fixture with include_in_live_smoke=true")]
    NoLiveCases,
}

pub async fn run_eval(options: &CliOptions) -> Result<EvalSummary, EvalError> {
    let mut cases = load_cases()?;
    cases.sort_by(|left, right| left.case_id.cmp(&right.case_id));

    if !options.case_ids.is_empty() {
        if let Some(missing) = options
            .case_ids
            .iter()
            .find(|id| !cases.iter().any(|case| &case.case_id == *id))
        {
            return Err(EvalError::UnknownCase(missing.clone()));
        }
        cases.retain(|case| options.case_ids.contains(&case.case_id));
    }

    // Mocked runs ignore the environment so results do not drift with it.
    let (config, live_provider) = if options.mode == EvalMode::Live {
        cases.retain(|case| case.include_in_live_smoke);
        if cases.is_empty() {
            return Err(EvalError::NoLiveCases);
        }

        let provider: Arc<dyn LlmProvider> = Arc::new(OpenRouterProvider::new(
            OpenRouterProviderConfig::from_env()?,
        )?);
        (MediationConfig::from_env()?, Some(provider))
    } else {
        (MediationConfig::default(), None)
    };

    let mut results = Vec::with_capacity(cases.len());
    for case in &cases {
        let provider = live_provider.clone().unwrap_or_else(|| {
            Arc::new(ScriptedProvider::new(case.mocked_replies.clone())) as Arc<dyn LlmProvider>
        });
        let result = run_case(case, &config, provider).await;
        info!(
            case_id = %case.case_id,
            mode = options.mode.as_str(),
            failures = result.failures.len(),
            "eval case finished"
        );
        results.push(result);
    }

    Ok(EvalSummary {
        mode: options.mode,
        results,
    })
}

async fn run_case(
    case: &EvalCaseFixture,
    config: &MediationConfig,
    provider: Arc<dyn LlmProvider>,
) -> CaseResult {
    let orchestrator = MediationOrchestrator::new(
        ModelGateway::new(provider, config.gateway_config()),
        case.compliance_posture.unwrap_or(config.compliance_posture),
    );
    let policy = TenantPolicySnapshot::new(case.kill_switch_active);

    let result = match &case.pipeline {
        EvalPipeline::InteractiveChat { query } => {
            orchestrator
                .interactive_chat(&policy, query, &case.documents, &case.rules)
                .await
        }
        EvalPipeline::Narrative { kind, request } => {
            orchestrator
                .generate_narrative(&policy, *kind, request, &case.documents)
                .await
        }
        EvalPipeline::MetadataInference { request } => {
            orchestrator.infer_document_metadata(&policy, request).await
        }
        EvalPipeline::EgressSanitization { text } => {
            orchestrator.sanitize_for_egress(&policy, text).await
        }
    };

    CaseResult {
        case_id: case.case_id.clone(),
        description: case.description.clone(),
        failures: check_expectations(&case.expectations, &result),
    }
}

fn check_expectations(
    expectations: &EvalExpectations,
    result: &Result<PipelineRun, MediationError>,
) -> Vec<String> {
    let mut failures = Vec::new();

    let run = match result {
        Ok(run) => {
            if expectations.expect_error {
                failures.push(format!(
                    "error: expected pipeline error, got {} outcome",
                    run.outcome.kind().as_str()
                ));
            }
            run
        }
        Err(err) => {
            if !expectations.expect_error {
                failures.push(format!("error: unexpected pipeline error: {err}"));
            }
            return failures;
        }
    };

    if let Some(expected) = expectations.outcome {
        let actual = run.outcome.kind();
        if expected != actual {
            failures.push(format!(
                "outcome: expected={}, actual={}",
                expected.as_str(),
                actual.as_str()
            ));
        }
    }

    let invocations = run.trace.model_invocations;
    if let Some(min) = expectations.min_invocations
        && invocations < min
    {
        failures.push(format!("invocations: expected at least {min}, got {invocations}"));
    }
    if let Some(max) = expectations.max_invocations
        && invocations > max
    {
        failures.push(format!("invocations: expected at most {max}, got {invocations}"));
    }

    if let Some(expected) = expectations.redactor_invoked {
        let actual = run.trace.ran(PipelineStage::Redact);
        if expected != actual {
            failures.push(format!(
                "redactor_invoked: expected={expected}, actual={actual}"
            ));
        }
    }

    if let Some(expected_rule) = expectations.triggered_rule.as_deref() {
        let actual_rule = match &run.outcome {
            PipelineOutcome::Blocked { triggered_rule, .. } => triggered_rule.as_deref(),
            _ => None,
        };
        if actual_rule != Some(expected_rule) {
            failures.push(format!(
                "triggered_rule: expected={expected_rule}, actual={}",
                actual_rule.unwrap_or("none")
            ));
        }
    }

    let rendered = run.outcome.to_value().to_string();
    for required in &expectations.required_substrings {
        if !rendered.contains(required.as_str()) {
            failures.push(format!("required_substring: missing {required:?}"));
        }
    }
    for forbidden in &expectations.forbidden_substrings {
        if rendered.contains(forbidden.as_str()) {
            failures.push(format!("forbidden_substring: found {forbidden:?}"));
        }
    }

    if run.outcome.kind() == OutcomeKind::Killed && invocations != 0 {
        failures.push(format!(
            "kill_switch: killed run made {invocations} model invocations"
        ));
    }

    failures
}
