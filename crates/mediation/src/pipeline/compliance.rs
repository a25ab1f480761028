use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::llm::contracts::{OutputContract, ParsedContract};
use crate::llm::gateway::{
    GatewayError, InvocationPurpose, InvokeOptions, ModelGateway, ModelTier,
};
use crate::llm::prompts::COMPLIANCE_SYSTEM_INSTRUCTION;
use crate::models::{RegulatoryRule, RuleEvaluation};

/// What a variant does when the compliance check itself cannot complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompliancePosture {
    /// Treat a failed check as a block.
    FailClosed,
    /// Treat a failed check as "not blocked" and log it.
    BestEffort,
    /// Return the failure to the caller.
    Propagate,
}

impl CompliancePosture {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fail_closed" => Some(Self::FailClosed),
            "best_effort" => Some(Self::BestEffort),
            "propagate" => Some(Self::Propagate),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ComplianceCheckFailed {
    #[error("compliance check invocation failed: {0}")]
    Gateway(#[from] GatewayError),
    #[error("compliance verdict did not match its contract: {0}")]
    UnreadableVerdict(String),
}

pub fn active_rules(rules: &[RegulatoryRule]) -> Vec<&RegulatoryRule> {
    rules.iter().filter(|rule| rule.active).collect()
}

pub fn compliance_prompt(response_text: &str, rules: &[&RegulatoryRule]) -> String {
    let rules = rules
        .iter()
        .map(|rule| {
            json!({
                "id": rule.id,
                "name": rule.name,
                "authority": rule.authority,
                "trigger_keywords": rule.trigger_keywords,
                "block_threshold": rule.block_threshold,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "instruction": "Evaluate the response text against every rule.",
        "rules": rules,
        "response_text": response_text,
    })
    .to_string()
}

/// Runs the regulatory rule evaluator over generated text.
///
/// Only active rules participate; with none active the text is not blocked
/// and no model call is made. The verdict is returned as the classifier
/// produced it.
pub async fn evaluate(
    gateway: &ModelGateway,
    response_text: &str,
    rules: &[RegulatoryRule],
) -> Result<RuleEvaluation, ComplianceCheckFailed> {
    let active = active_rules(rules);
    if active.is_empty() {
        return Ok(RuleEvaluation::not_blocked());
    }

    let response = gateway
        .invoke(
            &compliance_prompt(response_text, &active),
            COMPLIANCE_SYSTEM_INSTRUCTION,
            InvokeOptions::new(InvocationPurpose::ComplianceCheck, ModelTier::Private)
                .with_contract(OutputContract::ComplianceVerdict),
        )
        .await?;

    match response.structured {
        Some(Ok(ParsedContract::ComplianceVerdict(verdict))) => Ok(RuleEvaluation {
            is_blocked: verdict.is_blocked,
            triggered_rule: verdict.triggered_rule,
        }),
        Some(Err(fallback)) => Err(ComplianceCheckFailed::UnreadableVerdict(fallback.mismatch)),
        _ => Err(ComplianceCheckFailed::UnreadableVerdict(
            "missing compliance verdict".to_string(),
        )),
    }
}
