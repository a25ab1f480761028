use jsonschema::JSONSchema;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

use super::contracts::{
    ContractError, OutputContract, ParsedContract, output_schema, parse_contract,
};

/// Reasons a model reply could not satisfy its structured-output contract.
#[derive(Debug, Error)]
pub enum ContractMismatch {
    #[error("model output is not valid json: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("schema for {contract:?} failed to compile: {message}")]
    SchemaCompile {
        contract: OutputContract,
        message: String,
    },
    #[error("model output failed schema validation for {contract:?}: {errors:?}")]
    SchemaViolation {
        contract: OutputContract,
        errors: Vec<String>,
    },
    #[error(transparent)]
    Contract(#[from] ContractError),
}

pub fn parse_contract_text(
    contract: OutputContract,
    raw_text: &str,
) -> Result<ParsedContract, ContractMismatch> {
    let payload: Value = serde_json::from_str(strip_code_fence(raw_text))?;
    validate_contract_value(contract, &payload)
}

pub fn validate_contract_value(
    contract: OutputContract,
    payload: &Value,
) -> Result<ParsedContract, ContractMismatch> {
    let validator = validator_for_contract(contract)?;

    if let Err(validation_errors) = validator.validate(payload) {
        let errors = validation_errors
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        return Err(ContractMismatch::SchemaViolation { contract, errors });
    }

    parse_contract(contract, payload.clone()).map_err(ContractMismatch::from)
}

/// Models often wrap JSON replies in a markdown fence even in JSON mode.
fn strip_code_fence(raw_text: &str) -> &str {
    let trimmed = raw_text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed;
    };

    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.trim()
}

static LEGAL_ANSWER_VALIDATOR: LazyLock<Result<JSONSchema, String>> = LazyLock::new(|| {
    JSONSchema::compile(&output_schema(OutputContract::LegalAnswer)).map_err(|err| err.to_string())
});

static COMPLIANCE_VERDICT_VALIDATOR: LazyLock<Result<JSONSchema, String>> = LazyLock::new(|| {
    JSONSchema::compile(&output_schema(OutputContract::ComplianceVerdict))
        .map_err(|err| err.to_string())
});

static DOCUMENT_METADATA_VALIDATOR: LazyLock<Result<JSONSchema, String>> = LazyLock::new(|| {
    JSONSchema::compile(&output_schema(OutputContract::DocumentMetadata))
        .map_err(|err| err.to_string())
});

fn validator_for_contract(
    contract: OutputContract,
) -> Result<&'static JSONSchema, ContractMismatch> {
    let validator_result = match contract {
        OutputContract::LegalAnswer => &*LEGAL_ANSWER_VALIDATOR,
        OutputContract::ComplianceVerdict => &*COMPLIANCE_VERDICT_VALIDATOR,
        OutputContract::DocumentMetadata => &*DOCUMENT_METADATA_VALIDATOR,
    };

    validator_result
        .as_ref()
        .map_err(|message| ContractMismatch::SchemaCompile {
            contract,
            message: message.clone(),
        })
}
