use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::PrivilegeClass;

/// Structured-output contracts the gateway can ask a model to honor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputContract {
    LegalAnswer,
    ComplianceVerdict,
    DocumentMetadata,
}

impl OutputContract {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LegalAnswer => "legal_answer",
            Self::ComplianceVerdict => "compliance_verdict",
            Self::DocumentMetadata => "document_metadata",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct LegalAnswer {
    pub text: String,
    #[schemars(range(min = 0.0, max = 1.0))]
    pub confidence: f64,
    pub internal_references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ComplianceVerdict {
    pub is_blocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_rule: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DocumentMetadata {
    pub title: String,
    pub document_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    pub privilege: PrivilegeClass,
    pub parties: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParsedContract {
    LegalAnswer(LegalAnswer),
    ComplianceVerdict(ComplianceVerdict),
    DocumentMetadata(DocumentMetadata),
}

impl ParsedContract {
    pub const fn contract(&self) -> OutputContract {
        match self {
            Self::LegalAnswer(_) => OutputContract::LegalAnswer,
            Self::ComplianceVerdict(_) => OutputContract::ComplianceVerdict,
            Self::DocumentMetadata(_) => OutputContract::DocumentMetadata,
        }
    }
}

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("output contract payload is invalid: {0}")]
    Deserialize(#[from] serde_json::Error),
    #[error("output contract field {field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
}

pub fn output_schema(contract: OutputContract) -> Value {
    match contract {
        OutputContract::LegalAnswer => serde_json::to_value(schema_for!(LegalAnswer))
            .expect("legal answer schema should be serializable"),
        OutputContract::ComplianceVerdict => serde_json::to_value(schema_for!(ComplianceVerdict))
            .expect("compliance verdict schema should be serializable"),
        OutputContract::DocumentMetadata => serde_json::to_value(schema_for!(DocumentMetadata))
            .expect("document metadata schema should be serializable"),
    }
}

pub fn parse_contract(
    contract: OutputContract,
    payload: Value,
) -> Result<ParsedContract, ContractError> {
    match contract {
        OutputContract::LegalAnswer => {
            let answer: LegalAnswer = serde_json::from_value(payload)?;
            ensure_unit_interval("confidence", answer.confidence)?;
            Ok(ParsedContract::LegalAnswer(answer))
        }
        OutputContract::ComplianceVerdict => Ok(ParsedContract::ComplianceVerdict(
            serde_json::from_value(payload)?,
        )),
        OutputContract::DocumentMetadata => Ok(ParsedContract::DocumentMetadata(
            serde_json::from_value(payload)?,
        )),
    }
}

fn ensure_unit_interval(field: &'static str, value: f64) -> Result<(), ContractError> {
    if (0.0..=1.0).contains(&value) {
        return Ok(());
    }

    Err(ContractError::OutOfRange { field, value })
}
