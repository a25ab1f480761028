use tracing::warn;

use crate::llm::gateway::{InvocationPurpose, InvokeOptions, ModelGateway, ModelTier};
use crate::llm::prompts::REDACTION_SYSTEM_INSTRUCTION;
use crate::models::{PrivilegeClass, RedactionResult, RoleClass};

pub const NAME_PLACEHOLDER: &str = "[NAME]";
pub const DATE_PLACEHOLDER: &str = "[DATE]";
pub const VALUE_PLACEHOLDER: &str = "[VALUE]";
pub const REDACTED_CONTENT_PLACEHOLDER: &str = "[CONTENT REDACTED]";

const PLACEHOLDERS: [&str; 3] = [NAME_PLACEHOLDER, DATE_PLACEHOLDER, VALUE_PLACEHOLDER];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionDecision {
    Redact,
    PassThrough,
}

/// Audience dispatch table: internal roles always see raw text, restricted
/// roles are redacted unless the content carries no privilege at all.
pub const fn redaction_decision(role: RoleClass, privilege: PrivilegeClass) -> RedactionDecision {
    match (role, privilege) {
        (RoleClass::Internal, _) => RedactionDecision::PassThrough,
        (RoleClass::Restricted, PrivilegeClass::None) => RedactionDecision::PassThrough,
        (RoleClass::Restricted, PrivilegeClass::Internal | PrivilegeClass::Privileged) => {
            RedactionDecision::Redact
        }
    }
}

pub fn redaction_prompt(raw_text: &str) -> String {
    format!(
        "Replace personal names with {NAME_PLACEHOLDER}, dates with {DATE_PLACEHOLDER} and monetary amounts with {VALUE_PLACEHOLDER}. Keep everything else unchanged.\n\nText:\n{raw_text}"
    )
}

/// Asks the model to redact `raw_text`.
///
/// Any failure yields [`REDACTED_CONTENT_PLACEHOLDER`]; the raw text is never
/// returned.
pub async fn redact(gateway: &ModelGateway, raw_text: &str) -> RedactionResult {
    let invocation = gateway
        .invoke(
            &redaction_prompt(raw_text),
            REDACTION_SYSTEM_INSTRUCTION,
            InvokeOptions::new(InvocationPurpose::Redaction, ModelTier::Private),
        )
        .await;

    match invocation {
        Ok(response) if !response.text.trim().is_empty() => {
            let text = response.text.trim().to_string();
            RedactionResult {
                entities_removed: count_placeholders(&text),
                text,
                fell_back: false,
            }
        }
        Ok(_) => {
            warn!("redaction returned empty text; substituting placeholder");
            redaction_fallback()
        }
        Err(err) => {
            warn!("redaction invocation failed; substituting placeholder: {err}");
            redaction_fallback()
        }
    }
}

pub fn count_placeholders(text: &str) -> usize {
    PLACEHOLDERS
        .iter()
        .map(|placeholder| text.matches(placeholder).count())
        .sum()
}

fn redaction_fallback() -> RedactionResult {
    RedactionResult {
        text: REDACTED_CONTENT_PLACEHOLDER.to_string(),
        entities_removed: 0,
        fell_back: true,
    }
}
