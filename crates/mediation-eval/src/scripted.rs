use mediation::llm::prompts::{
    COMPLIANCE_SYSTEM_INSTRUCTION, LEGAL_ANSWER_SYSTEM_INSTRUCTION, METADATA_SYSTEM_INSTRUCTION,
    REDACTION_SYSTEM_INSTRUCTION, RESEARCH_SYSTEM_INSTRUCTION,
};
use mediation::llm::{
    LlmProvider, LlmProviderError, LlmProviderFuture, ProviderRequest, ProviderResponse,
};

use crate::case::{MockedReplies, MockedReply};

/// Replays fixture replies in place of a real provider. Calls are routed by
/// the system instruction the pipeline stage sends.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    replies: MockedReplies,
}

impl ScriptedProvider {
    pub fn new(replies: MockedReplies) -> Self {
        Self { replies }
    }

    fn reply_for(&self, system_instruction: &str) -> Option<&MockedReply> {
        match system_instruction {
            LEGAL_ANSWER_SYSTEM_INSTRUCTION | RESEARCH_SYSTEM_INSTRUCTION => {
                self.replies.answer.as_ref()
            }
            COMPLIANCE_SYSTEM_INSTRUCTION => self.replies.compliance.as_ref(),
            REDACTION_SYSTEM_INSTRUCTION => self.replies.redaction.as_ref(),
            METADATA_SYSTEM_INSTRUCTION => self.replies.metadata.as_ref(),
            _ => self.replies.narrative.as_ref(),
        }
    }
}

impl LlmProvider for ScriptedProvider {
    fn generate<'a>(&'a self, request: ProviderRequest) -> LlmProviderFuture<'a> {
        Box::pin(async move {
            let text = match self.reply_for(&request.system_instruction) {
                Some(MockedReply::Text(text)) => text.clone(),
                Some(MockedReply::Json(value)) => value.to_string(),
                Some(MockedReply::Fail) => {
                    return Err(LlmProviderError::ProviderFailure(
                        "status=503 code=scripted_failure".to_string(),
                    ));
                }
                None => {
                    return Err(LlmProviderError::ProviderFailure(
                        "no_mocked_reply".to_string(),
                    ));
                }
            };

            Ok(ProviderResponse {
                model: format!("scripted/{}", request.model),
                text,
                ..ProviderResponse::default()
            })
        })
    }
}
