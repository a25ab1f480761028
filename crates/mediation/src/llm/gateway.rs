use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use super::contracts::{OutputContract, ParsedContract, output_schema};
use super::observability::telemetry_for_result;
use super::validation::parse_contract_text;
use crate::models::GroundingSource;

pub const DEFAULT_FALLBACK_CONFIDENCE: f64 = 0.9;
pub const MIN_FALLBACK_CONFIDENCE: f64 = 0.85;
pub const MAX_FALLBACK_CONFIDENCE: f64 = 0.9;

pub type LlmProviderFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ProviderResponse, LlmProviderError>> + Send + 'a>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    /// Higher-capability, slower, tenant-isolated model.
    Private,
    /// Lower-latency general model.
    Fast,
}

impl ModelTier {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Fast => "fast",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTool {
    WebSearch,
}

/// Request shape handed to the opaque model provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub contents: String,
    pub system_instruction: String,
    pub response_schema: Option<Value>,
    pub tools: Vec<ProviderTool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmTokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderResponse {
    pub model: String,
    #[serde(default)]
    pub request_id: Option<String>,
    pub text: String,
    #[serde(default)]
    pub candidates: Vec<ProviderCandidate>,
    #[serde(default)]
    pub usage: Option<LlmTokenUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderCandidate {
    #[serde(default)]
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroundingMetadata {
    #[serde(default)]
    pub grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroundingChunk {
    #[serde(default)]
    pub web: Option<WebChunk>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WebChunk {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Error)]
pub enum LlmProviderError {
    #[error("llm provider request timed out")]
    Timeout,
    #[error("llm provider request failed: {0}")]
    ProviderFailure(String),
    #[error("llm provider returned an invalid payload: {0}")]
    InvalidProviderPayload(String),
}

pub trait LlmProvider: Send + Sync {
    fn generate<'a>(&'a self, request: ProviderRequest) -> LlmProviderFuture<'a>;
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("model provider unavailable: {0}")]
    ProviderUnavailable(#[from] LlmProviderError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationPurpose {
    Answer,
    Narrative,
    ComplianceCheck,
    Redaction,
    MetadataInference,
}

impl InvocationPurpose {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Answer => "answer",
            Self::Narrative => "narrative",
            Self::ComplianceCheck => "compliance_check",
            Self::Redaction => "redaction",
            Self::MetadataInference => "metadata_inference",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InvokeOptions {
    pub purpose: InvocationPurpose,
    pub tier: ModelTier,
    pub contract: Option<OutputContract>,
    pub external_search: bool,
}

impl InvokeOptions {
    pub const fn new(purpose: InvocationPurpose, tier: ModelTier) -> Self {
        Self {
            purpose,
            tier,
            contract: None,
            external_search: false,
        }
    }

    pub const fn with_contract(mut self, contract: OutputContract) -> Self {
        self.contract = Some(contract);
        self
    }

    pub const fn with_external_search(mut self, enabled: bool) -> Self {
        self.external_search = enabled;
        self
    }

    /// Structured mode wins when both are requested; the search tool is not
    /// attached, but citations returned anyway are still extracted.
    const fn attaches_search_tool(self) -> bool {
        self.external_search && self.contract.is_none()
    }
}

/// Degraded stand-in for a structured reply that did not match its contract.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFallback {
    pub text: String,
    pub confidence: f64,
    pub internal_references: Vec<String>,
    pub mismatch: String,
}

pub type StructuredOutput = Result<ParsedContract, RawFallback>;

#[derive(Debug, Clone)]
pub struct ModelResponse {
    pub text: String,
    pub structured: Option<StructuredOutput>,
    pub grounding_sources: Vec<GroundingSource>,
    pub provider: String,
    pub usage: Option<LlmTokenUsage>,
}

#[derive(Debug, Clone)]
pub struct ModelGatewayConfig {
    pub private_model: String,
    pub fast_model: String,
    pub fallback_confidence: f64,
}

impl ModelGatewayConfig {
    pub fn new(private_model: impl Into<String>, fast_model: impl Into<String>) -> Self {
        Self {
            private_model: private_model.into(),
            fast_model: fast_model.into(),
            fallback_confidence: DEFAULT_FALLBACK_CONFIDENCE,
        }
    }

    pub fn with_fallback_confidence(mut self, confidence: f64) -> Self {
        self.fallback_confidence = clamp_fallback_confidence(confidence);
        self
    }

    fn model_for(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Private => &self.private_model,
            ModelTier::Fast => &self.fast_model,
        }
    }
}

#[derive(Clone)]
pub struct ModelGateway {
    provider: Arc<dyn LlmProvider>,
    config: ModelGatewayConfig,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, config: ModelGatewayConfig) -> Self {
        Self { provider, config }
    }

    pub fn fallback_confidence(&self) -> f64 {
        self.config.fallback_confidence
    }

    pub fn model_label(&self, tier: ModelTier) -> &str {
        self.config.model_for(tier)
    }

    pub async fn invoke(
        &self,
        prompt: &str,
        system_instruction: &str,
        options: InvokeOptions,
    ) -> Result<ModelResponse, GatewayError> {
        if options.external_search && options.contract.is_some() {
            debug!(
                purpose = options.purpose.as_str(),
                "structured output requested with external search; search tool not attached"
            );
        }

        let request = ProviderRequest {
            model: self.config.model_for(options.tier).to_string(),
            contents: prompt.to_string(),
            system_instruction: system_instruction.to_string(),
            response_schema: options.contract.map(output_schema),
            tools: if options.attaches_search_tool() {
                vec![ProviderTool::WebSearch]
            } else {
                Vec::new()
            },
        };

        let started_at = Instant::now();
        let result = self.provider.generate(request).await;
        telemetry_for_result(options, started_at.elapsed(), &result).emit();
        let response = result?;

        let grounding_sources = if options.external_search {
            extract_grounding_sources(&response.candidates)
        } else {
            Vec::new()
        };
        let structured = options
            .contract
            .map(|contract| self.parse_structured(contract, &response.text));

        Ok(ModelResponse {
            text: response.text,
            structured,
            grounding_sources,
            provider: response.model,
            usage: response.usage,
        })
    }

    fn parse_structured(&self, contract: OutputContract, raw_text: &str) -> StructuredOutput {
        parse_contract_text(contract, raw_text).map_err(|mismatch| {
            debug!(
                contract = contract.as_str(),
                "structured output did not match contract: {mismatch}"
            );
            RawFallback {
                text: raw_text.trim().to_string(),
                confidence: self.config.fallback_confidence,
                internal_references: Vec::new(),
                mismatch: mismatch.to_string(),
            }
        })
    }
}

pub fn extract_grounding_sources(candidates: &[ProviderCandidate]) -> Vec<GroundingSource> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter_map(|candidate| candidate.grounding_metadata.as_ref())
        .flat_map(|metadata| metadata.grounding_chunks.iter())
        .filter_map(|chunk| chunk.web.as_ref())
        .filter_map(|web| {
            let uri = web.uri.as_deref().map(str::trim).unwrap_or("");
            if uri.is_empty() {
                return None;
            }
            let title = web
                .title
                .as_deref()
                .map(str::trim)
                .filter(|title| !title.is_empty())
                .unwrap_or(uri);
            Some(GroundingSource {
                title: title.to_string(),
                uri: uri.to_string(),
            })
        })
        .filter(|source| seen.insert(source.uri.clone()))
        .collect()
}

pub fn clamp_fallback_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        return DEFAULT_FALLBACK_CONFIDENCE;
    }

    confidence.clamp(MIN_FALLBACK_CONFIDENCE, MAX_FALLBACK_CONFIDENCE)
}
