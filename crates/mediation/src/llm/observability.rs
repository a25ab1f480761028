use std::time::Duration;

use tracing::{info, warn};

use super::gateway::{InvokeOptions, LlmProviderError, ProviderResponse};

#[derive(Debug, Clone)]
pub struct LlmTelemetryEvent {
    pub purpose: &'static str,
    pub tier: &'static str,
    pub contract: Option<&'static str>,
    pub outcome: &'static str,
    pub latency_ms: u64,
    pub provider: String,
    pub model: Option<String>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub error_type: Option<&'static str>,
}

impl LlmTelemetryEvent {
    pub fn emit(&self) {
        match self.error_type {
            None => info!(
                purpose = self.purpose,
                tier = self.tier,
                contract = self.contract,
                outcome = self.outcome,
                latency_ms = self.latency_ms,
                provider = %self.provider,
                model = self.model.as_deref(),
                prompt_tokens = self.prompt_tokens,
                completion_tokens = self.completion_tokens,
                total_tokens = self.total_tokens,
                "llm invocation completed"
            ),
            Some(error_type) => warn!(
                purpose = self.purpose,
                tier = self.tier,
                contract = self.contract,
                outcome = self.outcome,
                latency_ms = self.latency_ms,
                error_type,
                "llm invocation failed"
            ),
        }
    }
}

pub(crate) fn telemetry_for_result(
    options: InvokeOptions,
    latency: Duration,
    result: &Result<ProviderResponse, LlmProviderError>,
) -> LlmTelemetryEvent {
    let latency_ms = duration_to_millis(latency);
    let contract = options.contract.map(|contract| contract.as_str());

    match result {
        Ok(response) => {
            let usage = response.usage.clone().unwrap_or_default();
            let has_usage = response.usage.is_some();

            LlmTelemetryEvent {
                purpose: options.purpose.as_str(),
                tier: options.tier.as_str(),
                contract,
                outcome: "success",
                latency_ms,
                provider: provider_from_model(&response.model),
                model: Some(response.model.clone()),
                prompt_tokens: has_usage.then_some(usage.prompt_tokens),
                completion_tokens: has_usage.then_some(usage.completion_tokens),
                total_tokens: has_usage.then_some(usage.total_tokens),
                error_type: None,
            }
        }
        Err(err) => LlmTelemetryEvent {
            purpose: options.purpose.as_str(),
            tier: options.tier.as_str(),
            contract,
            outcome: "failure",
            latency_ms,
            provider: "unknown".to_string(),
            model: None,
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            error_type: Some(error_type(err)),
        },
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    let millis = duration.as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

fn provider_from_model(model: &str) -> String {
    model
        .split('/')
        .next()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("unknown")
        .to_string()
}

fn error_type(error: &LlmProviderError) -> &'static str {
    match error {
        LlmProviderError::Timeout => "timeout",
        LlmProviderError::ProviderFailure(_) => "provider_failure",
        LlmProviderError::InvalidProviderPayload(_) => "invalid_provider_payload",
    }
}
