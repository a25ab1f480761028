use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::time::sleep;

use super::gateway::{
    GroundingChunk, GroundingMetadata, LlmProvider, LlmProviderError, LlmProviderFuture,
    LlmTokenUsage, ProviderCandidate, ProviderRequest, ProviderResponse, ProviderTool, WebChunk,
};
use crate::config::{
    ConfigError, optional_trimmed_env, parse_u32_env, parse_u64_env, require_non_empty_env,
};

const DEFAULT_CHAT_COMPLETIONS_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_RETRY_BASE_BACKOFF_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct OpenRouterProviderConfig {
    pub chat_completions_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_backoff_ms: u64,
    /// Tried after the requested model exhausts its retries.
    pub fallback_model: Option<String>,
}

impl OpenRouterProviderConfig {
    pub fn from_env() -> Result<Self, OpenRouterConfigError> {
        let api_key = require_non_empty_env("OPENROUTER_API_KEY")?;
        let chat_completions_url = optional_trimmed_env("OPENROUTER_CHAT_COMPLETIONS_URL")
            .unwrap_or_else(|| DEFAULT_CHAT_COMPLETIONS_URL.to_string());
        if !chat_completions_url.starts_with("http://")
            && !chat_completions_url.starts_with("https://")
        {
            return Err(OpenRouterConfigError::InvalidConfiguration(
                "OPENROUTER_CHAT_COMPLETIONS_URL must start with http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            chat_completions_url,
            api_key,
            timeout_ms: parse_u64_env("OPENROUTER_TIMEOUT_MS", DEFAULT_TIMEOUT_MS)?,
            max_retries: parse_u32_env("OPENROUTER_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            retry_base_backoff_ms: parse_u64_env(
                "OPENROUTER_RETRY_BASE_BACKOFF_MS",
                DEFAULT_RETRY_BASE_BACKOFF_MS,
            )?,
            fallback_model: optional_trimmed_env("OPENROUTER_MODEL_FALLBACK"),
        })
    }

    fn candidate_models<'a>(&'a self, requested: &'a str) -> Vec<&'a str> {
        let mut candidates = Vec::new();
        if !requested.is_empty() {
            candidates.push(requested);
        }

        if let Some(fallback_model) = self.fallback_model.as_deref()
            && !fallback_model.is_empty()
            && fallback_model != requested
        {
            candidates.push(fallback_model);
        }

        candidates
    }
}

#[derive(Debug, Error)]
pub enum OpenRouterConfigError {
    #[error(transparent)]
    Env(#[from] ConfigError),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to build OpenRouter http client: {0}")]
    HttpClient(String),
}

#[derive(Clone)]
pub struct OpenRouterProvider {
    client: reqwest::Client,
    config: OpenRouterProviderConfig,
}

impl OpenRouterProvider {
    pub fn new(config: OpenRouterProviderConfig) -> Result<Self, OpenRouterConfigError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|err| OpenRouterConfigError::HttpClient(err.to_string()))?;

        Ok(Self { client, config })
    }

    async fn generate_for_model(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, ModelAttemptError> {
        let mut attempt = 0_u32;

        loop {
            match self.send_once(model, request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if err.retryable && attempt < self.config.max_retries {
                        let backoff_multiplier = 2_u64.saturating_pow(attempt);
                        let backoff_ms = self
                            .config
                            .retry_base_backoff_ms
                            .saturating_mul(backoff_multiplier);
                        sleep(Duration::from_millis(backoff_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    return Err(ModelAttemptError {
                        error: err.error,
                        fallback_allowed: err.fallback_allowed,
                    });
                }
            }
        }
    }

    async fn send_once(
        &self,
        model: &str,
        request: &ProviderRequest,
    ) -> Result<ProviderResponse, SendAttemptError> {
        let request_body = request_body(model, request);

        let response = self
            .client
            .post(&self.config.chat_completions_url)
            .bearer_auth(&self.config.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SendAttemptError::retryable(LlmProviderError::Timeout, true)
                } else {
                    SendAttemptError::retryable(
                        LlmProviderError::ProviderFailure("request_unavailable".to_string()),
                        true,
                    )
                }
            })?;

        let status = response.status();
        let header_request_id = header_request_id(response.headers());
        let body = response.text().await.map_err(|_| {
            SendAttemptError::non_retryable(
                LlmProviderError::InvalidProviderPayload("response_body_read_failed".to_string()),
                true,
            )
        })?;

        if !status.is_success() {
            let provider_code = parse_provider_error_code(&body);
            let fallback_allowed =
                status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN;
            return Err(SendAttemptError {
                error: LlmProviderError::ProviderFailure(format!(
                    "status={} code={provider_code}",
                    status.as_u16()
                )),
                retryable: is_retryable_status(status),
                fallback_allowed,
            });
        }

        let parsed: OpenRouterSuccessResponse = serde_json::from_str(&body).map_err(|_| {
            SendAttemptError::non_retryable(
                LlmProviderError::InvalidProviderPayload("response_json_parse_failed".to_string()),
                true,
            )
        })?;

        let choice = parsed.choices.into_iter().next().ok_or_else(|| {
            SendAttemptError::non_retryable(
                LlmProviderError::InvalidProviderPayload("missing_choice".to_string()),
                true,
            )
        })?;

        let text = content_text(&choice.message.content).ok_or_else(|| {
            SendAttemptError::non_retryable(
                LlmProviderError::InvalidProviderPayload("unsupported_content_shape".to_string()),
                true,
            )
        })?;

        Ok(ProviderResponse {
            model: parsed.model.unwrap_or_else(|| model.to_string()),
            request_id: header_request_id.or(parsed.id),
            text,
            candidates: vec![ProviderCandidate {
                grounding_metadata: grounding_from_annotations(&choice.message.annotations),
            }],
            usage: parsed.usage.map(|usage| LlmTokenUsage {
                prompt_tokens: clamp_u64_to_u32(usage.prompt_tokens.unwrap_or(0)),
                completion_tokens: clamp_u64_to_u32(usage.completion_tokens.unwrap_or(0)),
                total_tokens: clamp_u64_to_u32(usage.total_tokens.unwrap_or(0)),
            }),
        })
    }
}

impl LlmProvider for OpenRouterProvider {
    fn generate<'a>(&'a self, request: ProviderRequest) -> LlmProviderFuture<'a> {
        Box::pin(async move {
            let candidate_models = self.config.candidate_models(&request.model);

            for (index, model) in candidate_models.iter().enumerate() {
                match self.generate_for_model(model, &request).await {
                    Ok(response) => return Ok(response),
                    Err(model_err) => {
                        let has_more_candidates = index + 1 < candidate_models.len();
                        if has_more_candidates && model_err.fallback_allowed {
                            continue;
                        }
                        return Err(model_err.error);
                    }
                }
            }

            Err(LlmProviderError::ProviderFailure(
                "no_openrouter_model_candidates".to_string(),
            ))
        })
    }
}

fn request_body(model: &str, request: &ProviderRequest) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), json!(model));
    body.insert(
        "messages".to_string(),
        json!([
            { "role": "system", "content": request.system_instruction },
            { "role": "user", "content": request.contents }
        ]),
    );
    body.insert("temperature".to_string(), json!(0));

    if let Some(schema) = &request.response_schema {
        body.insert(
            "response_format".to_string(),
            json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "output",
                    "strict": false,
                    "schema": schema
                }
            }),
        );
    }

    if request.tools.contains(&ProviderTool::WebSearch) {
        body.insert("plugins".to_string(), json!([{ "id": "web" }]));
    }

    Value::Object(body)
}

fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let joined = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("");
            Some(joined)
        }
        _ => None,
    }
}

fn grounding_from_annotations(annotations: &[OpenRouterAnnotation]) -> Option<GroundingMetadata> {
    let grounding_chunks = annotations
        .iter()
        .filter(|annotation| annotation.kind == "url_citation")
        .filter_map(|annotation| annotation.url_citation.as_ref())
        .map(|citation| GroundingChunk {
            web: Some(WebChunk {
                uri: citation.url.clone(),
                title: citation.title.clone(),
            }),
        })
        .collect::<Vec<_>>();

    if grounding_chunks.is_empty() {
        return None;
    }

    Some(GroundingMetadata { grounding_chunks })
}

#[derive(Debug)]
struct SendAttemptError {
    error: LlmProviderError,
    retryable: bool,
    fallback_allowed: bool,
}

impl SendAttemptError {
    fn retryable(error: LlmProviderError, fallback_allowed: bool) -> Self {
        Self {
            error,
            retryable: true,
            fallback_allowed,
        }
    }

    fn non_retryable(error: LlmProviderError, fallback_allowed: bool) -> Self {
        Self {
            error,
            retryable: false,
            fallback_allowed,
        }
    }
}

#[derive(Debug)]
struct ModelAttemptError {
    error: LlmProviderError,
    fallback_allowed: bool,
}

#[derive(Debug, Deserialize)]
struct OpenRouterSuccessResponse {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<OpenRouterChoice>,
    usage: Option<OpenRouterUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: OpenRouterMessage,
}

#[derive(Debug, Deserialize)]
struct OpenRouterMessage {
    content: Value,
    #[serde(default)]
    annotations: Vec<OpenRouterAnnotation>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterAnnotation {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    url_citation: Option<OpenRouterUrlCitation>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterUrlCitation {
    url: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn header_request_id(headers: &reqwest::header::HeaderMap) -> Option<String> {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string)
}

fn parse_provider_error_code(body: &str) -> String {
    #[derive(Deserialize)]
    struct ProviderErrorEnvelope {
        error: Option<ProviderErrorDetails>,
    }

    #[derive(Deserialize)]
    struct ProviderErrorDetails {
        code: Option<Value>,
    }

    let parsed = serde_json::from_str::<ProviderErrorEnvelope>(body).ok();
    let Some(provider_error_code) = parsed
        .and_then(|envelope| envelope.error)
        .and_then(|details| details.code)
    else {
        return "unknown".to_string();
    };

    match provider_error_code {
        Value::String(code) => code,
        Value::Number(code) => code.to_string(),
        _ => "unknown".to_string(),
    }
}

fn clamp_u64_to_u32(value: u64) -> u32 {
    value.min(u32::MAX as u64) as u32
}
