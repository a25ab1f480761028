use std::env;

use thiserror::Error;

use crate::llm::gateway::{DEFAULT_FALLBACK_CONFIDENCE, ModelGatewayConfig};
use crate::pipeline::compliance::CompliancePosture;

const DEFAULT_PRIVATE_MODEL: &str = "anthropic/claude-3.5-sonnet";
const DEFAULT_FAST_MODEL: &str = "openai/gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct MediationConfig {
    pub private_model: String,
    pub fast_model: String,
    pub fallback_confidence: f64,
    pub compliance_posture: CompliancePosture,
}

impl Default for MediationConfig {
    fn default() -> Self {
        Self {
            private_model: DEFAULT_PRIVATE_MODEL.to_string(),
            fast_model: DEFAULT_FAST_MODEL.to_string(),
            fallback_confidence: DEFAULT_FALLBACK_CONFIDENCE,
            compliance_posture: CompliancePosture::FailClosed,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required env var {0}")]
    MissingVar(String),
    #[error("invalid integer in env var {0}")]
    ParseInt(String),
    #[error("invalid number in env var {0}")]
    ParseFloat(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("failed to load .env file: {0}")]
    DotEnv(String),
}

impl MediationConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; blank values fall back to defaults.
    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |key: &str| lookup(key).and_then(non_empty_trimmed);
        let defaults = Self::default();

        let compliance_posture = match var("MEDIATION_COMPLIANCE_POSTURE") {
            Some(raw) => CompliancePosture::parse(&raw).ok_or_else(|| {
                ConfigError::InvalidConfiguration(format!(
                    "MEDIATION_COMPLIANCE_POSTURE must be fail_closed, best_effort or propagate, got '{raw}'"
                ))
            })?,
            None => defaults.compliance_posture,
        };
        let fallback_confidence = match var("MEDIATION_FALLBACK_CONFIDENCE") {
            Some(raw) => raw.parse::<f64>().map_err(|_| {
                ConfigError::ParseFloat("MEDIATION_FALLBACK_CONFIDENCE".to_string())
            })?,
            None => defaults.fallback_confidence,
        };

        Ok(Self {
            private_model: var("MEDIATION_MODEL_PRIVATE").unwrap_or(defaults.private_model),
            fast_model: var("MEDIATION_MODEL_FAST").unwrap_or(defaults.fast_model),
            fallback_confidence,
            compliance_posture,
        })
    }

    pub fn gateway_config(&self) -> ModelGatewayConfig {
        ModelGatewayConfig::new(&self.private_model, &self.fast_model)
            .with_fallback_confidence(self.fallback_confidence)
    }
}

/// Loads `.env` when present; a missing file is not an error.
pub fn load_dotenv() -> Result<(), ConfigError> {
    match dotenvy::dotenv() {
        Ok(_) => Ok(()),
        Err(err) if err.not_found() => Ok(()),
        Err(err) => Err(ConfigError::DotEnv(err.to_string())),
    }
}

pub(crate) fn require_non_empty_env(key: &str) -> Result<String, ConfigError> {
    optional_trimmed_env(key).ok_or_else(|| ConfigError::MissingVar(key.to_string()))
}

pub(crate) fn parse_u32_env(key: &str, default: u32) -> Result<u32, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn parse_u64_env(key: &str, default: u64) -> Result<u64, ConfigError> {
    match optional_trimmed_env(key) {
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| ConfigError::ParseInt(key.to_string())),
        None => Ok(default),
    }
}

pub(crate) fn optional_trimmed_env(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_empty_trimmed)
}

fn non_empty_trimmed(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
