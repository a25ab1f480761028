pub mod contracts;
pub mod gateway;
pub mod observability;
pub mod openrouter;
pub mod prompts;
pub mod validation;

pub use contracts::{
    ComplianceVerdict, ContractError, DocumentMetadata, LegalAnswer, OutputContract,
    ParsedContract, output_schema,
};
pub use gateway::{
    GatewayError, InvocationPurpose, InvokeOptions, LlmProvider, LlmProviderError,
    LlmProviderFuture, LlmTokenUsage, ModelGateway, ModelGatewayConfig, ModelResponse, ModelTier,
    ProviderCandidate, ProviderRequest, ProviderResponse, ProviderTool, RawFallback,
    StructuredOutput,
};
pub use observability::LlmTelemetryEvent;
pub use openrouter::{OpenRouterConfigError, OpenRouterProvider, OpenRouterProviderConfig};
pub use validation::{ContractMismatch, parse_contract_text, validate_contract_value};
