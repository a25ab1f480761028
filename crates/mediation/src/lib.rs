pub mod config;
pub mod llm;
pub mod models;
pub mod pipeline;

pub use config::{ConfigError, MediationConfig, load_dotenv};
pub use pipeline::{MediationError, MediationOrchestrator, PipelineRun};
