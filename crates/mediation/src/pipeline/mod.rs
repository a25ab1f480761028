pub mod compliance;
pub mod context;
pub mod gate;
pub mod orchestrator;
pub mod redaction;
pub mod trace;

pub use compliance::{ComplianceCheckFailed, CompliancePosture};
pub use context::{AssembledContext, assemble};
pub use gate::{GateDecision, KillSwitch, check_kill_switch};
pub use orchestrator::{
    MediationError, MediationOrchestrator, MetadataRequest, NarrativeKind, NarrativeRequest,
    PipelineRun, SYNTHESIS_UNAVAILABLE_TEXT,
};
pub use redaction::{RedactionDecision, redact, redaction_decision};
pub use trace::{PipelineStage, PipelineTrace, PipelineVariant, StageRecord, StageStatus};
