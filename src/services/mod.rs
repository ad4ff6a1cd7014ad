//! Kernel services.

pub mod attention;
pub mod cascade;
pub mod context_budget;
pub mod dashboard;
pub mod evidence_collector;
pub mod evidence_mapper;
pub mod grounded_calibration;
pub mod information_gain;
pub mod orchestrator;
pub mod rollup;
pub mod trajectory;
pub mod trust;

pub use attention::{AttentionBudgetCalculator, AttentionConfig};
pub use cascade::{CascadeConfig, CascadeState, CascadeStateMachine};
pub use context_budget::{ContextBudgetManager, InventorySummary};
pub use dashboard::{SystemDashboard, SystemStatus};
pub use evidence_collector::{CollectionPhase, EvidenceCollector, UNSCOPED_ARTIFACT_WEIGHT};
pub use evidence_mapper::EvidenceMapper;
pub use grounded_calibration::{
    CalibrationConfig, GroundedCalibrationManager, VerificationSummary,
};
pub use orchestrator::{
    AgentAllocation, AgentResult, AggregatedSynthesis, OrchestrationPlan, OrchestratorConfig,
    ParallelOrchestrator, RegulationAction, RegulationDecision, RoundOutcome,
};
pub use rollup::{RollupConfig, RollupGate, RollupResult, ScoredFinding};
pub use trajectory::{TrajectoryTracker, TrendSummary};
pub use trust::{GraduatedSentinel, TrustCalculator};
