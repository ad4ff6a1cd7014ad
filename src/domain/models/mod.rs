//! Domain models for the epistemic kernel.

pub mod artifact;
pub mod attention;
pub mod context;
pub mod event;
pub mod evidence;
pub mod goal;
pub mod message;
pub mod session;
pub mod trust;
pub mod vectors;

pub use artifact::{
    content_hash, DeadEnd, Finding, Mistake, ReviewOutcome, Suggestion, SuggestionStatus, Unknown,
};
pub use attention::{AttentionBudget, DomainAllocation};
pub use context::{
    estimate_tokens, BudgetReport, BudgetThresholds, ContentType, ContextItem, EvictionResult,
    InjectionChannel, InjectionPriority, InjectionRequest, ItemSummary, MemoryZone,
};
pub use event::{EpistemicEvent, EventType};
pub use evidence::{
    CalibrationTrend, EvidenceBundle, EvidenceItem, EvidenceQuality, GroundedAssessment,
    GroundedBelief, GroundedVectorEstimate, TrajectoryPoint, TrendDirection,
};
pub use goal::{Goal, GoalScope, GoalStatus, LineageEntry, Subtask};
pub use message::{
    AgentMessage, MessagePriority, MessageStatus, MessageType, ReadReceipt, RecipientEndpoint,
    SenderEndpoint,
};
pub use session::{
    CalibrationVerdict, CheckDecision, CheckOutcome, Phase, PostflightReport, Reflex, Session,
};
pub use trust::{
    ActionCategory, ActionDecision, DomainTrust, GraduatedProfile, SentinelMode, TrustLevel,
};
pub use vectors::{VectorName, VectorSet, VectorSnapshot, NEUTRAL_VECTOR_VALUE};
