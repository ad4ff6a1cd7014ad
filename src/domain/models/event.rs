//! Typed epistemic events.
//!
//! The event vocabulary is a closed set. Payload `data` stays a JSON object
//! and timestamps serialize as float seconds, keeping the wire schema
//! `{event_type, agent_id, session_id, timestamp, data}` stable for
//! cross-node consumers.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed event vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    SessionStarted,
    PhaseTransition,
    ConfidenceDropped,
    CalibrationDriftDetected,
    MemoryPressure,
    ContextEvicted,
    ContextInjected,
    PageFault,
    BudgetExhausted,
    GoalCreated,
    GoalCompleted,
    PostflightComplete,
    ActionDecided,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionStarted => "session_started",
            Self::PhaseTransition => "phase_transition",
            Self::ConfidenceDropped => "confidence_dropped",
            Self::CalibrationDriftDetected => "calibration_drift_detected",
            Self::MemoryPressure => "memory_pressure",
            Self::ContextEvicted => "context_evicted",
            Self::ContextInjected => "context_injected",
            Self::PageFault => "page_fault",
            Self::BudgetExhausted => "budget_exhausted",
            Self::GoalCreated => "goal_created",
            Self::GoalCompleted => "goal_completed",
            Self::PostflightComplete => "postflight_complete",
            Self::ActionDecided => "action_decided",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "session_started" => Some(Self::SessionStarted),
            "phase_transition" => Some(Self::PhaseTransition),
            "confidence_dropped" => Some(Self::ConfidenceDropped),
            "calibration_drift_detected" => Some(Self::CalibrationDriftDetected),
            "memory_pressure" => Some(Self::MemoryPressure),
            "context_evicted" => Some(Self::ContextEvicted),
            "context_injected" => Some(Self::ContextInjected),
            "page_fault" => Some(Self::PageFault),
            "budget_exhausted" => Some(Self::BudgetExhausted),
            "goal_created" => Some(Self::GoalCreated),
            "goal_completed" => Some(Self::GoalCompleted),
            "postflight_complete" => Some(Self::PostflightComplete),
            "action_decided" => Some(Self::ActionDecided),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An event published on the epistemic bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpistemicEvent {
    pub event_type: EventType,
    pub agent_id: String,
    pub session_id: Uuid,
    /// Float seconds since the Unix epoch (wire-schema compatibility).
    pub timestamp: f64,
    pub data: serde_json::Value,
}

impl EpistemicEvent {
    pub fn new(
        event_type: EventType,
        agent_id: impl Into<String>,
        session_id: Uuid,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            agent_id: agent_id.into(),
            session_id,
            timestamp: chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0,
            data,
        }
    }

    /// Searchable text used by the vector observer: "{type}: {agent_id} {data[:500]}".
    pub fn embedding_text(&self) -> String {
        let data = self.data.to_string();
        let truncated: String = data.chars().take(500).collect();
        format!("{}: {} {}", self.event_type.as_str(), self.agent_id, truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_round_trip() {
        for ty in [
            EventType::SessionStarted,
            EventType::PhaseTransition,
            EventType::ConfidenceDropped,
            EventType::CalibrationDriftDetected,
            EventType::MemoryPressure,
            EventType::ContextEvicted,
            EventType::ContextInjected,
            EventType::PageFault,
            EventType::BudgetExhausted,
            EventType::GoalCreated,
            EventType::GoalCompleted,
            EventType::PostflightComplete,
            EventType::ActionDecided,
        ] {
            assert_eq!(EventType::from_str(ty.as_str()), Some(ty));
        }
        assert_eq!(EventType::from_str("made_up_event"), None);
    }

    #[test]
    fn test_event_serializes_snake_case() {
        let event = EpistemicEvent::new(
            EventType::SessionStarted,
            "cascade",
            Uuid::new_v4(),
            json!({"prompt": "Refactor auth"}),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event_type"], "session_started");
        assert!(value["timestamp"].is_f64());
    }

    #[test]
    fn test_embedding_text_truncates_payload() {
        let big = "x".repeat(2000);
        let event = EpistemicEvent::new(
            EventType::ContextEvicted,
            "cbm",
            Uuid::new_v4(),
            json!({ "blob": big }),
        );
        let text = event.embedding_text();
        assert!(text.starts_with("context_evicted: cbm"));
        assert!(text.len() < 600);
    }
}
