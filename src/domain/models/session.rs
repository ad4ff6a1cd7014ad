//! Session and cascade phase models.
//!
//! A session is append-only: it is created once, mutated only by phase
//! transitions, and never destroyed. Every phase round is recorded as a
//! `Reflex` row before the operation returns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::vectors::VectorSet;

/// One agent working session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub ai_id: String,
    pub project_id: String,
    pub start_time: DateTime<Utc>,
    /// Set for sub-agent sessions rolled up into a parent.
    pub parent_session_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn new(ai_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4(),
            ai_id: ai_id.into(),
            project_id: project_id.into(),
            start_time: now,
            parent_session_id: None,
            created_at: now,
        }
    }

    pub fn with_parent(mut self, parent: Uuid) -> Self {
        self.parent_session_id = Some(parent);
        self
    }
}

/// Cascade phases. INVESTIGATE happens between CHECK rounds and produces no
/// reflex of its own; only these four phases are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Preflight,
    Check,
    Act,
    Postflight,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preflight => "PREFLIGHT",
            Self::Check => "CHECK",
            Self::Act => "ACT",
            Self::Postflight => "POSTFLIGHT",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "PREFLIGHT" => Some(Self::Preflight),
            "CHECK" => Some(Self::Check),
            "ACT" => Some(Self::Act),
            "POSTFLIGHT" => Some(Self::Postflight),
            _ => None,
        }
    }

    /// Total order used for reflex sorting: PREFLIGHT < CHECK < ACT < POSTFLIGHT.
    pub const fn order(&self) -> u8 {
        match self {
            Self::Preflight => 0,
            Self::Check => 1,
            Self::Act => 2,
            Self::Postflight => 3,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome of a CHECK round (or the implicit decision of other phases).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckDecision {
    Proceed,
    ProceedWithCaveat,
    Investigate,
    Escalate,
}

impl CheckDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::ProceedWithCaveat => "proceed_with_caveat",
            Self::Investigate => "investigate",
            Self::Escalate => "escalate",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "proceed" => Some(Self::Proceed),
            "proceed_with_caveat" => Some(Self::ProceedWithCaveat),
            "investigate" => Some(Self::Investigate),
            "escalate" => Some(Self::Escalate),
            _ => None,
        }
    }

    /// Whether this decision allows the cascade to enter ACT.
    pub const fn allows_act(&self) -> bool {
        matches!(self, Self::Proceed | Self::ProceedWithCaveat)
    }
}

impl std::fmt::Display for CheckDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded phase round: the audit-trail row behind every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reflex {
    pub id: Uuid,
    pub session_id: Uuid,
    pub phase: Phase,
    pub round: u32,
    pub vectors: VectorSet,
    pub decision: CheckDecision,
    pub reasoning: String,
    /// Phase-specific payload (gaps, next targets, deltas, verdicts).
    pub data: serde_json::Value,
    pub transaction_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

impl Reflex {
    pub fn new(
        session_id: Uuid,
        phase: Phase,
        round: u32,
        vectors: VectorSet,
        decision: CheckDecision,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            phase,
            round,
            vectors,
            decision,
            reasoning: reasoning.into(),
            data: serde_json::Value::Null,
            transaction_id: Uuid::new_v4(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Calibration verdict from comparing CHECK confidence to POSTFLIGHT reality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationVerdict {
    WellCalibrated,
    Overconfident,
    Underconfident,
    /// No CHECK rounds were recorded (trivial task).
    Unknown,
}

impl CalibrationVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WellCalibrated => "well_calibrated",
            Self::Overconfident => "overconfident",
            Self::Underconfident => "underconfident",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CalibrationVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a CHECK submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub decision: CheckDecision,
    pub confidence: f64,
    pub cycle: u32,
    pub gaps: Vec<String>,
    /// Suggested investigation targets when the decision is `investigate`.
    pub next_targets: Vec<String>,
}

/// Final report produced when the cascade closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostflightReport {
    pub session_id: Uuid,
    pub task_summary: String,
    pub vectors: VectorSet,
    pub delta_from_preflight: BTreeMap<String, f64>,
    pub check_confidences: Vec<f64>,
    pub postflight_confidence: f64,
    pub verdict: CalibrationVerdict,
    /// Signed gap behind the verdict (check − postflight, largest magnitude).
    pub calibration_gap: f64,
    pub learning_notes: String,
    /// Set when the grounded track could not run; the cascade still closes.
    pub grounded_degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_ordering() {
        assert!(Phase::Preflight.order() < Phase::Check.order());
        assert!(Phase::Check.order() < Phase::Act.order());
        assert!(Phase::Act.order() < Phase::Postflight.order());
    }

    #[test]
    fn test_phase_round_trip() {
        for phase in [Phase::Preflight, Phase::Check, Phase::Act, Phase::Postflight] {
            assert_eq!(Phase::from_str(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::from_str("INVESTIGATE"), None);
    }

    #[test]
    fn test_decision_allows_act() {
        assert!(CheckDecision::Proceed.allows_act());
        assert!(CheckDecision::ProceedWithCaveat.allows_act());
        assert!(!CheckDecision::Investigate.allows_act());
        assert!(!CheckDecision::Escalate.allows_act());
    }

    #[test]
    fn test_session_with_parent() {
        let parent = Uuid::new_v4();
        let session = Session::new("a1", "proj").with_parent(parent);
        assert_eq!(session.parent_session_id, Some(parent));
    }
}
