//! Goal and subtask models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Goal lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalStatus {
    Open,
    InProgress,
    Completed,
    Archived,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Breadth / duration / coordination envelope for a goal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalScope {
    pub breadth: Option<String>,
    pub duration: Option<String>,
    pub coordination: Option<String>,
}

/// One entry in a goal's lineage trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageEntry {
    pub ai_id: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// A goal owned by a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub id: Uuid,
    pub session_id: Uuid,
    pub objective: String,
    pub scope: GoalScope,
    pub status: GoalStatus,
    /// Ordered (ai_id, action, timestamp) trail.
    pub lineage: Vec<LineageEntry>,
    pub created_timestamp: DateTime<Utc>,
    pub completed_timestamp: Option<DateTime<Utc>>,
}

impl Goal {
    pub fn new(session_id: Uuid, objective: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            objective: objective.into(),
            scope: GoalScope::default(),
            status: GoalStatus::Open,
            lineage: Vec::new(),
            created_timestamp: Utc::now(),
            completed_timestamp: None,
        }
    }

    pub fn with_scope(mut self, scope: GoalScope) -> Self {
        self.scope = scope;
        self
    }

    /// Append a lineage entry for an action taken on this goal.
    pub fn record_action(&mut self, ai_id: impl Into<String>, action: impl Into<String>) {
        self.lineage.push(LineageEntry {
            ai_id: ai_id.into(),
            action: action.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn complete(&mut self) {
        self.status = GoalStatus::Completed;
        self.completed_timestamp = Some(Utc::now());
    }
}

/// A unit of work under a goal, with token estimation for calibration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub id: Uuid,
    pub goal_id: Uuid,
    pub description: String,
    pub estimated_tokens: Option<i64>,
    pub actual_tokens: Option<i64>,
    pub completed_timestamp: Option<DateTime<Utc>>,
    /// How much this subtask matters epistemically (0.0-1.0).
    pub epistemic_importance: f64,
}

impl Subtask {
    pub fn new(goal_id: Uuid, description: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            goal_id,
            description: description.into(),
            estimated_tokens: None,
            actual_tokens: None,
            completed_timestamp: None,
            epistemic_importance: 0.5,
        }
    }

    pub fn with_estimate(mut self, tokens: i64) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.completed_timestamp.is_some()
    }

    pub fn complete(&mut self, actual_tokens: Option<i64>) {
        self.completed_timestamp = Some(Utc::now());
        if actual_tokens.is_some() {
            self.actual_tokens = actual_tokens;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_goal_lifecycle() {
        let mut goal = Goal::new(Uuid::new_v4(), "Refactor auth");
        assert_eq!(goal.status, GoalStatus::Open);
        assert!(goal.completed_timestamp.is_none());

        goal.record_action("a1", "started investigation");
        goal.complete();
        assert_eq!(goal.status, GoalStatus::Completed);
        assert!(goal.completed_timestamp.is_some());
        assert_eq!(goal.lineage.len(), 1);
    }

    #[test]
    fn test_subtask_completion() {
        let mut subtask = Subtask::new(Uuid::new_v4(), "add PKCE").with_estimate(4000);
        assert!(!subtask.is_completed());
        subtask.complete(Some(5200));
        assert!(subtask.is_completed());
        assert_eq!(subtask.actual_tokens, Some(5200));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            GoalStatus::Open,
            GoalStatus::InProgress,
            GoalStatus::Completed,
            GoalStatus::Archived,
        ] {
            assert_eq!(GoalStatus::from_str(status.as_str()), Some(status));
        }
    }
}
