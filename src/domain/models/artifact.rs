//! Noetic artifacts: findings, unknowns, dead ends, mistakes, suggestions.
//!
//! All artifacts carry a stable id and creation timestamp and are
//! content-hashable for deduplication and git-notes addressing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// SHA-256 of the text, truncated to 16 hex chars. Shared hashing scheme for
/// artifact dedup and rollup-gate finding hashes.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

/// Something learned during investigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: Uuid,
    pub session_id: Uuid,
    pub goal_id: Option<Uuid>,
    pub finding: String,
    /// Consequence magnitude in [0, 1].
    pub impact: f64,
    pub subject: Option<String>,
    pub created_timestamp: DateTime<Utc>,
}

impl Finding {
    pub fn new(session_id: Uuid, finding: impl Into<String>, impact: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            goal_id: None,
            finding: finding.into(),
            impact: impact.clamp(0.0, 1.0),
            subject: None,
            created_timestamp: Utc::now(),
        }
    }

    pub fn with_goal(mut self, goal_id: Uuid) -> Self {
        self.goal_id = Some(goal_id);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn hash(&self) -> String {
        content_hash(&self.finding)
    }
}

/// An explicitly surfaced unknown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unknown {
    pub id: Uuid,
    pub session_id: Uuid,
    pub goal_id: Option<Uuid>,
    pub unknown: String,
    pub is_resolved: bool,
    pub resolved_by: Option<String>,
    pub created_timestamp: DateTime<Utc>,
}

impl Unknown {
    pub fn new(session_id: Uuid, unknown: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            goal_id: None,
            unknown: unknown.into(),
            is_resolved: false,
            resolved_by: None,
            created_timestamp: Utc::now(),
        }
    }

    pub fn with_goal(mut self, goal_id: Uuid) -> Self {
        self.goal_id = Some(goal_id);
        self
    }

    pub fn resolve(&mut self, resolved_by: impl Into<String>) {
        self.is_resolved = true;
        self.resolved_by = Some(resolved_by.into());
    }
}

/// An approach that did not work, recorded so it is not retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadEnd {
    pub id: Uuid,
    pub session_id: Uuid,
    pub goal_id: Option<Uuid>,
    pub approach: String,
    pub why_failed: String,
    pub created_timestamp: DateTime<Utc>,
}

impl DeadEnd {
    pub fn new(
        session_id: Uuid,
        approach: impl Into<String>,
        why_failed: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            goal_id: None,
            approach: approach.into(),
            why_failed: why_failed.into(),
            created_timestamp: Utc::now(),
        }
    }
}

/// A recorded mistake with root-cause attribution to an epistemic vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mistake {
    pub id: Uuid,
    pub session_id: Uuid,
    pub mistake: String,
    pub why_wrong: String,
    pub prevention: String,
    pub cost_estimate: Option<String>,
    /// Which vector's miscalibration caused this (e.g. "know", "uncertainty").
    pub root_cause_vector: Option<String>,
    pub created_timestamp: DateTime<Utc>,
}

impl Mistake {
    pub fn new(
        session_id: Uuid,
        mistake: impl Into<String>,
        why_wrong: impl Into<String>,
        prevention: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            mistake: mistake.into(),
            why_wrong: why_wrong.into(),
            prevention: prevention.into(),
            cost_estimate: None,
            root_cause_vector: None,
            created_timestamp: Utc::now(),
        }
    }

    pub fn with_root_cause(mut self, vector: impl Into<String>) -> Self {
        self.root_cause_vector = Some(vector.into());
        self
    }
}

/// Review lifecycle of a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Pending,
    Reviewed,
}

/// Outcome of a human review of a suggestion. Feeds the trust calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewOutcome {
    Accepted,
    Rejected,
}

impl ReviewOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// A suggestion the agent made, tracked for trust accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    pub id: Uuid,
    pub session_id: Uuid,
    pub project_id: Option<String>,
    pub suggestion: String,
    pub domain: Option<String>,
    pub confidence: f64,
    pub rationale: Option<String>,
    pub status: SuggestionStatus,
    pub review_outcome: Option<ReviewOutcome>,
    pub created_timestamp: DateTime<Utc>,
    pub reviewed_timestamp: Option<DateTime<Utc>>,
}

impl Suggestion {
    pub fn new(session_id: Uuid, suggestion: impl Into<String>, confidence: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            project_id: None,
            suggestion: suggestion.into(),
            domain: None,
            confidence: confidence.clamp(0.0, 1.0),
            rationale: None,
            status: SuggestionStatus::Pending,
            review_outcome: None,
            created_timestamp: Utc::now(),
            reviewed_timestamp: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn review(&mut self, outcome: ReviewOutcome) {
        self.status = SuggestionStatus::Reviewed;
        self.review_outcome = Some(outcome);
        self.reviewed_timestamp = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable_and_truncated() {
        let a = content_hash("OAuth2 module lacks PKCE");
        let b = content_hash("OAuth2 module lacks PKCE");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_different_text_different_hash() {
        assert_ne!(content_hash("finding one"), content_hash("finding two"));
    }

    #[test]
    fn test_finding_impact_clamped() {
        let f = Finding::new(Uuid::new_v4(), "big deal", 3.2);
        assert_eq!(f.impact, 1.0);
    }

    #[test]
    fn test_unknown_resolution() {
        let mut u = Unknown::new(Uuid::new_v4(), "does the API rate limit?");
        assert!(!u.is_resolved);
        u.resolve("read the docs");
        assert!(u.is_resolved);
        assert_eq!(u.resolved_by.as_deref(), Some("read the docs"));
    }

    #[test]
    fn test_suggestion_review() {
        let mut s = Suggestion::new(Uuid::new_v4(), "use connection pooling", 0.8);
        assert_eq!(s.status, SuggestionStatus::Pending);
        s.review(ReviewOutcome::Accepted);
        assert_eq!(s.status, SuggestionStatus::Reviewed);
        assert_eq!(s.review_outcome, Some(ReviewOutcome::Accepted));
        assert!(s.reviewed_timestamp.is_some());
    }
}
