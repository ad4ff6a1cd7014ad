//! Graduated autonomy: trust levels, sentinel modes, action categories.

use serde::{Deserialize, Serialize};

/// Trust earned through demonstrated calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    None,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl TrustLevel {
    /// Map a numeric trust score to a level.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::VeryHigh
        } else if score >= 0.6 {
            Self::High
        } else if score >= 0.4 {
            Self::Medium
        } else if score > 0.0 {
            Self::Low
        } else {
            Self::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

/// Trust assessment for a specific domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainTrust {
    pub domain: String,
    pub score: f64,
    pub level: TrustLevel,
    pub calibration_factor: f64,
    pub suggestion_factor: f64,
    pub mistake_factor: f64,
    pub suggestions_accepted: u32,
    pub suggestions_rejected: u32,
    pub recent_mistakes: u32,
}

impl DomainTrust {
    /// Neutral baseline used when no history exists.
    pub fn neutral(domain: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            score: 0.5,
            level: TrustLevel::Medium,
            calibration_factor: 0.5,
            suggestion_factor: 0.5,
            mistake_factor: 1.0,
            suggestions_accepted: 0,
            suggestions_rejected: 0,
            recent_mistakes: 0,
        }
    }
}

/// Sentinel operating modes, from most to least restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentinelMode {
    /// Human approval for everything.
    Controller,
    /// Log minor actions, human approval for significant ones.
    Observer,
    /// Autonomous tactical decisions, human approval for critical.
    Advisory,
    /// Full autonomy with async review; human only for critical.
    Autonomous,
}

impl SentinelMode {
    pub fn for_trust(level: TrustLevel) -> Self {
        match level {
            TrustLevel::None | TrustLevel::Low => Self::Controller,
            TrustLevel::Medium => Self::Observer,
            TrustLevel::High => Self::Advisory,
            TrustLevel::VeryHigh => Self::Autonomous,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Observer => "observer",
            Self::Advisory => "advisory",
            Self::Autonomous => "autonomous",
        }
    }
}

/// Action categories for graduated control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    /// Cosmetic: formatting, comments, typos.
    Trivial,
    /// Bug fixes, small features.
    Tactical,
    /// Architecture, major features, schema changes.
    Strategic,
    /// Security, data loss, production.
    Critical,
}

impl ActionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Tactical => "tactical",
            Self::Strategic => "strategic",
            Self::Critical => "critical",
        }
    }
}

/// Per-mode behavior: what needs a human, what is logged, what auto-applies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraduatedProfile {
    pub mode: SentinelMode,
    pub require_human_for: Vec<ActionCategory>,
    pub log_actions: Vec<ActionCategory>,
    pub auto_apply: Vec<ActionCategory>,
    /// AI confidence needed before auto-apply.
    pub confidence_threshold: f64,
    pub description: String,
}

impl GraduatedProfile {
    pub fn for_mode(mode: SentinelMode) -> Self {
        use ActionCategory::*;
        match mode {
            SentinelMode::Controller => Self {
                mode,
                require_human_for: vec![Trivial, Tactical, Strategic, Critical],
                log_actions: vec![],
                auto_apply: vec![],
                confidence_threshold: 1.0,
                description: "Human approval required for all changes".into(),
            },
            SentinelMode::Observer => Self {
                mode,
                require_human_for: vec![Strategic, Critical],
                log_actions: vec![Trivial, Tactical],
                auto_apply: vec![],
                confidence_threshold: 0.9,
                description: "Log warnings for minor changes, human approval for significant"
                    .into(),
            },
            SentinelMode::Advisory => Self {
                mode,
                require_human_for: vec![Critical],
                log_actions: vec![Strategic],
                auto_apply: vec![Trivial, Tactical],
                confidence_threshold: 0.85,
                description: "Autonomous tactical decisions, human approval for critical".into(),
            },
            SentinelMode::Autonomous => Self {
                mode,
                require_human_for: vec![Critical],
                log_actions: vec![],
                auto_apply: vec![Trivial, Tactical, Strategic],
                confidence_threshold: 0.8,
                description: "Full autonomy with async review for strategic, human for critical"
                    .into(),
            },
        }
    }
}

/// Outcome of evaluating an action through the graduated sentinel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDecision {
    pub action: String,
    pub category: ActionCategory,
    pub mode: SentinelMode,
    pub allowed: bool,
    pub requires_human: bool,
    pub rationale: String,
    pub trust_level: TrustLevel,
    pub trust_score: f64,
    pub auto_applied: bool,
}
