//! Objective evidence and grounded calibration models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::vectors::VectorName;

/// How reliable an evidence source is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceQuality {
    Objective,
    SemiObjective,
    Inferred,
}

impl EvidenceQuality {
    /// Weight applied when aggregating evidence into a vector estimate.
    pub const fn weight(&self) -> f64 {
        match self {
            Self::Objective => 1.0,
            Self::SemiObjective => 0.7,
            Self::Inferred => 0.4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Objective => "objective",
            Self::SemiObjective => "semi_objective",
            Self::Inferred => "inferred",
        }
    }
}

/// A single piece of objective evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub source: String,
    pub metric_name: String,
    /// Normalized to [0, 1].
    pub normalized_value: f64,
    pub raw_value: serde_json::Value,
    pub quality: EvidenceQuality,
    pub supports_vectors: Vec<VectorName>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl EvidenceItem {
    pub fn new(
        source: impl Into<String>,
        metric_name: impl Into<String>,
        normalized_value: f64,
        raw_value: serde_json::Value,
        quality: EvidenceQuality,
        supports_vectors: Vec<VectorName>,
    ) -> Self {
        Self {
            source: source.into(),
            metric_name: metric_name.into(),
            normalized_value: normalized_value.clamp(0.0, 1.0),
            raw_value,
            quality,
            supports_vectors,
            metadata: BTreeMap::new(),
        }
    }
}

/// Complete evidence collection for one session (or one phase pass).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceBundle {
    pub session_id: Uuid,
    pub items: Vec<EvidenceItem>,
    pub collection_timestamp: DateTime<Utc>,
    pub sources_available: Vec<String>,
    pub sources_failed: Vec<String>,
    /// Fraction of the 13 vectors with at least one supporting item.
    pub coverage: f64,
}

impl EvidenceBundle {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            items: Vec::new(),
            collection_timestamp: Utc::now(),
            sources_available: Vec::new(),
            sources_failed: Vec::new(),
            coverage: 0.0,
        }
    }

    /// Recompute coverage from the current item set.
    pub fn finalize(&mut self) {
        let mut grounded: std::collections::HashSet<VectorName> = std::collections::HashSet::new();
        for item in &self.items {
            grounded.extend(item.supports_vectors.iter().copied());
        }
        self.coverage = grounded.len() as f64 / 13.0;
    }
}

/// An objectively grounded estimate for a single vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundedVectorEstimate {
    pub vector: VectorName,
    pub estimated_value: f64,
    pub confidence: f64,
    pub evidence_count: u32,
    pub primary_source: String,
}

/// Complete grounded assessment alongside the self-assessment it judges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundedAssessment {
    pub session_id: Uuid,
    pub self_assessed: BTreeMap<String, f64>,
    pub grounded: BTreeMap<String, GroundedVectorEstimate>,
    /// self − grounded per vector. Positive = overestimate.
    pub calibration_gaps: BTreeMap<String, f64>,
    pub grounded_coverage: f64,
    /// Mean absolute gap.
    pub overall_calibration_score: f64,
}

/// Per-(ai, vector) Bayesian belief grounded in objective evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundedBelief {
    pub vector: VectorName,
    pub mean: f64,
    pub variance: f64,
    pub evidence_count: u32,
    pub last_observation: f64,
    pub last_observation_source: String,
    pub self_referential_mean: Option<f64>,
    pub divergence: Option<f64>,
    pub last_updated: DateTime<Utc>,
}

impl GroundedBelief {
    pub const PRIOR_MEAN: f64 = 0.5;
    pub const PRIOR_VARIANCE: f64 = 0.25;

    /// Uninformed prior for a vector.
    pub fn prior(vector: VectorName) -> Self {
        Self {
            vector,
            mean: Self::PRIOR_MEAN,
            variance: Self::PRIOR_VARIANCE,
            evidence_count: 0,
            last_observation: 0.0,
            last_observation_source: "none".to_string(),
            self_referential_mean: None,
            divergence: None,
            last_updated: DateTime::<Utc>::MIN_UTC,
        }
    }
}

/// One point in the calibration trajectory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub point_id: Uuid,
    pub session_id: Uuid,
    pub ai_id: String,
    pub vector: VectorName,
    pub self_assessed: f64,
    pub grounded: Option<f64>,
    pub gap: Option<f64>,
    pub domain: Option<String>,
    pub goal_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub phase: String,
}

/// Direction of a calibration gap over the lookback window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Closing,
    Widening,
    Stable,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closing => "closing",
            Self::Widening => "widening",
            Self::Stable => "stable",
        }
    }
}

/// Detected trend for a vector's calibration gap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationTrend {
    pub vector: VectorName,
    pub direction: TrendDirection,
    /// Least-squares slope over absolute gaps. Negative = closing.
    pub slope: f64,
    pub recent_gap: f64,
    pub mean_gap: f64,
    pub points_analyzed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quality_weights() {
        assert_eq!(EvidenceQuality::Objective.weight(), 1.0);
        assert_eq!(EvidenceQuality::SemiObjective.weight(), 0.7);
        assert_eq!(EvidenceQuality::Inferred.weight(), 0.4);
    }

    #[test]
    fn test_evidence_value_clamped() {
        let item = EvidenceItem::new(
            "goals",
            "subtask_completion_ratio",
            1.4,
            json!({"completed": 7, "total": 5}),
            EvidenceQuality::SemiObjective,
            vec![VectorName::Completion],
        );
        assert_eq!(item.normalized_value, 1.0);
    }

    #[test]
    fn test_bundle_coverage() {
        let mut bundle = EvidenceBundle::new(Uuid::new_v4());
        bundle.items.push(EvidenceItem::new(
            "git",
            "commit_count",
            0.6,
            json!({"commits": 3}),
            EvidenceQuality::Objective,
            vec![VectorName::Do, VectorName::Change],
        ));
        bundle.finalize();
        assert!((bundle.coverage - 2.0 / 13.0).abs() < 1e-9);
    }

    #[test]
    fn test_prior_belief() {
        let belief = GroundedBelief::prior(VectorName::Know);
        assert_eq!(belief.mean, 0.5);
        assert_eq!(belief.variance, 0.25);
        assert_eq!(belief.evidence_count, 0);
    }
}
