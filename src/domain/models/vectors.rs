//! The 13-dimension epistemic vector set.
//!
//! Vectors are a closed enumeration; unknown names are rejected at the
//! boundary. Values are always clamped to [0, 1] and missing vectors default
//! to the neutral 0.5. String names are preserved in event payloads and
//! database rows for compatibility with existing data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::errors::{KernelError, KernelResult};

/// Neutral baseline for any unassessed vector.
pub const NEUTRAL_VECTOR_VALUE: f64 = 0.5;

/// One of the 13 epistemic dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorName {
    /// Domain mastery.
    Know,
    /// Explicitly acknowledged unknowns.
    Uncertainty,
    /// Capability to act.
    Do,
    /// Situational grounding.
    Context,
    /// Clarity of the task at hand.
    Clarity,
    /// Internal consistency of understanding.
    Coherence,
    /// Signal-to-noise of gathered information.
    Signal,
    /// Information density of working context.
    Density,
    /// Awareness of current system state.
    State,
    /// Magnitude of change being made.
    Change,
    /// Progress toward the goal.
    Completion,
    /// Consequence magnitude.
    Impact,
    /// Engagement with the task.
    Engagement,
}

impl VectorName {
    /// All 13 vectors in canonical order.
    pub const ALL: [VectorName; 13] = [
        Self::Know,
        Self::Uncertainty,
        Self::Do,
        Self::Context,
        Self::Clarity,
        Self::Coherence,
        Self::Signal,
        Self::Density,
        Self::State,
        Self::Change,
        Self::Completion,
        Self::Impact,
        Self::Engagement,
    ];

    /// Vectors with no objective grounding signal. These keep
    /// self-referential calibration only.
    pub const UNGROUNDABLE: [VectorName; 3] = [Self::Engagement, Self::Coherence, Self::Density];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Know => "know",
            Self::Uncertainty => "uncertainty",
            Self::Do => "do",
            Self::Context => "context",
            Self::Clarity => "clarity",
            Self::Coherence => "coherence",
            Self::Signal => "signal",
            Self::Density => "density",
            Self::State => "state",
            Self::Change => "change",
            Self::Completion => "completion",
            Self::Impact => "impact",
            Self::Engagement => "engagement",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "know" => Some(Self::Know),
            "uncertainty" => Some(Self::Uncertainty),
            "do" => Some(Self::Do),
            "context" => Some(Self::Context),
            "clarity" => Some(Self::Clarity),
            "coherence" => Some(Self::Coherence),
            "signal" => Some(Self::Signal),
            "density" => Some(Self::Density),
            "state" => Some(Self::State),
            "change" => Some(Self::Change),
            "completion" => Some(Self::Completion),
            "impact" => Some(Self::Impact),
            "engagement" => Some(Self::Engagement),
            _ => None,
        }
    }

    pub fn is_groundable(&self) -> bool {
        !Self::UNGROUNDABLE.contains(self)
    }
}

impl std::fmt::Display for VectorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed-size storage for all 13 vector values, each clamped to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorSet {
    values: [f64; 13],
}

impl Default for VectorSet {
    fn default() -> Self {
        Self {
            values: [NEUTRAL_VECTOR_VALUE; 13],
        }
    }
}

impl VectorSet {
    /// All vectors at the neutral 0.5 baseline.
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Build from string-keyed values, rejecting unknown keys and
    /// non-finite values. Missing vectors default to 0.5.
    pub fn from_named(values: &BTreeMap<String, f64>) -> KernelResult<Self> {
        let mut set = Self::neutral();
        for (name, value) in values {
            let vector = VectorName::from_str(name)
                .ok_or_else(|| KernelError::BadInput(format!("unknown vector name: {name}")))?;
            if !value.is_finite() {
                return Err(KernelError::BadInput(format!(
                    "vector {name} has non-finite value"
                )));
            }
            set.set(vector, *value);
        }
        Ok(set)
    }

    pub fn get(&self, name: VectorName) -> f64 {
        self.values[name as usize]
    }

    /// Set a vector value, clamping into [0, 1].
    pub fn set(&mut self, name: VectorName, value: f64) {
        self.values[name as usize] = value.clamp(0.0, 1.0);
    }

    pub fn with(mut self, name: VectorName, value: f64) -> Self {
        self.set(name, value);
        self
    }

    /// String-keyed view for event payloads and persistence.
    pub fn to_named(&self) -> BTreeMap<String, f64> {
        VectorName::ALL
            .iter()
            .map(|v| (v.as_str().to_string(), self.get(*v)))
            .collect()
    }

    /// Per-vector delta (`self - baseline`).
    pub fn delta_from(&self, baseline: &VectorSet) -> BTreeMap<String, f64> {
        VectorName::ALL
            .iter()
            .map(|v| (v.as_str().to_string(), self.get(*v) - baseline.get(*v)))
            .collect()
    }

    /// Confidence proxy: inverse of explicit uncertainty.
    pub fn confidence(&self) -> f64 {
        1.0 - self.get(VectorName::Uncertainty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VectorName, f64)> + '_ {
        VectorName::ALL.iter().map(move |v| (*v, self.get(*v)))
    }
}

/// A vector assessment at a point in time, with the agent's reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSnapshot {
    pub vectors: VectorSet,
    pub reasoning: String,
    pub timestamp: DateTime<Utc>,
}

impl VectorSnapshot {
    pub fn new(vectors: VectorSet, reasoning: impl Into<String>) -> Self {
        Self {
            vectors,
            reasoning: reasoning.into(),
            timestamp: Utc::now(),
        }
    }
}
