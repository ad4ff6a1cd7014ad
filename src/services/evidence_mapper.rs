//! Evidence-to-vector mapping.
//!
//! Maps objective evidence items to grounded vector estimates via
//! quality-weighted aggregation. Ungroundable vectors (engagement,
//! coherence, density) are never estimated; they keep self-referential
//! calibration.

use std::collections::BTreeMap;

use crate::domain::models::{
    EvidenceBundle, EvidenceItem, GroundedAssessment, GroundedVectorEstimate, VectorName,
    VectorSet,
};

pub struct EvidenceMapper;

impl EvidenceMapper {
    /// Map an evidence bundle to grounded estimates and compare to the
    /// self-assessment. Gaps are `self − grounded` (positive = the agent
    /// overestimates itself).
    pub fn map_evidence(
        bundle: &EvidenceBundle,
        self_assessed: &VectorSet,
    ) -> GroundedAssessment {
        // Group evidence by supported vector with quality weights.
        let mut per_vector: BTreeMap<VectorName, Vec<(&EvidenceItem, f64)>> = BTreeMap::new();
        for item in &bundle.items {
            let weight = item.quality.weight();
            for vector in &item.supports_vectors {
                per_vector.entry(*vector).or_default().push((item, weight));
            }
        }

        let mut grounded = BTreeMap::new();
        for (vector, evidence) in &per_vector {
            if !vector.is_groundable() {
                continue;
            }
            let total_weight: f64 = evidence.iter().map(|(_, w)| w).sum();
            if total_weight == 0.0 {
                continue;
            }

            let weighted_value: f64 = evidence
                .iter()
                .map(|(item, w)| item.normalized_value * w)
                .sum::<f64>()
                / total_weight;
            let primary_source = evidence
                .iter()
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(item, _)| item.source.clone())
                .unwrap_or_default();

            grounded.insert(
                vector.as_str().to_string(),
                GroundedVectorEstimate {
                    vector: *vector,
                    estimated_value: weighted_value.clamp(0.0, 1.0),
                    confidence: (total_weight / evidence.len() as f64).min(1.0),
                    evidence_count: evidence.len() as u32,
                    primary_source,
                },
            );
        }

        let mut calibration_gaps = BTreeMap::new();
        for (name, estimate) in &grounded {
            let self_val = self_assessed.get(estimate.vector);
            calibration_gaps.insert(
                name.clone(),
                round4(self_val - estimate.estimated_value),
            );
        }

        let overall_calibration_score = if calibration_gaps.is_empty() {
            0.0
        } else {
            round4(
                calibration_gaps.values().map(|g| g.abs()).sum::<f64>()
                    / calibration_gaps.len() as f64,
            )
        };

        GroundedAssessment {
            session_id: bundle.session_id,
            self_assessed: self_assessed.to_named(),
            grounded,
            calibration_gaps,
            grounded_coverage: bundle.coverage,
            overall_calibration_score,
        }
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::EvidenceQuality;
    use serde_json::json;
    use uuid::Uuid;

    fn bundle_with(items: Vec<EvidenceItem>) -> EvidenceBundle {
        let mut bundle = EvidenceBundle::new(Uuid::new_v4());
        bundle.items = items;
        bundle.finalize();
        bundle
    }

    #[test]
    fn test_quality_weighted_average() {
        let bundle = bundle_with(vec![
            EvidenceItem::new(
                "tests",
                "test_pass_rate",
                1.0,
                json!({}),
                EvidenceQuality::Objective,
                vec![VectorName::Know],
            ),
            EvidenceItem::new(
                "artifacts",
                "mistake_ratio",
                0.0,
                json!({}),
                EvidenceQuality::Inferred,
                vec![VectorName::Know],
            ),
        ]);

        let assessment = EvidenceMapper::map_evidence(&bundle, &VectorSet::neutral());
        let know = &assessment.grounded["know"];
        // (1.0·1.0 + 0.0·0.4) / 1.4 ≈ 0.714
        assert!((know.estimated_value - 1.0 / 1.4).abs() < 1e-6);
        assert_eq!(know.evidence_count, 2);
        assert_eq!(know.primary_source, "tests");
    }

    #[test]
    fn test_ungroundable_vectors_skipped() {
        let bundle = bundle_with(vec![EvidenceItem::new(
            "bogus",
            "engagement_proxy",
            0.9,
            json!({}),
            EvidenceQuality::Objective,
            vec![VectorName::Engagement, VectorName::Coherence, VectorName::Density],
        )]);

        let assessment = EvidenceMapper::map_evidence(&bundle, &VectorSet::neutral());
        assert!(assessment.grounded.is_empty());
    }

    #[test]
    fn test_gap_sign_convention() {
        // Self-assessed know 0.9, grounded evidence says 0.5: positive gap.
        let bundle = bundle_with(vec![EvidenceItem::new(
            "tests",
            "test_pass_rate",
            0.5,
            json!({}),
            EvidenceQuality::Objective,
            vec![VectorName::Know],
        )]);
        let self_assessed = VectorSet::neutral().with(VectorName::Know, 0.9);

        let assessment = EvidenceMapper::map_evidence(&bundle, &self_assessed);
        assert!((assessment.calibration_gaps["know"] - 0.4).abs() < 1e-9);
        assert!((assessment.overall_calibration_score - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_empty_bundle_scores_zero() {
        let bundle = bundle_with(Vec::new());
        let assessment = EvidenceMapper::map_evidence(&bundle, &VectorSet::neutral());
        assert_eq!(assessment.overall_calibration_score, 0.0);
        assert!(assessment.grounded.is_empty());
    }
}
