//! Calibration trajectory tracking across sessions.
//!
//! Unlike within-session calibration (PREFLIGHT→POSTFLIGHT delta), this
//! compares POSTFLIGHTs across sessions: is the gap between self-assessment
//! and objective evidence closing, widening, or stable over time?

use chrono::Utc;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{
    CalibrationTrend, GroundedAssessment, Session, TrajectoryPoint, TrendDirection, VectorName,
};
use crate::storage::CalibrationRepository;

/// Slope magnitude below which a trend counts as stable.
const STABLE_SLOPE: f64 = 0.01;
/// Default lookback window in sessions.
pub const DEFAULT_LOOKBACK: u32 = 10;
/// Minimum grounded points before a trend is computed.
const MIN_POINTS: usize = 3;

pub struct TrajectoryTracker {
    calibration: CalibrationRepository,
}

impl TrajectoryTracker {
    pub fn new(calibration: CalibrationRepository) -> Self {
        Self { calibration }
    }

    /// Record one trajectory point per groundable vector in the assessment.
    /// Returns the number of points recorded.
    pub async fn record_points(
        &self,
        session: &Session,
        assessment: &GroundedAssessment,
        domain: Option<&str>,
        goal_id: Option<Uuid>,
        phase: &str,
    ) -> KernelResult<u32> {
        let timestamp = Utc::now();
        let mut recorded = 0;

        for (name, self_val) in &assessment.self_assessed {
            let Some(vector) = VectorName::from_str(name) else {
                continue;
            };
            if !vector.is_groundable() {
                continue;
            }

            let grounded = assessment
                .grounded
                .get(name)
                .map(|est| est.estimated_value);
            let gap = assessment.calibration_gaps.get(name).copied();

            self.calibration
                .insert_trajectory_point(&TrajectoryPoint {
                    point_id: Uuid::new_v4(),
                    session_id: session.session_id,
                    ai_id: session.ai_id.clone(),
                    vector,
                    self_assessed: *self_val,
                    grounded,
                    gap,
                    domain: domain.map(String::from),
                    goal_id,
                    timestamp,
                    phase: phase.to_string(),
                })
                .await?;
            recorded += 1;
        }
        Ok(recorded)
    }

    /// Detect the calibration trend per vector over the lookback window.
    ///
    /// Least-squares regression on absolute gaps: negative slope = the gap
    /// is closing (improving), positive = widening. Needs at least three
    /// grounded points.
    pub async fn detect_trends(
        &self,
        ai_id: &str,
        lookback: u32,
        phase: Option<&str>,
    ) -> KernelResult<BTreeMap<VectorName, CalibrationTrend>> {
        let vectors = self.calibration.trajectory_vectors(ai_id, phase).await?;
        let mut trends = BTreeMap::new();

        for vector in vectors {
            let points = self
                .calibration
                .trajectory(ai_id, vector, lookback, phase)
                .await?;
            let grounded: Vec<&TrajectoryPoint> =
                points.iter().filter(|p| p.gap.is_some()).collect();
            if grounded.len() < MIN_POINTS {
                continue;
            }

            let abs_gaps: Vec<f64> = grounded
                .iter()
                .map(|p| p.gap.unwrap_or(0.0).abs())
                .collect();
            let slope = least_squares_slope(&abs_gaps);

            let direction = if slope < -STABLE_SLOPE {
                TrendDirection::Closing
            } else if slope > STABLE_SLOPE {
                TrendDirection::Widening
            } else {
                TrendDirection::Stable
            };

            trends.insert(
                vector,
                CalibrationTrend {
                    vector,
                    direction,
                    slope: round4(slope),
                    recent_gap: grounded.last().and_then(|p| p.gap).unwrap_or(0.0),
                    mean_gap: round4(abs_gaps.iter().sum::<f64>() / abs_gaps.len() as f64),
                    points_analyzed: grounded.len(),
                },
            );
        }
        Ok(trends)
    }

    /// Majority-vote summary: overall direction plus per-direction vector lists.
    pub async fn trend_summary(&self, ai_id: &str) -> KernelResult<TrendSummary> {
        let trends = self.detect_trends(ai_id, DEFAULT_LOOKBACK, None).await?;

        let closing: Vec<VectorName> = trends
            .values()
            .filter(|t| t.direction == TrendDirection::Closing)
            .map(|t| t.vector)
            .collect();
        let widening: Vec<VectorName> = trends
            .values()
            .filter(|t| t.direction == TrendDirection::Widening)
            .map(|t| t.vector)
            .collect();
        let stable: Vec<VectorName> = trends
            .values()
            .filter(|t| t.direction == TrendDirection::Stable)
            .map(|t| t.vector)
            .collect();

        let overall = if trends.is_empty() {
            None
        } else if closing.len() > widening.len() {
            Some(TrendDirection::Closing)
        } else if widening.len() > closing.len() {
            Some(TrendDirection::Widening)
        } else {
            Some(TrendDirection::Stable)
        };

        Ok(TrendSummary {
            overall,
            closing,
            widening,
            stable,
            trends,
        })
    }
}

#[derive(Debug, Clone)]
pub struct TrendSummary {
    /// None until enough grounded sessions exist.
    pub overall: Option<TrendDirection>,
    pub closing: Vec<VectorName>,
    pub widening: Vec<VectorName>,
    pub stable: Vec<VectorName>,
    pub trends: BTreeMap<VectorName, CalibrationTrend>,
}

/// Slope of y over index via least squares; 0 for degenerate input.
fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (y - y_mean);
        denominator += dx * dx;
    }
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::create_test_pool;
    use crate::storage::migrations::{all_embedded_migrations, Migrator};

    #[test]
    fn test_slope_of_decreasing_gaps_is_negative() {
        let slope = least_squares_slope(&[0.4, 0.3, 0.2, 0.1]);
        assert!(slope < -STABLE_SLOPE);
    }

    #[test]
    fn test_slope_of_constant_gaps_is_zero() {
        let slope = least_squares_slope(&[0.2, 0.2, 0.2]);
        assert!(slope.abs() < 1e-12);
    }

    #[test]
    fn test_slope_degenerate_inputs() {
        assert_eq!(least_squares_slope(&[]), 0.0);
        assert_eq!(least_squares_slope(&[0.5]), 0.0);
    }

    async fn tracker_with_gaps(gaps: &[f64]) -> (TrajectoryTracker, String) {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        let repo = CalibrationRepository::new(pool);
        let base = Utc::now();
        for (i, gap) in gaps.iter().enumerate() {
            repo.insert_trajectory_point(&TrajectoryPoint {
                point_id: Uuid::new_v4(),
                session_id: Uuid::new_v4(),
                ai_id: "a1".into(),
                vector: VectorName::Know,
                self_assessed: 0.8,
                grounded: Some(0.8 - gap),
                gap: Some(*gap),
                domain: None,
                goal_id: None,
                timestamp: base + chrono::Duration::seconds(i as i64),
                phase: "combined".into(),
            })
            .await
            .unwrap();
        }
        (TrajectoryTracker::new(repo), "a1".to_string())
    }

    #[tokio::test]
    async fn test_closing_trend_detected() {
        let (tracker, ai_id) = tracker_with_gaps(&[0.4, 0.3, 0.2, 0.1]).await;
        let trends = tracker.detect_trends(&ai_id, 10, None).await.unwrap();
        let know = &trends[&VectorName::Know];
        assert_eq!(know.direction, TrendDirection::Closing);
        assert_eq!(know.points_analyzed, 4);
        assert!((know.recent_gap - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_widening_trend_detected() {
        let (tracker, ai_id) = tracker_with_gaps(&[0.05, 0.15, 0.25, 0.35]).await;
        let summary = tracker.trend_summary(&ai_id).await.unwrap();
        assert_eq!(summary.overall, Some(TrendDirection::Widening));
        assert!(summary.widening.contains(&VectorName::Know));
    }

    #[tokio::test]
    async fn test_too_few_points_yields_no_trend() {
        let (tracker, ai_id) = tracker_with_gaps(&[0.3, 0.2]).await;
        let trends = tracker.detect_trends(&ai_id, 10, None).await.unwrap();
        assert!(trends.is_empty());
        let summary = tracker.trend_summary(&ai_id).await.unwrap();
        assert!(summary.overall.is_none());
    }
}
