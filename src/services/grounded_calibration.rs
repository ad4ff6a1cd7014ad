//! Grounded calibration: Bayesian belief updating from objective evidence.
//!
//! A parallel track to self-assessment. Observations come from deterministic
//! sources (test results, git metrics, artifact counts) with a lower
//! observation variance than the self-referential track: objective evidence
//! is trusted more. Divergence between the two tracks is the calibration
//! error this subsystem exists to surface.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{
    GroundedAssessment, GroundedBelief, Phase, TrajectoryPoint, VectorName, VectorSet,
};
use crate::services::evidence_collector::{CollectionPhase, EvidenceCollector};
use crate::services::evidence_mapper::EvidenceMapper;
use crate::services::trajectory::TrajectoryTracker;
use crate::storage::{ArtifactRepository, CalibrationRepository, GoalRepository, SessionRepository};

#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// Base observation variance; lower than the self-referential track's
    /// 0.1 because objective evidence is trusted more.
    pub observation_variance: f64,
    /// Cap on adjustments applied back to self-assessment.
    pub max_correction: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            observation_variance: 0.05,
            max_correction: 0.2,
        }
    }
}

/// Details of one vector's Bayesian update.
#[derive(Debug, Clone)]
pub struct BeliefUpdate {
    pub vector: VectorName,
    pub prior_mean: f64,
    pub prior_variance: f64,
    pub observation: f64,
    pub observation_source: String,
    pub posterior_mean: f64,
    pub posterior_variance: f64,
    pub evidence_count: u32,
    pub self_assessed: Option<f64>,
    pub divergence: Option<f64>,
}

/// Summary of a full grounded verification run.
#[derive(Debug, Clone)]
pub struct VerificationSummary {
    pub verification_ids: Vec<Uuid>,
    pub phase_aware: bool,
    pub evidence_count: usize,
    pub sources: Vec<String>,
    pub sources_failed: Vec<String>,
    pub gaps: BTreeMap<String, f64>,
    pub grounded_coverage: f64,
}

pub struct GroundedCalibrationManager {
    config: CalibrationConfig,
    sessions: SessionRepository,
    goals: GoalRepository,
    artifacts: ArtifactRepository,
    calibration: CalibrationRepository,
}

impl GroundedCalibrationManager {
    pub fn new(
        config: CalibrationConfig,
        sessions: SessionRepository,
        goals: GoalRepository,
        artifacts: ArtifactRepository,
        calibration: CalibrationRepository,
    ) -> Self {
        Self {
            config,
            sessions,
            goals,
            artifacts,
            calibration,
        }
    }

    /// Current grounded beliefs for an AI; missing groundable vectors get
    /// the uninformed prior.
    pub async fn grounded_beliefs(
        &self,
        ai_id: &str,
    ) -> KernelResult<BTreeMap<VectorName, GroundedBelief>> {
        let mut beliefs: BTreeMap<VectorName, GroundedBelief> = self
            .calibration
            .beliefs_for(ai_id)
            .await?
            .into_iter()
            .map(|b| (b.vector, b))
            .collect();

        for vector in VectorName::ALL {
            if vector.is_groundable() {
                beliefs
                    .entry(vector)
                    .or_insert_with(|| GroundedBelief::prior(vector));
            }
        }
        Ok(beliefs)
    }

    /// Bayesian-update grounded beliefs from an assessment.
    ///
    /// Observation variance scales inversely with evidence confidence; the
    /// posterior variance never exceeds the prior (information cannot
    /// increase uncertainty in this model).
    pub async fn update_grounded_beliefs(
        &self,
        session_id: Uuid,
        assessment: &GroundedAssessment,
        phase: &str,
    ) -> KernelResult<BTreeMap<VectorName, BeliefUpdate>> {
        let session = self.sessions.require(session_id).await?;
        let current = self.grounded_beliefs(&session.ai_id).await?;
        let mut updates = BTreeMap::new();

        for estimate in assessment.grounded.values() {
            if !estimate.vector.is_groundable() {
                continue;
            }

            let (prior_mean, prior_var, prior_count) = current
                .get(&estimate.vector)
                .map(|b| (b.mean, b.variance, b.evidence_count))
                .unwrap_or((
                    GroundedBelief::PRIOR_MEAN,
                    GroundedBelief::PRIOR_VARIANCE,
                    0,
                ));

            // High-confidence evidence gets lower variance (more trusted).
            let obs_var = self.config.observation_variance / estimate.confidence.max(0.1);

            let posterior_mean = (prior_var * estimate.estimated_value + obs_var * prior_mean)
                / (prior_var + obs_var);
            let posterior_var = 1.0 / (1.0 / prior_var + 1.0 / obs_var);
            let evidence_count = prior_count + estimate.evidence_count;

            let self_val = assessment
                .self_assessed
                .get(estimate.vector.as_str())
                .copied();
            let divergence = self_val.map(|v| round4(v - posterior_mean));

            let belief = GroundedBelief {
                vector: estimate.vector,
                mean: posterior_mean,
                variance: posterior_var,
                evidence_count,
                last_observation: estimate.estimated_value,
                last_observation_source: estimate.primary_source.clone(),
                self_referential_mean: self_val,
                divergence,
                last_updated: Utc::now(),
            };
            self.calibration
                .insert_belief(session_id, &session.ai_id, &belief, phase)
                .await?;

            debug!(
                vector = estimate.vector.as_str(),
                prior_mean,
                posterior_mean,
                posterior_var,
                "grounded belief updated"
            );

            updates.insert(
                estimate.vector,
                BeliefUpdate {
                    vector: estimate.vector,
                    prior_mean,
                    prior_variance: prior_var,
                    observation: estimate.estimated_value,
                    observation_source: estimate.primary_source.clone(),
                    posterior_mean,
                    posterior_variance: posterior_var,
                    evidence_count,
                    self_assessed: self_val,
                    divergence,
                },
            );
        }

        Ok(updates)
    }

    /// Calibration adjustments derived from grounded evidence, capped at
    /// `±max_correction` to prevent overcorrection. Requires at least three
    /// pieces of evidence per vector.
    pub async fn grounded_adjustments(
        &self,
        ai_id: &str,
    ) -> KernelResult<BTreeMap<VectorName, f64>> {
        let beliefs = self.grounded_beliefs(ai_id).await?;
        let mut adjustments = BTreeMap::new();

        for (vector, belief) in beliefs {
            if belief.evidence_count < 3 {
                continue;
            }
            let adjustment = belief.mean - GroundedBelief::PRIOR_MEAN;
            let evidence_weight = (f64::from(belief.evidence_count) / 10.0).min(1.0);
            let raw = round4(adjustment * evidence_weight);
            let capped = raw.clamp(-self.config.max_correction, self.config.max_correction);
            adjustments.insert(vector, capped);
        }
        Ok(adjustments)
    }

    /// Full pipeline, called after POSTFLIGHT:
    /// collect → map → update → store evidence + verification → trajectory.
    ///
    /// Phase-aware when the session has a proceed-CHECK boundary: a noetic
    /// pass judges the CHECK self-assessment against investigation evidence,
    /// and a praxic pass judges the POSTFLIGHT vectors against action
    /// evidence. Without a boundary, one combined pass runs.
    ///
    /// Returns `None` when verification could not run; the cascade still
    /// closes (degraded calibration snapshot).
    #[instrument(skip(self, postflight_vectors), fields(session_id = %session_id))]
    pub async fn run_verification(
        &self,
        session_id: Uuid,
        postflight_vectors: &VectorSet,
        domain: Option<&str>,
        goal_id: Option<Uuid>,
    ) -> Option<VerificationSummary> {
        match self
            .try_run_verification(session_id, postflight_vectors, domain, goal_id)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "grounded verification failed (non-fatal)");
                None
            }
        }
    }

    async fn try_run_verification(
        &self,
        session_id: Uuid,
        postflight_vectors: &VectorSet,
        domain: Option<&str>,
        goal_id: Option<Uuid>,
    ) -> KernelResult<Option<VerificationSummary>> {
        let boundary = self.detect_phase_boundary(session_id).await?;

        let mut summary = VerificationSummary {
            verification_ids: Vec::new(),
            phase_aware: boundary.is_some(),
            evidence_count: 0,
            sources: Vec::new(),
            sources_failed: Vec::new(),
            gaps: BTreeMap::new(),
            grounded_coverage: 0.0,
        };

        match boundary {
            Some((check_vectors, check_ts)) => {
                // Noetic: judge the CHECK-time self-assessment.
                self.run_single_phase(
                    session_id,
                    &check_vectors,
                    CollectionPhase::Noetic,
                    Some(check_ts),
                    domain,
                    goal_id,
                    &mut summary,
                )
                .await?;
                // Praxic: judge the POSTFLIGHT self-assessment.
                self.run_single_phase(
                    session_id,
                    postflight_vectors,
                    CollectionPhase::Praxic,
                    Some(check_ts),
                    domain,
                    goal_id,
                    &mut summary,
                )
                .await?;
            }
            None => {
                self.run_single_phase(
                    session_id,
                    postflight_vectors,
                    CollectionPhase::Combined,
                    None,
                    domain,
                    goal_id,
                    &mut summary,
                )
                .await?;
            }
        }

        if summary.verification_ids.is_empty() {
            return Ok(None);
        }

        summary.sources.sort();
        summary.sources.dedup();
        summary.sources_failed.sort();
        summary.sources_failed.dedup();

        info!(
            phases = summary.verification_ids.len(),
            evidence = summary.evidence_count,
            coverage = summary.grounded_coverage,
            "grounded verification complete"
        );
        Ok(Some(summary))
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_single_phase(
        &self,
        session_id: Uuid,
        self_assessed: &VectorSet,
        phase: CollectionPhase,
        check_timestamp: Option<DateTime<Utc>>,
        domain: Option<&str>,
        goal_id: Option<Uuid>,
        summary: &mut VerificationSummary,
    ) -> KernelResult<()> {
        let collector = EvidenceCollector::new(
            session_id,
            phase,
            check_timestamp,
            self.sessions.clone(),
            self.goals.clone(),
            self.artifacts.clone(),
            self.calibration.clone(),
        );
        let bundle = collector.collect_all().await;
        summary
            .sources_failed
            .extend(bundle.sources_failed.iter().cloned());
        if bundle.items.is_empty() {
            debug!(phase = phase.as_str(), "no evidence collected, skipping phase");
            return Ok(());
        }

        let assessment = EvidenceMapper::map_evidence(&bundle, self_assessed);
        let session = self.sessions.require(session_id).await?;

        self.update_grounded_beliefs(session_id, &assessment, phase.as_str())
            .await?;
        self.calibration.store_evidence(&bundle).await?;
        let verification_id = self
            .calibration
            .store_verification(
                session_id,
                &session.ai_id,
                &assessment,
                &bundle,
                domain,
                goal_id,
                phase.as_str(),
            )
            .await?;

        let tracker = TrajectoryTracker::new(self.calibration.clone());
        tracker
            .record_points(&session, &assessment, domain, goal_id, phase.as_str())
            .await?;

        summary.verification_ids.push(verification_id);
        summary.evidence_count += bundle.items.len();
        summary.sources.extend(bundle.sources_available.clone());
        summary.grounded_coverage = summary.grounded_coverage.max(assessment.grounded_coverage);
        for (vector, gap) in &assessment.calibration_gaps {
            summary
                .gaps
                .insert(format!("{}:{vector}", phase.as_str()), *gap);
        }
        Ok(())
    }

    /// Find the proceed-CHECK boundary: the vectors and timestamp of the
    /// first CHECK round that allowed ACT. None when the cascade went
    /// straight through (or never checked).
    async fn detect_phase_boundary(
        &self,
        session_id: Uuid,
    ) -> KernelResult<Option<(VectorSet, DateTime<Utc>)>> {
        let checks = self
            .sessions
            .reflexes_for_phase(session_id, Phase::Check)
            .await?;
        Ok(checks
            .iter()
            .find(|r| r.decision.allows_act())
            .map(|r| (r.vectors, r.timestamp)))
    }

    /// Trajectory point accessor used by reports.
    pub async fn trajectory_points(
        &self,
        ai_id: &str,
        vector: VectorName,
        lookback: u32,
    ) -> KernelResult<Vec<TrajectoryPoint>> {
        self.calibration.trajectory(ai_id, vector, lookback, None).await
    }
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
