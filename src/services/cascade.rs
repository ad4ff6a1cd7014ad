//! Cascade state machine: PREFLIGHT → (INVESTIGATE ↔ CHECK)* → ACT → POSTFLIGHT.
//!
//! The orchestration spine. Every phase transition writes a reflex row
//! before returning; ACT is gated on the most recent CHECK decision;
//! POSTFLIGHT is terminal.

use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::bus::EpistemicBus;
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    CalibrationVerdict, CheckDecision, CheckOutcome, EpistemicEvent, EventType, Phase,
    PostflightReport, Reflex, Session, VectorSet,
};
use crate::storage::SessionRepository;

/// Tunables for the cascade gate.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub max_recalibration_cycles: u32,
    pub confidence_threshold_proceed: f64,
    pub confidence_threshold_caveat: f64,
    pub calibration_tolerance: f64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            max_recalibration_cycles: 5,
            confidence_threshold_proceed: 0.8,
            confidence_threshold_caveat: 0.6,
            calibration_tolerance: 0.15,
        }
    }
}

/// Live handle for one cascade.
#[derive(Debug, Clone)]
pub struct CascadeState {
    pub session_id: Uuid,
    pub user_prompt: String,
    pub phase: Phase,
    /// CHECK cycle counter (1-indexed after the first SubmitCheck).
    pub cycle: u32,
    pub preflight_vectors: VectorSet,
    pub check_confidences: Vec<f64>,
    pub last_check_decision: Option<CheckDecision>,
    pub closed: bool,
}

pub struct CascadeStateMachine {
    sessions: SessionRepository,
    bus: EpistemicBus,
    config: CascadeConfig,
    agent_id: String,
}

impl CascadeStateMachine {
    pub fn new(sessions: SessionRepository, bus: EpistemicBus, config: CascadeConfig) -> Self {
        Self {
            sessions,
            bus,
            config,
            agent_id: "cascade".to_string(),
        }
    }

    /// Open a cascade for an existing session: write the PREFLIGHT reflex
    /// with baseline vectors and publish `session_started`.
    ///
    /// A failed PREFLIGHT write leaves no cascade behind.
    #[instrument(skip(self, user_prompt, baseline_vectors), fields(session_id = %session_id))]
    pub async fn start_cascade(
        &self,
        session_id: Uuid,
        user_prompt: impl Into<String>,
        baseline_vectors: Option<VectorSet>,
    ) -> KernelResult<CascadeState> {
        let user_prompt = user_prompt.into();
        if user_prompt.trim().is_empty() {
            return Err(KernelError::BadInput("user_prompt is empty".into()));
        }
        let session = self.sessions.require(session_id).await?;
        let vectors = baseline_vectors.unwrap_or_default();

        let reflex = Reflex::new(
            session_id,
            Phase::Preflight,
            1,
            vectors,
            CheckDecision::Proceed,
            "Baseline epistemic assessment",
        )
        .with_data(json!({ "user_prompt": user_prompt }));
        self.sessions.append_reflex(&reflex).await?;

        self.bus
            .publish(EpistemicEvent::new(
                EventType::SessionStarted,
                &self.agent_id,
                session_id,
                json!({
                    "ai_id": session.ai_id,
                    "project_id": session.project_id,
                    "prompt": user_prompt,
                }),
            ))
            .await;

        info!(session_id = %session_id, "cascade started");

        Ok(CascadeState {
            session_id,
            user_prompt,
            phase: Phase::Preflight,
            cycle: 0,
            preflight_vectors: vectors,
            check_confidences: Vec::new(),
            last_check_decision: None,
            closed: false,
        })
    }

    /// Submit a CHECK self-assessment. Decides proceed / proceed_with_caveat /
    /// investigate / escalate, writes the reflex, and publishes transitions.
    #[instrument(skip(self, cascade, investigation_summary, gaps), fields(session_id = %cascade.session_id))]
    pub async fn submit_check(
        &self,
        cascade: &mut CascadeState,
        investigation_summary: impl Into<String>,
        confidence: f64,
        gaps: Vec<String>,
        vectors: Option<VectorSet>,
    ) -> KernelResult<CheckOutcome> {
        if cascade.closed {
            return Err(KernelError::PhaseViolation(
                "cascade is closed; POSTFLIGHT is terminal".into(),
            ));
        }
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(KernelError::BadInput(format!(
                "confidence {confidence} outside [0, 1]"
            )));
        }

        let summary = investigation_summary.into();
        let cycle = cascade.cycle + 1;

        let (decision, next_targets) = self.determine_decision(confidence, &gaps, cycle);

        let mut vectors = vectors.unwrap_or(cascade.preflight_vectors);
        vectors.set(
            crate::domain::models::VectorName::Uncertainty,
            1.0 - confidence,
        );

        let reflex = Reflex::new(
            cascade.session_id,
            Phase::Check,
            cycle,
            vectors,
            decision,
            &summary,
        )
        .with_data(json!({
            "confidence": confidence,
            "decision": decision.as_str(),
            "gaps": gaps,
            "next_targets": next_targets,
            "cycle": cycle,
        }));
        // The handle only advances once the reflex row is durable; a failed
        // write leaves the state machine in its prior phase.
        self.sessions.append_reflex(&reflex).await?;

        cascade.cycle = cycle;
        cascade.phase = Phase::Check;
        cascade.check_confidences.push(confidence);
        cascade.last_check_decision = Some(decision);

        self.bus
            .publish(EpistemicEvent::new(
                EventType::PhaseTransition,
                &self.agent_id,
                cascade.session_id,
                json!({
                    "phase": "CHECK",
                    "round": cycle,
                    "decision": decision.as_str(),
                    "confidence": confidence,
                }),
            ))
            .await;

        // Low confidence is a page-fault signal for the context manager.
        if confidence < self.config.confidence_threshold_caveat {
            self.bus
                .publish(EpistemicEvent::new(
                    EventType::ConfidenceDropped,
                    &self.agent_id,
                    cascade.session_id,
                    json!({ "vector": "know", "value": confidence }),
                ))
                .await;
        }

        if decision == CheckDecision::Escalate {
            warn!(
                session_id = %cascade.session_id,
                cycle,
                confidence,
                "check escalated after max recalibration cycles"
            );
        }

        Ok(CheckOutcome {
            decision,
            confidence,
            cycle,
            gaps,
            next_targets,
        })
    }

    /// Record that action was taken. Refused unless the most recent CHECK
    /// allowed it.
    #[instrument(skip(self, cascade, action_summary), fields(session_id = %cascade.session_id))]
    pub async fn record_act(
        &self,
        cascade: &mut CascadeState,
        action_summary: impl Into<String>,
        vectors: Option<VectorSet>,
    ) -> KernelResult<()> {
        if cascade.closed {
            return Err(KernelError::PhaseViolation(
                "cascade is closed; POSTFLIGHT is terminal".into(),
            ));
        }
        match cascade.last_check_decision {
            Some(decision) if decision.allows_act() => {}
            Some(decision) => {
                return Err(KernelError::PhaseViolation(format!(
                    "ACT blocked: most recent CHECK decided {decision}"
                )));
            }
            None => {
                return Err(KernelError::PhaseViolation(
                    "ACT blocked: no CHECK recorded".into(),
                ));
            }
        }

        let round = self
            .sessions
            .max_round(cascade.session_id, Phase::Act)
            .await?
            .unwrap_or(0)
            + 1;

        let reflex = Reflex::new(
            cascade.session_id,
            Phase::Act,
            round,
            vectors.unwrap_or(cascade.preflight_vectors),
            CheckDecision::Proceed,
            action_summary.into(),
        );
        self.sessions.append_reflex(&reflex).await?;
        cascade.phase = Phase::Act;

        self.bus
            .publish(EpistemicEvent::new(
                EventType::PhaseTransition,
                &self.agent_id,
                cascade.session_id,
                json!({ "phase": "ACT", "round": round }),
            ))
            .await;
        Ok(())
    }

    /// Close the cascade: compute the preflight delta and calibration
    /// verdict, write the POSTFLIGHT reflex, and publish
    /// `postflight_complete`. The cascade cannot be reopened.
    #[instrument(skip(self, cascade, task_summary, postflight_vectors, learning_notes), fields(session_id = %cascade.session_id))]
    pub async fn submit_postflight(
        &self,
        cascade: &mut CascadeState,
        task_summary: impl Into<String>,
        postflight_vectors: VectorSet,
        learning_notes: impl Into<String>,
    ) -> KernelResult<PostflightReport> {
        if cascade.closed {
            return Err(KernelError::PhaseViolation(
                "cascade already closed; reopening requires a new session".into(),
            ));
        }

        let task_summary = task_summary.into();
        let learning_notes = learning_notes.into();
        let delta = postflight_vectors.delta_from(&cascade.preflight_vectors);
        let postflight_confidence = postflight_vectors.confidence();
        let (verdict, gap) = self.calibration_verdict(&cascade.check_confidences, postflight_confidence);

        let reflex = Reflex::new(
            cascade.session_id,
            Phase::Postflight,
            1,
            postflight_vectors,
            CheckDecision::Proceed,
            &task_summary,
        )
        .with_data(json!({
            "delta_from_preflight": delta,
            "check_confidences": cascade.check_confidences,
            "postflight_confidence": postflight_confidence,
            "calibration": verdict.as_str(),
            "calibration_gap": gap,
            "learning_notes": learning_notes,
        }));
        self.sessions.append_reflex(&reflex).await?;

        cascade.phase = Phase::Postflight;
        cascade.closed = true;

        self.bus
            .publish(EpistemicEvent::new(
                EventType::PostflightComplete,
                &self.agent_id,
                cascade.session_id,
                json!({
                    "calibration": verdict.as_str(),
                    "calibration_gap": gap,
                    "postflight_confidence": postflight_confidence,
                }),
            ))
            .await;

        // A verdict outside tolerance is drift worth reacting to.
        if matches!(
            verdict,
            CalibrationVerdict::Overconfident | CalibrationVerdict::Underconfident
        ) {
            self.bus
                .publish(EpistemicEvent::new(
                    EventType::CalibrationDriftDetected,
                    &self.agent_id,
                    cascade.session_id,
                    json!({ "verdict": verdict.as_str(), "gap": gap }),
                ))
                .await;
        }

        info!(session_id = %cascade.session_id, verdict = verdict.as_str(), "cascade closed");

        Ok(PostflightReport {
            session_id: cascade.session_id,
            task_summary,
            vectors: postflight_vectors,
            delta_from_preflight: delta,
            check_confidences: cascade.check_confidences.clone(),
            postflight_confidence,
            verdict,
            calibration_gap: gap,
            learning_notes,
            grounded_degraded: false,
        })
    }

    fn determine_decision(
        &self,
        confidence: f64,
        gaps: &[String],
        cycle: u32,
    ) -> (CheckDecision, Vec<String>) {
        if cycle >= self.config.max_recalibration_cycles {
            if confidence >= self.config.confidence_threshold_caveat {
                return (CheckDecision::ProceedWithCaveat, Vec::new());
            }
            return (CheckDecision::Escalate, Vec::new());
        }

        if confidence >= self.config.confidence_threshold_proceed {
            return (CheckDecision::Proceed, Vec::new());
        }
        if confidence >= self.config.confidence_threshold_caveat {
            return (CheckDecision::ProceedWithCaveat, Vec::new());
        }

        (CheckDecision::Investigate, suggest_targets(gaps))
    }

    /// Verdict from the largest |check − postflight| confidence gap, signed.
    fn calibration_verdict(
        &self,
        check_confidences: &[f64],
        postflight_confidence: f64,
    ) -> (CalibrationVerdict, f64) {
        if check_confidences.is_empty() {
            return (CalibrationVerdict::Unknown, 0.0);
        }

        let worst = check_confidences
            .iter()
            .map(|c| c - postflight_confidence)
            .max_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or(0.0);

        let verdict = if worst.abs() <= self.config.calibration_tolerance {
            CalibrationVerdict::WellCalibrated
        } else if worst > 0.0 {
            CalibrationVerdict::Overconfident
        } else {
            CalibrationVerdict::Underconfident
        };
        (verdict, worst)
    }

    pub async fn create_session(&self, session: &Session) -> KernelResult<()> {
        self.sessions.create(session).await
    }
}

/// Map identified gaps to investigation actions by keyword.
fn suggest_targets(gaps: &[String]) -> Vec<String> {
    gaps.iter()
        .map(|gap| {
            let lower = gap.to_lowercase();
            if lower.contains("file") || lower.contains("code") {
                "Read relevant source files".to_string()
            } else if lower.contains("doc") || lower.contains("specification") {
                "Review documentation".to_string()
            } else if lower.contains("architecture") || lower.contains("structure") {
                "Map system architecture".to_string()
            } else if lower.contains("dependency") || lower.contains("import") {
                "Check dependencies and imports".to_string()
            } else {
                let head: String = gap.chars().take(50).collect();
                format!("Investigate: {head}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::create_test_pool;
    use crate::storage::migrations::{all_embedded_migrations, Migrator};

    async fn machine() -> CascadeStateMachine {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        CascadeStateMachine::new(
            SessionRepository::new(pool),
            EpistemicBus::new(),
            CascadeConfig::default(),
        )
    }

    #[test]
    fn test_suggest_targets_keyword_mapping() {
        let targets = suggest_targets(&[
            "file x unclear".to_string(),
            "docs missing".to_string(),
            "architecture fuzzy".to_string(),
            "dependency graph unknown".to_string(),
            "something else entirely".to_string(),
        ]);
        assert_eq!(targets[0], "Read relevant source files");
        assert_eq!(targets[1], "Review documentation");
        assert_eq!(targets[2], "Map system architecture");
        assert_eq!(targets[3], "Check dependencies and imports");
        assert!(targets[4].starts_with("Investigate: "));
    }

    #[tokio::test]
    async fn test_decision_thresholds() {
        let machine = machine().await;
        let decide = |confidence, cycle| machine.determine_decision(confidence, &[], cycle).0;

        assert_eq!(decide(0.85, 1), CheckDecision::Proceed);
        assert_eq!(decide(0.8, 1), CheckDecision::Proceed);
        assert_eq!(decide(0.7, 1), CheckDecision::ProceedWithCaveat);
        assert_eq!(decide(0.5, 1), CheckDecision::Investigate);
        assert_eq!(decide(0.5, 5), CheckDecision::Escalate);
        assert_eq!(decide(0.65, 5), CheckDecision::ProceedWithCaveat);
    }

    #[tokio::test]
    async fn test_investigate_carries_targets() {
        let machine = machine().await;
        let (decision, targets) =
            machine.determine_decision(0.4, &["file x unclear".to_string()], 2);
        assert_eq!(decision, CheckDecision::Investigate);
        assert_eq!(targets, vec!["Read relevant source files"]);
    }

    #[tokio::test]
    async fn test_calibration_verdict_bounds() {
        let machine = machine().await;

        let (verdict, gap) = machine.calibration_verdict(&[0.85], 0.85);
        assert_eq!(verdict, CalibrationVerdict::WellCalibrated);
        assert!(gap.abs() < 1e-9);

        let (verdict, gap) = machine.calibration_verdict(&[0.9], 0.6);
        assert_eq!(verdict, CalibrationVerdict::Overconfident);
        assert!((gap - 0.3).abs() < 1e-9);

        let (verdict, gap) = machine.calibration_verdict(&[0.4], 0.8);
        assert_eq!(verdict, CalibrationVerdict::Underconfident);
        assert!((gap + 0.4).abs() < 1e-9);

        let (verdict, _) = machine.calibration_verdict(&[], 0.7);
        assert_eq!(verdict, CalibrationVerdict::Unknown);
    }
}
