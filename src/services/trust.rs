//! Trust calculation and the graduated sentinel.
//!
//! Trust is earned through demonstrated calibration and reviewed
//! suggestions, and decays with recent mistakes:
//!
//!   trust = 0.4·calibration + 0.4·suggestion_success + 0.2·mistake_penalty
//!
//! The sentinel maps trust to an autonomy mode and gates actions by
//! category; every evaluation publishes an `action_decided` event.

use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::bus::EpistemicBus;
use crate::domain::errors::KernelResult;
use crate::domain::models::{
    ActionCategory, ActionDecision, DomainTrust, EpistemicEvent, EventType, GraduatedProfile,
    SentinelMode, TrustLevel, VectorName,
};
use crate::services::grounded_calibration::GroundedCalibrationManager;
use crate::storage::ArtifactRepository;

const CALIBRATION_WEIGHT: f64 = 0.4;
const SUGGESTION_WEIGHT: f64 = 0.4;
const MISTAKE_WEIGHT: f64 = 0.2;
/// Reviews needed before the suggestion factor leaves its neutral baseline.
const MIN_OBSERVATIONS: u32 = 3;
/// Window for "recent" mistakes.
const RECENT_DAYS: i64 = 7;

pub struct TrustCalculator {
    artifacts: ArtifactRepository,
    calibration: GroundedCalibrationManager,
}

impl TrustCalculator {
    pub fn new(artifacts: ArtifactRepository, calibration: GroundedCalibrationManager) -> Self {
        Self {
            artifacts,
            calibration,
        }
    }

    /// Trust assessment for one domain.
    pub async fn domain_trust(&self, ai_id: &str, domain: &str) -> KernelResult<DomainTrust> {
        let (accepted, rejected) = self.artifacts.suggestion_outcomes(domain).await?;
        let recent_mistakes = self
            .artifacts
            .count_recent_mistakes(Utc::now() - Duration::days(RECENT_DAYS))
            .await?;

        let calibration_factor = self.calibration_accuracy(ai_id, domain).await?;
        let suggestion_factor = if accepted + rejected >= MIN_OBSERVATIONS {
            f64::from(accepted) / f64::from(accepted + rejected)
        } else {
            0.5
        };
        let mistake_factor = (1.0 - f64::from(recent_mistakes) * 0.1).max(0.0);

        let score = CALIBRATION_WEIGHT * calibration_factor
            + SUGGESTION_WEIGHT * suggestion_factor
            + MISTAKE_WEIGHT * mistake_factor;

        Ok(DomainTrust {
            domain: domain.to_string(),
            score,
            level: TrustLevel::from_score(score),
            calibration_factor,
            suggestion_factor,
            mistake_factor,
            suggestions_accepted: accepted,
            suggestions_rejected: rejected,
            recent_mistakes,
        })
    }

    /// Trust across every domain with review history, plus an `_overall`
    /// average entry.
    pub async fn all_domain_trust(
        &self,
        ai_id: &str,
    ) -> KernelResult<Vec<DomainTrust>> {
        let domains = self.artifacts.suggestion_domains().await?;
        let mut trusts = Vec::new();
        for domain in &domains {
            trusts.push(self.domain_trust(ai_id, domain).await?);
        }

        let overall = if trusts.is_empty() {
            DomainTrust::neutral("_overall")
        } else {
            let n = trusts.len() as f64;
            let score = trusts.iter().map(|t| t.score).sum::<f64>() / n;
            DomainTrust {
                domain: "_overall".to_string(),
                score,
                level: TrustLevel::from_score(score),
                calibration_factor: trusts.iter().map(|t| t.calibration_factor).sum::<f64>() / n,
                suggestion_factor: trusts.iter().map(|t| t.suggestion_factor).sum::<f64>() / n,
                mistake_factor: trusts.iter().map(|t| t.mistake_factor).sum::<f64>() / n,
                suggestions_accepted: trusts.iter().map(|t| t.suggestions_accepted).sum(),
                suggestions_rejected: trusts.iter().map(|t| t.suggestions_rejected).sum(),
                recent_mistakes: trusts.iter().map(|t| t.recent_mistakes).sum(),
            }
        };
        trusts.push(overall);
        Ok(trusts)
    }

    /// Calibration accuracy for a domain from the grounded belief
    /// divergences of its associated vectors. Lower absolute divergence =
    /// better calibration; neutral 0.5 without evidence.
    async fn calibration_accuracy(&self, ai_id: &str, domain: &str) -> KernelResult<f64> {
        let vectors: &[VectorName] = match domain {
            "architecture" => &[VectorName::Coherence, VectorName::Context, VectorName::Clarity],
            "testing" => &[VectorName::Completion, VectorName::Do, VectorName::State],
            "performance" => &[VectorName::Change, VectorName::Impact, VectorName::Signal],
            "security" => &[VectorName::Uncertainty, VectorName::Know, VectorName::Context],
            "documentation" => &[VectorName::Clarity, VectorName::Density, VectorName::Coherence],
            _ => &[VectorName::Know, VectorName::Uncertainty, VectorName::Context],
        };

        let beliefs = self.calibration.grounded_beliefs(ai_id).await?;
        let mut total_bias = 0.0;
        let mut count = 0;
        for vector in vectors {
            if let Some(belief) = beliefs.get(vector) {
                if let Some(divergence) = belief.divergence {
                    total_bias += divergence.abs();
                    count += 1;
                }
            }
        }
        if count == 0 {
            return Ok(0.5);
        }
        // Max expected bias is ~0.7; scale into accuracy.
        let avg_bias = total_bias / f64::from(count);
        Ok((1.0 - avg_bias / 0.7).max(0.0))
    }
}

/// Trust-aware gate that adjusts autonomy to demonstrated calibration.
pub struct GraduatedSentinel {
    session_id: Uuid,
    ai_id: String,
    domain: String,
    trust: TrustCalculator,
    bus: EpistemicBus,
    /// Pinned mode override (for tests or operator policy).
    mode_override: Option<SentinelMode>,
}

impl GraduatedSentinel {
    pub fn new(
        session_id: Uuid,
        ai_id: impl Into<String>,
        domain: impl Into<String>,
        trust: TrustCalculator,
        bus: EpistemicBus,
    ) -> Self {
        Self {
            session_id,
            ai_id: ai_id.into(),
            domain: domain.into(),
            trust,
            bus,
            mode_override: None,
        }
    }

    pub fn with_mode_override(mut self, mode: SentinelMode) -> Self {
        self.mode_override = Some(mode);
        self
    }

    pub async fn effective_mode(&self) -> KernelResult<SentinelMode> {
        if let Some(mode) = self.mode_override {
            return Ok(mode);
        }
        let trust = self.trust.domain_trust(&self.ai_id, &self.domain).await?;
        Ok(SentinelMode::for_trust(trust.level))
    }

    /// Classify an action into a control category by keyword patterns.
    pub fn classify_action(action: &str, target: &str) -> ActionCategory {
        let action = action.to_lowercase();
        let target = target.to_lowercase();
        let contains = |patterns: &[&str]| {
            patterns
                .iter()
                .any(|p| action.contains(p) || target.contains(p))
        };

        if contains(&[
            "delete database",
            "drop table",
            "rm -rf",
            "production",
            "deploy",
            "push main",
            "push master",
            "credentials",
            "secrets",
            "api key",
            "password",
            "security",
            "authentication",
            "authorization",
        ]) {
            return ActionCategory::Critical;
        }
        if contains(&[
            "refactor",
            "architecture",
            "redesign",
            "rewrite",
            "major feature",
            "new module",
            "database schema",
            "api change",
            "breaking change",
            "migration",
        ]) {
            return ActionCategory::Strategic;
        }
        if contains(&[
            "format",
            "lint",
            "comment",
            "typo",
            "whitespace",
            "rename variable",
            "documentation",
            "readme",
            "import order",
            "style",
        ]) {
            return ActionCategory::Trivial;
        }
        ActionCategory::Tactical
    }

    /// Evaluate whether an action is allowed under the current trust level.
    /// Publishes `action_decided`.
    #[instrument(skip(self, action, target), fields(session_id = %self.session_id))]
    pub async fn evaluate_action(
        &self,
        action: &str,
        target: &str,
        ai_confidence: f64,
    ) -> KernelResult<ActionDecision> {
        let trust = self.trust.domain_trust(&self.ai_id, &self.domain).await?;
        let mode = self.effective_mode().await?;
        let profile = GraduatedProfile::for_mode(mode);
        let category = Self::classify_action(action, target);

        let requires_human = profile.require_human_for.contains(&category);
        let should_log = profile.log_actions.contains(&category);
        let can_auto_apply = profile.auto_apply.contains(&category)
            && ai_confidence >= profile.confidence_threshold;

        let (allowed, auto_applied, rationale) = if requires_human {
            (
                false,
                false,
                format!(
                    "Mode={}: {} actions require human approval (trust_level={}, score={:.2})",
                    mode.as_str(),
                    category.as_str(),
                    trust.level.as_str(),
                    trust.score
                ),
            )
        } else if can_auto_apply {
            (
                true,
                true,
                format!(
                    "Mode={}: auto-applying {} action (confidence={:.2} >= threshold={:.2})",
                    mode.as_str(),
                    category.as_str(),
                    ai_confidence,
                    profile.confidence_threshold
                ),
            )
        } else if should_log {
            (
                true,
                false,
                format!(
                    "Mode={}: logging {} action for review (trust_level={})",
                    mode.as_str(),
                    category.as_str(),
                    trust.level.as_str()
                ),
            )
        } else {
            (true, false, format!("Mode={}: action permitted", mode.as_str()))
        };

        let decision = ActionDecision {
            action: action.to_string(),
            category,
            mode,
            allowed,
            requires_human,
            rationale,
            trust_level: trust.level,
            trust_score: trust.score,
            auto_applied,
        };

        self.bus
            .publish(EpistemicEvent::new(
                EventType::ActionDecided,
                "graduated_sentinel",
                self.session_id,
                json!({
                    "action": decision.action,
                    "category": decision.category.as_str(),
                    "mode": decision.mode.as_str(),
                    "allowed": decision.allowed,
                    "requires_human": decision.requires_human,
                    "auto_applied": decision.auto_applied,
                    "trust_score": decision.trust_score,
                }),
            ))
            .await;

        info!(
            action,
            category = category.as_str(),
            allowed,
            requires_human,
            auto_applied,
            "sentinel action decision"
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ReviewOutcome, Session, Suggestion};
    use crate::services::grounded_calibration::CalibrationConfig;
    use crate::storage::connection::create_test_pool;
    use crate::storage::migrations::{all_embedded_migrations, Migrator};
    use crate::storage::{CalibrationRepository, GoalRepository, SessionRepository};

    async fn fixtures() -> (TrustCalculator, ArtifactRepository, Uuid) {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        let sessions = SessionRepository::new(pool.clone());
        let session = Session::new("a1", "proj");
        sessions.create(&session).await.unwrap();

        let artifacts = ArtifactRepository::new(pool.clone());
        let calibration = GroundedCalibrationManager::new(
            CalibrationConfig::default(),
            sessions,
            GoalRepository::new(pool.clone()),
            artifacts.clone(),
            CalibrationRepository::new(pool),
        );
        (
            TrustCalculator::new(artifacts.clone(), calibration),
            artifacts,
            session.session_id,
        )
    }

    #[tokio::test]
    async fn test_trust_neutral_without_history() {
        let (trust, _, _) = fixtures().await;
        let assessment = trust.domain_trust("a1", "security").await.unwrap();
        // 0.4·0.5 + 0.4·0.5 + 0.2·1.0 = 0.6
        assert!((assessment.score - 0.6).abs() < 1e-9);
        assert_eq!(assessment.level, TrustLevel::High);
    }

    #[tokio::test]
    async fn test_rejected_suggestions_lower_trust() {
        let (trust, artifacts, session_id) = fixtures().await;
        for _ in 0..4 {
            let mut s = Suggestion::new(session_id, "bad idea", 0.5).with_domain("testing");
            s.review(ReviewOutcome::Rejected);
            artifacts.log_suggestion(&s).await.unwrap();
        }

        let assessment = trust.domain_trust("a1", "testing").await.unwrap();
        assert_eq!(assessment.suggestion_factor, 0.0);
        assert!(assessment.score < 0.6);
    }

    #[tokio::test]
    async fn test_below_min_observations_stays_neutral() {
        let (trust, artifacts, session_id) = fixtures().await;
        let mut s = Suggestion::new(session_id, "one idea", 0.5).with_domain("data");
        s.review(ReviewOutcome::Accepted);
        artifacts.log_suggestion(&s).await.unwrap();

        let assessment = trust.domain_trust("a1", "data").await.unwrap();
        assert_eq!(assessment.suggestion_factor, 0.5);
    }

    #[test]
    fn test_action_classification() {
        assert_eq!(
            GraduatedSentinel::classify_action("deploy to production", ""),
            ActionCategory::Critical
        );
        assert_eq!(
            GraduatedSentinel::classify_action("refactor the queue module", ""),
            ActionCategory::Strategic
        );
        assert_eq!(
            GraduatedSentinel::classify_action("fix typo in readme", ""),
            ActionCategory::Trivial
        );
        assert_eq!(
            GraduatedSentinel::classify_action("fix null pointer in handler", ""),
            ActionCategory::Tactical
        );
    }

    #[tokio::test]
    async fn test_controller_mode_blocks_everything() {
        let (trust, _, session_id) = fixtures().await;
        let sentinel = GraduatedSentinel::new(session_id, "a1", "general", trust, EpistemicBus::new())
            .with_mode_override(SentinelMode::Controller);

        let decision = sentinel
            .evaluate_action("fix typo in readme", "", 0.99)
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.requires_human);
        assert!(!decision.auto_applied);
    }

    #[tokio::test]
    async fn test_autonomous_mode_still_gates_critical() {
        let (trust, _, session_id) = fixtures().await;
        let sentinel = GraduatedSentinel::new(session_id, "a1", "general", trust, EpistemicBus::new())
            .with_mode_override(SentinelMode::Autonomous);

        let critical = sentinel
            .evaluate_action("rotate credentials", "", 0.99)
            .await
            .unwrap();
        assert!(critical.requires_human);

        let tactical = sentinel
            .evaluate_action("fix off by one in pager", "", 0.95)
            .await
            .unwrap();
        assert!(tactical.allowed);
        assert!(tactical.auto_applied);
    }

    #[tokio::test]
    async fn test_low_confidence_blocks_auto_apply() {
        let (trust, _, session_id) = fixtures().await;
        let sentinel = GraduatedSentinel::new(session_id, "a1", "general", trust, EpistemicBus::new())
            .with_mode_override(SentinelMode::Autonomous);

        let decision = sentinel
            .evaluate_action("fix off by one in pager", "", 0.5)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert!(!decision.auto_applied);
    }
}
