//! Objective evidence collection.
//!
//! Gathers non-self-referential evidence from independent, failure-tolerant
//! sources: goal metrics, scope-weighted artifact counts, sentinel gate
//! decisions, test-report files, and git history. Each source either
//! contributes items or lands in `sources_failed`; the collector returns
//! whatever it could gather.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    CheckDecision, EvidenceBundle, EvidenceItem, EvidenceQuality, VectorName,
};
use crate::storage::{ArtifactRepository, CalibrationRepository, GoalRepository, SessionRepository};

/// Weight applied to artifacts not linked to any session goal. Unscoped
/// unknowns (future research, general observations) still contribute but
/// with reduced influence so they don't artificially depress KNOW grounding.
pub const UNSCOPED_ARTIFACT_WEIGHT: f64 = 0.3;

/// Which evidence pass is being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionPhase {
    /// PREFLIGHT→CHECK: investigation signals only.
    Noetic,
    /// CHECK→POSTFLIGHT: goals, tests, git.
    Praxic,
    /// No CHECK boundary: everything.
    Combined,
}

impl CollectionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Noetic => "noetic",
            Self::Praxic => "praxic",
            Self::Combined => "combined",
        }
    }
}

pub struct EvidenceCollector {
    session_id: Uuid,
    phase: CollectionPhase,
    /// CHECK boundary timestamp for phase-aware collection.
    check_timestamp: Option<DateTime<Utc>>,
    sessions: SessionRepository,
    goals: GoalRepository,
    artifacts: ArtifactRepository,
    calibration: CalibrationRepository,
    /// Working directory for test reports and git commands.
    workdir: PathBuf,
}

impl EvidenceCollector {
    pub fn new(
        session_id: Uuid,
        phase: CollectionPhase,
        check_timestamp: Option<DateTime<Utc>>,
        sessions: SessionRepository,
        goals: GoalRepository,
        artifacts: ArtifactRepository,
        calibration: CalibrationRepository,
    ) -> Self {
        Self {
            session_id,
            phase,
            check_timestamp,
            sessions,
            goals,
            artifacts,
            calibration,
            workdir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    pub fn with_workdir(mut self, workdir: PathBuf) -> Self {
        self.workdir = workdir;
        self
    }

    /// Collect from every source the phase allows.
    pub async fn collect_all(&self) -> EvidenceBundle {
        let mut bundle = EvidenceBundle::new(self.session_id);

        let sources: Vec<&str> = match self.phase {
            CollectionPhase::Noetic => vec!["noetic", "artifacts", "sentinel"],
            CollectionPhase::Praxic => vec!["goals", "artifacts", "tests", "git"],
            CollectionPhase::Combined => {
                vec!["goals", "artifacts", "sentinel", "tests", "git", "noetic"]
            }
        };

        for source in sources {
            let collected = match source {
                "goals" => self.collect_goal_metrics().await,
                "artifacts" => self.collect_artifact_metrics().await,
                "sentinel" => self.collect_sentinel_metrics().await,
                "tests" => self.collect_test_results().await,
                "git" => self.collect_git_metrics().await,
                "noetic" => self.collect_noetic_metrics().await,
                _ => Ok(Vec::new()),
            };
            match collected {
                Ok(items) if !items.is_empty() => {
                    bundle.items.extend(items);
                    bundle.sources_available.push(source.to_string());
                }
                Ok(_) => {}
                Err(e) => {
                    debug!(source, error = %e, "evidence source failed");
                    bundle.sources_failed.push(source.to_string());
                }
            }
        }

        bundle.finalize();
        bundle
    }

    /// Goal/subtask completion ratios and token-estimation accuracy.
    async fn collect_goal_metrics(&self) -> KernelResult<Vec<EvidenceItem>> {
        let mut items = Vec::new();

        let (completed, total) = self.goals.subtask_completion(self.session_id).await?;
        if total > 0 {
            let ratio = f64::from(completed) / f64::from(total);
            items.push(EvidenceItem::new(
                "goals",
                "subtask_completion_ratio",
                ratio,
                json!({"completed": completed, "total": total}),
                EvidenceQuality::SemiObjective,
                vec![VectorName::Completion, VectorName::Do],
            ));
        }

        if let Some((estimated, actual)) = self.goals.token_estimation(self.session_id).await? {
            let error_ratio = (actual - estimated).abs() as f64 / estimated as f64;
            let accuracy = (1.0 - error_ratio).max(0.0);
            items.push(EvidenceItem::new(
                "goals",
                "token_estimation_accuracy",
                accuracy,
                json!({"estimated": estimated, "actual": actual}),
                EvidenceQuality::SemiObjective,
                vec![VectorName::Know, VectorName::Clarity],
            ));
        }

        Ok(items)
    }

    /// Scope-weighted artifact ratios.
    ///
    /// Artifacts linked to session goals count at full weight; unscoped ones
    /// count at `UNSCOPED_ARTIFACT_WEIGHT`. Unknown resolution is floored at
    /// 0.3: logging unknowns shows domain awareness even before resolution.
    async fn collect_artifact_metrics(&self) -> KernelResult<Vec<EvidenceItem>> {
        let mut items = Vec::new();
        let goal_ids = self.goals.goal_ids_for_session(self.session_id).await?;

        let (scoped_total, scoped_resolved) = self
            .artifacts
            .scoped_unknown_resolution(self.session_id, &goal_ids)
            .await?;
        let (unscoped_total, unscoped_resolved) = self
            .artifacts
            .unscoped_unknown_resolution(self.session_id, &goal_ids)
            .await?;

        let w = UNSCOPED_ARTIFACT_WEIGHT;
        let weighted_total = f64::from(scoped_total) + f64::from(unscoped_total) * w;
        let weighted_resolved = f64::from(scoped_resolved) + f64::from(unscoped_resolved) * w;

        if weighted_total > 0.0 {
            let raw_ratio = weighted_resolved / weighted_total;
            let resolution_ratio = 0.3 + raw_ratio * 0.7;
            items.push(EvidenceItem::new(
                "artifacts",
                "unknown_resolution_ratio",
                resolution_ratio,
                json!({
                    "resolved_weighted": weighted_resolved,
                    "total_weighted": weighted_total,
                    "scoped_total": scoped_total,
                    "unscoped_total": unscoped_total,
                    "unscoped_weight": w,
                    "raw_ratio": raw_ratio,
                    "floor_applied": true,
                }),
                EvidenceQuality::SemiObjective,
                vec![VectorName::Know],
            ));
        }

        let findings = self
            .artifacts
            .scoped_finding_counts(self.session_id, &goal_ids)
            .await?;
        let dead_ends = self
            .artifacts
            .scoped_dead_end_counts(self.session_id, &goal_ids)
            .await?;
        let findings_weighted = findings.weighted_total(w);
        let dead_ends_weighted = dead_ends.weighted_total(w);
        let total_exploration = findings_weighted + dead_ends_weighted;

        if total_exploration > 0.0 {
            let productivity = findings_weighted / total_exploration;
            items.push(EvidenceItem::new(
                "artifacts",
                "productive_exploration_ratio",
                productivity,
                json!({
                    "findings_weighted": findings_weighted,
                    "dead_ends_weighted": dead_ends_weighted,
                }),
                EvidenceQuality::SemiObjective,
                vec![VectorName::Signal, VectorName::Know],
            ));

            // More dead ends relative to findings = higher actual uncertainty.
            items.push(EvidenceItem::new(
                "artifacts",
                "dead_end_ratio",
                dead_ends_weighted / total_exploration,
                json!({
                    "dead_ends_weighted": dead_ends_weighted,
                    "total_weighted": total_exploration,
                }),
                EvidenceQuality::SemiObjective,
                vec![VectorName::Uncertainty],
            ));
        }

        let mistakes = self.artifacts.count_mistakes(self.session_id).await?;
        let raw_findings = findings.raw_total();
        if raw_findings > 0 {
            let mistake_ratio =
                f64::from(mistakes) / f64::from(raw_findings + mistakes);
            items.push(EvidenceItem::new(
                "artifacts",
                "mistake_ratio",
                1.0 - mistake_ratio,
                json!({"mistakes": mistakes, "findings": raw_findings}),
                EvidenceQuality::Inferred,
                vec![VectorName::Signal],
            ));
        }

        Ok(items)
    }

    /// CHECK gate decisions: proceed ratio and investigation efficiency.
    async fn collect_sentinel_metrics(&self) -> KernelResult<Vec<EvidenceItem>> {
        let mut items = Vec::new();
        let decisions = self.calibration.check_decisions(self.session_id).await?;
        if decisions.is_empty() {
            return Ok(items);
        }

        let proceed = decisions
            .iter()
            .filter(|(d, _)| CheckDecision::from_str(d) == Some(CheckDecision::Proceed))
            .count() as u32;
        let investigate = decisions
            .iter()
            .filter(|(d, _)| CheckDecision::from_str(d) == Some(CheckDecision::Investigate))
            .count() as u32;
        let total = proceed + investigate;

        if total > 0 {
            items.push(EvidenceItem::new(
                "sentinel",
                "check_proceed_ratio",
                f64::from(proceed) / f64::from(total),
                json!({"proceed": proceed, "investigate": investigate}),
                EvidenceQuality::SemiObjective,
                vec![VectorName::Context],
            ));
        }

        if total > 1 {
            // 1 round = 1.0 (confident), 5+ rounds = 0.0 (high uncertainty).
            let rounds_score = (1.0 - f64::from(total - 1) / 4.0).max(0.0);
            items.push(EvidenceItem::new(
                "sentinel",
                "investigation_efficiency",
                rounds_score,
                json!({"check_rounds": total}),
                EvidenceQuality::Inferred,
                vec![VectorName::Uncertainty],
            ));
        }

        Ok(items)
    }

    /// Test pass rate and coverage from JSON report files.
    ///
    /// Paths are probed in fixed precedence order; the first parseable
    /// report wins.
    async fn collect_test_results(&self) -> KernelResult<Vec<EvidenceItem>> {
        let mut items = Vec::new();

        let report_paths = [
            self.workdir.join(".empirica/test_report.json"),
            self.workdir.join("test_report.json"),
            self.workdir.join(".test_report.json"),
            self.workdir.join("htmlcov/status.json"),
        ];

        let mut report = None;
        for path in &report_paths {
            if let Ok(text) = tokio::fs::read_to_string(path).await {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                    report = Some(value);
                    break;
                }
            }
        }

        let Some(report) = report else {
            return Ok(items);
        };

        let summary = &report["summary"];
        let passed = summary["passed"].as_u64().unwrap_or(0);
        let failed = summary["failed"].as_u64().unwrap_or(0);
        let total = summary["total"].as_u64().unwrap_or(passed + failed);

        if total > 0 {
            items.push(EvidenceItem::new(
                "tests",
                "test_pass_rate",
                passed as f64 / total as f64,
                json!({"passed": passed, "failed": failed, "total": total}),
                EvidenceQuality::Objective,
                vec![VectorName::Know, VectorName::Do],
            ));
        }

        let coverage_paths = [
            self.workdir.join("coverage.json"),
            self.workdir.join(".coverage.json"),
            self.workdir.join("htmlcov/status.json"),
        ];
        for path in &coverage_paths {
            if let Ok(text) = tokio::fs::read_to_string(path).await {
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) {
                    let pct = value["totals"]["percent_covered"].as_f64().unwrap_or(0.0);
                    if pct > 0.0 {
                        items.push(EvidenceItem::new(
                            "tests",
                            "test_coverage_percent",
                            pct / 100.0,
                            json!({"percent": pct}),
                            EvidenceQuality::Objective,
                            vec![VectorName::Clarity, VectorName::Know],
                        ));
                    }
                    break;
                }
            }
        }

        Ok(items)
    }

    /// Commit count and files changed since session start.
    async fn collect_git_metrics(&self) -> KernelResult<Vec<EvidenceItem>> {
        let mut items = Vec::new();
        let session = self.sessions.require(self.session_id).await?;
        let since = format!("--since=@{}", session.start_time.timestamp());

        let output = run_git(
            &self.workdir,
            &["log", "--oneline", &since, "--format=%H"],
            Duration::from_secs(5),
        )
        .await?;
        let commit_count = output.lines().filter(|l| !l.is_empty()).count() as u32;
        if commit_count > 0 {
            items.push(EvidenceItem::new(
                "git",
                "commit_count",
                (f64::from(commit_count) / 5.0).min(1.0),
                json!({"commits": commit_count}),
                EvidenceQuality::Objective,
                vec![VectorName::Do, VectorName::Change],
            ));
        }

        if let Ok(stat) = run_git(
            &self.workdir,
            &["diff", "--stat", "--shortstat", "HEAD~3..HEAD"],
            Duration::from_secs(5),
        )
        .await
        {
            if let Some(files_changed) = parse_files_changed(&stat) {
                items.push(EvidenceItem::new(
                    "git",
                    "files_changed",
                    (f64::from(files_changed) / 10.0).min(1.0),
                    json!({"files": files_changed}),
                    EvidenceQuality::Objective,
                    vec![VectorName::State, VectorName::Change],
                ));
            }
        }

        Ok(items)
    }

    /// Investigation-phase evidence: epistemic process quality.
    async fn collect_noetic_metrics(&self) -> KernelResult<Vec<EvidenceItem>> {
        let mut items = Vec::new();

        // Unknowns surfaced: epistemic honesty. 5+ unknowns = 1.0.
        let unknowns = self.artifacts.count_unknowns(self.session_id).await?;
        if unknowns > 0 {
            items.push(EvidenceItem::new(
                "noetic",
                "unknowns_surfaced",
                (f64::from(unknowns) / 5.0).min(1.0),
                json!({"count": unknowns}),
                EvidenceQuality::SemiObjective,
                vec![VectorName::Uncertainty, VectorName::Know],
            ));
        }

        // Dead ends identified before the CHECK boundary: pattern recognition.
        if self.check_timestamp.is_some() {
            let pre_check = self
                .artifacts
                .count_dead_ends_before(self.session_id, self.check_timestamp)
                .await?;
            if pre_check > 0 {
                items.push(EvidenceItem::new(
                    "noetic",
                    "dead_end_avoidance",
                    (f64::from(pre_check) / 3.0).min(1.0),
                    json!({"pre_check_dead_ends": pre_check}),
                    EvidenceQuality::SemiObjective,
                    vec![VectorName::Signal, VectorName::Know],
                ));
            }
        }

        // Findings logged during investigation.
        let pre_check_findings = self
            .artifacts
            .count_findings_before(self.session_id, self.check_timestamp)
            .await?;
        if pre_check_findings > 0 {
            items.push(EvidenceItem::new(
                "noetic",
                "investigation_findings",
                (f64::from(pre_check_findings) / 5.0).min(1.0),
                json!({"findings": pre_check_findings}),
                EvidenceQuality::SemiObjective,
                vec![VectorName::Know, VectorName::Signal],
            ));
        }

        // CHECK iteration profile: at least one investigate round is
        // thorough, five or more suggests struggling.
        let decisions = self.calibration.check_decisions(self.session_id).await?;
        if !decisions.is_empty() {
            let investigate_count = decisions
                .iter()
                .filter(|(d, _)| CheckDecision::from_str(d) == Some(CheckDecision::Investigate))
                .count() as u32;
            let thoroughness = if investigate_count == 0 {
                0.5
            } else if investigate_count <= 3 {
                0.7 + f64::from(investigate_count) * 0.1
            } else {
                (1.0 - f64::from(investigate_count - 3) * 0.15).max(0.4)
            };
            items.push(EvidenceItem::new(
                "noetic",
                "investigation_thoroughness",
                thoroughness,
                json!({
                    "investigate_rounds": investigate_count,
                    "total_checks": decisions.len(),
                }),
                EvidenceQuality::SemiObjective,
                vec![VectorName::Know, VectorName::Context],
            ));
        }

        Ok(items)
    }
}

/// Run a git command with a hard timeout. Never blocks indefinitely.
async fn run_git(workdir: &Path, args: &[&str], timeout: Duration) -> KernelResult<String> {
    let result = tokio::time::timeout(
        timeout,
        Command::new("git").args(args).current_dir(workdir).output(),
    )
    .await
    .map_err(|_| KernelError::Timeout(timeout))?
    .map_err(|e| KernelError::Git(e.to_string()))?;

    if !result.status.success() {
        return Err(KernelError::Git(format!(
            "git {} exited with {}",
            args.first().unwrap_or(&""),
            result.status
        )));
    }
    Ok(String::from_utf8_lossy(&result.stdout).to_string())
}

/// Parse "X files changed, ..." from a shortstat line.
fn parse_files_changed(stat: &str) -> Option<u32> {
    let line = stat.trim().lines().last()?;
    let idx = line.find(" file")?;
    line[..idx].trim().rsplit(' ').next()?.parse().ok()
}
