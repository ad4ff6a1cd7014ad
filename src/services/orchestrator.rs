//! Parallel orchestrator: plan, regulate, and aggregate investigation agents.
//!
//! Coordinates N concurrent workers over a task:
//! - `plan` detects domains, queries priors, and allocates the attention
//!   budget across focused sub-agents.
//! - `execute_round` runs workers under a wall-clock timeout; workers still
//!   running at the deadline are abandoned and their partial findings
//!   discarded.
//! - `regulate` decides continue / spawn_more / stop after each round.
//! - `aggregate` merges results with confidence-weighted vector synthesis.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::models::{AttentionBudget, VectorName, VectorSet};
use crate::services::attention::{AttentionBudgetCalculator, AttentionConfig};
use crate::services::information_gain::{
    estimate_information_gain, should_spawn_more, DEFAULT_MIN_GAIN, DEFAULT_STALE_ROUNDS,
    NOVELTY_FLOOR,
};
use crate::services::rollup::RollupResult;
use crate::storage::{ArtifactRepository, BudgetRepository};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub max_agents: usize,
    pub total_budget: u32,
    pub max_rounds: u32,
    pub round_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_agents: 5,
            total_budget: 20,
            max_rounds: 3,
            round_timeout: Duration::from_secs(120),
        }
    }
}

/// Allocation for a single parallel agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAllocation {
    pub agent_name: String,
    pub domain: String,
    pub persona_id: String,
    pub budget: u32,
    pub priority: f64,
    pub expected_gain: f64,
    pub task_focus: String,
}

/// Plan for a round of parallel agent execution.
#[derive(Debug, Clone)]
pub struct OrchestrationPlan {
    pub task: String,
    pub session_id: Uuid,
    pub agents: Vec<AgentAllocation>,
    pub budget: AttentionBudget,
    pub strategy: String,
    pub max_rounds: u32,
}

/// What a worker reports back from one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub agent_name: String,
    pub domain: String,
    pub findings: Vec<String>,
    pub unknowns: Vec<String>,
    pub vectors: VectorSet,
    pub confidence: f64,
}

/// One completed orchestration round, including which workers failed.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub results: Vec<AgentResult>,
    pub sources_failed: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegulationAction {
    Stop,
    Continue,
    SpawnMore,
}

/// Decision from the regulate step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegulationDecision {
    pub action: RegulationAction,
    pub reason: String,
    pub round_number: u32,
    pub findings_this_round: usize,
    pub novel_findings_this_round: usize,
    pub budget_remaining: u32,
    pub gain_estimate: f64,
    pub rounds_without_novel: u32,
}

/// Result of aggregating all parallel agent results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedSynthesis {
    pub findings: Vec<String>,
    pub unknowns: Vec<String>,
    pub confidence_weighted_vectors: BTreeMap<String, f64>,
    pub total_findings: usize,
    pub total_accepted: usize,
    pub total_rejected: usize,
    pub agent_summaries: Vec<AgentSummary>,
    pub consensus_domains: Vec<String>,
    pub conflict_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub agent_name: String,
    pub domain: String,
    pub findings_count: usize,
    pub unknowns_count: usize,
    pub confidence: f64,
}

/// Keyword signals used for domain detection when none are supplied.
const DOMAIN_SIGNALS: &[(&str, &[&str])] = &[
    ("security", &["security", "vulnerability", "auth", "exploit", "injection"]),
    ("performance", &["performance", "latency", "throughput", "slow", "memory leak"]),
    ("architecture", &["architecture", "structure", "design", "module", "coupling"]),
    ("testing", &["test", "coverage", "regression", "flaky"]),
    ("data", &["database", "schema", "migration", "query"]),
];

pub struct ParallelOrchestrator {
    session_id: Uuid,
    config: OrchestratorConfig,
    attention: AttentionConfig,
    artifacts: ArtifactRepository,
    budgets: BudgetRepository,
    rounds_without_novel: u32,
}

impl ParallelOrchestrator {
    pub fn new(
        session_id: Uuid,
        config: OrchestratorConfig,
        attention: AttentionConfig,
        artifacts: ArtifactRepository,
        budgets: BudgetRepository,
    ) -> Self {
        Self {
            session_id,
            config,
            attention,
            artifacts,
            budgets,
            rounds_without_novel: 0,
        }
    }

    /// Plan parallel execution: detect domains, pull priors from the
    /// session store, allocate the attention budget, and produce one
    /// focused sub-task per domain.
    #[instrument(skip(self, task, vectors), fields(session_id = %self.session_id))]
    pub async fn plan(
        &self,
        task: &str,
        domains: Option<Vec<String>>,
        max_agents: Option<usize>,
        vectors: Option<&VectorSet>,
    ) -> OrchestrationPlan {
        let max_agents = max_agents.unwrap_or(self.config.max_agents);
        let mut domains = domains.unwrap_or_else(|| detect_domains(task));
        domains.truncate(max_agents);

        let mut prior_findings = HashMap::new();
        let mut dead_ends = HashMap::new();
        for domain in &domains {
            prior_findings.insert(
                domain.clone(),
                self.artifacts
                    .count_findings_matching(self.session_id, domain)
                    .await
                    .unwrap_or(0),
            );
            dead_ends.insert(
                domain.clone(),
                self.artifacts
                    .count_dead_ends_matching(self.session_id, domain)
                    .await
                    .unwrap_or(0),
            );
        }

        let calculator = AttentionBudgetCalculator::new(self.session_id, self.attention.clone());
        let budget = calculator.create_budget(
            &domains,
            vectors,
            &prior_findings,
            &dead_ends,
            Some(self.config.total_budget),
        );

        if let Err(e) = self.budgets.save_attention_budget(&budget).await {
            warn!(error = %e, "failed to persist attention budget");
        }

        let agents: Vec<AgentAllocation> = budget
            .allocations
            .iter()
            .map(|alloc| AgentAllocation {
                agent_name: format!("empirica-integration:{}", alloc.domain),
                domain: alloc.domain.clone(),
                persona_id: format!("{}_expert", alloc.domain),
                budget: alloc.budget,
                priority: alloc.priority,
                expected_gain: alloc.expected_gain,
                task_focus: format!("Investigate the {} aspects of: {task}", alloc.domain),
            })
            .collect();

        info!(
            agents = agents.len(),
            budget = self.config.total_budget,
            domains = ?agents.iter().map(|a| a.domain.as_str()).collect::<Vec<_>>(),
            "orchestration plan ready"
        );

        OrchestrationPlan {
            task: task.to_string(),
            session_id: self.session_id,
            agents,
            budget,
            strategy: "information_gain".to_string(),
            max_rounds: self.config.max_rounds,
        }
    }

    /// Run one round of workers concurrently, bounded by the round timeout.
    ///
    /// `spawn_worker` produces the future for each allocation. Worker panics
    /// and errors never fail the round; they are reported in
    /// `sources_failed` and the surviving results are returned.
    pub async fn execute_round<F, Fut>(
        &self,
        plan: &OrchestrationPlan,
        spawn_worker: F,
    ) -> RoundOutcome
    where
        F: Fn(AgentAllocation) -> Fut,
        Fut: Future<Output = Result<AgentResult, String>> + Send + 'static,
    {
        let mut join_set: JoinSet<(String, Result<AgentResult, String>)> = JoinSet::new();
        for allocation in plan.agents.clone() {
            let name = allocation.agent_name.clone();
            let worker = spawn_worker(allocation);
            join_set.spawn(async move { (name, worker.await) });
        }

        let mut results = Vec::new();
        let mut sources_failed = Vec::new();
        let deadline = tokio::time::sleep(self.config.round_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                joined = join_set.join_next() => {
                    match joined {
                        Some(Ok((_, Ok(result)))) => results.push(result),
                        Some(Ok((name, Err(error)))) => {
                            warn!(agent = %name, %error, "worker failed");
                            sources_failed.push(name);
                        }
                        Some(Err(join_error)) => {
                            warn!(%join_error, "worker panicked");
                            sources_failed.push("unknown".to_string());
                        }
                        None => break,
                    }
                }
                () = &mut deadline => {
                    // Deadline: abandon the stragglers, keep what finished.
                    let abandoned = join_set.len();
                    join_set.abort_all();
                    if abandoned > 0 {
                        warn!(abandoned, "round timeout: abandoning running workers");
                        sources_failed.push(format!("{abandoned} workers timed out"));
                    }
                    break;
                }
            }
        }

        RoundOutcome {
            results,
            sources_failed,
        }
    }

    /// After a round completes, decide what to do next.
    #[instrument(skip(self, rollup_result, vectors), fields(session_id = %self.session_id))]
    pub fn regulate(
        &mut self,
        rollup_result: &RollupResult,
        round_number: u32,
        vectors: Option<&VectorSet>,
    ) -> RegulationDecision {
        let novel_count = rollup_result
            .accepted
            .iter()
            .filter(|f| f.novelty > NOVELTY_FLOOR)
            .count();

        if novel_count == 0 {
            self.rounds_without_novel += 1;
        } else {
            self.rounds_without_novel = 0;
        }

        let neutral = VectorSet::neutral();
        let vectors = vectors.unwrap_or(&neutral);
        let gain = estimate_information_gain(
            "aggregate",
            vectors,
            rollup_result.accepted.len() as u32,
            0,
        );

        let spawn = should_spawn_more(
            rollup_result.budget_remaining,
            gain,
            self.rounds_without_novel,
        );

        let (action, reason) = if !spawn {
            let reason = if rollup_result.budget_remaining == 0 {
                "Budget exhausted".to_string()
            } else if self.rounds_without_novel >= DEFAULT_STALE_ROUNDS {
                format!("No novel findings for {} rounds", self.rounds_without_novel)
            } else {
                format!("Expected gain ({gain:.3}) below threshold {DEFAULT_MIN_GAIN:.3}")
            };
            (RegulationAction::Stop, reason)
        } else if novel_count > 3 {
            (
                RegulationAction::SpawnMore,
                format!("High novelty ({novel_count} novel findings) suggests more investigation is valuable"),
            )
        } else {
            (
                RegulationAction::Continue,
                format!("Moderate gain ({gain:.3}), {novel_count} novel findings"),
            )
        };

        info!(round_number, action = ?action, %reason, "regulation decision");

        RegulationDecision {
            action,
            reason,
            round_number,
            findings_this_round: rollup_result.accepted.len(),
            novel_findings_this_round: novel_count,
            budget_remaining: rollup_result.budget_remaining,
            gain_estimate: gain,
            rounds_without_novel: self.rounds_without_novel,
        }
    }

    /// Merge all agent results: confidence-weighted vectors, first-occurrence
    /// finding dedup, and consensus/conflict domain detection.
    pub fn aggregate(
        &self,
        agent_results: &[AgentResult],
        confidences: Option<&HashMap<String, f64>>,
    ) -> AggregatedSynthesis {
        let mut all_findings = Vec::new();
        let mut all_unknowns = Vec::new();
        let mut agent_summaries = Vec::new();
        let mut domain_findings: HashMap<String, usize> = HashMap::new();
        let mut weighted: BTreeMap<String, f64> = BTreeMap::new();
        let mut total_weight = 0.0;

        for result in agent_results {
            let confidence = confidences
                .and_then(|c| c.get(&result.agent_name).copied())
                .unwrap_or(result.confidence);

            all_findings.extend(result.findings.iter().cloned());
            all_unknowns.extend(result.unknowns.iter().cloned());
            *domain_findings.entry(result.domain.clone()).or_default() += result.findings.len();

            for name in VectorName::ALL {
                *weighted.entry(name.as_str().to_string()).or_default() +=
                    result.vectors.get(name) * confidence;
            }
            total_weight += confidence;

            agent_summaries.push(AgentSummary {
                agent_name: result.agent_name.clone(),
                domain: result.domain.clone(),
                findings_count: result.findings.len(),
                unknowns_count: result.unknowns.len(),
                confidence,
            });
        }

        if total_weight > 0.0 {
            for value in weighted.values_mut() {
                *value /= total_weight;
            }
        }

        // First occurrence wins on exact text match.
        let mut seen = std::collections::HashSet::new();
        let unique_findings: Vec<String> = all_findings
            .iter()
            .filter(|f| seen.insert((*f).clone()))
            .cloned()
            .collect();

        let mut seen_unknowns = std::collections::HashSet::new();
        let unique_unknowns: Vec<String> = all_unknowns
            .iter()
            .filter(|u| seen_unknowns.insert((*u).clone()))
            .cloned()
            .collect();

        let mut consensus = Vec::new();
        let mut conflict = Vec::new();
        for (domain, count) in &domain_findings {
            if *count >= 2 {
                consensus.push(domain.clone());
            } else if *count == 0 {
                conflict.push(domain.clone());
            }
        }
        consensus.sort();
        conflict.sort();

        AggregatedSynthesis {
            total_findings: all_findings.len(),
            total_accepted: unique_findings.len(),
            total_rejected: all_findings.len() - unique_findings.len(),
            findings: unique_findings,
            unknowns: unique_unknowns,
            confidence_weighted_vectors: weighted,
            agent_summaries,
            consensus_domains: consensus,
            conflict_domains: conflict,
        }
    }
}

/// Scan task text for domain keyword signals; fall back to `general`.
fn detect_domains(task: &str) -> Vec<String> {
    let lower = task.to_lowercase();
    let detected: Vec<String> = DOMAIN_SIGNALS
        .iter()
        .filter(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(domain, _)| domain.to_string())
        .collect();

    if detected.is_empty() {
        vec!["general".to_string()]
    } else {
        detected
    }
}
