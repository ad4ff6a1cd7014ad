//! Rollup gate: score, deduplicate, and gate sub-agent findings.
//!
//! Quality control for multi-agent rollup. Findings flow through this gate
//! before merging into the parent session:
//! 1. score = confidence × novelty × domain_relevance
//! 2. dedup by content hash, then Jaccard similarity, then (optionally)
//!    semantic similarity when a vector backend is present
//! 3. gate against the attention budget, highest score first
//!
//! Every decision lands in the rollup log table for auditability.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::content_hash;
use crate::domain::ports::{EmbeddingProvider, VectorBackend};
use crate::services::information_gain::{jaccard_similarity, novelty_score};
use crate::storage::{BudgetRepository, RollupLogEntry};

#[derive(Debug, Clone)]
pub struct RollupConfig {
    pub min_score: f64,
    pub jaccard_threshold: f64,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            min_score: 0.3,
            jaccard_threshold: 0.7,
        }
    }
}

/// A finding scored for rollup quality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredFinding {
    pub finding: String,
    pub score: f64,
    pub agent_name: String,
    pub domain: String,
    pub novelty: f64,
    pub confidence: f64,
    pub domain_relevance: f64,
    pub finding_hash: String,
    pub accepted: bool,
    pub reject_reason: Option<String>,
}

/// Result of running findings through the gate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollupResult {
    pub accepted: Vec<ScoredFinding>,
    pub rejected: Vec<ScoredFinding>,
    pub total_score: f64,
    pub budget_consumed: u32,
    pub budget_remaining: u32,
}

impl RollupResult {
    pub fn acceptance_rate(&self) -> f64 {
        let total = self.accepted.len() + self.rejected.len();
        if total == 0 {
            return 0.0;
        }
        self.accepted.len() as f64 / total as f64
    }
}

pub struct RollupGate {
    config: RollupConfig,
    /// Semantic dedup capability; skipped when absent.
    semantic: Option<(Arc<dyn VectorBackend>, Arc<dyn EmbeddingProvider>)>,
}

impl RollupGate {
    pub fn new(config: RollupConfig) -> Self {
        Self {
            config,
            semantic: None,
        }
    }

    pub fn with_semantic_dedup(
        mut self,
        backend: Arc<dyn VectorBackend>,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        self.semantic = Some((backend, embeddings));
        self
    }

    /// Score a single finding against what is already known.
    pub fn score_finding(
        &self,
        finding: &str,
        agent_name: &str,
        domain: &str,
        confidence: f64,
        existing: &[String],
        domain_relevance: f64,
    ) -> ScoredFinding {
        let novelty = novelty_score(finding, existing);
        let score = confidence * novelty * domain_relevance;
        debug!(
            score,
            confidence, novelty, domain_relevance, agent_name, "scored finding"
        );
        ScoredFinding {
            finding: finding.to_string(),
            score,
            agent_name: agent_name.to_string(),
            domain: domain.to_string(),
            novelty,
            confidence,
            domain_relevance,
            finding_hash: content_hash(finding),
            accepted: false,
            reject_reason: None,
        }
    }

    /// Deduplicate: keep the highest-scored finding per content hash, then
    /// drop findings Jaccard-similar to a higher-scored survivor, then an
    /// optional semantic pass.
    pub async fn deduplicate(&self, findings: Vec<ScoredFinding>) -> Vec<ScoredFinding> {
        let original = findings.len();

        let mut by_hash: HashMap<String, ScoredFinding> = HashMap::new();
        for f in findings {
            match by_hash.get(&f.finding_hash) {
                Some(existing) if existing.score >= f.score => {}
                _ => {
                    by_hash.insert(f.finding_hash.clone(), f);
                }
            }
        }
        let mut deduped: Vec<ScoredFinding> = by_hash.into_values().collect();

        if deduped.len() > 1 {
            deduped = self.jaccard_dedup(deduped);
        }
        if self.semantic.is_some() {
            deduped = self.semantic_dedup(deduped).await;
        }

        let removed = original - deduped.len();
        if removed > 0 {
            info!(removed, kept = deduped.len(), "deduplication dropped findings");
        }
        deduped
    }

    fn jaccard_dedup(&self, findings: Vec<ScoredFinding>) -> Vec<ScoredFinding> {
        let mut sorted = findings;
        sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut kept: Vec<ScoredFinding> = Vec::new();
        for candidate in sorted {
            let duplicate = kept.iter().any(|existing| {
                jaccard_similarity(&candidate.finding, &existing.finding)
                    >= self.config.jaccard_threshold
            });
            if !duplicate {
                kept.push(candidate);
            }
        }
        kept
    }

    /// Near-duplicate detection against the eidetic collection. Degrades to
    /// a pass-through on any capability failure.
    async fn semantic_dedup(&self, findings: Vec<ScoredFinding>) -> Vec<ScoredFinding> {
        let Some((backend, embeddings)) = &self.semantic else {
            return findings;
        };

        let mut kept = Vec::with_capacity(findings.len());
        for finding in findings {
            let vector = match embeddings.embed(&finding.finding).await {
                Ok(v) => v,
                Err(_) => {
                    kept.push(finding);
                    continue;
                }
            };
            match backend.query_points("eidetic", &vector, None, 1).await {
                Ok(points) if points.first().is_some_and(|p| p.score >= 0.9) => {
                    debug!(hash = %finding.finding_hash, "semantic dedup dropped finding");
                }
                _ => kept.push(finding),
            }
        }
        kept
    }

    /// Accept highest-scored findings first until the budget runs out.
    pub fn gate(&self, findings: Vec<ScoredFinding>, budget_remaining: u32) -> RollupResult {
        let mut sorted = findings;
        sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let mut result = RollupResult {
            budget_remaining,
            ..RollupResult::default()
        };

        for mut finding in sorted {
            if finding.score < self.config.min_score {
                finding.accepted = false;
                finding.reject_reason = Some(format!(
                    "Below min_score ({:.3} < {})",
                    finding.score, self.config.min_score
                ));
                result.rejected.push(finding);
            } else if result.budget_consumed >= budget_remaining {
                finding.accepted = false;
                finding.reject_reason = Some("Budget exhausted".to_string());
                result.rejected.push(finding);
            } else {
                finding.accepted = true;
                result.total_score += finding.score;
                result.budget_consumed += 1;
                result.accepted.push(finding);
            }
        }

        result.budget_remaining = budget_remaining - result.budget_consumed;
        info!(
            accepted = result.accepted.len(),
            rejected = result.rejected.len(),
            budget_consumed = result.budget_consumed,
            "rollup gate complete"
        );
        result
    }

    /// Full pipeline: score → deduplicate → gate.
    #[allow(clippy::too_many_arguments)]
    pub async fn process(
        &self,
        raw_findings: &[String],
        agent_name: &str,
        domain: &str,
        confidence: f64,
        existing: &[String],
        budget_remaining: u32,
        domain_relevance: f64,
    ) -> RollupResult {
        let mut scored: Vec<ScoredFinding> = Vec::with_capacity(raw_findings.len());
        for text in raw_findings {
            // Each finding's novelty accounts for both session history and
            // findings scored earlier in this batch.
            let mut pool: Vec<String> = existing.to_vec();
            pool.extend(scored.iter().map(|f: &ScoredFinding| f.finding.clone()));
            scored.push(self.score_finding(
                text,
                agent_name,
                domain,
                confidence,
                &pool,
                domain_relevance,
            ));
        }

        let deduped = self.deduplicate(scored).await;
        self.gate(deduped, budget_remaining)
    }

    /// Write one log row per decision (accepted or rejected).
    pub async fn log_decisions(
        &self,
        repo: &BudgetRepository,
        session_id: Uuid,
        budget_id: Option<Uuid>,
        result: &RollupResult,
    ) -> KernelResult<u32> {
        let mut logged = 0;
        for finding in result.accepted.iter().chain(result.rejected.iter()) {
            repo.log_rollup_decision(&RollupLogEntry {
                session_id,
                budget_id,
                agent_name: finding.agent_name.clone(),
                finding_hash: finding.finding_hash.clone(),
                finding_text: finding.finding.clone(),
                score: finding.score,
                accepted: finding.accepted,
                reason: finding.reject_reason.clone(),
                novelty: finding.novelty,
                domain_relevance: finding.domain_relevance,
            })
            .await?;
            logged += 1;
        }
        Ok(logged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> RollupGate {
        RollupGate::new(RollupConfig::default())
    }

    #[tokio::test]
    async fn test_duplicate_findings_keep_higher_confidence() {
        // Two agents report the same finding at different confidences; the
        // 0.9 copy survives hash dedup and consumes exactly one budget unit.
        let gate = gate();
        let text = "OAuth2 module lacks PKCE";

        let high = gate.score_finding(text, "agent_a", "security", 0.9, &[], 1.0);
        let low = gate.score_finding(text, "agent_b", "security", 0.6, &[], 1.0);
        assert_eq!(high.finding_hash, low.finding_hash);

        let deduped = gate.deduplicate(vec![low, high]).await;
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].agent_name, "agent_a");

        let result = gate.gate(deduped, 5);
        assert_eq!(result.accepted.len(), 1);
        assert_eq!(result.budget_consumed, 1);
        assert_eq!(result.budget_remaining, 4);
    }

    #[tokio::test]
    async fn test_jaccard_dedup_keeps_higher_score() {
        let gate = gate();
        let a = gate.score_finding(
            "connection pool exhausted under sustained load",
            "a",
            "performance",
            0.9,
            &[],
            1.0,
        );
        let b = gate.score_finding(
            "connection pool exhausted under heavy load",
            "b",
            "performance",
            0.5,
            &[],
            1.0,
        );
        let deduped = gate.deduplicate(vec![b, a]).await;
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].agent_name, "a");
    }

    #[test]
    fn test_gate_rejects_below_min_score() {
        let gate = gate();
        let weak = gate.score_finding("weak hunch", "a", "general", 0.2, &[], 1.0);
        let result = gate.gate(vec![weak], 5);
        assert!(result.accepted.is_empty());
        assert_eq!(result.rejected.len(), 1);
        assert!(result.rejected[0]
            .reject_reason
            .as_deref()
            .unwrap()
            .starts_with("Below min_score"));
    }

    #[test]
    fn test_gate_budget_exhaustion() {
        let gate = gate();
        let findings: Vec<ScoredFinding> = (0..3)
            .map(|i| {
                gate.score_finding(
                    &format!("distinct finding number {i} about subsystem {i}"),
                    "a",
                    "general",
                    0.9,
                    &[],
                    1.0,
                )
            })
            .collect();

        let result = gate.gate(findings, 2);
        assert_eq!(result.accepted.len(), 2);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(
            result.rejected[0].reject_reason.as_deref(),
            Some("Budget exhausted")
        );
        assert_eq!(result.budget_remaining, 0);
    }

    #[test]
    fn test_acceptance_rate() {
        let result = RollupResult::default();
        assert_eq!(result.acceptance_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_accepted_invariant_holds() {
        let gate = gate();
        let result = gate
            .process(
                &[
                    "the scheduler starves low priority tasks".to_string(),
                    "hmm".to_string(),
                ],
                "agent",
                "scheduling",
                0.9,
                &[],
                5,
                1.0,
            )
            .await;

        for f in &result.accepted {
            assert!(f.score >= 0.3);
        }
        for f in &result.rejected {
            assert!(f.score < 0.3 || f.reject_reason.as_deref() == Some("Budget exhausted"));
        }
    }
}
