//! Attention budget allocation by Shannon information gain.
//!
//! Domains with higher uncertainty get more budget. Prior findings apply
//! diminishing returns; dead ends penalize heavily to avoid re-exploration.

use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::models::{AttentionBudget, DomainAllocation, VectorName, VectorSet};
use crate::services::information_gain::{diminishing_returns, shannon_entropy};

#[derive(Debug, Clone)]
pub struct AttentionConfig {
    pub default_total: u32,
    pub dead_end_penalty: f64,
    pub diminishing_rate: f64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            default_total: 20,
            dead_end_penalty: 0.5,
            diminishing_rate: 0.3,
        }
    }
}

pub struct AttentionBudgetCalculator {
    session_id: Uuid,
    config: AttentionConfig,
}

impl AttentionBudgetCalculator {
    pub fn new(session_id: Uuid, config: AttentionConfig) -> Self {
        Self { session_id, config }
    }

    /// Create a budget with per-domain allocations.
    ///
    /// Invariants: every allocation gets at least 1, and the allocations sum
    /// to exactly the total. An empty domain list yields no allocations and
    /// `remaining == total`.
    pub fn create_budget(
        &self,
        domains: &[String],
        vectors: Option<&VectorSet>,
        prior_findings: &HashMap<String, u32>,
        dead_ends: &HashMap<String, u32>,
        total_budget: Option<u32>,
    ) -> AttentionBudget {
        let total = total_budget.unwrap_or(self.config.default_total);
        let neutral = VectorSet::neutral();
        let vectors = vectors.unwrap_or(&neutral);

        if domains.is_empty() {
            return AttentionBudget::new(self.session_id, total, Vec::new());
        }

        let raw_gains: Vec<f64> = domains
            .iter()
            .map(|domain| {
                self.estimate_domain_gain(
                    domain,
                    vectors,
                    prior_findings.get(domain).copied().unwrap_or(0),
                    dead_ends.get(domain).copied().unwrap_or(0),
                )
            })
            .collect();

        let total_gain: f64 = raw_gains.iter().sum();
        let max_gain = raw_gains.iter().copied().fold(0.0_f64, f64::max).max(0.01);

        let mut allocations: Vec<DomainAllocation> = domains
            .iter()
            .zip(raw_gains.iter())
            .map(|(domain, gain)| {
                let share = if total_gain > 0.0 {
                    gain / total_gain
                } else {
                    1.0 / domains.len() as f64
                };
                let budget = ((share * f64::from(total)).round() as u32).max(1);
                DomainAllocation {
                    domain: domain.clone(),
                    budget,
                    priority: gain / max_gain,
                    expected_gain: *gain,
                    prior_findings: prior_findings.get(domain).copied().unwrap_or(0),
                    dead_ends: dead_ends.get(domain).copied().unwrap_or(0),
                }
            })
            .collect();

        rebalance(&mut allocations, total);

        info!(
            total,
            domains = ?allocations
                .iter()
                .map(|a| (a.domain.as_str(), a.budget))
                .collect::<Vec<_>>(),
            "created attention budget"
        );

        AttentionBudget::new(self.session_id, total, allocations)
    }

    /// `H(uncertainty) × (1 − know) × e^(−rate·priors) × dead_end_factor`.
    fn estimate_domain_gain(
        &self,
        domain: &str,
        vectors: &VectorSet,
        prior_findings: u32,
        dead_ends: u32,
    ) -> f64 {
        let entropy = shannon_entropy(vectors.get(VectorName::Uncertainty));
        let knowledge_gap = (1.0 - vectors.get(VectorName::Know)).max(0.01);
        let base_gain = entropy * knowledge_gap;

        let diminishing = diminishing_returns(prior_findings, self.config.diminishing_rate);
        let dead_end_factor =
            (1.0 - f64::from(dead_ends) * self.config.dead_end_penalty).max(0.1);

        let gain = base_gain * diminishing * dead_end_factor;
        debug!(
            domain,
            base_gain, diminishing, dead_end_factor, gain, "domain gain"
        );
        gain
    }
}

/// Adjust allocations so they sum exactly to `total` while keeping every
/// budget at least 1: shrink lowest-priority domains first when over,
/// give any surplus to the highest-priority domain when under.
fn rebalance(allocations: &mut [DomainAllocation], total: u32) {
    if allocations.is_empty() {
        return;
    }
    let allocated: u32 = allocations.iter().map(|a| a.budget).sum();

    if allocated > total {
        let mut diff = allocated - total;
        allocations.sort_by(|a, b| {
            a.priority
                .partial_cmp(&b.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for alloc in allocations.iter_mut() {
            if diff == 0 {
                break;
            }
            let reduce = (alloc.budget - 1).min(diff);
            alloc.budget -= reduce;
            diff -= reduce;
        }
    } else if allocated < total {
        allocations.sort_by(|a, b| {
            b.priority
                .partial_cmp(&a.priority)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        allocations[0].budget += total - allocated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> AttentionBudgetCalculator {
        AttentionBudgetCalculator::new(Uuid::new_v4(), AttentionConfig::default())
    }

    #[test]
    fn test_empty_domains_keeps_full_budget() {
        let budget = calc().create_budget(&[], None, &HashMap::new(), &HashMap::new(), Some(20));
        assert!(budget.allocations.is_empty());
        assert_eq!(budget.remaining, 20);
        assert_eq!(budget.total_budget, 20);
    }

    #[test]
    fn test_sum_equals_total_and_min_one() {
        let domains: Vec<String> = ["security", "architecture", "performance"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let budget = calc().create_budget(&domains, None, &HashMap::new(), &HashMap::new(), Some(20));

        let sum: u32 = budget.allocations.iter().map(|a| a.budget).sum();
        assert_eq!(sum, 20);
        assert!(budget.allocations.iter().all(|a| a.budget >= 1));
    }

    #[test]
    fn test_penalized_domain_gets_less() {
        // Scenario: security has priors and dead ends, performance is fresh.
        let domains: Vec<String> = ["security", "performance"].iter().map(|s| s.to_string()).collect();
        let vectors = VectorSet::neutral()
            .with(VectorName::Know, 0.4)
            .with(VectorName::Uncertainty, 0.7);
        let priors = HashMap::from([("security".to_string(), 3)]);
        let dead_ends = HashMap::from([("security".to_string(), 2)]);

        let budget = calc().create_budget(&domains, Some(&vectors), &priors, &dead_ends, Some(10));

        let security = budget.allocation_for("security").unwrap();
        let performance = budget.allocation_for("performance").unwrap();
        assert!(performance.budget > security.budget);
        assert!(security.budget >= 1);
        let sum: u32 = budget.allocations.iter().map(|a| a.budget).sum();
        assert_eq!(sum, 10);
    }

    #[test]
    fn test_extreme_uncertainty_never_nan() {
        let domains = vec!["general".to_string()];
        for uncertainty in [0.0, 1.0] {
            let vectors = VectorSet::neutral().with(VectorName::Uncertainty, uncertainty);
            let budget =
                calc().create_budget(&domains, Some(&vectors), &HashMap::new(), &HashMap::new(), None);
            assert!(budget.allocations[0].expected_gain.is_finite());
        }
    }

    #[test]
    fn test_single_domain_takes_whole_budget() {
        let domains = vec!["general".to_string()];
        let budget = calc().create_budget(&domains, None, &HashMap::new(), &HashMap::new(), Some(7));
        assert_eq!(budget.allocations[0].budget, 7);
    }
}
