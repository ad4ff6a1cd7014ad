//! Attention budget: an integer findings quota spread across domains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Budget allocation for a single investigation domain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainAllocation {
    pub domain: String,
    /// Max findings to accept from this domain. Always >= 1.
    pub budget: u32,
    /// 0.0-1.0, relative to the best domain this round.
    pub priority: f64,
    /// Estimated Shannon information gain.
    pub expected_gain: f64,
    pub prior_findings: u32,
    pub dead_ends: u32,
}

impl DomainAllocation {
    /// Budget remaining after accounting for findings already logged.
    pub fn effective_budget(&self) -> u32 {
        self.budget.saturating_sub(self.prior_findings)
    }
}

/// Tracks the findings budget for a parallel investigation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttentionBudget {
    pub id: Uuid,
    pub session_id: Uuid,
    pub total_budget: u32,
    pub allocated: u32,
    pub remaining: u32,
    pub strategy: String,
    pub allocations: Vec<DomainAllocation>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttentionBudget {
    pub fn new(session_id: Uuid, total_budget: u32, allocations: Vec<DomainAllocation>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            session_id,
            total_budget,
            allocated: 0,
            remaining: total_budget,
            strategy: "information_gain".to_string(),
            allocations,
            created_at: now,
            updated_at: now,
        }
    }

    /// Consume budget. Returns false if insufficient remains.
    pub fn consume(&mut self, count: u32) -> bool {
        if self.remaining < count {
            return false;
        }
        self.allocated += count;
        self.remaining -= count;
        self.updated_at = Utc::now();
        true
    }

    pub fn exhausted(&self) -> bool {
        self.remaining == 0
    }

    /// Budget utilization ratio (0.0-1.0).
    pub fn utilization(&self) -> f64 {
        if self.total_budget == 0 {
            return 0.0;
        }
        f64::from(self.allocated) / f64::from(self.total_budget)
    }

    pub fn allocation_for(&self, domain: &str) -> Option<&DomainAllocation> {
        self.allocations.iter().find(|a| a.domain == domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget_with(total: u32) -> AttentionBudget {
        AttentionBudget::new(Uuid::new_v4(), total, Vec::new())
    }

    #[test]
    fn test_consume_within_budget() {
        let mut budget = budget_with(10);
        assert!(budget.consume(3));
        assert_eq!(budget.allocated, 3);
        assert_eq!(budget.remaining, 7);
        assert!(!budget.exhausted());
    }

    #[test]
    fn test_consume_rejects_over_budget() {
        let mut budget = budget_with(2);
        assert!(budget.consume(2));
        assert!(!budget.consume(1));
        assert_eq!(budget.remaining, 0);
        assert!(budget.exhausted());
    }

    #[test]
    fn test_utilization() {
        let mut budget = budget_with(20);
        budget.consume(5);
        assert!((budget.utilization() - 0.25).abs() < 1e-9);
        assert_eq!(budget_with(0).utilization(), 0.0);
    }

    #[test]
    fn test_effective_budget_saturates() {
        let alloc = DomainAllocation {
            domain: "security".into(),
            budget: 3,
            priority: 1.0,
            expected_gain: 0.5,
            prior_findings: 5,
            dead_ends: 0,
        };
        assert_eq!(alloc.effective_budget(), 0);
    }
}
