//! System dashboard: one queryable `/proc`-style snapshot.
//!
//! Aggregates subsystem state (config, context memory, bus counters, latest
//! attention budget, most recent gate decision) so status consumers never
//! poke at individual subsystems. Also subscribes to the bus and counts
//! events it has observed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::bus::EpistemicBus;
use crate::domain::errors::KernelResult;
use crate::domain::models::{CheckDecision, EpistemicEvent, Phase, VectorName};
use crate::domain::ports::EpistemicObserver;
use crate::services::context_budget::{ContextBudgetManager, InventorySummary};
use crate::storage::{BudgetRepository, SessionRepository};

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatus {
    pub tokens_used: u64,
    pub tokens_available: u64,
    pub item_count: usize,
    pub page_faults: u64,
    pub evictions: u64,
}

impl From<InventorySummary> for MemoryStatus {
    fn from(summary: InventorySummary) -> Self {
        Self {
            tokens_used: summary.tokens_used,
            tokens_available: summary.tokens_available,
            item_count: summary.item_count,
            page_faults: summary.page_faults,
            evictions: summary.evictions,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BusStatus {
    pub observer_count: usize,
    pub events_published: u64,
    pub events_observed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttentionStatus {
    pub budget_id: Option<Uuid>,
    pub total_budget: u32,
    pub allocated: u32,
    pub remaining: u32,
    pub domains: Vec<(String, u32)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateStatus {
    pub phase: Option<Phase>,
    pub decision: Option<CheckDecision>,
    pub round: Option<u32>,
    pub know: Option<f64>,
    pub uncertainty: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Aggregated snapshot of kernel state.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub memory: MemoryStatus,
    pub bus: BusStatus,
    pub attention: Option<AttentionStatus>,
    pub gate: GateStatus,
}

impl SystemStatus {
    /// One-line summary for status lines.
    pub fn format_summary(&self) -> String {
        let gate = self
            .gate
            .decision
            .map(|d| d.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        let attention = self
            .attention
            .as_ref()
            .map(|a| format!("{}/{}", a.remaining, a.total_budget))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "mem {}t/{} items | bus {} evts | attn {} | gate {}",
            self.memory.tokens_used, self.memory.item_count, self.bus.events_published, attention, gate
        )
    }
}

pub struct SystemDashboard {
    session_id: Uuid,
    bus: EpistemicBus,
    cbm: Arc<ContextBudgetManager>,
    sessions: SessionRepository,
    budgets: BudgetRepository,
    events_observed: AtomicU64,
}

impl SystemDashboard {
    pub fn new(
        session_id: Uuid,
        bus: EpistemicBus,
        cbm: Arc<ContextBudgetManager>,
        sessions: SessionRepository,
        budgets: BudgetRepository,
    ) -> Self {
        Self {
            session_id,
            bus,
            cbm,
            sessions,
            budgets,
            events_observed: AtomicU64::new(0),
        }
    }

    /// Build the full snapshot. Subsystem read failures degrade the
    /// affected section instead of failing the whole snapshot.
    pub async fn get_system_status(&self) -> SystemStatus {
        let memory = MemoryStatus::from(self.cbm.inventory_summary().await);

        let bus = BusStatus {
            observer_count: self.bus.observer_count().await,
            events_published: self.bus.event_count(),
            events_observed: self.events_observed.load(Ordering::SeqCst),
        };

        let attention = match self.budgets.latest_attention_budget(self.session_id).await {
            Ok(Some(budget)) => Some(AttentionStatus {
                budget_id: Some(budget.id),
                total_budget: budget.total_budget,
                allocated: budget.allocated,
                remaining: budget.remaining,
                domains: budget
                    .allocations
                    .iter()
                    .map(|a| (a.domain.clone(), a.budget))
                    .collect(),
            }),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "dashboard: attention budget read failed");
                None
            }
        };

        let gate = match self
            .sessions
            .latest_reflex(self.session_id, Phase::Check)
            .await
        {
            Ok(Some(reflex)) => GateStatus {
                phase: Some(reflex.phase),
                decision: Some(reflex.decision),
                round: Some(reflex.round),
                know: Some(reflex.vectors.get(VectorName::Know)),
                uncertainty: Some(reflex.vectors.get(VectorName::Uncertainty)),
                timestamp: Some(reflex.timestamp),
            },
            Ok(None) => GateStatus {
                phase: None,
                decision: None,
                round: None,
                know: None,
                uncertainty: None,
                timestamp: None,
            },
            Err(e) => {
                debug!(error = %e, "dashboard: gate read failed");
                GateStatus {
                    phase: None,
                    decision: None,
                    round: None,
                    know: None,
                    uncertainty: None,
                    timestamp: None,
                }
            }
        };

        SystemStatus {
            session_id: self.session_id,
            timestamp: Utc::now(),
            memory,
            bus,
            attention,
            gate,
        }
    }
}

#[async_trait]
impl EpistemicObserver for SystemDashboard {
    fn name(&self) -> &str {
        "system_dashboard"
    }

    async fn handle_event(&self, _event: &EpistemicEvent) -> KernelResult<()> {
        self.events_observed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
