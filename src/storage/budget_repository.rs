//! Persistence for attention budgets, CBM state, and rollup decisions.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::session_repository::{parse_datetime, parse_uuid};
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{AttentionBudget, BudgetThresholds, ContextItem, DomainAllocation};

#[derive(Clone)]
pub struct BudgetRepository {
    pool: SqlitePool,
}

/// One logged rollup gate decision.
#[derive(Debug, Clone)]
pub struct RollupLogEntry {
    pub session_id: Uuid,
    pub budget_id: Option<Uuid>,
    pub agent_name: String,
    pub finding_hash: String,
    pub finding_text: String,
    pub score: f64,
    pub accepted: bool,
    pub reason: Option<String>,
    pub novelty: f64,
    pub domain_relevance: f64,
}

/// Persisted CBM state for cross-session continuity.
#[derive(Debug, Clone)]
pub struct ContextBudgetState {
    pub session_id: Uuid,
    pub inventory: Vec<ContextItem>,
    pub thresholds: BudgetThresholds,
    pub page_faults: u64,
    pub evictions: u64,
}

#[derive(sqlx::FromRow)]
struct AttentionRow {
    id: String,
    session_id: String,
    total_budget: i64,
    allocated: i64,
    remaining: i64,
    strategy: String,
    domain_allocations_json: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AttentionRow> for AttentionBudget {
    type Error = KernelError;

    fn try_from(row: AttentionRow) -> KernelResult<Self> {
        let allocations: Vec<DomainAllocation> =
            serde_json::from_str(&row.domain_allocations_json)?;
        Ok(AttentionBudget {
            id: parse_uuid(&row.id)?,
            session_id: parse_uuid(&row.session_id)?,
            total_budget: row.total_budget as u32,
            allocated: row.allocated as u32,
            remaining: row.remaining as u32,
            strategy: row.strategy,
            allocations,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

impl BudgetRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh an attention budget snapshot.
    pub async fn save_attention_budget(&self, budget: &AttentionBudget) -> KernelResult<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO attention_budgets
             (id, session_id, total_budget, allocated, remaining, strategy,
              domain_allocations_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(budget.id.to_string())
        .bind(budget.session_id.to_string())
        .bind(i64::from(budget.total_budget))
        .bind(i64::from(budget.allocated))
        .bind(i64::from(budget.remaining))
        .bind(&budget.strategy)
        .bind(serde_json::to_string(&budget.allocations)?)
        .bind(budget.created_at.to_rfc3339())
        .bind(budget.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_attention_budget(&self, id: Uuid) -> KernelResult<Option<AttentionBudget>> {
        let row: Option<AttentionRow> = sqlx::query_as(
            "SELECT id, session_id, total_budget, allocated, remaining, strategy,
                    domain_allocations_json, created_at, updated_at
             FROM attention_budgets WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(AttentionBudget::try_from).transpose()
    }

    pub async fn latest_attention_budget(
        &self,
        session_id: Uuid,
    ) -> KernelResult<Option<AttentionBudget>> {
        let row: Option<AttentionRow> = sqlx::query_as(
            "SELECT id, session_id, total_budget, allocated, remaining, strategy,
                    domain_allocations_json, created_at, updated_at
             FROM attention_budgets WHERE session_id = ?
             ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(AttentionBudget::try_from).transpose()
    }

    pub async fn save_context_state(&self, state: &ContextBudgetState) -> KernelResult<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO context_budget_state
             (session_id, inventory_json, thresholds_json, page_faults, evictions, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
               inventory_json = excluded.inventory_json,
               thresholds_json = excluded.thresholds_json,
               page_faults = excluded.page_faults,
               evictions = excluded.evictions,
               updated_at = excluded.updated_at",
        )
        .bind(state.session_id.to_string())
        .bind(serde_json::to_string(&state.inventory)?)
        .bind(serde_json::to_string(&state.thresholds)?)
        .bind(state.page_faults as i64)
        .bind(state.evictions as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn load_context_state(
        &self,
        session_id: Uuid,
    ) -> KernelResult<Option<ContextBudgetState>> {
        let row: Option<(String, String, i64, i64)> = sqlx::query_as(
            "SELECT inventory_json, thresholds_json, page_faults, evictions
             FROM context_budget_state WHERE session_id = ?",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(inventory_json, thresholds_json, page_faults, evictions)| {
            Ok(ContextBudgetState {
                session_id,
                inventory: serde_json::from_str(&inventory_json)?,
                thresholds: serde_json::from_str(&thresholds_json)?,
                page_faults: page_faults as u64,
                evictions: evictions as u64,
            })
        })
        .transpose()
    }

    pub async fn log_rollup_decision(&self, entry: &RollupLogEntry) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO rollup_logs
             (id, session_id, budget_id, agent_name, finding_hash, finding_text,
              score, accepted, reason, novelty, domain_relevance, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(entry.session_id.to_string())
        .bind(entry.budget_id.map(|id| id.to_string()))
        .bind(&entry.agent_name)
        .bind(&entry.finding_hash)
        .bind(truncate(&entry.finding_text, 500))
        .bind(entry.score)
        .bind(entry.accepted)
        .bind(&entry.reason)
        .bind(entry.novelty)
        .bind(entry.domain_relevance)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_rollup_logs(&self, session_id: Uuid) -> KernelResult<u64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rollup_logs WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u64)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
