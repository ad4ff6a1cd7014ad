//! Empirica — an epistemic kernel for AI agents.
//!
//! Tracks what an agent knows, allocates investigation resources, gates
//! actions on calibrated confidence, and persists a durable audit trail of
//! cognitive work:
//! - Cascade state machine (PREFLIGHT → INVESTIGATE ↔ CHECK → ACT → POSTFLIGHT)
//! - Context Budget Manager: three-zone token-addressed memory with paging
//! - Attention budget allocation by Shannon information gain
//! - Parallel orchestration with a scored rollup gate
//! - Typed event bus with SQLite (durable) and vector (best-effort) observers
//! - Grounded Bayesian calibration from objective evidence
//! - Git-notes store for findings, phase records, and inter-agent messages
//!
//! The kernel never makes investigation decisions for the agent; it enforces
//! the protocol and records evidence. Vector search and LLM access are
//! optional capabilities that degrade gracefully.

pub mod bus;
pub mod config;
pub mod domain;
pub mod gitstore;
pub mod logging;
pub mod services;
pub mod storage;
pub mod vector;

use std::sync::Arc;

use bus::{EpistemicBus, SqliteEventObserver, VectorEventObserver};
use config::KernelConfig;
use domain::errors::{KernelError, KernelResult};
use domain::models::Session;
use domain::ports::{EmbeddingProvider, VectorBackend};
use services::{
    CascadeStateMachine, ContextBudgetManager, GroundedCalibrationManager, ParallelOrchestrator,
    RollupGate, SystemDashboard, TrustCalculator,
};
use storage::{
    all_embedded_migrations, ArtifactRepository, BudgetRepository, CalibrationRepository,
    EventRepository, GoalRepository, Migrator, SessionRepository,
};

/// The assembled kernel for one session.
///
/// Constructed explicitly at session start and passed by reference; there is
/// no implicit global instance.
pub struct EpistemicKernel {
    pub config: KernelConfig,
    pub session: Session,
    pub bus: EpistemicBus,
    pub sessions: SessionRepository,
    pub goals: GoalRepository,
    pub artifacts: ArtifactRepository,
    pub events: EventRepository,
    pub budgets: BudgetRepository,
    pub calibration_store: CalibrationRepository,
    pub cascade: CascadeStateMachine,
    pub context_budget: Arc<ContextBudgetManager>,
    pub grounded: Arc<GroundedCalibrationManager>,
    pub dashboard: Arc<SystemDashboard>,
}

impl EpistemicKernel {
    /// Build a kernel over an existing pool: run migrations, create the
    /// session row, wire the bus observers (SQLite always; vector backend
    /// and dashboard when provided), and assemble services.
    pub async fn bootstrap(
        config: KernelConfig,
        pool: sqlx::SqlitePool,
        session: Session,
        vector_capability: Option<(Arc<dyn VectorBackend>, Arc<dyn EmbeddingProvider>)>,
    ) -> KernelResult<Self> {
        config
            .validate()
            .map_err(|e| KernelError::BadInput(e.to_string()))?;

        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .map_err(|e| KernelError::PersistFailed(e.to_string()))?;

        let sessions = SessionRepository::new(pool.clone());
        let goals = GoalRepository::new(pool.clone());
        let artifacts = ArtifactRepository::new(pool.clone());
        let events = EventRepository::new(pool.clone(), session.ai_id.clone());
        let budgets = BudgetRepository::new(pool.clone());
        let calibration_store = CalibrationRepository::new(pool.clone());

        sessions.create(&session).await?;

        let bus = EpistemicBus::new();
        bus.subscribe(Arc::new(SqliteEventObserver::new(events.clone())))
            .await;

        if let Some((backend, embeddings)) = vector_capability {
            let observer = Arc::new(VectorEventObserver::new(
                backend,
                embeddings,
                session.ai_id.clone(),
            ));
            // Best-effort: collection creation failure only disables enrichment.
            let _ = observer.ensure_collection().await;
            bus.subscribe(observer).await;
        }

        let context_budget = Arc::new(ContextBudgetManager::new(
            session.session_id,
            config.budget_thresholds(),
            bus.clone(),
        ));
        bus.subscribe(context_budget.clone()).await;

        let cascade =
            CascadeStateMachine::new(sessions.clone(), bus.clone(), config.cascade_config());

        let grounded = Arc::new(GroundedCalibrationManager::new(
            config.calibration_config(),
            sessions.clone(),
            goals.clone(),
            artifacts.clone(),
            calibration_store.clone(),
        ));

        let dashboard = Arc::new(SystemDashboard::new(
            session.session_id,
            bus.clone(),
            context_budget.clone(),
            sessions.clone(),
            budgets.clone(),
        ));
        bus.subscribe(dashboard.clone()).await;

        Ok(Self {
            config,
            session,
            bus,
            sessions,
            goals,
            artifacts,
            events,
            budgets,
            calibration_store,
            cascade,
            context_budget,
            grounded,
            dashboard,
        })
    }

    /// Orchestrator bound to this session's stores.
    pub fn orchestrator(&self) -> ParallelOrchestrator {
        ParallelOrchestrator::new(
            self.session.session_id,
            self.config.orchestrator_config(),
            self.config.attention_config(),
            self.artifacts.clone(),
            self.budgets.clone(),
        )
    }

    /// Rollup gate with this kernel's thresholds.
    pub fn rollup_gate(&self) -> RollupGate {
        RollupGate::new(self.config.rollup_config())
    }

    /// Trust calculator over this kernel's stores.
    pub fn trust_calculator(&self) -> TrustCalculator {
        TrustCalculator::new(
            self.artifacts.clone(),
            GroundedCalibrationManager::new(
                self.config.calibration_config(),
                self.sessions.clone(),
                self.goals.clone(),
                self.artifacts.clone(),
                self.calibration_store.clone(),
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::create_test_pool;

    #[tokio::test]
    async fn test_bootstrap_wires_observers() {
        let pool = create_test_pool().await.unwrap();
        let session = Session::new("a1", "proj");
        let kernel = EpistemicKernel::bootstrap(KernelConfig::default(), pool, session, None)
            .await
            .unwrap();

        // SQLite observer + CBM + dashboard.
        assert_eq!(kernel.bus.observer_count().await, 3);
        assert!(kernel
            .sessions
            .exists(kernel.session.session_id)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_bootstrap_rejects_invalid_config() {
        let pool = create_test_pool().await.unwrap();
        let mut config = KernelConfig::default();
        config.cascade.confidence_threshold_caveat = 0.95;

        let err = match EpistemicKernel::bootstrap(config, pool, Session::new("a1", "p"), None)
            .await
        {
            Ok(_) => panic!("expected bootstrap to reject invalid config"),
            Err(e) => e,
        };
        assert!(matches!(err, KernelError::BadInput(_)));
    }
}
