//! SQLite storage layer.
//!
//! Repositories share one pool; each write is a single statement or an
//! explicit transaction. Reads may run concurrently under WAL.

pub mod artifact_repository;
pub mod budget_repository;
pub mod calibration_repository;
pub mod connection;
pub mod event_repository;
pub mod goal_repository;
pub mod migrations;
pub mod session_repository;

pub use artifact_repository::{ArtifactRepository, ScopedCounts};
pub use budget_repository::{BudgetRepository, ContextBudgetState, RollupLogEntry};
pub use calibration_repository::CalibrationRepository;
pub use connection::{create_pool, create_test_pool, verify_connection, PoolConfig};
pub use event_repository::{EventRepository, StoredEvent};
pub use goal_repository::GoalRepository;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use session_repository::SessionRepository;
