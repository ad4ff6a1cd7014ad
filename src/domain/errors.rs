//! Kernel error taxonomy.
//!
//! Every fallible kernel operation returns `KernelResult`. Best-effort paths
//! (vector indexing, optional observers) catch and log instead of propagating.

use thiserror::Error;

/// Errors surfaced by the epistemic kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Referenced session does not exist.
    #[error("Session not found: {0}")]
    NoSession(String),

    /// Attempted transition that violates the cascade state machine.
    #[error("Phase violation: {0}")]
    PhaseViolation(String),

    /// Context budget rejected a registration or injection.
    #[error("Budget exceeded: {0}")]
    BudgetExceeded(String),

    /// A git, database, or capability call exceeded its deadline.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A durable write failed; the caller must not assume the operation took effect.
    #[error("Persistence failed: {0}")]
    PersistFailed(String),

    /// An optional capability (vector backend, embedding) is not configured.
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(String),

    /// Malformed input: out-of-range vectors, unknown phase, empty required field.
    #[error("Bad input: {0}")]
    BadInput(String),

    /// Underlying serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Git subprocess failure that is not a timeout.
    #[error("Git operation failed: {0}")]
    Git(String),
}

pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Returns true if a retry at a higher level could succeed.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::PersistFailed(_))
    }

    /// Returns true if the caller should degrade gracefully rather than fail.
    pub const fn is_degradable(&self) -> bool {
        matches!(self, Self::CapabilityUnavailable(_))
    }
}

impl From<sqlx::Error> for KernelError {
    fn from(err: sqlx::Error) -> Self {
        KernelError::PersistFailed(err.to_string())
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(err: serde_json::Error) -> Self {
        KernelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_session_display() {
        let err = KernelError::NoSession("abc123".to_string());
        assert_eq!(err.to_string(), "Session not found: abc123");
    }

    #[test]
    fn test_transient_classification() {
        assert!(KernelError::PersistFailed("disk full".into()).is_transient());
        assert!(KernelError::Timeout(std::time::Duration::from_secs(5)).is_transient());
        assert!(!KernelError::BadInput("NaN vector".into()).is_transient());
    }

    #[test]
    fn test_capability_is_degradable() {
        assert!(KernelError::CapabilityUnavailable("qdrant".into()).is_degradable());
        assert!(!KernelError::NoSession("x".into()).is_degradable());
    }
}
