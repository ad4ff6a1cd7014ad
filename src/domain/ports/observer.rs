//! Observer port for the epistemic bus.

use async_trait::async_trait;

use crate::domain::errors::KernelResult;
use crate::domain::models::event::EpistemicEvent;

/// A bus subscriber. Implementations must be cheap: the bus dispatches
/// synchronously on the publishing flow, and a slow observer stalls the
/// publisher. Failures are logged by the bus and never propagated.
#[async_trait]
pub trait EpistemicObserver: Send + Sync {
    /// Stable name used in dispatch failure logs.
    fn name(&self) -> &str;

    async fn handle_event(&self, event: &EpistemicEvent) -> KernelResult<()>;
}
