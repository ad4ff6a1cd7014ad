//! Injection handler port for the Context Budget Manager.

use async_trait::async_trait;

use crate::domain::errors::KernelResult;
use crate::domain::models::context::InjectionRequest;

/// Delivers injected content through a specific channel (hook, skill, MCP).
///
/// Handlers are keyed by channel; re-registering a channel overwrites the
/// previous handler so a request is never delivered twice.
#[async_trait]
pub trait InjectionHandler: Send + Sync {
    async fn inject(&self, request: &InjectionRequest) -> KernelResult<()>;
}
