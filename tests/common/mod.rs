//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use empirica::config::KernelConfig;
use empirica::domain::models::Session;
use empirica::storage::create_test_pool;
use empirica::EpistemicKernel;

/// Bootstrap a kernel over an in-memory database for a fresh session.
pub async fn test_kernel() -> EpistemicKernel {
    test_kernel_for("a1", "test-project").await
}

pub async fn test_kernel_for(ai_id: &str, project_id: &str) -> EpistemicKernel {
    let pool = create_test_pool().await.expect("failed to create test pool");
    let session = Session::new(ai_id, project_id);
    EpistemicKernel::bootstrap(KernelConfig::default(), pool, session, None)
        .await
        .expect("failed to bootstrap kernel")
}

/// Bootstrap a kernel wired with the given vector capability.
pub async fn test_kernel_with_vectors(
    backend: Arc<dyn empirica::domain::ports::VectorBackend>,
    embeddings: Arc<dyn empirica::domain::ports::EmbeddingProvider>,
) -> EpistemicKernel {
    let pool = create_test_pool().await.expect("failed to create test pool");
    let session = Session::new("a1", "test-project");
    EpistemicKernel::bootstrap(
        KernelConfig::default(),
        pool,
        session,
        Some((backend, embeddings)),
    )
    .await
    .expect("failed to bootstrap kernel")
}
