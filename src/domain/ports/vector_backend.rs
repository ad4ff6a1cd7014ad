//! Pluggable vector-store and embedding capabilities.
//!
//! Both capabilities are optional: any call may fail with
//! `CapabilityUnavailable` and callers must degrade gracefully, continuing
//! without the enrichment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{KernelError, KernelResult};

/// Distance metric for a vector collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    Cosine,
    Euclid,
    Dot,
}

/// A point to upsert into a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

/// A scored point returned from a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: serde_json::Value,
}

/// Equality filter on a payload field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadFilter {
    pub key: String,
    pub value: serde_json::Value,
}

/// A vector store capability (Qdrant-shaped, but protocol-agnostic).
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Create the collection if it does not exist.
    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> KernelResult<()>;

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> KernelResult<()>;

    /// Query points ordered by score descending.
    async fn query_points(
        &self,
        collection: &str,
        query_vector: &[f32],
        filter: Option<PayloadFilter>,
        limit: usize,
    ) -> KernelResult<Vec<ScoredPoint>>;
}

/// An embedding capability: `text -> vector`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> KernelResult<Vec<f32>>;
}

/// No-op vector backend for deployments without semantic search.
#[derive(Debug, Clone, Default)]
pub struct NullVectorBackend;

#[async_trait]
impl VectorBackend for NullVectorBackend {
    fn name(&self) -> &str {
        "null"
    }

    async fn create_collection(&self, _: &str, _: usize, _: Distance) -> KernelResult<()> {
        Err(KernelError::CapabilityUnavailable(
            "vector backend not configured".into(),
        ))
    }

    async fn upsert(&self, _: &str, _: Vec<VectorPoint>) -> KernelResult<()> {
        Err(KernelError::CapabilityUnavailable(
            "vector backend not configured".into(),
        ))
    }

    async fn query_points(
        &self,
        _: &str,
        _: &[f32],
        _: Option<PayloadFilter>,
        _: usize,
    ) -> KernelResult<Vec<ScoredPoint>> {
        Err(KernelError::CapabilityUnavailable(
            "vector backend not configured".into(),
        ))
    }
}

/// No-op embedding provider.
#[derive(Debug, Clone, Default)]
pub struct NullEmbeddingProvider;

#[async_trait]
impl EmbeddingProvider for NullEmbeddingProvider {
    fn name(&self) -> &str {
        "null"
    }

    fn dimension(&self) -> usize {
        0
    }

    async fn embed(&self, _: &str) -> KernelResult<Vec<f32>> {
        Err(KernelError::CapabilityUnavailable(
            "embedding provider not configured".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_null_backend_degrades() {
        let backend = NullVectorBackend;
        let err = backend
            .create_collection("epistemic_events", 384, Distance::Cosine)
            .await
            .unwrap_err();
        assert!(err.is_degradable());
    }

    #[tokio::test]
    async fn test_null_embedding_degrades() {
        let provider = NullEmbeddingProvider;
        assert_eq!(provider.dimension(), 0);
        assert!(provider.embed("hello").await.unwrap_err().is_degradable());
    }
}
