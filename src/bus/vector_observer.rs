//! Best-effort vector-store leg of bus persistence.
//!
//! Embeds each event and upserts it into an `epistemic_events` collection
//! for semantic cross-node discovery. Degrades to a no-op whenever the
//! backend or embedding provider is unavailable.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use crate::domain::errors::KernelResult;
use crate::domain::models::{EpistemicEvent, EventType};
use crate::domain::ports::{
    Distance, EmbeddingProvider, EpistemicObserver, PayloadFilter, ScoredPoint, VectorBackend,
    VectorPoint,
};

pub struct VectorEventObserver {
    backend: Arc<dyn VectorBackend>,
    embeddings: Arc<dyn EmbeddingProvider>,
    collection: String,
    node_id: String,
}

impl VectorEventObserver {
    pub const DEFAULT_COLLECTION: &'static str = "epistemic_events";

    pub fn new(
        backend: Arc<dyn VectorBackend>,
        embeddings: Arc<dyn EmbeddingProvider>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            embeddings,
            collection: Self::DEFAULT_COLLECTION.to_string(),
            node_id: node_id.into(),
        }
    }

    /// Ensure the collection exists. Best-effort; callers may ignore the error.
    pub async fn ensure_collection(&self) -> KernelResult<()> {
        self.backend
            .create_collection(&self.collection, self.embeddings.dimension(), Distance::Cosine)
            .await
    }

    /// Semantic search over persisted events. Empty on any capability failure.
    pub async fn query_semantic(
        &self,
        query_text: &str,
        limit: usize,
        event_type: Option<EventType>,
    ) -> Vec<ScoredPoint> {
        let vector = match self.embeddings.embed(query_text).await {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "vector observer: embedding unavailable for query");
                return Vec::new();
            }
        };

        let filter = event_type.map(|ty| PayloadFilter {
            key: "event_type".to_string(),
            value: json!(ty.as_str()),
        });

        match self
            .backend
            .query_points(&self.collection, &vector, filter, limit)
            .await
        {
            Ok(points) => points,
            Err(e) => {
                debug!(error = %e, "vector observer: semantic query failed");
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl EpistemicObserver for VectorEventObserver {
    fn name(&self) -> &str {
        "vector_events"
    }

    async fn handle_event(&self, event: &EpistemicEvent) -> KernelResult<()> {
        // Best-effort: swallow capability failures here so the bus never
        // logs them as observer errors on every publish.
        let vector = match self.embeddings.embed(&event.embedding_text()).await {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "vector observer: skipping event, embedding unavailable");
                return Ok(());
            }
        };

        let point = VectorPoint {
            id: uuid::Uuid::new_v4().to_string(),
            vector,
            payload: json!({
                "event_type": event.event_type.as_str(),
                "agent_id": event.agent_id,
                "session_id": event.session_id.to_string(),
                "data": event.data,
                "timestamp": event.timestamp,
                "node_id": self.node_id,
            }),
        };

        if let Err(e) = self.backend.upsert(&self.collection, vec![point]).await {
            debug!(error = %e, "vector observer: upsert failed, event not indexed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{NullEmbeddingProvider, NullVectorBackend};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_degrades_to_noop_without_backend() {
        let observer = VectorEventObserver::new(
            Arc::new(NullVectorBackend),
            Arc::new(NullEmbeddingProvider),
            "node-a",
        );

        // handle_event must succeed even though both capabilities are absent.
        let event = EpistemicEvent::new(
            EventType::SessionStarted,
            "cascade",
            Uuid::new_v4(),
            json!({}),
        );
        observer.handle_event(&event).await.unwrap();

        // Queries return empty enrichment rather than failing.
        let results = observer.query_semantic("auth findings", 5, None).await;
        assert!(results.is_empty());
    }
}
