//! Qdrant-compatible REST adapter for the `VectorBackend` port.
//!
//! Speaks the minimal surface the kernel needs: collection creation,
//! upserts, and scored queries. Any transport or server failure maps to
//! `CapabilityUnavailable` so callers degrade instead of failing.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::ports::{Distance, PayloadFilter, ScoredPoint, VectorBackend, VectorPoint};

pub struct QdrantBackend {
    client: reqwest::Client,
    base_url: String,
}

impl QdrantBackend {
    pub fn new(base_url: impl Into<String>) -> KernelResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| KernelError::CapabilityUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn unavailable(err: impl std::fmt::Display) -> KernelError {
        KernelError::CapabilityUnavailable(format!("qdrant: {err}"))
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn create_collection(
        &self,
        name: &str,
        vector_size: usize,
        distance: Distance,
    ) -> KernelResult<()> {
        let distance = match distance {
            Distance::Cosine => "Cosine",
            Distance::Euclid => "Euclid",
            Distance::Dot => "Dot",
        };

        // Create-if-absent: an existing collection is not an error.
        let exists = self
            .client
            .get(format!("{}/collections/{name}/exists", self.base_url))
            .send()
            .await
            .map_err(Self::unavailable)?
            .json::<serde_json::Value>()
            .await
            .map_err(Self::unavailable)?;
        if exists["result"]["exists"].as_bool() == Some(true) {
            return Ok(());
        }

        let response = self
            .client
            .put(format!("{}/collections/{name}", self.base_url))
            .json(&json!({
                "vectors": { "size": vector_size, "distance": distance }
            }))
            .send()
            .await
            .map_err(Self::unavailable)?;

        if !response.status().is_success() {
            return Err(Self::unavailable(format!(
                "create_collection returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, points: Vec<VectorPoint>) -> KernelResult<()> {
        let body = json!({
            "points": points
                .iter()
                .map(|p| json!({
                    "id": p.id,
                    "vector": p.vector,
                    "payload": p.payload,
                }))
                .collect::<Vec<_>>()
        });

        let response = self
            .client
            .put(format!(
                "{}/collections/{collection}/points?wait=true",
                self.base_url
            ))
            .json(&body)
            .send()
            .await
            .map_err(Self::unavailable)?;

        if !response.status().is_success() {
            return Err(Self::unavailable(format!(
                "upsert returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn query_points(
        &self,
        collection: &str,
        query_vector: &[f32],
        filter: Option<PayloadFilter>,
        limit: usize,
    ) -> KernelResult<Vec<ScoredPoint>> {
        let mut body = json!({
            "query": query_vector,
            "limit": limit,
            "with_payload": true,
        });
        if let Some(filter) = filter {
            body["filter"] = json!({
                "must": [{ "key": filter.key, "match": { "value": filter.value } }]
            });
        }

        let response = self
            .client
            .post(format!(
                "{}/collections/{collection}/points/query",
                self.base_url
            ))
            .json(&body)
            .send()
            .await
            .map_err(Self::unavailable)?;

        if !response.status().is_success() {
            return Err(Self::unavailable(format!(
                "query returned {}",
                response.status()
            )));
        }

        let value: serde_json::Value = response.json().await.map_err(Self::unavailable)?;
        let points = value["result"]["points"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        Ok(points
            .iter()
            .map(|p| ScoredPoint {
                id: p["id"]
                    .as_str()
                    .map(String::from)
                    .unwrap_or_else(|| p["id"].to_string()),
                score: p["score"].as_f64().unwrap_or(0.0) as f32,
                payload: p["payload"].clone(),
            })
            .collect())
    }
}
