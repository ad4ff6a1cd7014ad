//! Durable event log (the SQLite leg of bus persistence).

use sqlx::SqlitePool;
use uuid::Uuid;

use super::session_repository::parse_uuid;
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{EpistemicEvent, EventType};

#[derive(Clone)]
pub struct EventRepository {
    pool: SqlitePool,
    node_id: String,
}

/// A persisted event row, as returned by queries.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub id: Uuid,
    pub session_id: Uuid,
    pub event_type: EventType,
    pub agent_id: String,
    pub data: serde_json::Value,
    pub timestamp: f64,
    pub node_id: Option<String>,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    id: String,
    session_id: String,
    event_type: String,
    agent_id: Option<String>,
    data_json: Option<String>,
    timestamp: f64,
    node_id: Option<String>,
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = KernelError;

    fn try_from(row: EventRow) -> KernelResult<Self> {
        let event_type = EventType::from_str(&row.event_type).ok_or_else(|| {
            KernelError::BadInput(format!("unknown event type: {}", row.event_type))
        })?;
        let data = match row.data_json {
            Some(json) => serde_json::from_str(&json)?,
            None => serde_json::Value::Null,
        };
        Ok(StoredEvent {
            id: parse_uuid(&row.id)?,
            session_id: parse_uuid(&row.session_id)?,
            event_type,
            agent_id: row.agent_id.unwrap_or_default(),
            data,
            timestamp: row.timestamp,
            node_id: row.node_id,
        })
    }
}

impl EventRepository {
    pub fn new(pool: SqlitePool, node_id: impl Into<String>) -> Self {
        Self {
            pool,
            node_id: node_id.into(),
        }
    }

    pub async fn append(&self, event: &EpistemicEvent) -> KernelResult<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO epistemic_events (id, session_id, event_type, agent_id, data_json, timestamp, node_id)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(event.session_id.to_string())
        .bind(event.event_type.as_str())
        .bind(&event.agent_id)
        .bind(serde_json::to_string(&event.data)?)
        .bind(event.timestamp)
        .bind(&self.node_id)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Cross-session event discovery. Newest first.
    pub async fn query_events(
        &self,
        session_id: Option<Uuid>,
        event_type: Option<EventType>,
        since: Option<f64>,
        limit: u32,
    ) -> KernelResult<Vec<StoredEvent>> {
        let mut sql = String::from(
            "SELECT id, session_id, event_type, agent_id, data_json, timestamp, node_id
             FROM epistemic_events WHERE 1=1",
        );
        if session_id.is_some() {
            sql.push_str(" AND session_id = ?");
        }
        if event_type.is_some() {
            sql.push_str(" AND event_type = ?");
        }
        if since.is_some() {
            sql.push_str(" AND timestamp > ?");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, EventRow>(&sql);
        if let Some(id) = session_id {
            query = query.bind(id.to_string());
        }
        if let Some(ty) = event_type {
            query = query.bind(ty.as_str());
        }
        if let Some(ts) = since {
            query = query.bind(ts);
        }
        let rows = query.bind(i64::from(limit)).fetch_all(&self.pool).await?;
        rows.into_iter().map(StoredEvent::try_from).collect()
    }

    pub async fn count_for_session(&self, session_id: Uuid) -> KernelResult<u64> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM epistemic_events WHERE session_id = ?")
                .bind(session_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::connection::create_test_pool;
    use crate::storage::migrations::{all_embedded_migrations, Migrator};
    use serde_json::json;

    async fn repo() -> EventRepository {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        EventRepository::new(pool, "node-a")
    }

    #[tokio::test]
    async fn test_append_and_query_by_type() {
        let repo = repo().await;
        let session_id = Uuid::new_v4();

        repo.append(&EpistemicEvent::new(
            EventType::SessionStarted,
            "cascade",
            session_id,
            json!({"prompt": "x"}),
        ))
        .await
        .unwrap();
        repo.append(&EpistemicEvent::new(
            EventType::ContextEvicted,
            "cbm",
            session_id,
            json!({"tokens_freed": 100}),
        ))
        .await
        .unwrap();

        let events = repo
            .query_events(Some(session_id), Some(EventType::ContextEvicted), None, 10)
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ContextEvicted);
        assert_eq!(events[0].node_id.as_deref(), Some("node-a"));

        assert_eq!(repo.count_for_session(session_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_since_filter() {
        let repo = repo().await;
        let session_id = Uuid::new_v4();
        let event = EpistemicEvent::new(EventType::PageFault, "cbm", session_id, json!({}));
        let cutoff = event.timestamp + 1.0;
        repo.append(&event).await.unwrap();

        let none = repo
            .query_events(Some(session_id), None, Some(cutoff), 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
