//! SQLite persistence for sessions and reflexes.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{CheckDecision, Phase, Reflex, Session, VectorSet};

#[derive(Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    ai_id: String,
    project_id: String,
    start_time: String,
    parent_session_id: Option<String>,
    created_at: String,
}

impl TryFrom<SessionRow> for Session {
    type Error = KernelError;

    fn try_from(row: SessionRow) -> KernelResult<Self> {
        Ok(Session {
            session_id: parse_uuid(&row.session_id)?,
            ai_id: row.ai_id,
            project_id: row.project_id,
            start_time: parse_datetime(&row.start_time)?,
            parent_session_id: row.parent_session_id.as_deref().map(parse_uuid).transpose()?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ReflexRow {
    id: String,
    session_id: String,
    phase: String,
    round: i64,
    vectors_json: String,
    decision: String,
    reasoning: String,
    reflex_data_json: Option<String>,
    transaction_id: String,
    timestamp: String,
}

impl TryFrom<ReflexRow> for Reflex {
    type Error = KernelError;

    fn try_from(row: ReflexRow) -> KernelResult<Self> {
        let vectors: VectorSet = serde_json::from_str(&row.vectors_json)?;
        let phase = Phase::from_str(&row.phase)
            .ok_or_else(|| KernelError::BadInput(format!("unknown phase: {}", row.phase)))?;
        let decision = CheckDecision::from_str(&row.decision)
            .ok_or_else(|| KernelError::BadInput(format!("unknown decision: {}", row.decision)))?;
        let data = match row.reflex_data_json {
            Some(json) => serde_json::from_str(&json)?,
            None => serde_json::Value::Null,
        };
        Ok(Reflex {
            id: parse_uuid(&row.id)?,
            session_id: parse_uuid(&row.session_id)?,
            phase,
            round: row.round as u32,
            vectors,
            decision,
            reasoning: row.reasoning,
            data,
            transaction_id: parse_uuid(&row.transaction_id)?,
            timestamp: parse_datetime(&row.timestamp)?,
        })
    }
}

pub(crate) fn parse_uuid(s: &str) -> KernelResult<Uuid> {
    Uuid::parse_str(s).map_err(|_| KernelError::BadInput(format!("invalid UUID: {s}")))
}

pub(crate) fn parse_datetime(s: &str) -> KernelResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| KernelError::BadInput(format!("invalid timestamp: {s}")))
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, session: &Session) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO sessions (session_id, ai_id, project_id, start_time, parent_session_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(session.session_id.to_string())
        .bind(&session.ai_id)
        .bind(&session.project_id)
        .bind(session.start_time.to_rfc3339())
        .bind(session.parent_session_id.map(|id| id.to_string()))
        .bind(session.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, session_id: Uuid) -> KernelResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT session_id, ai_id, project_id, start_time, parent_session_id, created_at
             FROM sessions WHERE session_id = ?",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Session::try_from).transpose()
    }

    /// Fetch a session or fail with `NoSession`.
    pub async fn require(&self, session_id: Uuid) -> KernelResult<Session> {
        self.get(session_id)
            .await?
            .ok_or_else(|| KernelError::NoSession(session_id.to_string()))
    }

    pub async fn exists(&self, session_id: Uuid) -> KernelResult<bool> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM sessions WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    /// Write a reflex row. The session must exist, and the round must be
    /// monotonically non-decreasing within its phase.
    pub async fn append_reflex(&self, reflex: &Reflex) -> KernelResult<()> {
        if !self.exists(reflex.session_id).await? {
            return Err(KernelError::NoSession(reflex.session_id.to_string()));
        }

        let max_round = self
            .max_round(reflex.session_id, reflex.phase)
            .await?
            .unwrap_or(0);
        if reflex.round < max_round {
            return Err(KernelError::PhaseViolation(format!(
                "round {} precedes recorded round {} for {} in session {}",
                reflex.round, max_round, reflex.phase, reflex.session_id
            )));
        }

        let vectors_json = serde_json::to_string(&reflex.vectors)?;
        let data_json = if reflex.data.is_null() {
            None
        } else {
            Some(serde_json::to_string(&reflex.data)?)
        };

        sqlx::query(
            "INSERT INTO reflexes (id, session_id, phase, round, vectors_json, decision, reasoning,
                                   reflex_data_json, transaction_id, timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(reflex.id.to_string())
        .bind(reflex.session_id.to_string())
        .bind(reflex.phase.as_str())
        .bind(i64::from(reflex.round))
        .bind(vectors_json)
        .bind(reflex.decision.as_str())
        .bind(&reflex.reasoning)
        .bind(data_json)
        .bind(reflex.transaction_id.to_string())
        .bind(reflex.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn max_round(&self, session_id: Uuid, phase: Phase) -> KernelResult<Option<u32>> {
        let row: Option<(Option<i64>,)> =
            sqlx::query_as("SELECT MAX(round) FROM reflexes WHERE session_id = ? AND phase = ?")
                .bind(session_id.to_string())
                .bind(phase.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(max,)| max).map(|m| m as u32))
    }

    /// All reflexes for a session, totally ordered by (phase_order, round, timestamp).
    pub async fn reflexes(&self, session_id: Uuid) -> KernelResult<Vec<Reflex>> {
        let rows: Vec<ReflexRow> = sqlx::query_as(
            "SELECT id, session_id, phase, round, vectors_json, decision, reasoning,
                    reflex_data_json, transaction_id, timestamp
             FROM reflexes WHERE session_id = ?
             ORDER BY CASE phase
                 WHEN 'PREFLIGHT' THEN 0
                 WHEN 'CHECK' THEN 1
                 WHEN 'ACT' THEN 2
                 WHEN 'POSTFLIGHT' THEN 3
             END, round, timestamp",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Reflex::try_from).collect()
    }

    pub async fn reflexes_for_phase(
        &self,
        session_id: Uuid,
        phase: Phase,
    ) -> KernelResult<Vec<Reflex>> {
        let rows: Vec<ReflexRow> = sqlx::query_as(
            "SELECT id, session_id, phase, round, vectors_json, decision, reasoning,
                    reflex_data_json, transaction_id, timestamp
             FROM reflexes WHERE session_id = ? AND phase = ?
             ORDER BY round, timestamp",
        )
        .bind(session_id.to_string())
        .bind(phase.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Reflex::try_from).collect()
    }

    /// Most recent reflex for a phase, by round then timestamp.
    pub async fn latest_reflex(
        &self,
        session_id: Uuid,
        phase: Phase,
    ) -> KernelResult<Option<Reflex>> {
        let row: Option<ReflexRow> = sqlx::query_as(
            "SELECT id, session_id, phase, round, vectors_json, decision, reasoning,
                    reflex_data_json, transaction_id, timestamp
             FROM reflexes WHERE session_id = ? AND phase = ?
             ORDER BY round DESC, timestamp DESC LIMIT 1",
        )
        .bind(session_id.to_string())
        .bind(phase.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Reflex::try_from).transpose()
    }
}
