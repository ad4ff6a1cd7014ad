//! Persistence for the grounded calibration track.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::session_repository::{parse_datetime, parse_uuid};
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    EvidenceBundle, GroundedAssessment, GroundedBelief, TrajectoryPoint, VectorName,
};

#[derive(Clone)]
pub struct CalibrationRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct BeliefRow {
    vector_name: String,
    mean: f64,
    variance: f64,
    evidence_count: i64,
    last_observation: f64,
    last_observation_source: String,
    self_referential_mean: Option<f64>,
    divergence: Option<f64>,
    last_updated: String,
}

impl TryFrom<BeliefRow> for GroundedBelief {
    type Error = KernelError;

    fn try_from(row: BeliefRow) -> KernelResult<Self> {
        let vector = VectorName::from_str(&row.vector_name).ok_or_else(|| {
            KernelError::BadInput(format!("unknown vector name: {}", row.vector_name))
        })?;
        Ok(GroundedBelief {
            vector,
            mean: row.mean,
            variance: row.variance,
            evidence_count: row.evidence_count as u32,
            last_observation: row.last_observation,
            last_observation_source: row.last_observation_source,
            self_referential_mean: row.self_referential_mean,
            divergence: row.divergence,
            last_updated: parse_datetime(&row.last_updated)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrajectoryRow {
    point_id: String,
    session_id: String,
    ai_id: String,
    vector_name: String,
    self_assessed: f64,
    grounded: Option<f64>,
    gap: Option<f64>,
    domain: Option<String>,
    goal_id: Option<String>,
    timestamp: String,
    phase: String,
}

impl TryFrom<TrajectoryRow> for TrajectoryPoint {
    type Error = KernelError;

    fn try_from(row: TrajectoryRow) -> KernelResult<Self> {
        let vector = VectorName::from_str(&row.vector_name).ok_or_else(|| {
            KernelError::BadInput(format!("unknown vector name: {}", row.vector_name))
        })?;
        Ok(TrajectoryPoint {
            point_id: parse_uuid(&row.point_id)?,
            session_id: parse_uuid(&row.session_id)?,
            ai_id: row.ai_id,
            vector,
            self_assessed: row.self_assessed,
            grounded: row.grounded,
            gap: row.gap,
            domain: row.domain,
            goal_id: row.goal_id.as_deref().map(parse_uuid).transpose()?,
            timestamp: parse_datetime(&row.timestamp)?,
            phase: row.phase,
        })
    }
}

impl CalibrationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Latest belief per vector for an AI.
    pub async fn beliefs_for(&self, ai_id: &str) -> KernelResult<Vec<GroundedBelief>> {
        let rows: Vec<BeliefRow> = sqlx::query_as(
            "SELECT vector_name, mean, variance, evidence_count, last_observation,
                    last_observation_source, self_referential_mean, divergence, last_updated
             FROM grounded_beliefs
             WHERE ai_id = ?
             ORDER BY last_updated DESC",
        )
        .bind(ai_id)
        .fetch_all(&self.pool)
        .await?;

        let mut seen = std::collections::HashSet::new();
        let mut beliefs = Vec::new();
        for row in rows {
            if seen.insert(row.vector_name.clone()) {
                beliefs.push(GroundedBelief::try_from(row)?);
            }
        }
        Ok(beliefs)
    }

    pub async fn insert_belief(
        &self,
        session_id: Uuid,
        ai_id: &str,
        belief: &GroundedBelief,
        phase: &str,
    ) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO grounded_beliefs
             (belief_id, session_id, ai_id, vector_name, mean, variance, evidence_count,
              last_observation, last_observation_source, self_referential_mean, divergence,
              last_updated, phase)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(session_id.to_string())
        .bind(ai_id)
        .bind(belief.vector.as_str())
        .bind(belief.mean)
        .bind(belief.variance)
        .bind(i64::from(belief.evidence_count))
        .bind(belief.last_observation)
        .bind(&belief.last_observation_source)
        .bind(belief.self_referential_mean)
        .bind(belief.divergence)
        .bind(belief.last_updated.to_rfc3339())
        .bind(phase)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store raw evidence items for the audit trail.
    pub async fn store_evidence(&self, bundle: &EvidenceBundle) -> KernelResult<u32> {
        let mut stored = 0;
        for item in &bundle.items {
            sqlx::query(
                "INSERT INTO verification_evidence
                 (evidence_id, session_id, source, metric_name, raw_value_json,
                  normalized_value, quality, supports_vectors_json, collected_at, metadata_json)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(bundle.session_id.to_string())
            .bind(&item.source)
            .bind(&item.metric_name)
            .bind(serde_json::to_string(&item.raw_value)?)
            .bind(item.normalized_value)
            .bind(item.quality.as_str())
            .bind(serde_json::to_string(&item.supports_vectors)?)
            .bind(bundle.collection_timestamp.to_rfc3339())
            .bind(if item.metadata.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&item.metadata)?)
            })
            .execute(&self.pool)
            .await?;
            stored += 1;
        }
        Ok(stored)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn store_verification(
        &self,
        session_id: Uuid,
        ai_id: &str,
        assessment: &GroundedAssessment,
        bundle: &EvidenceBundle,
        domain: Option<&str>,
        goal_id: Option<Uuid>,
        phase: &str,
    ) -> KernelResult<Uuid> {
        let verification_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO grounded_verifications
             (verification_id, session_id, ai_id, self_assessed_vectors_json,
              grounded_vectors_json, calibration_gaps_json, grounded_coverage,
              overall_calibration_score, evidence_count, sources_available_json,
              sources_failed_json, domain, goal_id, phase)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(verification_id.to_string())
        .bind(session_id.to_string())
        .bind(ai_id)
        .bind(serde_json::to_string(&assessment.self_assessed)?)
        .bind(serde_json::to_string(&assessment.grounded)?)
        .bind(serde_json::to_string(&assessment.calibration_gaps)?)
        .bind(assessment.grounded_coverage)
        .bind(assessment.overall_calibration_score)
        .bind(bundle.items.len() as i64)
        .bind(serde_json::to_string(&bundle.sources_available)?)
        .bind(serde_json::to_string(&bundle.sources_failed)?)
        .bind(domain)
        .bind(goal_id.map(|id| id.to_string()))
        .bind(phase)
        .execute(&self.pool)
        .await?;
        Ok(verification_id)
    }

    pub async fn insert_trajectory_point(&self, point: &TrajectoryPoint) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO calibration_trajectory
             (point_id, session_id, ai_id, vector_name, self_assessed, grounded, gap,
              domain, goal_id, timestamp, phase)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(point.point_id.to_string())
        .bind(point.session_id.to_string())
        .bind(&point.ai_id)
        .bind(point.vector.as_str())
        .bind(point.self_assessed)
        .bind(point.grounded)
        .bind(point.gap)
        .bind(&point.domain)
        .bind(point.goal_id.map(|id| id.to_string()))
        .bind(point.timestamp.to_rfc3339())
        .bind(&point.phase)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recent trajectory for a vector, chronological order.
    pub async fn trajectory(
        &self,
        ai_id: &str,
        vector: VectorName,
        lookback: u32,
        phase: Option<&str>,
    ) -> KernelResult<Vec<TrajectoryPoint>> {
        let mut sql = String::from(
            "SELECT point_id, session_id, ai_id, vector_name, self_assessed, grounded, gap,
                    domain, goal_id, timestamp, phase
             FROM calibration_trajectory
             WHERE ai_id = ? AND vector_name = ?",
        );
        if phase.is_some() {
            sql.push_str(" AND phase = ?");
        }
        sql.push_str(" ORDER BY timestamp DESC LIMIT ?");

        let mut query = sqlx::query_as::<_, TrajectoryRow>(&sql)
            .bind(ai_id)
            .bind(vector.as_str());
        if let Some(p) = phase {
            query = query.bind(p);
        }
        let rows = query.bind(i64::from(lookback)).fetch_all(&self.pool).await?;

        let mut points: Vec<TrajectoryPoint> = rows
            .into_iter()
            .map(TrajectoryPoint::try_from)
            .collect::<KernelResult<_>>()?;
        points.reverse();
        Ok(points)
    }

    /// Vectors with any trajectory data for an AI.
    pub async fn trajectory_vectors(
        &self,
        ai_id: &str,
        phase: Option<&str>,
    ) -> KernelResult<Vec<VectorName>> {
        let rows: Vec<(String,)> = match phase {
            Some(p) => {
                sqlx::query_as(
                    "SELECT DISTINCT vector_name FROM calibration_trajectory
                     WHERE ai_id = ? AND phase = ?",
                )
                .bind(ai_id)
                .bind(p)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT DISTINCT vector_name FROM calibration_trajectory WHERE ai_id = ?",
                )
                .bind(ai_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows
            .into_iter()
            .filter_map(|(name,)| VectorName::from_str(&name))
            .collect())
    }

    /// CHECK decisions per session, newest first: (decision, timestamp).
    pub async fn check_decisions(
        &self,
        session_id: Uuid,
    ) -> KernelResult<Vec<(String, DateTime<Utc>)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT decision, timestamp FROM reflexes
             WHERE session_id = ? AND phase = 'CHECK'
             ORDER BY timestamp DESC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(decision, ts)| Ok((decision, parse_datetime(&ts)?)))
            .collect()
    }
}
