//! SQLite persistence for goals and subtasks.

use sqlx::SqlitePool;
use uuid::Uuid;

use super::session_repository::{parse_datetime, parse_uuid};
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{Goal, GoalScope, GoalStatus, LineageEntry, Subtask};

#[derive(Clone)]
pub struct GoalRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct GoalRow {
    id: String,
    session_id: String,
    objective: String,
    scope_json: String,
    status: String,
    lineage_json: String,
    created_timestamp: String,
    completed_timestamp: Option<String>,
}

impl TryFrom<GoalRow> for Goal {
    type Error = KernelError;

    fn try_from(row: GoalRow) -> KernelResult<Self> {
        let scope: GoalScope = serde_json::from_str(&row.scope_json)?;
        let lineage: Vec<LineageEntry> = serde_json::from_str(&row.lineage_json)?;
        let status = GoalStatus::from_str(&row.status)
            .ok_or_else(|| KernelError::BadInput(format!("unknown goal status: {}", row.status)))?;
        Ok(Goal {
            id: parse_uuid(&row.id)?,
            session_id: parse_uuid(&row.session_id)?,
            objective: row.objective,
            scope,
            status,
            lineage,
            created_timestamp: parse_datetime(&row.created_timestamp)?,
            completed_timestamp: row
                .completed_timestamp
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubtaskRow {
    id: String,
    goal_id: String,
    description: String,
    estimated_tokens: Option<i64>,
    actual_tokens: Option<i64>,
    completed_timestamp: Option<String>,
    epistemic_importance: f64,
}

impl TryFrom<SubtaskRow> for Subtask {
    type Error = KernelError;

    fn try_from(row: SubtaskRow) -> KernelResult<Self> {
        Ok(Subtask {
            id: parse_uuid(&row.id)?,
            goal_id: parse_uuid(&row.goal_id)?,
            description: row.description,
            estimated_tokens: row.estimated_tokens,
            actual_tokens: row.actual_tokens,
            completed_timestamp: row
                .completed_timestamp
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            epistemic_importance: row.epistemic_importance,
        })
    }
}

impl GoalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, goal: &Goal) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO goals (id, session_id, objective, scope_json, status, lineage_json,
                                created_timestamp, completed_timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(goal.id.to_string())
        .bind(goal.session_id.to_string())
        .bind(&goal.objective)
        .bind(serde_json::to_string(&goal.scope)?)
        .bind(goal.status.as_str())
        .bind(serde_json::to_string(&goal.lineage)?)
        .bind(goal.created_timestamp.to_rfc3339())
        .bind(goal.completed_timestamp.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update(&self, goal: &Goal) -> KernelResult<()> {
        let result = sqlx::query(
            "UPDATE goals SET objective = ?, scope_json = ?, status = ?, lineage_json = ?,
                              completed_timestamp = ?
             WHERE id = ?",
        )
        .bind(&goal.objective)
        .bind(serde_json::to_string(&goal.scope)?)
        .bind(goal.status.as_str())
        .bind(serde_json::to_string(&goal.lineage)?)
        .bind(goal.completed_timestamp.map(|t| t.to_rfc3339()))
        .bind(goal.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KernelError::BadInput(format!("goal not found: {}", goal.id)));
        }
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> KernelResult<Option<Goal>> {
        let row: Option<GoalRow> = sqlx::query_as(
            "SELECT id, session_id, objective, scope_json, status, lineage_json,
                    created_timestamp, completed_timestamp
             FROM goals WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Goal::try_from).transpose()
    }

    pub async fn for_session(&self, session_id: Uuid) -> KernelResult<Vec<Goal>> {
        let rows: Vec<GoalRow> = sqlx::query_as(
            "SELECT id, session_id, objective, scope_json, status, lineage_json,
                    created_timestamp, completed_timestamp
             FROM goals WHERE session_id = ? ORDER BY created_timestamp",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Goal::try_from).collect()
    }

    pub async fn goal_ids_for_session(&self, session_id: Uuid) -> KernelResult<Vec<Uuid>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM goals WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(|(id,)| parse_uuid(id)).collect()
    }

    pub async fn add_subtask(&self, subtask: &Subtask) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO subtasks (id, goal_id, description, estimated_tokens, actual_tokens,
                                   completed_timestamp, epistemic_importance)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(subtask.id.to_string())
        .bind(subtask.goal_id.to_string())
        .bind(&subtask.description)
        .bind(subtask.estimated_tokens)
        .bind(subtask.actual_tokens)
        .bind(subtask.completed_timestamp.map(|t| t.to_rfc3339()))
        .bind(subtask.epistemic_importance)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_subtask(&self, subtask: &Subtask) -> KernelResult<()> {
        let result = sqlx::query(
            "UPDATE subtasks SET description = ?, estimated_tokens = ?, actual_tokens = ?,
                                 completed_timestamp = ?, epistemic_importance = ?
             WHERE id = ?",
        )
        .bind(&subtask.description)
        .bind(subtask.estimated_tokens)
        .bind(subtask.actual_tokens)
        .bind(subtask.completed_timestamp.map(|t| t.to_rfc3339()))
        .bind(subtask.epistemic_importance)
        .bind(subtask.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KernelError::BadInput(format!(
                "subtask not found: {}",
                subtask.id
            )));
        }
        Ok(())
    }

    pub async fn subtasks_for_goal(&self, goal_id: Uuid) -> KernelResult<Vec<Subtask>> {
        let rows: Vec<SubtaskRow> = sqlx::query_as(
            "SELECT id, goal_id, description, estimated_tokens, actual_tokens,
                    completed_timestamp, epistemic_importance
             FROM subtasks WHERE goal_id = ?",
        )
        .bind(goal_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Subtask::try_from).collect()
    }

    /// (completed, total) subtask counts across all goals of a session.
    pub async fn subtask_completion(&self, session_id: Uuid) -> KernelResult<(u32, u32)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(CASE WHEN s.completed_timestamp IS NOT NULL THEN 1 ELSE 0 END), 0),
                    COUNT(*)
             FROM subtasks s JOIN goals g ON s.goal_id = g.id
             WHERE g.session_id = ?",
        )
        .bind(session_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok((row.0 as u32, row.1 as u32))
    }

    /// (estimated, actual) token sums for completed estimation pairs.
    pub async fn token_estimation(&self, session_id: Uuid) -> KernelResult<Option<(i64, i64)>> {
        let row: (Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT SUM(s.estimated_tokens), SUM(s.actual_tokens)
             FROM subtasks s JOIN goals g ON s.goal_id = g.id
             WHERE g.session_id = ?
               AND s.estimated_tokens IS NOT NULL
               AND s.actual_tokens IS NOT NULL
               AND s.estimated_tokens > 0",
        )
        .bind(session_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        match row {
            (Some(est), Some(actual)) if est > 0 => Ok(Some((est, actual))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Session;
    use crate::storage::connection::create_test_pool;
    use crate::storage::migrations::{all_embedded_migrations, Migrator};
    use crate::storage::session_repository::SessionRepository;

    async fn setup() -> (SessionRepository, GoalRepository, Session) {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        let sessions = SessionRepository::new(pool.clone());
        let goals = GoalRepository::new(pool);
        let session = Session::new("a1", "proj");
        sessions.create(&session).await.unwrap();
        (sessions, goals, session)
    }

    #[tokio::test]
    async fn test_goal_round_trip_with_lineage() {
        let (_, goals, session) = setup().await;
        let mut goal = Goal::new(session.session_id, "Refactor auth");
        goal.record_action("a1", "created");
        goals.create(&goal).await.unwrap();

        let loaded = goals.get(goal.id).await.unwrap().unwrap();
        assert_eq!(loaded.objective, "Refactor auth");
        assert_eq!(loaded.lineage.len(), 1);
        assert_eq!(loaded.lineage[0].action, "created");
    }

    #[tokio::test]
    async fn test_subtask_completion_counts() {
        let (_, goals, session) = setup().await;
        let goal = Goal::new(session.session_id, "g");
        goals.create(&goal).await.unwrap();

        let mut done = Subtask::new(goal.id, "done").with_estimate(1000);
        done.complete(Some(1200));
        goals.add_subtask(&done).await.unwrap();
        goals
            .add_subtask(&Subtask::new(goal.id, "pending"))
            .await
            .unwrap();

        let (completed, total) = goals.subtask_completion(session.session_id).await.unwrap();
        assert_eq!((completed, total), (1, 2));

        let (est, actual) = goals
            .token_estimation(session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((est, actual), (1000, 1200));
    }
}
