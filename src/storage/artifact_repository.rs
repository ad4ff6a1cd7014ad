//! SQLite persistence for noetic artifacts.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::session_repository::{parse_datetime, parse_uuid};
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    DeadEnd, Finding, Mistake, ReviewOutcome, Suggestion, SuggestionStatus, Unknown,
};

#[derive(Clone)]
pub struct ArtifactRepository {
    pool: SqlitePool,
}

/// Scope-weighted artifact counts for grounded evidence. `scoped` rows link
/// to one of the session's goals; `unscoped` rows do not.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopedCounts {
    pub scoped: u32,
    pub unscoped: u32,
}

impl ScopedCounts {
    pub fn weighted_total(&self, unscoped_weight: f64) -> f64 {
        f64::from(self.scoped) + f64::from(self.unscoped) * unscoped_weight
    }

    pub fn raw_total(&self) -> u32 {
        self.scoped + self.unscoped
    }
}

#[derive(sqlx::FromRow)]
struct FindingRow {
    id: String,
    session_id: String,
    goal_id: Option<String>,
    finding: String,
    impact: f64,
    subject: Option<String>,
    created_timestamp: String,
}

impl TryFrom<FindingRow> for Finding {
    type Error = KernelError;

    fn try_from(row: FindingRow) -> KernelResult<Self> {
        Ok(Finding {
            id: parse_uuid(&row.id)?,
            session_id: parse_uuid(&row.session_id)?,
            goal_id: row.goal_id.as_deref().map(parse_uuid).transpose()?,
            finding: row.finding,
            impact: row.impact,
            subject: row.subject,
            created_timestamp: parse_datetime(&row.created_timestamp)?,
        })
    }
}

impl ArtifactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // --- Findings ---

    pub async fn log_finding(&self, finding: &Finding) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO project_findings (id, session_id, goal_id, finding, impact, subject, created_timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(finding.id.to_string())
        .bind(finding.session_id.to_string())
        .bind(finding.goal_id.map(|id| id.to_string()))
        .bind(&finding.finding)
        .bind(finding.impact)
        .bind(&finding.subject)
        .bind(finding.created_timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn findings_for_session(&self, session_id: Uuid) -> KernelResult<Vec<Finding>> {
        let rows: Vec<FindingRow> = sqlx::query_as(
            "SELECT id, session_id, goal_id, finding, impact, subject, created_timestamp
             FROM project_findings WHERE session_id = ? ORDER BY created_timestamp",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Finding::try_from).collect()
    }

    pub async fn finding_texts(&self, session_id: Uuid) -> KernelResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT finding FROM project_findings WHERE session_id = ? ORDER BY created_timestamp",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(f,)| f).collect())
    }

    /// Count findings mentioning a domain token, for attention priors.
    pub async fn count_findings_matching(
        &self,
        session_id: Uuid,
        pattern: &str,
    ) -> KernelResult<u32> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM project_findings WHERE session_id = ? AND finding LIKE ?",
        )
        .bind(session_id.to_string())
        .bind(format!("%{pattern}%"))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 as u32)
    }

    pub async fn count_findings_before(
        &self,
        session_id: Uuid,
        cutoff: Option<DateTime<Utc>>,
    ) -> KernelResult<u32> {
        let row: (i64,) = match cutoff {
            Some(ts) => {
                sqlx::query_as(
                    "SELECT COUNT(*) FROM project_findings
                     WHERE session_id = ? AND created_timestamp <= ?",
                )
                .bind(session_id.to_string())
                .bind(ts.to_rfc3339())
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM project_findings WHERE session_id = ?")
                    .bind(session_id.to_string())
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(row.0 as u32)
    }

    pub async fn scoped_finding_counts(
        &self,
        session_id: Uuid,
        goal_ids: &[Uuid],
    ) -> KernelResult<ScopedCounts> {
        self.scoped_counts("project_findings", session_id, goal_ids)
            .await
    }

    // --- Unknowns ---

    pub async fn log_unknown(&self, unknown: &Unknown) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO project_unknowns (id, session_id, goal_id, unknown, is_resolved, resolved_by, created_timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(unknown.id.to_string())
        .bind(unknown.session_id.to_string())
        .bind(unknown.goal_id.map(|id| id.to_string()))
        .bind(&unknown.unknown)
        .bind(unknown.is_resolved)
        .bind(&unknown.resolved_by)
        .bind(unknown.created_timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn resolve_unknown(&self, id: Uuid, resolved_by: &str) -> KernelResult<()> {
        let result =
            sqlx::query("UPDATE project_unknowns SET is_resolved = 1, resolved_by = ? WHERE id = ?")
                .bind(resolved_by)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(KernelError::BadInput(format!("unknown not found: {id}")));
        }
        Ok(())
    }

    pub async fn count_unknowns(&self, session_id: Uuid) -> KernelResult<u32> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM project_unknowns WHERE session_id = ?")
                .bind(session_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 as u32)
    }

    /// (total, resolved) for unknowns linked to the given goals, excluding
    /// deferred unknowns (unresolved rows whose goal is already completed).
    pub async fn scoped_unknown_resolution(
        &self,
        session_id: Uuid,
        goal_ids: &[Uuid],
    ) -> KernelResult<(u32, u32)> {
        if goal_ids.is_empty() {
            return Ok((0, 0));
        }
        let placeholders = placeholders(goal_ids.len());
        let sql = format!(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN u.is_resolved = 1 THEN 1 ELSE 0 END), 0)
             FROM project_unknowns u
             LEFT JOIN goals g ON u.goal_id = g.id
             WHERE u.session_id = ?
               AND u.goal_id IN ({placeholders})
               AND NOT (u.is_resolved = 0 AND g.status = 'completed')"
        );
        let mut query = sqlx::query_as::<_, (i64, i64)>(&sql).bind(session_id.to_string());
        for id in goal_ids {
            query = query.bind(id.to_string());
        }
        let (total, resolved) = query.fetch_one(&self.pool).await?;
        Ok((total as u32, resolved as u32))
    }

    /// (total, resolved) for unknowns not linked to any of the given goals.
    pub async fn unscoped_unknown_resolution(
        &self,
        session_id: Uuid,
        goal_ids: &[Uuid],
    ) -> KernelResult<(u32, u32)> {
        let (sql, bind_goals) = if goal_ids.is_empty() {
            (
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN is_resolved = 1 THEN 1 ELSE 0 END), 0)
                 FROM project_unknowns WHERE session_id = ?"
                    .to_string(),
                false,
            )
        } else {
            let placeholders = placeholders(goal_ids.len());
            (
                format!(
                    "SELECT COUNT(*),
                            COALESCE(SUM(CASE WHEN is_resolved = 1 THEN 1 ELSE 0 END), 0)
                     FROM project_unknowns
                     WHERE session_id = ?
                       AND (goal_id IS NULL OR goal_id = '' OR goal_id NOT IN ({placeholders}))"
                ),
                true,
            )
        };
        let mut query = sqlx::query_as::<_, (i64, i64)>(&sql).bind(session_id.to_string());
        if bind_goals {
            for id in goal_ids {
                query = query.bind(id.to_string());
            }
        }
        let (total, resolved) = query.fetch_one(&self.pool).await?;
        Ok((total as u32, resolved as u32))
    }

    // --- Dead ends ---

    pub async fn log_dead_end(&self, dead_end: &DeadEnd) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO project_dead_ends (id, session_id, goal_id, approach, why_failed, created_timestamp)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(dead_end.id.to_string())
        .bind(dead_end.session_id.to_string())
        .bind(dead_end.goal_id.map(|id| id.to_string()))
        .bind(&dead_end.approach)
        .bind(&dead_end.why_failed)
        .bind(dead_end.created_timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_dead_ends_matching(
        &self,
        session_id: Uuid,
        pattern: &str,
    ) -> KernelResult<u32> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM project_dead_ends WHERE session_id = ? AND approach LIKE ?",
        )
        .bind(session_id.to_string())
        .bind(format!("%{pattern}%"))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 as u32)
    }

    pub async fn count_dead_ends_before(
        &self,
        session_id: Uuid,
        cutoff: Option<DateTime<Utc>>,
    ) -> KernelResult<u32> {
        let row: (i64,) = match cutoff {
            Some(ts) => {
                sqlx::query_as(
                    "SELECT COUNT(*) FROM project_dead_ends
                     WHERE session_id = ? AND created_timestamp <= ?",
                )
                .bind(session_id.to_string())
                .bind(ts.to_rfc3339())
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM project_dead_ends WHERE session_id = ?")
                    .bind(session_id.to_string())
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(row.0 as u32)
    }

    pub async fn scoped_dead_end_counts(
        &self,
        session_id: Uuid,
        goal_ids: &[Uuid],
    ) -> KernelResult<ScopedCounts> {
        self.scoped_counts("project_dead_ends", session_id, goal_ids)
            .await
    }

    // --- Mistakes ---

    pub async fn log_mistake(&self, mistake: &Mistake) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO mistakes_made (id, session_id, mistake, why_wrong, prevention,
                                        cost_estimate, root_cause_vector, created_timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(mistake.id.to_string())
        .bind(mistake.session_id.to_string())
        .bind(&mistake.mistake)
        .bind(&mistake.why_wrong)
        .bind(&mistake.prevention)
        .bind(&mistake.cost_estimate)
        .bind(&mistake.root_cause_vector)
        .bind(mistake.created_timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn count_mistakes(&self, session_id: Uuid) -> KernelResult<u32> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM mistakes_made WHERE session_id = ?")
            .bind(session_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as u32)
    }

    /// Mistakes recorded after the cutoff, across all sessions. Trust decay input.
    pub async fn count_recent_mistakes(&self, since: DateTime<Utc>) -> KernelResult<u32> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM mistakes_made WHERE created_timestamp >= ?")
                .bind(since.to_rfc3339())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 as u32)
    }

    // --- Suggestions ---

    pub async fn log_suggestion(&self, suggestion: &Suggestion) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO suggestions (id, session_id, project_id, suggestion, domain, confidence,
                                      rationale, status, review_outcome, created_timestamp, reviewed_timestamp)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(suggestion.id.to_string())
        .bind(suggestion.session_id.to_string())
        .bind(&suggestion.project_id)
        .bind(&suggestion.suggestion)
        .bind(&suggestion.domain)
        .bind(suggestion.confidence)
        .bind(&suggestion.rationale)
        .bind(match suggestion.status {
            SuggestionStatus::Pending => "pending",
            SuggestionStatus::Reviewed => "reviewed",
        })
        .bind(suggestion.review_outcome.map(|o| o.as_str()))
        .bind(suggestion.created_timestamp.to_rfc3339())
        .bind(suggestion.reviewed_timestamp.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn review_suggestion(&self, id: Uuid, outcome: ReviewOutcome) -> KernelResult<()> {
        let result = sqlx::query(
            "UPDATE suggestions SET status = 'reviewed', review_outcome = ?, reviewed_timestamp = ?
             WHERE id = ?",
        )
        .bind(outcome.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(KernelError::BadInput(format!("suggestion not found: {id}")));
        }
        Ok(())
    }

    /// (accepted, rejected) suggestion review counts for a domain.
    pub async fn suggestion_outcomes(&self, domain: &str) -> KernelResult<(u32, u32)> {
        let row: (i64, i64) = sqlx::query_as(
            "SELECT COALESCE(SUM(CASE WHEN review_outcome = 'accepted' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN review_outcome = 'rejected' THEN 1 ELSE 0 END), 0)
             FROM suggestions WHERE domain = ?",
        )
        .bind(domain)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.0 as u32, row.1 as u32))
    }

    pub async fn suggestion_domains(&self) -> KernelResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT domain FROM suggestions WHERE domain IS NOT NULL ORDER BY domain",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(d,)| d).collect())
    }

    // --- Shared scoped counting ---

    async fn scoped_counts(
        &self,
        table: &str,
        session_id: Uuid,
        goal_ids: &[Uuid],
    ) -> KernelResult<ScopedCounts> {
        if goal_ids.is_empty() {
            let row: (i64,) =
                sqlx::query_as(&format!("SELECT COUNT(*) FROM {table} WHERE session_id = ?"))
                    .bind(session_id.to_string())
                    .fetch_one(&self.pool)
                    .await?;
            return Ok(ScopedCounts {
                scoped: 0,
                unscoped: row.0 as u32,
            });
        }

        let marks = placeholders(goal_ids.len());
        let sql = format!(
            "SELECT COALESCE(SUM(CASE WHEN goal_id IN ({marks}) THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN goal_id IS NULL OR goal_id = ''
                                      OR goal_id NOT IN ({marks}) THEN 1 ELSE 0 END), 0)
             FROM {table} WHERE session_id = ?"
        );
        let mut query = sqlx::query_as::<_, (i64, i64)>(&sql);
        for id in goal_ids {
            query = query.bind(id.to_string());
        }
        for id in goal_ids {
            query = query.bind(id.to_string());
        }
        let (scoped, unscoped) = query
            .bind(session_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(ScopedCounts {
            scoped: scoped as u32,
            unscoped: unscoped as u32,
        })
    }
}

fn placeholders(count: usize) -> String {
    std::iter::repeat("?").take(count).collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Goal, Session};
    use crate::storage::connection::create_test_pool;
    use crate::storage::goal_repository::GoalRepository;
    use crate::storage::migrations::{all_embedded_migrations, Migrator};
    use crate::storage::session_repository::SessionRepository;

    async fn setup() -> (ArtifactRepository, GoalRepository, Session) {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        let sessions = SessionRepository::new(pool.clone());
        let session = Session::new("a1", "proj");
        sessions.create(&session).await.unwrap();
        (
            ArtifactRepository::new(pool.clone()),
            GoalRepository::new(pool),
            session,
        )
    }

    #[tokio::test]
    async fn test_scoped_and_unscoped_findings() {
        let (artifacts, goals, session) = setup().await;
        let goal = Goal::new(session.session_id, "g");
        goals.create(&goal).await.unwrap();

        artifacts
            .log_finding(&Finding::new(session.session_id, "scoped", 0.5).with_goal(goal.id))
            .await
            .unwrap();
        artifacts
            .log_finding(&Finding::new(session.session_id, "unscoped", 0.5))
            .await
            .unwrap();

        let counts = artifacts
            .scoped_finding_counts(session.session_id, &[goal.id])
            .await
            .unwrap();
        assert_eq!(counts.scoped, 1);
        assert_eq!(counts.unscoped, 1);
        assert!((counts.weighted_total(0.3) - 1.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_deferred_unknowns_excluded() {
        let (artifacts, goals, session) = setup().await;
        let mut goal = Goal::new(session.session_id, "g");
        goals.create(&goal).await.unwrap();

        // Unresolved unknown tied to a completed goal is deferred work, not a gap.
        artifacts
            .log_unknown(&Unknown::new(session.session_id, "later").with_goal(goal.id))
            .await
            .unwrap();
        goal.complete();
        goals.update(&goal).await.unwrap();

        let (total, resolved) = artifacts
            .scoped_unknown_resolution(session.session_id, &[goal.id])
            .await
            .unwrap();
        assert_eq!((total, resolved), (0, 0));
    }

    #[tokio::test]
    async fn test_suggestion_outcomes_by_domain() {
        let (artifacts, _, session) = setup().await;
        let mut accepted =
            Suggestion::new(session.session_id, "use pooling", 0.8).with_domain("performance");
        accepted.review(ReviewOutcome::Accepted);
        artifacts.log_suggestion(&accepted).await.unwrap();

        let mut rejected =
            Suggestion::new(session.session_id, "rewrite in brainfuck", 0.2).with_domain("performance");
        rejected.review(ReviewOutcome::Rejected);
        artifacts.log_suggestion(&rejected).await.unwrap();

        let (acc, rej) = artifacts.suggestion_outcomes("performance").await.unwrap();
        assert_eq!((acc, rej), (1, 1));
        assert_eq!(artifacts.suggestion_domains().await.unwrap(), vec!["performance"]);
    }
}
