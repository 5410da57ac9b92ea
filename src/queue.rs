use crate::errors::AppError;
use crate::models::Country;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

/// Kinds of background work the workflow engine schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Run the validation rules for an application (optionally a subset).
    ValidationRun,
    /// Simulate the third-party banking data provider for an application.
    BankingSimulation,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ValidationRun => "validation_run",
            JobKind::BankingSimulation => "banking_simulation",
        }
    }

    pub fn parse(value: &str) -> Option<JobKind> {
        match value {
            "validation_run" => Some(JobKind::ValidationRun),
            "banking_simulation" => Some(JobKind::BankingSimulation),
            _ => None,
        }
    }
}

/// A claimed job, ready to execute.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub application_id: i64,
    pub country: String,
    /// Optional rule subset for validation runs; None means the full set.
    pub rule_names: Option<Vec<String>>,
    pub attempts: i32,
    pub max_attempts: i32,
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    kind: String,
    application_id: i64,
    country: String,
    rule_names: Option<Json<Vec<String>>>,
    attempts: i32,
    max_attempts: i32,
}

/// Durable Postgres-backed job queue with at-least-once delivery.
///
/// Jobs are claimed with FOR UPDATE SKIP LOCKED so multiple workers can
/// poll concurrently; failed jobs are re-queued with a pushed-out run_at
/// until max_attempts is exhausted. Handlers must be idempotent.
#[derive(Clone)]
pub struct JobQueue {
    pool: PgPool,
    max_attempts: i32,
}

impl JobQueue {
    pub fn new(pool: PgPool, max_attempts: i32) -> Self {
        Self { pool, max_attempts }
    }

    /// Enqueues a job to run as soon as a worker picks it up.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        application_id: i64,
        country: Country,
        rule_names: Option<Vec<String>>,
    ) -> Result<Uuid, AppError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO jobs (id, kind, application_id, country, rule_names, status, attempts, max_attempts, run_at)
            VALUES ($1, $2, $3, $4, $5, 'queued', 0, $6, now())
            "#,
        )
        .bind(id)
        .bind(kind.as_str())
        .bind(application_id)
        .bind(country.as_str())
        .bind(rule_names.map(Json))
        .bind(self.max_attempts)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Enqueued {} job {} for application {}/{}",
            kind.as_str(),
            id,
            application_id,
            country
        );
        Ok(id)
    }

    /// Claims the next due job, if any. The claim marks the job running and
    /// bumps its attempt counter in one statement so concurrent workers
    /// never double-claim.
    pub async fn claim_next(&self) -> Result<Option<Job>, AppError> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            WITH next_job AS (
                SELECT id FROM jobs
                WHERE status = 'queued' AND run_at <= now()
                ORDER BY run_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running', attempts = attempts + 1, updated_at = now()
            WHERE id = (SELECT id FROM next_job)
            RETURNING id, kind, application_id, country, rule_names, attempts, max_attempts
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let kind = JobKind::parse(&row.kind).ok_or_else(|| {
            AppError::Configuration(format!("unknown job kind '{}' in queue", row.kind))
        })?;

        Ok(Some(Job {
            id: row.id,
            kind,
            application_id: row.application_id,
            country: row.country,
            rule_names: row.rule_names.map(|j| j.0),
            attempts: row.attempts,
            max_attempts: row.max_attempts,
        }))
    }

    pub async fn complete(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE jobs SET status = 'completed', updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Parks a job as failed immediately, bypassing remaining retries. For
    /// faults no retry can fix, such as an unrecognized country on the row.
    pub async fn fail_permanent(&self, job: &Job, error: &str) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', last_error = $2, updated_at = now() WHERE id = $1",
        )
        .bind(job.id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        tracing::error!("Job {} parked as failed without retry: {}", job.id, error);
        Ok(())
    }

    /// Records a failed attempt. The job is re-queued with backoff until its
    /// attempts are exhausted, then parked as failed.
    pub async fn fail(&self, job: &Job, error: &str) -> Result<(), AppError> {
        if job.attempts < job.max_attempts {
            let delay_secs = retry_delay_secs(job.attempts);
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'queued',
                    last_error = $2,
                    run_at = now() + make_interval(secs => $3),
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .bind(error)
            .bind(delay_secs as f64)
            .execute(&self.pool)
            .await?;
            tracing::warn!(
                "Job {} attempt {}/{} failed, retrying in {}s: {}",
                job.id,
                job.attempts,
                job.max_attempts,
                delay_secs,
                error
            );
        } else {
            sqlx::query(
                "UPDATE jobs SET status = 'failed', last_error = $2, updated_at = now() WHERE id = $1",
            )
            .bind(job.id)
            .bind(error)
            .execute(&self.pool)
            .await?;
            tracing::error!(
                "Job {} exhausted {} attempts, parking as failed: {}",
                job.id,
                job.max_attempts,
                error
            );
        }
        Ok(())
    }
}

/// Exponential backoff, capped at one minute.
fn retry_delay_secs(attempts: i32) -> u64 {
    let exp = attempts.clamp(0, 6) as u32;
    (2u64.pow(exp)).min(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_grows_and_caps() {
        assert_eq!(retry_delay_secs(1), 2);
        assert_eq!(retry_delay_secs(3), 8);
        assert_eq!(retry_delay_secs(6), 60);
        assert_eq!(retry_delay_secs(100), 60);
    }

    #[test]
    fn job_kinds_round_trip() {
        for kind in [JobKind::ValidationRun, JobKind::BankingSimulation] {
            assert_eq!(JobKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(JobKind::parse("mystery"), None);
    }
}
