//! Postgres-backed job lock.
//!
//! Transitions run under `SELECT ... FOR UPDATE`; the partial unique index
//! on `(book_id) WHERE status IN ('pending', 'running')` backstops the
//! application-level active-job check. Progress updates are a single
//! conditional `UPDATE` guarded by `status = 'running'` and take no row
//! lock.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::lock::{busy_error, JobLock, JobOutcome, LockError, ProgressUpdate};
use super::{default_stale_threshold, JobRecord, JobStatus, JobType};

const JOB_COLUMNS: &str = "job_id, book_id, job_type, status, total_items, completed_items, \
     failed_items, current_item, last_completed_item, progress_detail, heartbeat_at, \
     started_at, completed_at, error_message";

pub struct PgJobLock {
    pool: PgPool,
    stale_after: Duration,
}

impl PgJobLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            stale_after: default_stale_threshold(),
        }
    }

    pub fn with_stale_after(pool: PgPool, stale_after: Duration) -> Self {
        Self { pool, stale_after }
    }

    /// Fail a stale running job, re-checking status and staleness under a
    /// row lock so only one transition wins.
    async fn mark_stale(&self, job_id: Uuid) -> Result<(), LockError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let query = format!("SELECT {JOB_COLUMNS} FROM book_jobs WHERE job_id = $1 FOR UPDATE");
        let Some(job) = sqlx::query_as::<_, JobRecord>(&query)
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
        else {
            return Ok(());
        };
        if job.status != JobStatus::Running || !job.is_stale(self.stale_after, Utc::now()) {
            // Another reader won the race or the heartbeat came back.
            return Ok(());
        }
        sqlx::query(
            "UPDATE book_jobs SET status = 'failed', completed_at = NOW(), error_message = $2 \
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(job.stale_message())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        tracing::warn!(
            %job_id,
            book_id = %job.book_id,
            heartbeat_at = ?job.heartbeat_at,
            "job transitioned running -> failed (stale heartbeat)"
        );
        Ok(())
    }
}

#[async_trait]
impl JobLock for PgJobLock {
    async fn acquire(
        &self,
        book_id: &str,
        job_type: JobType,
        total_items: Option<i64>,
    ) -> Result<Uuid, LockError> {
        let query = format!(
            "SELECT {JOB_COLUMNS} FROM book_jobs \
             WHERE book_id = $1 AND status IN ('pending', 'running') LIMIT 1"
        );
        if let Some(existing) = sqlx::query_as::<_, JobRecord>(&query)
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
        {
            if existing.is_stale(self.stale_after, Utc::now()) {
                self.mark_stale(existing.job_id).await?;
            } else {
                return Err(busy_error(&existing));
            }
        }

        let record = JobRecord::new(book_id, job_type, total_items);
        let insert = sqlx::query(
            "INSERT INTO book_jobs \
             (job_id, book_id, job_type, status, total_items, completed_items, failed_items, started_at) \
             VALUES ($1, $2, $3, 'pending', $4, 0, 0, $5)",
        )
        .bind(record.job_id)
        .bind(&record.book_id)
        .bind(record.job_type)
        .bind(record.total_items)
        .bind(record.started_at)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => {
                tracing::info!(job_id = %record.job_id, book_id, %job_type, ?total_items, "job created");
                Ok(record.job_id)
            }
            Err(err) if is_unique_violation(&err) => {
                // Another worker slipped in between the check and the insert;
                // the partial unique index caught it.
                Err(LockError::Busy {
                    book_id: book_id.to_string(),
                    job_type,
                    status: JobStatus::Pending,
                    started: "just now".to_string(),
                })
            }
            Err(err) => Err(backend(err)),
        }
    }

    async fn start(&self, job_id: Uuid) -> Result<(), LockError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let query = format!("SELECT {JOB_COLUMNS} FROM book_jobs WHERE job_id = $1 FOR UPDATE");
        let job = sqlx::query_as::<_, JobRecord>(&query)
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
            .ok_or(LockError::NotFound(job_id))?;
        if job.status != JobStatus::Pending {
            return Err(LockError::InvalidTransition(format!(
                "cannot start job {job_id} in '{}' state",
                job.status
            )));
        }
        sqlx::query("UPDATE book_jobs SET status = 'running', heartbeat_at = NOW() WHERE job_id = $1")
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        tracing::info!(%job_id, "job transitioned pending -> running");
        Ok(())
    }

    async fn update_progress(&self, job_id: Uuid, update: ProgressUpdate) -> Result<(), LockError> {
        sqlx::query(
            "UPDATE book_jobs SET \
                 current_item = $2, \
                 completed_items = $3, \
                 failed_items = $4, \
                 last_completed_item = COALESCE($5, last_completed_item), \
                 progress_detail = COALESCE($6, progress_detail), \
                 heartbeat_at = NOW() \
             WHERE job_id = $1 AND status = 'running'",
        )
        .bind(job_id)
        .bind(update.current_item)
        .bind(update.completed)
        .bind(update.failed)
        .bind(update.last_completed_item)
        .bind(update.detail)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn release(
        &self,
        job_id: Uuid,
        outcome: JobOutcome,
        error: Option<String>,
    ) -> Result<(), LockError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let query = format!("SELECT {JOB_COLUMNS} FROM book_jobs WHERE job_id = $1 FOR UPDATE");
        let Some(job) = sqlx::query_as::<_, JobRecord>(&query)
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend)?
        else {
            tracing::warn!(%job_id, "cannot release: job not found");
            return Ok(());
        };
        if job.status.is_terminal() {
            tracing::warn!(%job_id, status = %job.status, "cannot release job in terminal state");
            return Ok(());
        }
        sqlx::query(
            "UPDATE book_jobs SET status = $2, completed_at = NOW(), error_message = $3 \
             WHERE job_id = $1",
        )
        .bind(job_id)
        .bind(outcome.as_status())
        .bind(error)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        tracing::info!(%job_id, from = %job.status, to = %outcome.as_status(), "job released");
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>, LockError> {
        let query = format!("SELECT {JOB_COLUMNS} FROM book_jobs WHERE job_id = $1");
        sqlx::query_as::<_, JobRecord>(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }

    async fn get_latest(
        &self,
        book_id: &str,
        job_type: Option<JobType>,
    ) -> Result<Option<JobRecord>, LockError> {
        let query = match job_type {
            Some(_) => format!(
                "SELECT {JOB_COLUMNS} FROM book_jobs \
                 WHERE book_id = $1 AND job_type = $2 \
                 ORDER BY started_at DESC NULLS LAST LIMIT 1"
            ),
            None => format!(
                "SELECT {JOB_COLUMNS} FROM book_jobs \
                 WHERE book_id = $1 \
                 ORDER BY started_at DESC NULLS LAST LIMIT 1"
            ),
        };
        let mut fetch = sqlx::query_as::<_, JobRecord>(&query).bind(book_id);
        if let Some(job_type) = job_type {
            fetch = fetch.bind(job_type);
        }
        let Some(job) = fetch.fetch_optional(&self.pool).await.map_err(backend)? else {
            return Ok(None);
        };

        if job.is_stale(self.stale_after, Utc::now()) {
            self.mark_stale(job.job_id).await?;
            return self.get_job(job.job_id).await;
        }
        Ok(Some(job))
    }
}

fn backend(err: sqlx::Error) -> LockError {
    LockError::Backend(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}
