//! In-memory job lock for testing and development.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use super::lock::{busy_error, JobLock, JobOutcome, LockError, ProgressUpdate};
use super::{default_stale_threshold, JobRecord, JobStatus, JobType};

/// Mutex-guarded job table.
///
/// The whole map is one critical section, which stands in for the row
/// locks the Postgres backend takes. Useful for testing and development.
pub struct MemoryJobLock {
    jobs: Mutex<HashMap<Uuid, JobRecord>>,
    stale_after: Duration,
}

impl Default for MemoryJobLock {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobLock {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            stale_after: default_stale_threshold(),
        }
    }

    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            stale_after,
        }
    }

    /// Testing hook: overwrite a job's heartbeat timestamp.
    pub fn set_heartbeat(&self, job_id: Uuid, at: DateTime<Utc>) {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(&job_id) {
            job.heartbeat_at = Some(at);
        }
    }

    /// Snapshot of every job, for assertions.
    pub fn all_jobs(&self) -> Vec<JobRecord> {
        self.jobs.lock().unwrap().values().cloned().collect()
    }

    /// Count of pending/running jobs for one book.
    pub fn active_count(&self, book_id: &str) -> usize {
        self.jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| j.book_id == book_id && j.status.is_active())
            .count()
    }

    fn mark_stale(job: &mut JobRecord) {
        let message = job.stale_message();
        tracing::warn!(
            job_id = %job.job_id,
            book_id = %job.book_id,
            heartbeat_at = ?job.heartbeat_at,
            "job transitioned running -> failed (stale heartbeat)"
        );
        job.status = JobStatus::Failed;
        job.completed_at = Some(Utc::now());
        job.error_message = Some(message);
    }
}

#[async_trait]
impl JobLock for MemoryJobLock {
    async fn acquire(
        &self,
        book_id: &str,
        job_type: JobType,
        total_items: Option<i64>,
    ) -> Result<Uuid, LockError> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();

        for job in jobs.values_mut() {
            if job.book_id != book_id || !job.status.is_active() {
                continue;
            }
            if job.is_stale(self.stale_after, now) {
                Self::mark_stale(job);
            } else {
                return Err(busy_error(job));
            }
        }

        let record = JobRecord::new(book_id, job_type, total_items);
        let job_id = record.job_id;
        tracing::info!(
            %job_id,
            book_id,
            %job_type,
            ?total_items,
            "job created"
        );
        jobs.insert(job_id, record);
        Ok(job_id)
    }

    async fn start(&self, job_id: Uuid) -> Result<(), LockError> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs.get_mut(&job_id).ok_or(LockError::NotFound(job_id))?;
        if job.status != JobStatus::Pending {
            return Err(LockError::InvalidTransition(format!(
                "cannot start job {job_id} in '{}' state",
                job.status
            )));
        }
        job.status = JobStatus::Running;
        job.heartbeat_at = Some(Utc::now());
        tracing::info!(%job_id, "job transitioned pending -> running");
        Ok(())
    }

    async fn update_progress(&self, job_id: Uuid, update: ProgressUpdate) -> Result<(), LockError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(());
        };
        if job.status != JobStatus::Running {
            // Cancelled or marked stale out from under the worker.
            return Ok(());
        }
        job.current_item = Some(update.current_item);
        job.completed_items = update.completed;
        job.failed_items = update.failed;
        job.heartbeat_at = Some(Utc::now());
        if let Some(last) = update.last_completed_item {
            job.last_completed_item = Some(last);
        }
        if let Some(detail) = update.detail {
            job.progress_detail = Some(detail);
        }
        Ok(())
    }

    async fn release(
        &self,
        job_id: Uuid,
        outcome: JobOutcome,
        error: Option<String>,
    ) -> Result<(), LockError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else {
            tracing::warn!(%job_id, "cannot release: job not found");
            return Ok(());
        };
        if job.status.is_terminal() {
            tracing::warn!(%job_id, status = %job.status, "cannot release job in terminal state");
            return Ok(());
        }
        let old = job.status;
        job.status = outcome.as_status();
        job.completed_at = Some(Utc::now());
        job.error_message = error;
        tracing::info!(%job_id, from = %old, to = %job.status, "job released");
        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>, LockError> {
        Ok(self.jobs.lock().unwrap().get(&job_id).cloned())
    }

    async fn get_latest(
        &self,
        book_id: &str,
        job_type: Option<JobType>,
    ) -> Result<Option<JobRecord>, LockError> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Utc::now();
        let latest_id = jobs
            .values()
            .filter(|j| j.book_id == book_id)
            .filter(|j| job_type.map_or(true, |t| j.job_type == t))
            .max_by_key(|j| j.started_at)
            .map(|j| j.job_id);

        let Some(job_id) = latest_id else {
            return Ok(None);
        };
        let job = jobs.get_mut(&job_id).ok_or(LockError::NotFound(job_id))?;
        if job.is_stale(self.stale_after, now) {
            Self::mark_stale(job);
        }
        Ok(Some(job.clone()))
    }
}
