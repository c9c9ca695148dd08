//! The job lock trait: per-book mutual exclusion and lifecycle control.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::{JobRecord, JobStatus, JobType};

/// Errors from job lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// A live pending/running job already holds the book.
    #[error("book {book_id} already has an active {job_type} job ({status}, started {started})")]
    Busy {
        book_id: String,
        job_type: JobType,
        status: JobStatus,
        started: String,
    },

    /// The requested transition is not an edge of the state machine.
    #[error("invalid job state transition: {0}")]
    InvalidTransition(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    /// Backend failure (database, serialization).
    #[error("job store backend error: {0}")]
    Backend(String),
}

/// Absolute progress snapshot for one update.
///
/// All fields are absolute values, not deltas, so duplicate updates are
/// idempotent.
#[derive(Debug, Clone, Default)]
pub struct ProgressUpdate {
    pub current_item: i64,
    pub completed: i64,
    pub failed: i64,
    pub last_completed_item: Option<i64>,
    /// Opaque JSON string; replaces the stored detail when present.
    pub detail: Option<String>,
}

/// Terminal outcome passed to [`JobLock::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed,
}

impl JobOutcome {
    pub fn as_status(self) -> JobStatus {
        match self {
            JobOutcome::Completed => JobStatus::Completed,
            JobOutcome::Failed => JobStatus::Failed,
        }
    }
}

/// Per-book job lifecycle control.
///
/// Implementations enforce:
/// - at most one pending/running job per book (application check plus a
///   partial unique index backstop in the Postgres backend);
/// - transitions only along `pending -> running -> {completed, failed}`,
///   each one under a row-level lock;
/// - stale detection on every read and acquire.
#[async_trait]
pub trait JobLock: Send + Sync {
    /// Create a new `pending` job for the book, failing an expired running
    /// job first if one is in the way. `LockError::Busy` when a live active
    /// job exists.
    async fn acquire(
        &self,
        book_id: &str,
        job_type: JobType,
        total_items: Option<i64>,
    ) -> Result<Uuid, LockError>;

    /// Transition `pending -> running`; the worker's first action. Stamps
    /// the heartbeat.
    async fn start(&self, job_id: Uuid) -> Result<(), LockError>;

    /// Record progress and refresh the heartbeat. Silently no-ops unless
    /// the job is `running` (the worker may be racing stale detection).
    async fn update_progress(&self, job_id: Uuid, update: ProgressUpdate) -> Result<(), LockError>;

    /// Transition to a terminal state. No-ops (with a log line) when the
    /// job is missing or already terminal.
    async fn release(
        &self,
        job_id: Uuid,
        outcome: JobOutcome,
        error: Option<String>,
    ) -> Result<(), LockError>;

    async fn get_job(&self, job_id: Uuid) -> Result<Option<JobRecord>, LockError>;

    /// Most recent job for a book by `started_at`, opportunistically
    /// failing it first when it is a stale running job.
    async fn get_latest(
        &self,
        book_id: &str,
        job_type: Option<JobType>,
    ) -> Result<Option<JobRecord>, LockError>;
}

/// Build the `Busy` error for an active job.
pub(crate) fn busy_error(job: &JobRecord) -> LockError {
    LockError::Busy {
        book_id: job.book_id.clone(),
        job_type: job.job_type,
        status: job.status,
        started: job
            .started_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}
