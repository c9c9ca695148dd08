//! Book-scoped jobs: the concurrency anchor of the pipeline.
//!
//! At most one pending/running job exists per book at any instant. All
//! state transitions go through the [`JobLock`] trait; no other code may
//! touch a job's status. A running job whose heartbeat has aged past the
//! stale threshold is dead and any reader may fail it.

pub mod lock;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use lock::{JobLock, JobOutcome, LockError, ProgressUpdate};
pub(crate) use lock::busy_error;
pub use memory::MemoryJobLock;
#[cfg(feature = "postgres")]
pub use postgres::PgJobLock;

/// Default heartbeat age after which a running job counts as dead.
pub fn default_stale_threshold() -> Duration {
    Duration::minutes(2)
}

/// Job lifecycle. Transitions are exactly
/// `pending -> running -> {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(type_name = "job_status", rename_all = "snake_case"))]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(feature = "postgres", sqlx(type_name = "book_job_type", rename_all = "snake_case"))]
pub enum JobType {
    OcrBatch,
    Extraction,
    Finalization,
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobType::OcrBatch => "ocr_batch",
            JobType::Extraction => "extraction",
            JobType::Finalization => "finalization",
        };
        f.write_str(s)
    }
}

/// One row of the job table; also the stable wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "postgres", derive(sqlx::FromRow))]
pub struct JobRecord {
    pub job_id: Uuid,
    pub book_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub total_items: Option<i64>,
    #[serde(default)]
    pub completed_items: i64,
    #[serde(default)]
    pub failed_items: i64,
    pub current_item: Option<i64>,
    pub last_completed_item: Option<i64>,
    /// Opaque JSON string written atomically per progress update.
    pub progress_detail: Option<String>,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl JobRecord {
    /// Fresh pending job for a book.
    pub fn new(book_id: impl Into<String>, job_type: JobType, total_items: Option<i64>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            book_id: book_id.into(),
            job_type,
            status: JobStatus::Pending,
            total_items,
            completed_items: 0,
            failed_items: 0,
            current_item: None,
            last_completed_item: None,
            progress_detail: None,
            heartbeat_at: None,
            started_at: Some(Utc::now()),
            completed_at: None,
            error_message: None,
        }
    }

    /// A running job is stale once its heartbeat (or start, before the
    /// first heartbeat) is older than `threshold`.
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        match self.heartbeat_at.or(self.started_at) {
            Some(seen) => now - seen > threshold,
            None => false,
        }
    }

    /// Canned error message for stale transitions, pointing the operator at
    /// the resume position.
    pub fn stale_message(&self) -> String {
        let since = self
            .heartbeat_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string());
        let resume = self
            .last_completed_item
            .map(|i| (i + 1).to_string())
            .unwrap_or_else(|| "start".to_string());
        format!(
            "Job interrupted (no heartbeat since {since}). \
             Worker may have restarted. Resume from item {resume}."
        )
    }
}
