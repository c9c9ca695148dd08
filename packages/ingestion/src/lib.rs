//! # Book Ingestion
//!
//! Page-streaming extraction of teaching guidelines from scanned textbook
//! pages, with the job-control substrate that keeps long-running work per
//! book serialized and crash-recoverable.
//!
//! ## Architecture
//!
//! ```text
//! UPLOAD → OCR → EXTRACT → FINALIZE → SYNC
//!
//! 1. Raw page images land under books/{book_id}/raw/
//! 2. OcrBatchWorker converts each page to a canonical PNG and OCR text,
//!    batching metadata writes
//! 3. ExtractionOrchestrator walks pages in order: minisummary → context
//!    pack → boundary detection + guideline extraction → shard merge →
//!    summaries → index updates → stability sweep
//! 4. FinalizationPass marks subtopics final, refines names, merges
//!    duplicates, regenerates topic summaries
//! 5. GuidelineRepository snapshots the book into teaching_guidelines in
//!    one transaction
//! ```
//!
//! Every phase runs under a book-scoped job from [`jobs::JobLock`]: at most
//! one pending/running job per book, transitions only along
//! `pending -> running -> {completed, failed}`, heartbeats refreshed on
//! every progress update, and stale running jobs failed by the next reader.
//! A restarted worker resumes from `last_completed_item + 1`
//! ([`pipeline::plan_run`]).
//!
//! ## Seams
//!
//! - [`traits::LlmClient`]: one generic `call`; JSON mode is the only
//!   provider feature assumed. An OpenAI implementation sits behind the
//!   `openai` feature.
//! - [`traits::ObjectStore`]: flat key/value artifact storage
//!   ([`layout`] owns the key scheme); [`stores::MemoryObjectStore`] for
//!   tests and development.
//! - [`traits::OcrEngine`]: normalization plus recognition.
//! - [`jobs::JobLock`] / [`sync::GuidelineRepository`]: memory
//!   implementations always available, Postgres behind the `postgres`
//!   feature (sqlx, migrations in `migrations/`).
//!
//! Per-page failures are classified retryable/terminal
//! ([`error::classify_error`]) and recorded in the job's progress detail;
//! they never abort a job. Job-level failures release the job `failed`
//! with the error message.

pub mod config;
pub mod error;
pub mod jobs;
pub mod layout;
pub mod llm;
pub mod ocr;
pub mod pipeline;
pub mod slug;
pub mod stores;
pub mod sync;
pub mod testing;
pub mod traits;
pub mod types;

pub use config::PipelineConfig;
pub use error::{classify_error, ErrorKind, IngestionError, Result};
pub use jobs::{JobLock, JobOutcome, JobRecord, JobStatus, JobType, LockError, MemoryJobLock, ProgressUpdate};
pub use llm::{call_with_retry, RetryPolicy};
pub use ocr::{validate_bulk_upload, OcrBatchWorker, OcrWorkerConfig};
pub use pipeline::{
    plan_run, ExtractionOrchestrator, ExtractionReport, FinalizationPass, FinalizationReport,
    RunPlan,
};
pub use slug::{deslugify, slugify};
pub use stores::MemoryObjectStore;
pub use sync::{GuidelineRepository, GuidelineRow, MemoryGuidelineRepository, SyncError};
pub use traits::{
    CallOptions, LlmClient, LlmError, LlmResponse, ObjectStore, ObjectStoreExt, OcrEngine,
    OcrError, StoreError,
};
pub use types::{BookMetadata, GuidelinesIndex, PageIndex, SubtopicShard, SubtopicStatus};

#[cfg(feature = "openai")]
pub use llm::OpenAiClient;

#[cfg(feature = "postgres")]
pub use jobs::PgJobLock;

#[cfg(feature = "postgres")]
pub use sync::PgGuidelineRepository;
