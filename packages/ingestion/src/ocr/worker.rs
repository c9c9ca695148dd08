//! Bulk OCR worker and the synchronous single-page retry path.
//!
//! The worker owns one `ocr_batch` job: page by page it converts the raw
//! upload to the canonical image, runs OCR with bounded retries for
//! transient failures, uploads the text, and records the outcome in the
//! book's metadata document. Metadata flushes are batched; per-page errors
//! never fail the job.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::error::{classify_error, IngestionError, Result};
use crate::jobs::{busy_error, JobLock, JobOutcome, JobType, ProgressUpdate};
use crate::layout;
use crate::traits::ocr::{OcrEngine, OcrError};
use crate::traits::store::{ObjectStore, ObjectStoreExt};
use crate::types::{BookMetadata, OcrRunStats, OcrStatus, PageError, PageMeta, ProgressDetail};

/// Worker tunables.
#[derive(Debug, Clone)]
pub struct OcrWorkerConfig {
    /// Pages between metadata flushes.
    pub flush_interval: u32,
    /// OCR attempts per page for transient failures.
    pub max_ocr_attempts: u32,
    /// Initial delay between OCR attempts; doubles each retry.
    pub retry_delay: Duration,
}

impl Default for OcrWorkerConfig {
    fn default() -> Self {
        Self {
            flush_interval: 5,
            max_ocr_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

/// Outcome of one batch run.
#[derive(Debug, Clone, Default)]
pub struct OcrBatchReport {
    pub completed: i64,
    pub failed: i64,
    /// Metadata flushes performed, interior plus final.
    pub flushes: u32,
}

pub struct OcrBatchWorker {
    store: Arc<dyn ObjectStore>,
    engine: Arc<dyn OcrEngine>,
    lock: Arc<dyn JobLock>,
    config: OcrWorkerConfig,
}

impl OcrBatchWorker {
    pub fn new(store: Arc<dyn ObjectStore>, engine: Arc<dyn OcrEngine>, lock: Arc<dyn JobLock>) -> Self {
        Self::with_config(store, engine, lock, OcrWorkerConfig::default())
    }

    pub fn with_config(
        store: Arc<dyn ObjectStore>,
        engine: Arc<dyn OcrEngine>,
        lock: Arc<dyn JobLock>,
        config: OcrWorkerConfig,
    ) -> Self {
        Self { store, engine, lock, config }
    }

    /// Process the given pages under an already-acquired `ocr_batch` job.
    ///
    /// The job is released `completed` even when some pages failed; their
    /// errors live in `progress_detail`. Only a worker-level failure (for
    /// example the metadata document not loading) releases it `failed`.
    pub async fn run(&self, job_id: Uuid, book_id: &str, pages: &[u32]) -> Result<OcrBatchReport> {
        self.lock.start(job_id).await?;
        tracing::info!(%job_id, book_id, pages = pages.len(), "starting bulk OCR");
        match self.run_inner(job_id, book_id, pages).await {
            Ok(report) => {
                self.lock.release(job_id, JobOutcome::Completed, None).await?;
                tracing::info!(
                    %job_id,
                    completed = report.completed,
                    failed = report.failed,
                    flushes = report.flushes,
                    "bulk OCR complete"
                );
                Ok(report)
            }
            Err(err) => {
                if let Err(release_err) = self
                    .lock
                    .release(job_id, JobOutcome::Failed, Some(err.to_string()))
                    .await
                {
                    tracing::error!(%job_id, error = %release_err, "failed to release job after error");
                }
                Err(err)
            }
        }
    }

    async fn run_inner(&self, job_id: Uuid, book_id: &str, pages: &[u32]) -> Result<OcrBatchReport> {
        let mut metadata: BookMetadata = self.store.get_json(&layout::metadata(book_id)).await?;
        let mut detail = ProgressDetail::<OcrRunStats>::default();
        let mut report = OcrBatchReport::default();
        let mut last_completed: Option<i64> = None;

        for (idx, &page) in pages.iter().enumerate() {
            self.lock
                .update_progress(
                    job_id,
                    ProgressUpdate {
                        current_item: page as i64,
                        completed: report.completed,
                        failed: report.failed,
                        last_completed_item: last_completed,
                        detail: None,
                    },
                )
                .await?;

            let outcome = match metadata.pages.get_mut(&page) {
                Some(meta) => match self.process_page(book_id, page, meta).await {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        meta.ocr_status = OcrStatus::Failed;
                        meta.ocr_error = Some(err.to_string());
                        Err(err)
                    }
                },
                None => Err(IngestionError::MissingPageMeta { page }),
            };

            match outcome {
                Ok(()) => report.completed += 1,
                Err(err) => {
                    report.failed += 1;
                    let kind = classify_error(&err.to_string());
                    tracing::warn!(book_id, page, error = %err, error_type = ?kind, "page OCR failed");
                    detail.page_errors.insert(
                        page.to_string(),
                        PageError { error: err.to_string(), error_type: kind },
                    );
                }
            }

            last_completed = Some(page as i64);
            detail.stats = OcrRunStats {
                pages_processed: (idx + 1) as u32,
                completed: report.completed as u32,
                failed: report.failed as u32,
            };
            self.lock
                .update_progress(
                    job_id,
                    ProgressUpdate {
                        current_item: page as i64,
                        completed: report.completed,
                        failed: report.failed,
                        last_completed_item: last_completed,
                        detail: Some(detail.to_json()?),
                    },
                )
                .await?;

            if (idx as u32 + 1) % self.config.flush_interval == 0 {
                self.store.update_metadata_json(book_id, &metadata).await?;
                report.flushes += 1;
                tracing::debug!(book_id, page, "flushed page metadata");
            }
        }

        self.store.update_metadata_json(book_id, &metadata).await?;
        report.flushes += 1;
        Ok(report)
    }

    /// Convert, upload, recognize, upload for one page. The metadata entry
    /// is updated in place as steps land so a later failure keeps earlier
    /// progress (the canonical image in particular).
    async fn process_page(&self, book_id: &str, page: u32, meta: &mut PageMeta) -> Result<()> {
        let raw = self.store.download_bytes(&meta.raw_image_key).await?;
        let extension = meta
            .raw_image_key
            .rsplit_once('.')
            .map(|(_, ext)| ext)
            .unwrap_or("png");

        let canonical = self.engine.normalize(&raw, extension).await.map_err(|err| {
            tracing::error!(raw_key = %meta.raw_image_key, error = %err, "image normalization failed");
            err
        })?;

        let image_key = layout::page_image(book_id, page);
        self.store
            .upload_bytes(&image_key, canonical.clone(), Some("image/png"))
            .await?;
        meta.image_key = Some(image_key);

        let text = self.recognize_with_retry(&canonical).await?;
        let text_key = layout::page_text(book_id, page);
        self.store
            .upload_bytes(&text_key, text.into_bytes(), Some("text/plain"))
            .await?;
        meta.text_key = Some(text_key);
        meta.ocr_status = OcrStatus::Completed;
        meta.ocr_error = None;
        Ok(())
    }

    async fn recognize_with_retry(&self, image: &[u8]) -> std::result::Result<String, OcrError> {
        let mut delay = self.config.retry_delay;
        let mut attempt = 1;
        loop {
            match self.engine.recognize(image).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_transient() && attempt < self.config.max_ocr_attempts => {
                    tracing::warn!(
                        attempt,
                        max_attempts = self.config.max_ocr_attempts,
                        error = %err,
                        "transient OCR failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Synchronously re-OCR one previously failed page.
    ///
    /// Refuses while an `ocr_batch` or `finalization` job is active on the
    /// book; otherwise operates directly on the metadata document and
    /// flushes it once.
    pub async fn retry_page(&self, book_id: &str, page: u32) -> Result<PageMeta> {
        for job_type in [JobType::OcrBatch, JobType::Finalization] {
            if let Some(job) = self.lock.get_latest(book_id, Some(job_type)).await? {
                if job.status.is_active() {
                    return Err(busy_error(&job).into());
                }
            }
        }

        let mut metadata: BookMetadata = self.store.get_json(&layout::metadata(book_id)).await?;
        let result = match metadata.pages.get_mut(&page) {
            Some(meta) => match self.process_page(book_id, page, meta).await {
                Ok(()) => Ok(meta.clone()),
                Err(err) => {
                    meta.ocr_status = OcrStatus::Failed;
                    meta.ocr_error = Some(err.to_string());
                    Err(err)
                }
            },
            None => Err(IngestionError::MissingPageMeta { page }),
        };
        self.store.update_metadata_json(book_id, &metadata).await?;
        tracing::info!(book_id, page, success = result.is_ok(), "single-page OCR retry");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{JobStatus, MemoryJobLock};
    use crate::stores::MemoryObjectStore;
    use crate::testing::MockOcr;

    async fn seed_book(store: &MemoryObjectStore, book_id: &str, pages: &[u32]) {
        let mut book = BookMetadata::new(book_id);
        book.total_pages = pages.len() as u32;
        for &page in pages {
            let raw_key = layout::raw_page(book_id, page, "png");
            store
                .upload_bytes(&raw_key, format!("raw page {page}").into_bytes(), None)
                .await
                .unwrap();
            book.pages.insert(page, PageMeta::new(raw_key));
        }
        store.update_metadata_json(book_id, &book).await.unwrap();
    }

    fn worker(
        store: Arc<MemoryObjectStore>,
        ocr: MockOcr,
        lock: Arc<MemoryJobLock>,
    ) -> OcrBatchWorker {
        OcrBatchWorker::with_config(
            store,
            Arc::new(ocr),
            lock,
            OcrWorkerConfig {
                flush_interval: 5,
                max_ocr_attempts: 3,
                retry_delay: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn empty_page_list_completes_with_zero_counts() {
        let store = Arc::new(MemoryObjectStore::new());
        let lock = Arc::new(MemoryJobLock::new());
        seed_book(&store, "b1", &[]).await;
        let job_id = lock.acquire("b1", JobType::OcrBatch, Some(0)).await.unwrap();

        let report = worker(store, MockOcr::new(), lock.clone())
            .run(job_id, "b1", &[])
            .await
            .unwrap();

        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.flushes, 1);
        let job = lock.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.completed_items, 0);
        assert_eq!(job.failed_items, 0);
    }

    #[tokio::test]
    async fn metadata_load_failure_fails_the_job() {
        let store = Arc::new(MemoryObjectStore::new());
        let lock = Arc::new(MemoryJobLock::new());
        let job_id = lock.acquire("b1", JobType::OcrBatch, Some(1)).await.unwrap();

        let err = worker(store, MockOcr::new(), lock.clone())
            .run(job_id, "b1", &[1])
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::Store(_)));

        let job = lock.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error_message.is_some());
    }

    #[tokio::test]
    async fn missing_page_entry_counts_as_failure() {
        let store = Arc::new(MemoryObjectStore::new());
        let lock = Arc::new(MemoryJobLock::new());
        seed_book(&store, "b1", &[1]).await;
        let job_id = lock.acquire("b1", JobType::OcrBatch, Some(2)).await.unwrap();

        let report = worker(store.clone(), MockOcr::new(), lock.clone())
            .run(job_id, "b1", &[1, 2])
            .await
            .unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(report.failed, 1);

        let job = lock.get_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        let detail: ProgressDetail<OcrRunStats> =
            serde_json::from_str(job.progress_detail.as_deref().unwrap()).unwrap();
        assert!(detail.page_errors.contains_key("2"));
    }

    #[tokio::test]
    async fn retry_page_refused_while_batch_active() {
        let store = Arc::new(MemoryObjectStore::new());
        let lock = Arc::new(MemoryJobLock::new());
        seed_book(&store, "b1", &[1]).await;
        lock.acquire("b1", JobType::OcrBatch, Some(1)).await.unwrap();

        let err = worker(store, MockOcr::new(), lock)
            .retry_page("b1", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, IngestionError::Lock(_)));
    }

    #[tokio::test]
    async fn retry_page_reprocesses_failed_page() {
        let store = Arc::new(MemoryObjectStore::new());
        let lock = Arc::new(MemoryJobLock::new());
        seed_book(&store, "b1", &[3]).await;

        // Seed a failed state first.
        let ocr = MockOcr::new().fail_recognize_when("raw page 3", "Rate limit exceeded (429)");
        let job_id = lock.acquire("b1", JobType::OcrBatch, Some(1)).await.unwrap();
        worker(store.clone(), ocr, lock.clone()).run(job_id, "b1", &[3]).await.unwrap();
        let book: BookMetadata = store.get_json(&layout::metadata("b1")).await.unwrap();
        assert_eq!(book.pages[&3].ocr_status, OcrStatus::Failed);

        // Retry with a healthy engine.
        let meta = worker(store.clone(), MockOcr::new(), lock)
            .retry_page("b1", 3)
            .await
            .unwrap();
        assert_eq!(meta.ocr_status, OcrStatus::Completed);
        assert!(meta.ocr_error.is_none());
        let book: BookMetadata = store.get_json(&layout::metadata("b1")).await.unwrap();
        assert_eq!(book.pages[&3].ocr_status, OcrStatus::Completed);
    }
}
