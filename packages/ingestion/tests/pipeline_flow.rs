//! End-to-end scenarios over the in-memory backends: bulk OCR, lock
//! contention, stale recovery, resume planning, extraction, finalization.

use std::sync::Arc;
use std::time::Duration;

use book_ingestion::jobs::{JobOutcome, JobStatus, JobType, MemoryJobLock, ProgressUpdate};
use book_ingestion::layout;
use book_ingestion::pipeline::{plan_run, ExtractionOrchestrator, FinalizationPass};
use book_ingestion::stores::MemoryObjectStore;
use book_ingestion::sync::{GuidelineRepository, MemoryGuidelineRepository};
use book_ingestion::testing::{MockLlm, MockOcr};
use book_ingestion::traits::store::{ObjectStore, ObjectStoreExt, StoreError};
use book_ingestion::types::{
    BookMetadata, ExtractionRunStats, OcrRunStats, OcrStatus, PageMeta, ProgressDetail,
    SubtopicShard, SubtopicStatus,
};
use book_ingestion::{
    ErrorKind, GuidelinesIndex, JobLock, OcrBatchWorker, OcrWorkerConfig, PipelineConfig,
    RetryPolicy,
};

async fn seed_raw_pages(store: &MemoryObjectStore, book_id: &str, pages: u32) {
    let mut book = BookMetadata::new(book_id);
    book.grade = 3;
    book.subject = "Math".to_string();
    book.board = "CBSE".to_string();
    book.total_pages = pages;
    for page in 1..=pages {
        let raw_key = layout::raw_page(book_id, page, "png");
        store
            .upload_bytes(&raw_key, format!("raw page {page}").into_bytes(), None)
            .await
            .unwrap();
        book.pages.insert(page, PageMeta::new(raw_key));
    }
    store.update_metadata_json(book_id, &book).await.unwrap();
}

fn ocr_worker(
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

// E1: happy-path bulk OCR over five raw pages.
#[tokio::test]
async fn bulk_ocr_happy_path() {
    let store = Arc::new(MemoryObjectStore::new());
    let lock = Arc::new(MemoryJobLock::new());
    seed_raw_pages(&store, "b", 5).await;

    let pages: Vec<u32> = (1..=5).collect();
    let job_id = lock.acquire("b", JobType::OcrBatch, Some(5)).await.unwrap();
    let report = ocr_worker(store.clone(), MockOcr::new(), lock.clone())
        .run(job_id, "b", &pages)
        .await
        .unwrap();

    // floor(5/5) + 1 metadata flushes.
    assert_eq!(report.flushes, 2);
    assert_eq!(report.completed, 5);
    assert_eq!(report.failed, 0);

    let job = lock.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_items, 5);
    assert_eq!(job.failed_items, 0);
    assert_eq!(job.last_completed_item, Some(5));

    let book: BookMetadata = store.get_json(&layout::metadata("b")).await.unwrap();
    for page in 1..=5 {
        let meta = &book.pages[&page];
        assert_eq!(meta.ocr_status, OcrStatus::Completed);
        assert!(meta.text_key.is_some());
        let text = store
            .download_text(meta.text_key.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(text, format!("raw page {page}"));
    }
}

// E2: one mid-batch OCR failure is isolated to its page.
#[tokio::test]
async fn bulk_ocr_isolates_rate_limited_page() {
    let store = Arc::new(MemoryObjectStore::new());
    let lock = Arc::new(MemoryJobLock::new());
    seed_raw_pages(&store, "b", 5).await;

    let ocr = MockOcr::new().fail_recognize_when("raw page 3", "Rate limit exceeded (429)");
    let pages: Vec<u32> = (1..=5).collect();
    let job_id = lock.acquire("b", JobType::OcrBatch, Some(5)).await.unwrap();
    let report = ocr_worker(store.clone(), ocr, lock.clone())
        .run(job_id, "b", &pages)
        .await
        .unwrap();

    assert_eq!(report.completed, 4);
    assert_eq!(report.failed, 1);

    let job = lock.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_items, 4);
    assert_eq!(job.failed_items, 1);

    let detail: ProgressDetail<OcrRunStats> =
        serde_json::from_str(job.progress_detail.as_deref().unwrap()).unwrap();
    assert_eq!(detail.page_errors.len(), 1);
    assert_eq!(detail.page_errors["3"].error_type, ErrorKind::Retryable);

    let book: BookMetadata = store.get_json(&layout::metadata("b")).await.unwrap();
    for page in [1u32, 2, 4, 5] {
        assert_eq!(book.pages[&page].ocr_status, OcrStatus::Completed);
    }
    let failed = &book.pages[&3];
    assert_eq!(failed.ocr_status, OcrStatus::Failed);
    assert!(failed.ocr_error.as_deref().unwrap().contains("429"));
}

// Interior flushes land every N pages: floor(7/5) + 1 for seven pages.
#[tokio::test]
async fn bulk_ocr_flush_cadence() {
    let store = Arc::new(MemoryObjectStore::new());
    let lock = Arc::new(MemoryJobLock::new());
    seed_raw_pages(&store, "b", 7).await;

    let pages: Vec<u32> = (1..=7).collect();
    let job_id = lock.acquire("b", JobType::OcrBatch, Some(7)).await.unwrap();
    let report = ocr_worker(store, MockOcr::new(), lock)
        .run(job_id, "b", &pages)
        .await
        .unwrap();
    assert_eq!(report.flushes, 2);
}

// E3: a second acquire on the same book is refused and writes nothing.
#[tokio::test]
async fn lock_busy_leaves_store_untouched() {
    let store = Arc::new(MemoryObjectStore::new());
    let lock = Arc::new(MemoryJobLock::new());
    seed_raw_pages(&store, "b", 2).await;

    lock.acquire("b", JobType::OcrBatch, Some(2)).await.unwrap();
    let keys_before = store.keys_with_prefix(&layout::book_prefix("b"));

    let err = lock.acquire("b", JobType::Extraction, None).await.unwrap_err();
    let message = err.to_string();
    assert!(message.contains("ocr_batch"));
    assert!(message.contains("started"));

    assert_eq!(store.keys_with_prefix(&layout::book_prefix("b")), keys_before);
    assert_eq!(lock.active_count("b"), 1);
}

// E4: a stale running job is failed by the next reader.
#[tokio::test]
async fn stale_job_recovery() {
    let lock = MemoryJobLock::new();
    let job_id = lock.acquire("b", JobType::Extraction, Some(40)).await.unwrap();
    lock.start(job_id).await.unwrap();
    lock.update_progress(
        job_id,
        ProgressUpdate {
            current_item: 10,
            completed: 10,
            failed: 0,
            last_completed_item: Some(10),
            detail: None,
        },
    )
    .await
    .unwrap();
    lock.set_heartbeat(job_id, chrono::Utc::now() - chrono::Duration::seconds(130));

    let job = lock.get_latest("b", None).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().to_lowercase().contains("interrupted"));
    assert_eq!(job.last_completed_item, Some(10));
}

// E5: resuming a failed extraction restarts after the last completed page.
#[tokio::test]
async fn resume_plans_from_last_completed_item() {
    let lock = MemoryJobLock::new();
    let job_id = lock.acquire("b", JobType::Extraction, Some(40)).await.unwrap();
    lock.start(job_id).await.unwrap();
    lock.update_progress(
        job_id,
        ProgressUpdate {
            current_item: 10,
            completed: 10,
            failed: 0,
            last_completed_item: Some(10),
            detail: None,
        },
    )
    .await
    .unwrap();
    lock.release(job_id, JobOutcome::Failed, Some("boom".into())).await.unwrap();

    let previous = lock.get_latest("b", Some(JobType::Extraction)).await.unwrap().unwrap();
    let plan = plan_run(40, None, Some(15), Some(&previous));
    assert_eq!(plan.start_page, 11);
    assert_eq!(plan.end_page, 15);
    assert_eq!(plan.total_pages, 5);
}

fn extraction_llm() -> MockLlm {
    MockLlm::new()
        .with_rule("Summarize this textbook page", "Extractive summary of the page.")
        .with_rule(
            "MARKER-PAGE-ONE",
            r#"{"is_new_topic": true, "topic_name": "Fractions", "subtopic_name": "Halves", "page_guidelines": "Teach halves with paper folding.", "reasoning": "first page"}"#,
        )
        .with_rule(
            "MARKER-PAGE-TWO",
            r#"{"is_new_topic": false, "topic_name": "Fractions", "subtopic_name": "Halves", "page_guidelines": "Practice halves with sharing problems.", "reasoning": "continues halves"}"#,
        )
        .with_rule(
            "MARKER-PAGE-THREE",
            r#"{"is_new_topic": true, "topic_name": "Shapes", "subtopic_name": "Circles", "page_guidelines": "Introduce circles with everyday objects.", "reasoning": "new chapter"}"#,
        )
        .with_rule(
            "MARKER-PAGE-FOUR",
            r#"{"is_new_topic": false, "topic_name": "Shapes", "subtopic_name": "Circles", "page_guidelines": "Draw circles with a compass.", "reasoning": "continues circles"}"#,
        )
        .with_rule("consolidating teaching guidelines", "Merged guidelines for the subtopic.")
        .with_rule("ONE concise line", "One-line subtopic summary.")
        .with_rule("topic-level summary", "One-line topic summary.")
}

async fn seed_page_texts(store: &MemoryObjectStore, book_id: &str, texts: &[(u32, &str)]) {
    for (page, text) in texts {
        store
            .upload_bytes(&layout::page_text(book_id, *page), text.as_bytes().to_vec(), None)
            .await
            .unwrap();
    }
}

fn extraction_book(book_id: &str, total_pages: u32) -> BookMetadata {
    let mut book = BookMetadata::new(book_id);
    book.grade = 3;
    book.subject = "Math".to_string();
    book.board = "CBSE".to_string();
    book.total_pages = total_pages;
    book
}

// Four pages through the full pipeline: create, merge, create, merge, with
// the first subtopic turning stable once it falls behind the threshold.
#[tokio::test]
async fn extraction_pipeline_builds_shards_and_indices() {
    let store = Arc::new(MemoryObjectStore::new());
    let lock = Arc::new(MemoryJobLock::new());
    seed_page_texts(
        &store,
        "b",
        &[
            (1, "Halves of shapes. MARKER-PAGE-ONE"),
            (2, "More halves. MARKER-PAGE-TWO"),
            (3, "Circles around us. MARKER-PAGE-THREE"),
            (4, "Drawing circles. MARKER-PAGE-FOUR"),
        ],
    )
    .await;

    let config = PipelineConfig {
        stability_threshold: 2,
        ..PipelineConfig::default()
    };
    let orchestrator = ExtractionOrchestrator::with_config(
        store.clone(),
        Arc::new(extraction_llm()),
        lock.clone(),
        config,
        RetryPolicy::immediate(1),
    );

    let book = extraction_book("b", 4);
    let job_id = lock.acquire("b", JobType::Extraction, Some(4)).await.unwrap();
    let report = orchestrator.run(job_id, &book, 1, 4).await.unwrap();

    assert_eq!(report.pages_processed, 4);
    assert_eq!(report.pages_failed, 0);
    assert_eq!(report.subtopics_created, 2);
    assert_eq!(report.subtopics_merged, 2);

    let job = lock.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.completed_items, 4);
    assert_eq!(job.last_completed_item, Some(4));
    let detail: ProgressDetail<ExtractionRunStats> =
        serde_json::from_str(job.progress_detail.as_deref().unwrap()).unwrap();
    assert_eq!(detail.stats.subtopics_created, 2);
    assert_eq!(detail.stats.subtopics_merged, 2);
    assert!(detail.page_errors.is_empty());

    // Shards: halves merged once, circles merged once.
    let halves: SubtopicShard = store
        .get_json(&layout::shard("b", "fractions", "halves"))
        .await
        .unwrap();
    assert_eq!(halves.version, 2);
    assert_eq!(halves.source_page_start, 1);
    assert_eq!(halves.source_page_end, 2);
    assert_eq!(halves.guidelines, "Merged guidelines for the subtopic.");
    assert_eq!(halves.subtopic_summary, "One-line subtopic summary.");

    let circles: SubtopicShard = store
        .get_json(&layout::shard("b", "shapes", "circles"))
        .await
        .unwrap();
    assert_eq!(circles.source_page_start, 3);
    assert_eq!(circles.source_page_end, 4);

    // Index: halves went stable after page 4 (gap 2 >= threshold 2);
    // circles is still open.
    let index: GuidelinesIndex = store
        .get_json(&layout::guidelines_index("b"))
        .await
        .unwrap();
    assert_eq!(index.subtopic_count(), 2);
    assert_eq!(
        index.subtopic("fractions", "halves").unwrap().status,
        SubtopicStatus::Stable
    );
    assert_eq!(
        index.subtopic("shapes", "circles").unwrap().status,
        SubtopicStatus::Open
    );
    assert_eq!(index.topic("fractions").unwrap().topic_summary, "One-line topic summary.");

    // Page index covers all four pages.
    let page_index: book_ingestion::PageIndex =
        store.get_json(&layout::page_index("b")).await.unwrap();
    assert_eq!(page_index.pages.len(), 4);
    assert_eq!(page_index.pages[&3].topic_key, "shapes");
    assert!((page_index.pages[&1].confidence - 0.9).abs() < f32::EPSILON);

    // Page guidelines saved for later context packs.
    for page in 1..=4u32 {
        assert!(store.contains(&layout::page_guideline("b", page)));
    }

    assert_eq!(lock.active_count("b"), 0);
}

// An empty page is a terminal per-page failure; the job still completes.
#[tokio::test]
async fn extraction_records_empty_page_as_terminal() {
    let store = Arc::new(MemoryObjectStore::new());
    let lock = Arc::new(MemoryJobLock::new());
    seed_page_texts(
        &store,
        "b",
        &[(1, "Halves of shapes. MARKER-PAGE-ONE"), (2, "   ")],
    )
    .await;

    let orchestrator = ExtractionOrchestrator::with_config(
        store.clone(),
        Arc::new(extraction_llm()),
        lock.clone(),
        PipelineConfig::default(),
        RetryPolicy::immediate(1),
    );
    let book = extraction_book("b", 2);
    let job_id = lock.acquire("b", JobType::Extraction, Some(2)).await.unwrap();
    let report = orchestrator.run(job_id, &book, 1, 2).await.unwrap();

    assert_eq!(report.pages_failed, 1);
    let job = lock.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.failed_items, 1);
    let detail: ProgressDetail<ExtractionRunStats> =
        serde_json::from_str(job.progress_detail.as_deref().unwrap()).unwrap();
    assert_eq!(detail.page_errors["2"].error_type, ErrorKind::Terminal);
}

// A missing page text fails the page, not the job.
#[tokio::test]
async fn extraction_survives_missing_page_text() {
    let store = Arc::new(MemoryObjectStore::new());
    let lock = Arc::new(MemoryJobLock::new());
    seed_page_texts(&store, "b", &[(1, "Halves of shapes. MARKER-PAGE-ONE")]).await;

    let orchestrator = ExtractionOrchestrator::with_config(
        store.clone(),
        Arc::new(extraction_llm()),
        lock.clone(),
        PipelineConfig::default(),
        RetryPolicy::immediate(1),
    );
    let book = extraction_book("b", 2);
    let job_id = lock.acquire("b", JobType::Extraction, Some(2)).await.unwrap();
    let report = orchestrator.run(job_id, &book, 1, 2).await.unwrap();

    assert_eq!(report.pages_processed, 2);
    assert_eq!(report.pages_failed, 1);
    assert_eq!(report.subtopics_created, 1);
    let job = lock.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

fn finalization_llm() -> MockLlm {
    // No rule for name refinement: refinement fails and keeps names.
    MockLlm::new()
        .with_rule(
            "duplicated subtopics",
            r#"{"duplicates": [{"topic_key1": "fractions", "subtopic_key1": "halves", "topic_key2": "fractions-basics", "subtopic_key2": "halves-basics", "reason": "same material"}]}"#,
        )
        .with_rule("consolidating teaching guidelines", "Combined halves guidelines.")
        .with_rule("ONE concise line", "Combined one-line summary.")
        .with_rule("topic-level summary", "Final topic summary.")
}

// E6: finalization merges the nominated duplicate pair and syncs one row
// per surviving shard.
#[tokio::test]
async fn finalization_dedup_and_sync() {
    let store = Arc::new(MemoryObjectStore::new());
    let lock = Arc::new(MemoryJobLock::new());
    let repo = Arc::new(MemoryGuidelineRepository::new());

    let mut index = GuidelinesIndex::new("b");
    index.upsert_subtopic(
        "fractions", "Fractions", "halves", "Halves", "2-4", SubtopicStatus::Open,
        "Halves summary",
    );
    index.upsert_subtopic(
        "fractions-basics", "Fractions Basics", "halves-basics", "Halves Basics", "7-9",
        SubtopicStatus::Stable, "Halves basics summary",
    );
    store.put_json(&layout::guidelines_index("b"), &index).await.unwrap();

    let mut keeper = SubtopicShard::new("fractions", "Fractions", "halves", "Halves", 2, "Keep these.");
    keeper.merge_page("Keep these, extended.".into(), 4);
    store
        .put_json(&layout::shard("b", "fractions", "halves"), &keeper)
        .await
        .unwrap();
    let mut loser = SubtopicShard::new(
        "fractions-basics", "Fractions Basics", "halves-basics", "Halves Basics", 7, "Duplicate.",
    );
    loser.merge_page("Duplicate, extended.".into(), 9);
    store
        .put_json(&layout::shard("b", "fractions-basics", "halves-basics"), &loser)
        .await
        .unwrap();

    let pass = FinalizationPass::with_config(
        store.clone(),
        Arc::new(finalization_llm()),
        lock.clone(),
        Some(repo.clone()),
        PipelineConfig::default(),
        RetryPolicy::immediate(1),
    );
    let book = extraction_book("b", 10);
    let job_id = lock.acquire("b", JobType::Finalization, Some(2)).await.unwrap();
    let report = pass.run(job_id, &book, true).await.unwrap();

    assert_eq!(report.subtopics_finalized, 2);
    assert_eq!(report.subtopics_renamed, 0);
    assert_eq!(report.duplicates_merged, 1);
    assert_eq!(report.synced_rows, Some(1));

    // Index lost the merged-away subtopic; the survivor is final.
    let index: GuidelinesIndex = store.get_json(&layout::guidelines_index("b")).await.unwrap();
    assert_eq!(index.subtopic_count(), 1);
    assert_eq!(
        index.subtopic("fractions", "halves").unwrap().status,
        SubtopicStatus::Final
    );
    assert!(index.topic("fractions-basics").is_none());

    // Survivor spans the union of both page ranges; the loser's key is gone.
    let merged: SubtopicShard = store
        .get_json(&layout::shard("b", "fractions", "halves"))
        .await
        .unwrap();
    assert_eq!(merged.source_page_start, 2);
    assert_eq!(merged.source_page_end, 9);
    assert_eq!(merged.guidelines, "Combined halves guidelines.");
    assert!(merged.version > keeper.version);
    let missing = store
        .get_json::<SubtopicShard>(&layout::shard("b", "fractions-basics", "halves-basics"))
        .await;
    assert!(matches!(missing, Err(StoreError::NotFound { .. })));

    // Exactly one row per shard present in the index, freshly reviewable.
    let rows = repo.guidelines_for_book("b").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].subtopic_key, "halves");
    assert_eq!(rows[0].review_status, "TO_BE_REVIEWED");
    assert_eq!(rows[0].source_page_start, 2);
    assert_eq!(rows[0].source_page_end, 9);

    let job = lock.get_job(job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

// Extraction then finalization end-to-end on the same store.
#[tokio::test]
async fn extraction_then_finalization_round_trip() {
    let store = Arc::new(MemoryObjectStore::new());
    let lock = Arc::new(MemoryJobLock::new());
    let repo = Arc::new(MemoryGuidelineRepository::new());
    seed_page_texts(
        &store,
        "b",
        &[
            (1, "Halves of shapes. MARKER-PAGE-ONE"),
            (2, "More halves. MARKER-PAGE-TWO"),
            (3, "Circles around us. MARKER-PAGE-THREE"),
        ],
    )
    .await;
    let book = extraction_book("b", 3);

    let orchestrator = ExtractionOrchestrator::with_config(
        store.clone(),
        Arc::new(extraction_llm()),
        lock.clone(),
        PipelineConfig::default(),
        RetryPolicy::immediate(1),
    );
    let extract_job = lock.acquire("b", JobType::Extraction, Some(3)).await.unwrap();
    orchestrator.run(extract_job, &book, 1, 3).await.unwrap();

    // The extraction lock is released, so finalization can acquire.
    let finalize_llm = MockLlm::new()
        .with_rule("duplicated subtopics", r#"{"duplicates": []}"#)
        .with_rule("topic-level summary", "Final topic summary.");
    let pass = FinalizationPass::with_config(
        store.clone(),
        Arc::new(finalize_llm),
        lock.clone(),
        Some(repo.clone()),
        PipelineConfig::default(),
        RetryPolicy::immediate(1),
    );
    let finalize_job = lock.acquire("b", JobType::Finalization, Some(2)).await.unwrap();
    let report = pass.run(finalize_job, &book, true).await.unwrap();

    assert_eq!(report.subtopics_finalized, 2);
    assert_eq!(report.duplicates_merged, 0);
    assert_eq!(report.synced_rows, Some(2));

    let index: GuidelinesIndex = store.get_json(&layout::guidelines_index("b")).await.unwrap();
    for (topic_key, subtopic_key) in index.subtopic_keys() {
        assert_eq!(
            index.subtopic(&topic_key, &subtopic_key).unwrap().status,
            SubtopicStatus::Final
        );
    }
    assert_eq!(repo.guidelines_for_book("b").await.unwrap().len(), 2);
}
