//! The page-sequential extraction orchestrator.
//!
//! Per page: load OCR text, minisummary, context pack, boundary detection
//! plus guideline extraction in one call, shard create/merge, subtopic and
//! topic summaries, index updates, page guideline save, stability sweep,
//! progress update. Per-page failures are recorded and the loop continues;
//! a failure of the loop itself releases the job as failed.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::{classify_error, IngestionError, Result};
use crate::jobs::{JobLock, JobOutcome, JobRecord, ProgressUpdate};
use crate::layout;
use crate::llm::RetryPolicy;
use crate::pipeline::boundary::BoundaryDetector;
use crate::pipeline::context::ContextPackBuilder;
use crate::pipeline::indices::IndexManager;
use crate::pipeline::merge::GuidelineMerger;
use crate::pipeline::minisummary::MinisummaryService;
use crate::pipeline::summary::SummaryService;
use crate::traits::llm::LlmClient;
use crate::traits::store::{ObjectStore, ObjectStoreExt, StoreError};
use crate::types::{
    BookMetadata, ExtractionRunStats, PageAssignment, PageError, PageGuideline, ProgressDetail,
    SubtopicShard, SubtopicStatus,
};

/// Page window for one extraction run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunPlan {
    pub start_page: u32,
    pub end_page: u32,
    /// Number of pages in this run.
    pub total_pages: u32,
}

/// Compute the page window for a fresh or resumed run.
///
/// On resume the caller passes the previous job; processing restarts at
/// `last_completed_item + 1` regardless of any explicit start page.
pub fn plan_run(
    book_total_pages: u32,
    start_page: Option<u32>,
    end_page: Option<u32>,
    resume_from: Option<&JobRecord>,
) -> RunPlan {
    let start = match resume_from {
        Some(job) => job
            .last_completed_item
            .map(|item| item as u32 + 1)
            .unwrap_or(1),
        None => start_page.unwrap_or(1).max(1),
    };
    let end = end_page.unwrap_or(book_total_pages);
    let total = if end >= start { end - start + 1 } else { 0 };
    RunPlan {
        start_page: start,
        end_page: end,
        total_pages: total,
    }
}

/// Result of one page through the pipeline.
#[derive(Debug, Clone)]
pub struct PageOutcome {
    pub topic_key: String,
    pub subtopic_key: String,
    /// True when a new shard was created for this page.
    pub created: bool,
    pub stable_marked: u32,
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub pages_processed: u32,
    pub pages_failed: u32,
    pub subtopics_created: u32,
    pub subtopics_merged: u32,
}

pub struct ExtractionOrchestrator {
    store: Arc<dyn ObjectStore>,
    lock: Arc<dyn JobLock>,
    config: PipelineConfig,
    minisummary: MinisummaryService,
    context: ContextPackBuilder,
    boundary: BoundaryDetector,
    merger: GuidelineMerger,
    summary: SummaryService,
    indices: IndexManager,
}

impl ExtractionOrchestrator {
    pub fn new(store: Arc<dyn ObjectStore>, llm: Arc<dyn LlmClient>, lock: Arc<dyn JobLock>) -> Self {
        Self::with_config(store, llm, lock, PipelineConfig::default(), RetryPolicy::default())
    }

    pub fn with_config(
        store: Arc<dyn ObjectStore>,
        llm: Arc<dyn LlmClient>,
        lock: Arc<dyn JobLock>,
        config: PipelineConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            minisummary: MinisummaryService::new(llm.clone(), retry.clone(), &config),
            context: ContextPackBuilder::new(store.clone(), &config),
            boundary: BoundaryDetector::new(llm.clone(), retry.clone()),
            merger: GuidelineMerger::new(llm.clone(), retry.clone()),
            summary: SummaryService::new(llm, retry, &config),
            indices: IndexManager::new(store.clone()),
            store,
            lock,
            config,
        }
    }

    /// Drive the page loop for one `extraction` job. Starts the job,
    /// processes `[start_page, end_page]` in order, and releases the job
    /// `completed` even when individual pages failed; only a loop-level
    /// error releases it `failed`.
    pub async fn run(
        &self,
        job_id: Uuid,
        book: &BookMetadata,
        start_page: u32,
        end_page: u32,
    ) -> Result<ExtractionReport> {
        self.lock.start(job_id).await?;
        tracing::info!(
            %job_id,
            book_id = %book.book_id,
            start_page,
            end_page,
            "starting guideline extraction"
        );
        match self.run_inner(job_id, book, start_page, end_page).await {
            Ok(report) => {
                self.lock.release(job_id, JobOutcome::Completed, None).await?;
                tracing::info!(
                    %job_id,
                    pages = report.pages_processed,
                    created = report.subtopics_created,
                    merged = report.subtopics_merged,
                    failed = report.pages_failed,
                    "guideline extraction complete"
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

    async fn run_inner(
        &self,
        job_id: Uuid,
        book: &BookMetadata,
        start_page: u32,
        end_page: u32,
    ) -> Result<ExtractionReport> {
        let mut detail = ProgressDetail::<ExtractionRunStats>::default();
        let mut completed = 0i64;
        let mut failed = 0i64;
        let mut last_completed: Option<i64> = None;
        let mut report = ExtractionReport::default();

        for page in start_page..=end_page {
            self.lock
                .update_progress(
                    job_id,
                    ProgressUpdate {
                        current_item: page as i64,
                        completed,
                        failed,
                        last_completed_item: last_completed,
                        detail: None,
                    },
                )
                .await?;

            match self.process_page(book, page).await {
                Ok(outcome) => {
                    completed += 1;
                    if outcome.created {
                        detail.stats.subtopics_created += 1;
                        report.subtopics_created += 1;
                    } else {
                        detail.stats.subtopics_merged += 1;
                        report.subtopics_merged += 1;
                    }
                    tracing::info!(
                        page,
                        topic = %outcome.topic_key,
                        subtopic = %outcome.subtopic_key,
                        decision = if outcome.created { "new" } else { "continue" },
                        stable_marked = outcome.stable_marked,
                        "page processed"
                    );
                }
                Err(err) => {
                    failed += 1;
                    report.pages_failed += 1;
                    let kind = classify_error(&err.to_string());
                    tracing::error!(page, error = %err, error_type = ?kind, "page processing failed");
                    detail.page_errors.insert(
                        page.to_string(),
                        PageError {
                            error: err.to_string(),
                            error_type: kind,
                        },
                    );
                }
            }

            report.pages_processed += 1;
            detail.stats.pages_processed = report.pages_processed;
            last_completed = Some(page as i64);
            self.lock
                .update_progress(
                    job_id,
                    ProgressUpdate {
                        current_item: page as i64,
                        completed,
                        failed,
                        last_completed_item: last_completed,
                        detail: Some(detail.to_json()?),
                    },
                )
                .await?;
        }

        Ok(report)
    }

    /// One page through pipeline steps 1-11. Any error here is a per-page
    /// failure from the run loop's point of view.
    pub async fn process_page(&self, book: &BookMetadata, page: u32) -> Result<PageOutcome> {
        let book_id = &book.book_id;

        // 1. OCR text, with the legacy key as fallback.
        let page_text = self.load_page_text(book_id, page).await?;
        if page_text.trim().is_empty() {
            return Err(IngestionError::EmptyPage { page });
        }

        // 2. Minisummary (falls back internally, never fails the page).
        let minisummary = self.minisummary.generate(&page_text).await;

        // 3. Context pack.
        let pack = self.context.build(book, page).await?;

        // 4. Boundary decision + page guidelines, full page text.
        let decision = self.boundary.detect(&pack, &page_text).await?;

        // 5. Create a shard or merge into the targeted one. A continuation
        // whose shard is missing degrades to the create path.
        let shard_key = layout::shard(book_id, &decision.topic_key, &decision.subtopic_key);
        let existing: Option<SubtopicShard> = if decision.is_new_topic {
            None
        } else {
            match self.store.get_json(&shard_key).await {
                Ok(shard) => Some(shard),
                Err(StoreError::NotFound { .. }) => {
                    tracing::warn!(
                        topic = %decision.topic_key,
                        subtopic = %decision.subtopic_key,
                        "continuation targeted a missing shard, creating instead"
                    );
                    None
                }
                Err(err) => return Err(err.into()),
            }
        };
        let created = existing.is_none();
        let mut shard = match existing {
            Some(mut shard) => {
                let merged = self
                    .merger
                    .merge(
                        &shard.guidelines,
                        &decision.page_guidelines,
                        &shard.topic_title,
                        &shard.subtopic_title,
                        book.grade,
                        &book.subject,
                    )
                    .await;
                shard.merge_page(merged, page);
                shard
            }
            None => SubtopicShard::new(
                &decision.topic_key,
                &decision.topic_title,
                &decision.subtopic_key,
                &decision.subtopic_title,
                page,
                &decision.page_guidelines,
            ),
        };

        // 6. Subtopic one-liner, stored on the shard.
        let subtopic_summary = self
            .summary
            .subtopic_summary(&shard.subtopic_title, &shard.guidelines)
            .await;
        shard.subtopic_summary = subtopic_summary.clone();

        // 7. Save the shard.
        self.store
            .put_json(&layout::shard(book_id, &shard.topic_key, &shard.subtopic_key), &shard)
            .await?;

        // 8. Topic summary over all of this topic's subtopic one-liners.
        let mut index = self.indices.get_or_create_index(book_id).await?;
        let mut sub_summaries: Vec<String> = index
            .topic(&shard.topic_key)
            .map(|topic| {
                topic
                    .subtopics
                    .iter()
                    .filter(|s| s.subtopic_key != shard.subtopic_key && !s.subtopic_summary.is_empty())
                    .map(|s| s.subtopic_summary.clone())
                    .collect()
            })
            .unwrap_or_default();
        sub_summaries.push(subtopic_summary.clone());
        let topic_summary = self.summary.topic_summary(&shard.topic_title, &sub_summaries).await;

        // 9. Upsert both indices.
        index.upsert_subtopic(
            &shard.topic_key,
            &shard.topic_title,
            &shard.subtopic_key,
            &shard.subtopic_title,
            &shard.page_range(),
            SubtopicStatus::Open,
            &subtopic_summary,
        );
        index.set_topic_summary(&shard.topic_key, &topic_summary);
        self.indices.save_index(&mut index, false).await?;

        let mut page_index = self.indices.get_or_create_page_index(book_id).await?;
        page_index.assign(
            page,
            PageAssignment {
                topic_key: shard.topic_key.clone(),
                subtopic_key: shard.subtopic_key.clone(),
                confidence: self.config.page_confidence,
                provisional: false,
            },
        );
        self.indices.save_page_index(&mut page_index, false).await?;

        // 10. Page guideline for future context packs.
        self.store
            .put_json(
                &layout::page_guideline(book_id, page),
                &PageGuideline { page, summary: minisummary },
            )
            .await?;

        // 11. Stability sweep.
        let stable_marked = self.mark_stable_subtopics(book_id, page).await?;

        Ok(PageOutcome {
            topic_key: shard.topic_key,
            subtopic_key: shard.subtopic_key,
            created,
            stable_marked,
        })
    }

    async fn load_page_text(&self, book_id: &str, page: u32) -> Result<String> {
        match self.store.download_text(&layout::page_text(book_id, page)).await {
            Ok(text) => Ok(text),
            Err(StoreError::NotFound { .. }) => {
                Ok(self
                    .store
                    .download_text(&layout::page_text_legacy(book_id, page))
                    .await?)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Mark open subtopics stable once the gap since their last source
    /// page reaches the threshold.
    async fn mark_stable_subtopics(&self, book_id: &str, current_page: u32) -> Result<u32> {
        let mut index = match self.indices.load_index(book_id).await {
            Ok(index) => index,
            Err(StoreError::NotFound { .. }) => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut to_mark: Vec<(String, String, u32)> = Vec::new();
        for topic in &index.topics {
            for sub in &topic.subtopics {
                if sub.status != SubtopicStatus::Open {
                    continue;
                }
                if let Some(end) = sub.page_end() {
                    if current_page.saturating_sub(end) >= self.config.stability_threshold {
                        to_mark.push((topic.topic_key.clone(), sub.subtopic_key.clone(), end));
                    }
                }
            }
        }
        if to_mark.is_empty() {
            return Ok(0);
        }

        for (topic_key, subtopic_key, last_page) in &to_mark {
            index.set_status(topic_key, subtopic_key, SubtopicStatus::Stable);
            tracing::info!(
                topic = %topic_key,
                subtopic = %subtopic_key,
                last_page,
                current_page,
                "subtopic marked stable"
            );
        }
        self.indices.save_index(&mut index, false).await?;
        Ok(to_mark.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobType;

    #[test]
    fn plan_defaults_to_whole_book() {
        let plan = plan_run(40, None, None, None);
        assert_eq!(plan, RunPlan { start_page: 1, end_page: 40, total_pages: 40 });
    }

    #[test]
    fn plan_honors_explicit_window() {
        let plan = plan_run(40, Some(5), Some(9), None);
        assert_eq!(plan, RunPlan { start_page: 5, end_page: 9, total_pages: 5 });
    }

    #[test]
    fn plan_resumes_after_last_completed_item() {
        let mut job = JobRecord::new("b1", JobType::Extraction, Some(40));
        job.last_completed_item = Some(10);
        let plan = plan_run(40, None, Some(15), Some(&job));
        assert_eq!(plan, RunPlan { start_page: 11, end_page: 15, total_pages: 5 });
    }

    #[test]
    fn plan_resume_without_progress_starts_at_one() {
        let job = JobRecord::new("b1", JobType::Extraction, Some(40));
        let plan = plan_run(40, Some(7), None, Some(&job));
        assert_eq!(plan.start_page, 1);
        assert_eq!(plan.end_page, 40);
    }

    #[test]
    fn plan_with_inverted_window_is_empty() {
        let plan = plan_run(40, Some(20), Some(10), None);
        assert_eq!(plan.total_pages, 0);
    }
}
