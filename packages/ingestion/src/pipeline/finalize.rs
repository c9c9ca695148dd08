//! The finalization pass, run under a separate `finalization` job.
//!
//! Steps: mark every open/stable subtopic final, refine names against the
//! complete guidelines, merge duplicate shards, regenerate topic summaries,
//! then optionally snapshot the book into the relational store. Partially
//! applied renames survive a crash because the index reflects the last
//! saved truth and a rerun re-converges.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::jobs::{JobLock, JobOutcome, ProgressUpdate};
use crate::layout;
use crate::llm::RetryPolicy;
use crate::pipeline::dedup::{DuplicateDetector, DuplicatePair};
use crate::pipeline::indices::IndexManager;
use crate::pipeline::merge::GuidelineMerger;
use crate::pipeline::refine::NameRefiner;
use crate::pipeline::summary::SummaryService;
use crate::sync::{GuidelineRepository, GuidelineRow, REVIEW_STATUS_TO_BE_REVIEWED};
use crate::traits::llm::LlmClient;
use crate::traits::store::{ObjectStore, ObjectStoreExt};
use crate::types::{
    BookMetadata, FinalizationRunStats, GuidelinesIndex, ProgressDetail, SubtopicShard,
    SubtopicStatus,
};

/// Summary of a completed finalization.
#[derive(Debug, Clone, Default)]
pub struct FinalizationReport {
    pub subtopics_finalized: u32,
    pub subtopics_renamed: u32,
    pub duplicates_merged: u32,
    /// Rows written by the database sync, when it ran.
    pub synced_rows: Option<usize>,
}

pub struct FinalizationPass {
    store: Arc<dyn ObjectStore>,
    lock: Arc<dyn JobLock>,
    repo: Option<Arc<dyn GuidelineRepository>>,
    indices: IndexManager,
    merger: GuidelineMerger,
    summary: SummaryService,
    refiner: NameRefiner,
    dedup: DuplicateDetector,
}

impl FinalizationPass {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        llm: Arc<dyn LlmClient>,
        lock: Arc<dyn JobLock>,
        repo: Option<Arc<dyn GuidelineRepository>>,
    ) -> Self {
        Self::with_config(store, llm, lock, repo, PipelineConfig::default(), RetryPolicy::default())
    }

    pub fn with_config(
        store: Arc<dyn ObjectStore>,
        llm: Arc<dyn LlmClient>,
        lock: Arc<dyn JobLock>,
        repo: Option<Arc<dyn GuidelineRepository>>,
        config: PipelineConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            indices: IndexManager::new(store.clone()),
            merger: GuidelineMerger::new(llm.clone(), retry.clone()),
            summary: SummaryService::new(llm.clone(), retry.clone(), &config),
            refiner: NameRefiner::new(llm.clone(), retry.clone(), &config),
            dedup: DuplicateDetector::new(llm, retry, &config),
            store,
            lock,
            repo,
        }
    }

    /// Run the whole pass for one `finalization` job.
    pub async fn run(
        &self,
        job_id: Uuid,
        book: &BookMetadata,
        auto_sync_to_db: bool,
    ) -> Result<FinalizationReport> {
        self.lock.start(job_id).await?;
        tracing::info!(%job_id, book_id = %book.book_id, auto_sync_to_db, "starting finalization");
        match self.run_inner(job_id, book, auto_sync_to_db).await {
            Ok(report) => {
                self.lock.release(job_id, JobOutcome::Completed, None).await?;
                tracing::info!(
                    %job_id,
                    finalized = report.subtopics_finalized,
                    renamed = report.subtopics_renamed,
                    duplicates = report.duplicates_merged,
                    synced = ?report.synced_rows,
                    "finalization complete"
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
        auto_sync_to_db: bool,
    ) -> Result<FinalizationReport> {
        let book_id = &book.book_id;
        let mut report = FinalizationReport::default();
        let mut detail = ProgressDetail::<FinalizationRunStats>::default();

        // Step 1: every open/stable subtopic becomes final.
        let mut index = self.indices.get_or_create_index(book_id).await?;
        let pairs = index.subtopic_keys();
        for (topic_key, subtopic_key) in &pairs {
            let active = index
                .subtopic(topic_key, subtopic_key)
                .map(|s| s.status.is_active())
                .unwrap_or(false);
            if active {
                index.set_status(topic_key, subtopic_key, SubtopicStatus::Final);
                report.subtopics_finalized += 1;
            }
        }
        self.indices.save_index(&mut index, true).await?;
        detail.stats.subtopics_finalized = report.subtopics_finalized;
        self.progress(job_id, 1, &detail).await?;
        tracing::info!(count = report.subtopics_finalized, "subtopics marked final");

        // Step 2: refine names against the complete guidelines.
        for (topic_key, subtopic_key) in index.subtopic_keys() {
            match self.refine_one(book, &mut index, &topic_key, &subtopic_key).await {
                Ok(true) => report.subtopics_renamed += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(
                        topic = %topic_key,
                        subtopic = %subtopic_key,
                        error = %err,
                        "name refinement skipped"
                    );
                }
            }
        }
        self.indices.save_index(&mut index, false).await?;
        detail.stats.subtopics_renamed = report.subtopics_renamed;
        self.progress(job_id, 2, &detail).await?;
        tracing::info!(count = report.subtopics_renamed, "subtopic names refined");

        // Step 3: deduplicate.
        let shards = self.load_all_shards(book_id, &index).await;
        let duplicates = self.dedup.find_duplicates(&shards, book.grade, &book.subject).await;
        for pair in duplicates {
            match self.merge_duplicates(book, &pair, &mut index).await {
                Ok(()) => report.duplicates_merged += 1,
                Err(err) => {
                    tracing::error!(
                        keep = %format!("{}/{}", pair.topic_key1, pair.subtopic_key1),
                        merge = %format!("{}/{}", pair.topic_key2, pair.subtopic_key2),
                        error = %err,
                        "failed to merge duplicate pair"
                    );
                }
            }
        }
        self.indices.save_index(&mut index, false).await?;
        detail.stats.duplicates_merged = report.duplicates_merged;
        self.progress(job_id, 3, &detail).await?;

        // Step 4: regenerate every topic summary from final subtopic
        // summaries.
        for topic in &mut index.topics {
            let summaries: Vec<String> = topic
                .subtopics
                .iter()
                .filter(|s| !s.subtopic_summary.is_empty())
                .map(|s| s.subtopic_summary.clone())
                .collect();
            if !summaries.is_empty() {
                let title = topic.topic_title.clone();
                topic.topic_summary = self.summary.topic_summary(&title, &summaries).await;
            }
        }
        self.indices.save_index(&mut index, false).await?;
        self.progress(job_id, 4, &detail).await?;

        // Step 5: database snapshot.
        if auto_sync_to_db {
            match &self.repo {
                Some(repo) => {
                    let rows = self.build_rows(book, &index).await;
                    let ids = repo.replace_book_guidelines(book_id, &rows).await?;
                    report.synced_rows = Some(ids.len());
                }
                None => {
                    tracing::warn!("auto_sync_to_db requested but no guideline repository configured");
                }
            }
        }
        self.progress(job_id, 5, &detail).await?;

        Ok(report)
    }

    async fn progress(
        &self,
        job_id: Uuid,
        step: i64,
        detail: &ProgressDetail<FinalizationRunStats>,
    ) -> Result<()> {
        self.lock
            .update_progress(
                job_id,
                ProgressUpdate {
                    current_item: step,
                    completed: step,
                    failed: 0,
                    last_completed_item: Some(step),
                    detail: Some(detail.to_json()?),
                },
            )
            .await?;
        Ok(())
    }

    /// Refine one shard's names. Returns true when names changed and the
    /// rename was applied to the shard, the store, and the index.
    async fn refine_one(
        &self,
        book: &BookMetadata,
        index: &mut GuidelinesIndex,
        topic_key: &str,
        subtopic_key: &str,
    ) -> Result<bool> {
        let old_key = layout::shard(&book.book_id, topic_key, subtopic_key);
        let mut shard: SubtopicShard = self.store.get_json(&old_key).await?;
        let refined = self.refiner.refine(&shard, book).await;
        if !refined.differs_from(&shard) {
            return Ok(false);
        }

        tracing::info!(
            from = %format!("{}/{}", shard.topic_key, shard.subtopic_key),
            to = %format!("{}/{}", refined.topic_key, refined.subtopic_key),
            "refining subtopic names"
        );
        let key_changed =
            refined.topic_key != shard.topic_key || refined.subtopic_key != shard.subtopic_key;
        shard.topic_key = refined.topic_key.clone();
        shard.topic_title = refined.topic_title.clone();
        shard.subtopic_key = refined.subtopic_key.clone();
        shard.subtopic_title = refined.subtopic_title.clone();
        shard.touch();

        // New path first, then drop the old one; the index update below is
        // what readers trust if we crash in between.
        self.store
            .put_json(
                &layout::shard(&book.book_id, &shard.topic_key, &shard.subtopic_key),
                &shard,
            )
            .await?;
        if key_changed {
            if let Err(err) = self.store.delete_file(&old_key).await {
                tracing::warn!(key = %old_key, error = %err, "failed to delete renamed shard");
            }
        }
        index.rename_subtopic(
            topic_key,
            subtopic_key,
            &refined.topic_key,
            &refined.topic_title,
            &refined.subtopic_key,
            &refined.subtopic_title,
        );
        Ok(true)
    }

    async fn load_all_shards(&self, book_id: &str, index: &GuidelinesIndex) -> Vec<SubtopicShard> {
        let mut shards = Vec::new();
        for (topic_key, subtopic_key) in index.subtopic_keys() {
            let key = layout::shard(book_id, &topic_key, &subtopic_key);
            match self.store.get_json::<SubtopicShard>(&key).await {
                Ok(shard) => shards.push(shard),
                Err(err) => {
                    tracing::warn!(
                        topic = %topic_key,
                        subtopic = %subtopic_key,
                        error = %err,
                        "failed to load shard"
                    );
                }
            }
        }
        shards
    }

    /// Merge the pair's second shard into the first and drop the second
    /// everywhere.
    async fn merge_duplicates(
        &self,
        book: &BookMetadata,
        pair: &DuplicatePair,
        index: &mut GuidelinesIndex,
    ) -> Result<()> {
        let book_id = &book.book_id;
        let keep_key = layout::shard(book_id, &pair.topic_key1, &pair.subtopic_key1);
        let drop_key = layout::shard(book_id, &pair.topic_key2, &pair.subtopic_key2);
        let mut keeper: SubtopicShard = self.store.get_json(&keep_key).await?;
        let loser: SubtopicShard = self.store.get_json(&drop_key).await?;

        let merged = self
            .merger
            .merge(
                &keeper.guidelines,
                &loser.guidelines,
                &keeper.topic_title,
                &keeper.subtopic_title,
                book.grade,
                &book.subject,
            )
            .await;
        keeper.absorb(&loser, merged);
        keeper.subtopic_summary = self
            .summary
            .subtopic_summary(&keeper.subtopic_title, &keeper.guidelines)
            .await;

        self.store.put_json(&keep_key, &keeper).await?;
        if let Err(err) = self.store.delete_file(&drop_key).await {
            tracing::warn!(key = %drop_key, error = %err, "failed to delete merged shard");
        }

        index.remove_subtopic(&pair.topic_key2, &pair.subtopic_key2);
        index.upsert_subtopic(
            &keeper.topic_key,
            &keeper.topic_title,
            &keeper.subtopic_key,
            &keeper.subtopic_title,
            &keeper.page_range(),
            SubtopicStatus::Final,
            &keeper.subtopic_summary,
        );
        tracing::info!(
            keep = %format!("{}/{}", pair.topic_key1, pair.subtopic_key1),
            merged = %format!("{}/{}", pair.topic_key2, pair.subtopic_key2),
            "duplicate shards merged"
        );
        Ok(())
    }

    /// One row per shard reachable from the index, in index order.
    async fn build_rows(&self, book: &BookMetadata, index: &GuidelinesIndex) -> Vec<GuidelineRow> {
        let mut rows = Vec::new();
        for topic in &index.topics {
            for sub in &topic.subtopics {
                let key = layout::shard(&book.book_id, &topic.topic_key, &sub.subtopic_key);
                let shard: SubtopicShard = match self.store.get_json(&key).await {
                    Ok(shard) => shard,
                    Err(err) => {
                        tracing::warn!(%key, error = %err, "shard missing during sync, skipping row");
                        continue;
                    }
                };
                rows.push(GuidelineRow {
                    id: Uuid::new_v4(),
                    book_id: book.book_id.clone(),
                    country: book.country.clone(),
                    grade: book.grade,
                    subject: book.subject.clone(),
                    board: book.board.clone(),
                    topic_key: shard.topic_key.clone(),
                    subtopic_key: shard.subtopic_key.clone(),
                    topic_title: shard.topic_title.clone(),
                    subtopic_title: shard.subtopic_title.clone(),
                    topic_summary: topic.topic_summary.clone(),
                    subtopic_summary: shard.subtopic_summary.clone(),
                    guidelines: shard.guidelines.clone(),
                    source_page_start: shard.source_page_start as i32,
                    source_page_end: shard.source_page_end as i32,
                    status: "synced".to_string(),
                    version: shard.version as i64,
                    review_status: REVIEW_STATUS_TO_BE_REVIEWED.to_string(),
                });
            }
        }
        rows
    }
}
