//! Context pack assembly.
//!
//! Reads the current index, open shards, and trailing page guidelines into
//! the compact context the boundary detector sees. A missing index means
//! the first page: the pack comes back empty rather than failing.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::layout;
use crate::pipeline::truncate_chars;
use crate::traits::store::{ObjectStore, ObjectStoreExt, StoreError};
use crate::types::{
    BookMetadata, ContextPack, GuidelinesIndex, OpenSubtopicInfo, OpenTopicInfo, PageGuideline,
    RecentPageSummary, SubtopicShard, TocHints,
};

pub struct ContextPackBuilder {
    store: Arc<dyn ObjectStore>,
    recent_pages: usize,
    preview_chars: usize,
}

impl ContextPackBuilder {
    pub fn new(store: Arc<dyn ObjectStore>, config: &PipelineConfig) -> Self {
        Self {
            store,
            recent_pages: config.recent_pages,
            preview_chars: config.guidelines_preview_chars,
        }
    }

    pub async fn build(&self, book: &BookMetadata, current_page: u32) -> Result<ContextPack> {
        let index = match self
            .store
            .get_json::<GuidelinesIndex>(&layout::guidelines_index(&book.book_id))
            .await
        {
            Ok(index) => index,
            Err(StoreError::NotFound { .. }) => {
                tracing::debug!(book_id = %book.book_id, "no index yet, empty context pack");
                GuidelinesIndex::new(&book.book_id)
            }
            Err(err) => return Err(err.into()),
        };

        let open_topics = self.collect_open_topics(&book.book_id, &index).await;
        let recent_pages = self.collect_recent_pages(&book.book_id, current_page).await;
        let toc = TocHints {
            current_chapter: index.topics.last().map(|t| t.topic_title.clone()),
        };

        tracing::debug!(
            book_id = %book.book_id,
            current_page,
            open_topics = open_topics.len(),
            recent_pages = recent_pages.len(),
            "built context pack"
        );

        Ok(ContextPack {
            book_id: book.book_id.clone(),
            current_page,
            grade: book.grade,
            subject: book.subject.clone(),
            board: book.board.clone(),
            total_pages: book.total_pages,
            open_topics,
            recent_pages,
            toc,
        })
    }

    /// Open and stable subtopics, each with a preview of its shard's
    /// current guidelines. Shards that fail to load are skipped with a
    /// warning; the index entry alone is not enough for matching.
    async fn collect_open_topics(&self, book_id: &str, index: &GuidelinesIndex) -> Vec<OpenTopicInfo> {
        let mut open_topics = Vec::new();
        for topic in &index.topics {
            let mut subtopics = Vec::new();
            for entry in topic.subtopics.iter().filter(|s| s.status.is_active()) {
                let key = layout::shard(book_id, &topic.topic_key, &entry.subtopic_key);
                match self.store.get_json::<SubtopicShard>(&key).await {
                    Ok(shard) => subtopics.push(OpenSubtopicInfo {
                        subtopic_key: shard.subtopic_key,
                        subtopic_title: shard.subtopic_title,
                        page_start: shard.source_page_start,
                        page_end: shard.source_page_end,
                        guidelines_preview: truncate_chars(&shard.guidelines, self.preview_chars)
                            .to_string(),
                    }),
                    Err(err) => {
                        tracing::warn!(
                            topic = %topic.topic_key,
                            subtopic = %entry.subtopic_key,
                            error = %err,
                            "failed to load shard for context pack"
                        );
                    }
                }
            }
            if !subtopics.is_empty() {
                open_topics.push(OpenTopicInfo {
                    topic_key: topic.topic_key.clone(),
                    topic_title: topic.topic_title.clone(),
                    subtopics,
                });
            }
        }
        open_topics
    }

    /// Minisummaries of the last K pages before `current_page`. Gaps are
    /// tolerated; a missing page guideline is simply not context.
    async fn collect_recent_pages(&self, book_id: &str, current_page: u32) -> Vec<RecentPageSummary> {
        let from = current_page.saturating_sub(self.recent_pages as u32).max(1);
        let mut summaries = Vec::new();
        for page in from..current_page {
            match self
                .store
                .get_json::<PageGuideline>(&layout::page_guideline(book_id, page))
                .await
            {
                Ok(guideline) => summaries.push(RecentPageSummary {
                    page,
                    summary: guideline.summary,
                }),
                Err(err) => {
                    tracing::debug!(page, error = %err, "no page guideline for context");
                }
            }
        }
        summaries
    }
}
