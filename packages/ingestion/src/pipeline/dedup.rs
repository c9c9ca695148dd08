//! End-of-book duplicate detection.
//!
//! Page-by-page extraction over-segments: the same material can end up
//! under two names. A single holistic LLM pass over short previews of
//! every shard nominates pairs to merge. Any failure degrades to "no
//! duplicates", which is always safe.

use std::sync::Arc;

use serde::Deserialize;

use crate::config::PipelineConfig;
use crate::llm::{call_with_retry, RetryPolicy};
use crate::pipeline::prompts::format_dedup_prompt;
use crate::pipeline::truncate_chars;
use crate::traits::llm::{CallOptions, LlmClient};
use crate::types::SubtopicShard;

/// A duplicate nomination: keep `1`, merge `2` into it.
#[derive(Debug, Clone, Deserialize)]
pub struct DuplicatePair {
    pub topic_key1: String,
    pub subtopic_key1: String,
    pub topic_key2: String,
    pub subtopic_key2: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct DedupResponse {
    #[serde(default)]
    duplicates: Vec<DuplicatePair>,
}

pub struct DuplicateDetector {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    preview_chars: usize,
}

impl DuplicateDetector {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryPolicy, config: &PipelineConfig) -> Self {
        Self {
            llm,
            retry,
            preview_chars: config.dedup_preview_chars,
        }
    }

    pub async fn find_duplicates(
        &self,
        shards: &[SubtopicShard],
        grade: i32,
        subject: &str,
    ) -> Vec<DuplicatePair> {
        if shards.len() < 2 {
            return Vec::new();
        }

        let summary = self.build_topics_summary(shards);
        let prompt = format_dedup_prompt(&summary, grade, subject);
        let opts = CallOptions::json()
            .with_system(
                "You are a curriculum structure analyzer specializing in identifying duplicate topics.",
            )
            .with_temperature(0.2)
            .with_max_tokens(2000);

        let response = match call_with_retry(self.llm.as_ref(), &prompt, &opts, &self.retry).await {
            Ok(response) => response,
            Err(err) => {
                tracing::error!(error = %err, "deduplication analysis failed");
                return Vec::new();
            }
        };
        match serde_json::from_str::<DedupResponse>(response.output_text.trim()) {
            Ok(parsed) => {
                tracing::info!(pairs = parsed.duplicates.len(), "duplicate pairs identified");
                parsed.duplicates
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to parse deduplication response");
                Vec::new()
            }
        }
    }

    fn build_topics_summary(&self, shards: &[SubtopicShard]) -> String {
        shards
            .iter()
            .map(|shard| {
                format!(
                    "\nTopic: {} ({})\nSubtopic: {} ({})\nPages: {}-{}\nGuidelines preview: {}\n",
                    shard.topic_title,
                    shard.topic_key,
                    shard.subtopic_title,
                    shard.subtopic_key,
                    shard.source_page_start,
                    shard.source_page_end,
                    truncate_chars(&shard.guidelines, self.preview_chars),
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlm;

    fn shard(tk: &str, sk: &str, start: u32) -> SubtopicShard {
        SubtopicShard::new(tk, tk.to_uppercase(), sk, sk.to_uppercase(), start, "guidelines")
    }

    fn detector(llm: MockLlm) -> DuplicateDetector {
        DuplicateDetector::new(Arc::new(llm), RetryPolicy::immediate(1), &PipelineConfig::default())
    }

    #[tokio::test]
    async fn single_shard_needs_no_analysis() {
        let llm = MockLlm::new();
        let d = detector(llm);
        assert!(d.find_duplicates(&[shard("t", "s", 1)], 3, "Math").await.is_empty());
    }

    #[tokio::test]
    async fn parses_duplicate_pairs() {
        let llm = MockLlm::new().with_rule(
            "duplicated subtopics",
            r#"{"duplicates": [{"topic_key1": "t1", "subtopic_key1": "s1", "topic_key2": "t2", "subtopic_key2": "s2", "reason": "same material"}]}"#,
        );
        let pairs = detector(llm)
            .find_duplicates(&[shard("t1", "s1", 1), shard("t2", "s2", 8)], 3, "Math")
            .await;
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].subtopic_key2, "s2");
    }

    #[tokio::test]
    async fn failure_means_no_duplicates() {
        let pairs = detector(MockLlm::new())
            .find_duplicates(&[shard("t1", "s1", 1), shard("t2", "s2", 8)], 3, "Math")
            .await;
        assert!(pairs.is_empty());
    }
}
