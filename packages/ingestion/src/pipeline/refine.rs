//! Topic/subtopic name refinement against complete guidelines.
//!
//! Names coined page-by-page are provisional; once a shard's guidelines
//! are complete, one LLM call proposes better names. Failures keep the
//! current names.

use std::sync::Arc;

use serde::Deserialize;

use crate::config::PipelineConfig;
use crate::llm::{call_with_retry, RetryPolicy};
use crate::pipeline::prompts::format_refine_prompt;
use crate::pipeline::truncate_chars;
use crate::slug::slugify;
use crate::traits::llm::{CallOptions, LlmClient};
use crate::types::{BookMetadata, SubtopicShard};

/// Proposed names for one shard.
#[derive(Debug, Clone, Deserialize)]
pub struct RefinedNames {
    pub topic_title: String,
    pub topic_key: String,
    pub subtopic_title: String,
    pub subtopic_key: String,
    #[serde(default)]
    pub reasoning: String,
}

impl RefinedNames {
    /// Unchanged names, used when refinement fails.
    pub fn keep_current(shard: &SubtopicShard, reasoning: impl Into<String>) -> Self {
        Self {
            topic_title: shard.topic_title.clone(),
            topic_key: shard.topic_key.clone(),
            subtopic_title: shard.subtopic_title.clone(),
            subtopic_key: shard.subtopic_key.clone(),
            reasoning: reasoning.into(),
        }
    }

    pub fn differs_from(&self, shard: &SubtopicShard) -> bool {
        self.topic_key != shard.topic_key
            || self.subtopic_key != shard.subtopic_key
            || self.topic_title != shard.topic_title
            || self.subtopic_title != shard.subtopic_title
    }
}

pub struct NameRefiner {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    guidelines_chars: usize,
}

impl NameRefiner {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryPolicy, config: &PipelineConfig) -> Self {
        Self {
            llm,
            retry,
            guidelines_chars: config.refine_guidelines_chars,
        }
    }

    pub async fn refine(&self, shard: &SubtopicShard, book: &BookMetadata) -> RefinedNames {
        let prompt = format_refine_prompt(
            book.grade,
            &book.subject,
            &book.board,
            &book.country,
            &shard.topic_title,
            &shard.topic_key,
            &shard.subtopic_title,
            &shard.subtopic_key,
            truncate_chars(&shard.guidelines, self.guidelines_chars),
            shard.source_page_start,
            shard.source_page_end,
        );
        let opts = CallOptions::json().with_temperature(0.3).with_max_tokens(300);

        let response = match call_with_retry(self.llm.as_ref(), &prompt, &opts, &self.retry).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    topic = %shard.topic_key,
                    subtopic = %shard.subtopic_key,
                    error = %err,
                    "name refinement failed, keeping current names"
                );
                return RefinedNames::keep_current(shard, format!("refinement error: {err}"));
            }
        };

        let mut refined = match serde_json::from_str::<RefinedNames>(response.output_text.trim()) {
            Ok(refined) => refined,
            Err(err) => {
                tracing::warn!(error = %err, "unparseable refinement response, keeping current names");
                return RefinedNames::keep_current(shard, format!("refinement parse error: {err}"));
            }
        };

        // Keys are re-slugified whatever the model produced.
        refined.topic_key = slugify(&refined.topic_key);
        refined.subtopic_key = slugify(&refined.subtopic_key);
        if refined.topic_key.is_empty()
            || refined.subtopic_key.is_empty()
            || refined.topic_title.trim().is_empty()
            || refined.subtopic_title.trim().is_empty()
        {
            tracing::warn!("refinement proposed empty names, keeping current names");
            return RefinedNames::keep_current(shard, "refinement proposed empty names");
        }
        refined
    }
}
