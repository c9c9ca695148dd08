//! One-line subtopic and topic summaries.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::llm::{call_with_retry, RetryPolicy};
use crate::pipeline::prompts::{format_subtopic_summary_prompt, format_topic_summary_prompt};
use crate::pipeline::truncate_chars;
use crate::traits::llm::{CallOptions, LlmClient};

/// Generates the one-line derivatives stored on shards and in the index.
///
/// Failures degrade to a "<title> - teaching guidelines" placeholder.
pub struct SummaryService {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    guidelines_chars: usize,
}

impl SummaryService {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryPolicy, config: &PipelineConfig) -> Self {
        Self {
            llm,
            retry,
            guidelines_chars: config.summary_guidelines_chars,
        }
    }

    /// One line (15-30 words) from the subtopic's full guidelines.
    pub async fn subtopic_summary(&self, subtopic_title: &str, guidelines: &str) -> String {
        let prompt = format_subtopic_summary_prompt(
            subtopic_title,
            truncate_chars(guidelines, self.guidelines_chars),
        );
        let opts = CallOptions::text()
            .with_system("You are a helpful assistant that summarizes teaching guidelines.")
            .with_temperature(0.3)
            .with_max_tokens(50);
        match call_with_retry(self.llm.as_ref(), &prompt, &opts, &self.retry).await {
            Ok(response) if !response.output_text.trim().is_empty() => {
                response.output_text.trim().to_string()
            }
            Ok(_) => fallback_summary(subtopic_title),
            Err(err) => {
                tracing::warn!(subtopic = %subtopic_title, error = %err, "subtopic summary failed");
                fallback_summary(subtopic_title)
            }
        }
    }

    /// One line (20-40 words) synthesized from subtopic summaries.
    pub async fn topic_summary(&self, topic_title: &str, subtopic_summaries: &[String]) -> String {
        if subtopic_summaries.is_empty() {
            return fallback_summary(topic_title);
        }
        let prompt = format_topic_summary_prompt(topic_title, subtopic_summaries);
        let opts = CallOptions::text().with_temperature(0.3).with_max_tokens(120);
        match call_with_retry(self.llm.as_ref(), &prompt, &opts, &self.retry).await {
            Ok(response) if !response.output_text.trim().is_empty() => {
                response.output_text.trim().to_string()
            }
            Ok(_) => fallback_summary(topic_title),
            Err(err) => {
                tracing::warn!(topic = %topic_title, error = %err, "topic summary failed");
                fallback_summary(topic_title)
            }
        }
    }
}

fn fallback_summary(title: &str) -> String {
    format!("{title} - teaching guidelines")
}
