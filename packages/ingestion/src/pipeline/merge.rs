//! LLM-based guideline merging.

use std::sync::Arc;

use crate::llm::{call_with_retry, RetryPolicy};
use crate::pipeline::prompts::format_merge_prompt;
use crate::traits::llm::{CallOptions, LlmClient};

/// Merges new page guidelines into a shard's existing guidelines.
///
/// Falls back to plain concatenation when the model call fails, so a merge
/// can degrade but never lose content.
pub struct GuidelineMerger {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
}

impl GuidelineMerger {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    pub async fn merge(
        &self,
        existing: &str,
        incoming: &str,
        topic_title: &str,
        subtopic_title: &str,
        grade: i32,
        subject: &str,
    ) -> String {
        let prompt = format_merge_prompt(topic_title, subtopic_title, grade, subject, existing, incoming);
        let opts = CallOptions::text()
            .with_system("You are a teaching guidelines consolidation expert.")
            .with_temperature(0.3)
            .with_max_tokens(1500);

        match call_with_retry(self.llm.as_ref(), &prompt, &opts, &self.retry).await {
            Ok(response) if !response.output_text.trim().is_empty() => {
                let merged = response.output_text.trim().to_string();
                tracing::info!(
                    topic = %topic_title,
                    subtopic = %subtopic_title,
                    existing_len = existing.len(),
                    incoming_len = incoming.len(),
                    merged_len = merged.len(),
                    "guidelines merged"
                );
                merged
            }
            Ok(_) => {
                tracing::warn!("merge returned empty text, concatenating instead");
                format!("{existing}\n\n{incoming}")
            }
            Err(err) => {
                tracing::warn!(error = %err, "merge LLM call failed, concatenating instead");
                format!("{existing}\n\n{incoming}")
            }
        }
    }
}
