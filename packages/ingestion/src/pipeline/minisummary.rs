//! Minisummary generation: the first LLM call in the page pipeline.

use std::sync::Arc;

use crate::config::PipelineConfig;
use crate::llm::{call_with_retry, RetryPolicy};
use crate::pipeline::prompts::format_minisummary_prompt;
use crate::pipeline::{first_words, truncate_chars};
use crate::traits::llm::{CallOptions, LlmClient};

/// Soft word target before a length warning is logged.
const TARGET_WORDS: usize = 150;
const TOLERANCE_WORDS: usize = 30;

/// Produces the 5-6 line extractive summary of a page.
///
/// Never fails: when the model call does, the leading page text stands in
/// so the page can still be processed.
pub struct MinisummaryService {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
    input_chars: usize,
    fallback_words: usize,
}

impl MinisummaryService {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryPolicy, config: &PipelineConfig) -> Self {
        Self {
            llm,
            retry,
            input_chars: config.minisummary_input_chars,
            fallback_words: config.minisummary_fallback_words,
        }
    }

    pub async fn generate(&self, page_text: &str) -> String {
        let prompt = format_minisummary_prompt(truncate_chars(page_text, self.input_chars));
        let opts = CallOptions::text()
            .with_system("You are a textbook content summarizer. Provide concise, factual summaries.")
            .with_temperature(0.3)
            .with_max_tokens(300);

        match call_with_retry(self.llm.as_ref(), &prompt, &opts, &self.retry).await {
            Ok(response) => {
                let summary = response.output_text.trim().to_string();
                if summary.is_empty() {
                    tracing::warn!("minisummary came back empty, falling back to leading page text");
                    return first_words(page_text, self.fallback_words);
                }
                let words = summary.split_whitespace().count();
                if words > TARGET_WORDS + TOLERANCE_WORDS {
                    tracing::warn!(words, target = TARGET_WORDS, "minisummary exceeds target length");
                }
                summary
            }
            Err(err) => {
                tracing::warn!(error = %err, "minisummary generation failed, falling back to leading page text");
                first_words(page_text, self.fallback_words)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlm;

    fn service(llm: MockLlm) -> MinisummaryService {
        MinisummaryService::new(
            Arc::new(llm),
            RetryPolicy::immediate(1),
            &PipelineConfig::default(),
        )
    }

    #[tokio::test]
    async fn returns_model_summary() {
        let llm = MockLlm::new().with_rule("Summarize this textbook page", "A page about halves.");
        let summary = service(llm).generate("Half of 8 is 4. Half of 6 is 3.").await;
        assert_eq!(summary, "A page about halves.");
    }

    #[tokio::test]
    async fn falls_back_to_leading_words_on_failure() {
        let llm = MockLlm::new(); // no scripted responses: every call errors
        let summary = service(llm).generate("one two three four").await;
        assert_eq!(summary, "one two three four");
    }
}
