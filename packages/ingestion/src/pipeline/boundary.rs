//! Boundary detection plus page-guideline extraction in one LLM call.

use std::sync::Arc;

use serde::Deserialize;

use crate::error::{IngestionError, Result};
use crate::llm::{call_with_retry, RetryPolicy};
use crate::pipeline::prompts::format_boundary_prompt;
use crate::slug::{deslugify, slugify};
use crate::traits::llm::{CallOptions, LlmClient};
use crate::types::ContextPack;

/// Raw model response before key normalization.
#[derive(Debug, Deserialize)]
struct BoundaryResponse {
    is_new_topic: bool,
    topic_name: String,
    subtopic_name: String,
    page_guidelines: String,
    #[serde(default)]
    reasoning: String,
}

/// Normalized boundary decision for one page.
#[derive(Debug, Clone)]
pub struct BoundaryDecision {
    /// True when the page opens a new topic/subtopic.
    pub is_new_topic: bool,
    pub topic_key: String,
    pub topic_title: String,
    pub subtopic_key: String,
    pub subtopic_title: String,
    /// Teaching guidance derived from this page alone.
    pub page_guidelines: String,
}

pub struct BoundaryDetector {
    llm: Arc<dyn LlmClient>,
    retry: RetryPolicy,
}

impl BoundaryDetector {
    pub fn new(llm: Arc<dyn LlmClient>, retry: RetryPolicy) -> Self {
        Self { llm, retry }
    }

    /// Decide whether the page continues an open subtopic or opens a new
    /// one, and extract its guidelines. The prompt carries the full page
    /// text, not the minisummary.
    pub async fn detect(&self, pack: &ContextPack, page_text: &str) -> Result<BoundaryDecision> {
        let prompt = format_boundary_prompt(pack, page_text);
        let opts = CallOptions::json()
            .with_system(
                "You are a textbook structure analyzer. \
                 Respond with valid JSON only, no markdown formatting.",
            )
            .with_temperature(0.2)
            .with_max_tokens(1000);

        let response = call_with_retry(self.llm.as_ref(), &prompt, &opts, &self.retry).await?;
        let parsed: BoundaryResponse =
            serde_json::from_str(response.output_text.trim()).map_err(|err| {
                IngestionError::InvalidResponse(format!("boundary decision was not valid JSON: {err}"))
            })?;

        let topic_key = slugify(&parsed.topic_name);
        let subtopic_key = slugify(&parsed.subtopic_name);
        if topic_key.is_empty() || subtopic_key.is_empty() {
            return Err(IngestionError::InvalidResponse(
                "boundary decision had an empty topic or subtopic name".to_string(),
            ));
        }
        if parsed.page_guidelines.trim().is_empty() {
            return Err(IngestionError::InvalidResponse(
                "boundary decision had empty page guidelines".to_string(),
            ));
        }

        // Titles are preserved as given, or derived from the key when the
        // model echoed the slug back.
        let topic_title = if parsed.topic_name == topic_key {
            deslugify(&topic_key)
        } else {
            parsed.topic_name
        };
        let subtopic_title = if parsed.subtopic_name == subtopic_key {
            deslugify(&subtopic_key)
        } else {
            parsed.subtopic_name
        };

        if !parsed.reasoning.is_empty() {
            tracing::debug!(reasoning = %parsed.reasoning, "boundary reasoning");
        }
        tracing::info!(
            page = pack.current_page,
            decision = if parsed.is_new_topic { "new" } else { "continue" },
            topic = %topic_key,
            subtopic = %subtopic_key,
            "boundary decision"
        );

        Ok(BoundaryDecision {
            is_new_topic: parsed.is_new_topic,
            topic_key,
            topic_title,
            subtopic_key,
            subtopic_title,
            page_guidelines: parsed.page_guidelines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLlm;
    use crate::types::TocHints;

    fn pack() -> ContextPack {
        ContextPack {
            book_id: "b1".into(),
            current_page: 1,
            grade: 3,
            subject: "Math".into(),
            board: "CBSE".into(),
            total_pages: 10,
            open_topics: vec![],
            recent_pages: vec![],
            toc: TocHints::default(),
        }
    }

    fn detector(llm: MockLlm) -> BoundaryDetector {
        BoundaryDetector::new(Arc::new(llm), RetryPolicy::immediate(1))
    }

    #[tokio::test]
    async fn slugifies_keys_and_keeps_titles() {
        let llm = MockLlm::new().with_rule(
            "textbook",
            r#"{"is_new_topic": true, "topic_name": "Data Handling", "subtopic_name": "Reading Bar Charts", "page_guidelines": "Teach chart reading.", "reasoning": "new chapter"}"#,
        );
        let decision = detector(llm).detect(&pack(), "page text").await.unwrap();
        assert!(decision.is_new_topic);
        assert_eq!(decision.topic_key, "data-handling");
        assert_eq!(decision.topic_title, "Data Handling");
        assert_eq!(decision.subtopic_key, "reading-bar-charts");
    }

    #[tokio::test]
    async fn deslugifies_titles_when_model_echoes_keys() {
        let llm = MockLlm::new().with_rule(
            "textbook",
            r#"{"is_new_topic": false, "topic_name": "data-handling", "subtopic_name": "bar-charts", "page_guidelines": "More charts."}"#,
        );
        let decision = detector(llm).detect(&pack(), "page text").await.unwrap();
        assert_eq!(decision.topic_title, "Data Handling");
        assert_eq!(decision.subtopic_title, "Bar Charts");
    }

    #[tokio::test]
    async fn invalid_json_is_an_error() {
        let llm = MockLlm::new().with_rule("textbook", "not json at all");
        let err = detector(llm).detect(&pack(), "page text").await.unwrap_err();
        assert!(matches!(err, IngestionError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn empty_names_are_rejected() {
        let llm = MockLlm::new().with_rule(
            "textbook",
            r#"{"is_new_topic": true, "topic_name": "!!!", "subtopic_name": "x", "page_guidelines": "y"}"#,
        );
        let err = detector(llm).detect(&pack(), "page text").await.unwrap_err();
        assert!(matches!(err, IngestionError::InvalidResponse(_)));
    }
}
