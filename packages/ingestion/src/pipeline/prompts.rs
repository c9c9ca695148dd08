//! LLM prompts for the extraction pipeline.
//!
//! Templates are plain constants with `{placeholder}` slots filled by the
//! `format_*` helpers. Prompt text changes should stay here so the services
//! remain free of string assembly.

use crate::types::ContextPack;

/// Prompt for the 5-6 line extractive page summary.
pub const MINISUMMARY_PROMPT: &str = r#"Summarize this textbook page in 5-6 lines (at most 150 words).

Rules:
- Be extractive and factual: report what the page actually says.
- Cover the main concepts, definitions, worked examples, and exercises.
- Do not interpret, evaluate, or add teaching advice.
- Plain text only, no headings or bullets.

Page text:
{page_text}"#;

/// Prompt for combined boundary detection and page-guideline extraction.
pub const BOUNDARY_PROMPT: &str = r#"You are analyzing a Grade {grade} {subject} textbook ({board} board), page {current_page}.

Decide whether this page CONTINUES one of the open subtopics below or OPENS a new topic/subtopic, and extract teaching guidelines from the page.

Open subtopics:
{open_topics}

Summaries of recent pages:
{recent_summaries}

Current chapter hint: {current_chapter}

Full text of page {current_page}:
{page_text}

Respond with a JSON object:
{
  "is_new_topic": true or false,
  "topic_name": "topic this page belongs to (an open topic when continuing, a new name when opening)",
  "subtopic_name": "subtopic this page belongs to",
  "page_guidelines": "consolidated teaching guidance a tutor needs to teach THIS page: objectives, examples to use, misconceptions to watch for, how to assess",
  "reasoning": "one or two sentences explaining the decision"
}

Rules:
- Continue an open subtopic when the page clearly extends its material; reuse its exact name.
- Open a new topic/subtopic when the page starts visibly new material (new chapter heading, new concept family).
- If there are no open subtopics, this is the first page: set is_new_topic to true and coin names from the page."#;

/// Prompt for merging new page guidelines into an existing shard.
pub const MERGE_PROMPT: &str = r#"You are consolidating teaching guidelines for Grade {grade} {subject}, topic "{topic}", subtopic "{subtopic}".

Merge the new page guidelines into the existing guidelines. Keep every distinct objective, example, misconception, and assessment idea; deduplicate overlapping items; keep the result coherent and ordered for teaching.

Existing guidelines:
{existing_guidelines}

New page guidelines:
{new_page_guidelines}

Return ONLY the merged guidelines text."#;

/// Prompt reducing a subtopic's guidelines to one line.
pub const SUBTOPIC_SUMMARY_PROMPT: &str = r#"Summarize this teaching guideline in ONE concise line (15-30 words).

Subtopic: {subtopic_title}

Guidelines:
{guidelines}

Return ONLY the summary line."#;

/// Prompt synthesizing a topic summary from its subtopic one-liners.
pub const TOPIC_SUMMARY_PROMPT: &str = r#"Create a topic-level summary (20-40 words) from these subtopic summaries.

Topic: {topic_title}

Subtopic summaries:
{subtopic_summaries}

Return ONLY the summary line."#;

/// Prompt identifying duplicate subtopics across the whole book.
pub const DEDUP_PROMPT: &str = r#"You are reviewing the extracted structure of a Grade {grade} {subject} textbook for duplicated subtopics (the same material split under two names, e.g. "Data Handling" vs "data-handling-basics").

All subtopics:
{topics_summary}

Respond with a JSON object:
{
  "duplicates": [
    {
      "topic_key1": "topic key of the subtopic to KEEP",
      "subtopic_key1": "subtopic key to KEEP",
      "topic_key2": "topic key of the duplicate to MERGE AWAY",
      "subtopic_key2": "subtopic key to merge away",
      "reason": "why these are the same material"
    }
  ]
}

Rules:
- Only pair subtopics that cover the SAME material; related-but-distinct subtopics are not duplicates.
- Prefer keeping the subtopic with the wider page range.
- Return an empty list when nothing is duplicated."#;

/// Prompt refining a subtopic's names from its complete guidelines.
pub const REFINE_PROMPT: &str = r#"You are naming curriculum units for a Grade {grade} {subject} textbook ({board} board, {country}).

The names below were coined page-by-page before the guidelines were complete. Propose better names based on the full guidelines, or keep the current ones if they already fit.

Current topic: {current_topic_title} ({current_topic_key})
Current subtopic: {current_subtopic_title} ({current_subtopic_key})
Pages: {page_start}-{page_end}

Complete guidelines:
{guidelines}

Respond with a JSON object:
{
  "topic_title": "refined topic name",
  "topic_key": "slugified topic key",
  "subtopic_title": "refined subtopic name",
  "subtopic_key": "slugified subtopic key",
  "reasoning": "one sentence"
}"#;

pub fn format_minisummary_prompt(page_text: &str) -> String {
    MINISUMMARY_PROMPT.replace("{page_text}", page_text)
}

pub fn format_boundary_prompt(pack: &ContextPack, page_text: &str) -> String {
    BOUNDARY_PROMPT
        .replace("{grade}", &pack.grade.to_string())
        .replace("{subject}", &pack.subject)
        .replace("{board}", &pack.board)
        .replace("{current_page}", &pack.current_page.to_string())
        .replace("{open_topics}", &render_open_topics(pack))
        .replace("{recent_summaries}", &render_recent_pages(pack))
        .replace(
            "{current_chapter}",
            pack.toc.current_chapter.as_deref().unwrap_or("(none yet)"),
        )
        .replace("{page_text}", page_text)
}

pub fn format_merge_prompt(
    topic_title: &str,
    subtopic_title: &str,
    grade: i32,
    subject: &str,
    existing_guidelines: &str,
    new_page_guidelines: &str,
) -> String {
    MERGE_PROMPT
        .replace("{grade}", &grade.to_string())
        .replace("{subject}", subject)
        .replace("{topic}", topic_title)
        .replace("{subtopic}", subtopic_title)
        .replace("{existing_guidelines}", existing_guidelines)
        .replace("{new_page_guidelines}", new_page_guidelines)
}

pub fn format_subtopic_summary_prompt(subtopic_title: &str, guidelines: &str) -> String {
    SUBTOPIC_SUMMARY_PROMPT
        .replace("{subtopic_title}", subtopic_title)
        .replace("{guidelines}", guidelines)
}

pub fn format_topic_summary_prompt(topic_title: &str, subtopic_summaries: &[String]) -> String {
    let formatted = subtopic_summaries
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n");
    TOPIC_SUMMARY_PROMPT
        .replace("{topic_title}", topic_title)
        .replace("{subtopic_summaries}", &formatted)
}

pub fn format_dedup_prompt(topics_summary: &str, grade: i32, subject: &str) -> String {
    DEDUP_PROMPT
        .replace("{grade}", &grade.to_string())
        .replace("{subject}", subject)
        .replace("{topics_summary}", topics_summary)
}

#[allow(clippy::too_many_arguments)]
pub fn format_refine_prompt(
    grade: i32,
    subject: &str,
    board: &str,
    country: &str,
    topic_title: &str,
    topic_key: &str,
    subtopic_title: &str,
    subtopic_key: &str,
    guidelines: &str,
    page_start: u32,
    page_end: u32,
) -> String {
    REFINE_PROMPT
        .replace("{grade}", &grade.to_string())
        .replace("{subject}", subject)
        .replace("{board}", board)
        .replace("{country}", country)
        .replace("{current_topic_title}", topic_title)
        .replace("{current_topic_key}", topic_key)
        .replace("{current_subtopic_title}", subtopic_title)
        .replace("{current_subtopic_key}", subtopic_key)
        .replace("{guidelines}", guidelines)
        .replace("{page_start}", &page_start.to_string())
        .replace("{page_end}", &page_end.to_string())
}

fn render_open_topics(pack: &ContextPack) -> String {
    if pack.open_topics.is_empty() {
        return "(No open topics yet - this is the first page)".to_string();
    }
    let mut out = String::new();
    for topic in &pack.open_topics {
        out.push_str(&format!("\nTopic: {} ({})\n", topic.topic_title, topic.topic_key));
        for sub in &topic.subtopics {
            out.push_str(&format!(
                "  Subtopic: {} ({})\n  Pages: {}-{}\n  Guidelines preview: {}\n\n",
                sub.subtopic_title,
                sub.subtopic_key,
                sub.page_start,
                sub.page_end,
                sub.guidelines_preview,
            ));
        }
    }
    out
}

fn render_recent_pages(pack: &ContextPack) -> String {
    if pack.recent_pages.is_empty() {
        return "(No recent pages)".to_string();
    }
    pack.recent_pages
        .iter()
        .map(|p| format!("Page {}:\n{}\n", p.page, p.summary))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OpenSubtopicInfo, OpenTopicInfo, RecentPageSummary, TocHints};

    fn pack() -> ContextPack {
        ContextPack {
            book_id: "b1".into(),
            current_page: 7,
            grade: 3,
            subject: "Math".into(),
            board: "CBSE".into(),
            total_pages: 50,
            open_topics: vec![OpenTopicInfo {
                topic_key: "fractions".into(),
                topic_title: "Fractions".into(),
                subtopics: vec![OpenSubtopicInfo {
                    subtopic_key: "halves".into(),
                    subtopic_title: "Halves".into(),
                    page_start: 4,
                    page_end: 6,
                    guidelines_preview: "Teach halves using paper folding".into(),
                }],
            }],
            recent_pages: vec![RecentPageSummary { page: 6, summary: "Folding shapes in half.".into() }],
            toc: TocHints { current_chapter: Some("Fractions".into()) },
        }
    }

    #[test]
    fn boundary_prompt_includes_context_and_page() {
        let prompt = format_boundary_prompt(&pack(), "Half of 8 is 4.");
        assert!(prompt.contains("Grade 3 Math"));
        assert!(prompt.contains("Halves (halves)"));
        assert!(prompt.contains("Pages: 4-6"));
        assert!(prompt.contains("Page 6:"));
        assert!(prompt.contains("Half of 8 is 4."));
        assert!(!prompt.contains("{page_text}"));
    }

    #[test]
    fn first_page_prompt_says_so() {
        let mut p = pack();
        p.open_topics.clear();
        p.recent_pages.clear();
        let prompt = format_boundary_prompt(&p, "text");
        assert!(prompt.contains("this is the first page"));
        assert!(prompt.contains("(No recent pages)"));
    }

    #[test]
    fn topic_summary_prompt_bullets_subtopics() {
        let prompt = format_topic_summary_prompt(
            "Fractions",
            &["Halves via folding".to_string(), "Quarters via sharing".to_string()],
        );
        assert!(prompt.contains("- Halves via folding"));
        assert!(prompt.contains("- Quarters via sharing"));
    }
}
