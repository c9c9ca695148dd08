//! Canonical object-store layout for a book's artifacts.
//!
//! Every key under `books/{book_id}/` is minted here so the workers, the
//! orchestrator, and finalization agree on one flat naming scheme:
//!
//! ```text
//! books/{book_id}/
//!     metadata.json
//!     raw/{page}.{ext}
//!     pages/{page:03}.png
//!     pages/{page:03}.ocr.txt
//!     pages/{page:03}.page_guideline.json
//!     guidelines/
//!         index.json
//!         page_index.json
//!         topics/{topic_key}/subtopics/{subtopic_key}.latest.json
//!         snapshots/index.v{N}.json
//!         snapshots/page_index.v{N}.json
//! ```

/// Prefix owning every artifact of one book.
pub fn book_prefix(book_id: &str) -> String {
    format!("books/{book_id}/")
}

/// The book's metadata document (reference data plus the per-page map).
pub fn metadata(book_id: &str) -> String {
    format!("books/{book_id}/metadata.json")
}

/// A raw page image exactly as uploaded.
pub fn raw_page(book_id: &str, page: u32, ext: &str) -> String {
    format!("books/{book_id}/raw/{page}.{ext}")
}

/// The canonical normalized page image.
pub fn page_image(book_id: &str, page: u32) -> String {
    format!("books/{book_id}/pages/{page:03}.png")
}

/// OCR text for a page.
pub fn page_text(book_id: &str, page: u32) -> String {
    format!("books/{book_id}/pages/{page:03}.ocr.txt")
}

/// Pre-pipeline text location, kept as a read fallback for older books.
pub fn page_text_legacy(book_id: &str, page: u32) -> String {
    format!("books/{book_id}/{page}.txt")
}

/// Per-page minisummary document, read back as context for later pages.
pub fn page_guideline(book_id: &str, page: u32) -> String {
    format!("books/{book_id}/pages/{page:03}.page_guideline.json")
}

/// The guidelines index (authoritative topic/subtopic registry).
pub fn guidelines_index(book_id: &str) -> String {
    format!("books/{book_id}/guidelines/index.json")
}

/// The page index (page number to subtopic assignment).
pub fn page_index(book_id: &str) -> String {
    format!("books/{book_id}/guidelines/page_index.json")
}

/// A subtopic shard. Each save overwrites this path.
pub fn shard(book_id: &str, topic_key: &str, subtopic_key: &str) -> String {
    format!("books/{book_id}/guidelines/topics/{topic_key}/subtopics/{subtopic_key}.latest.json")
}

/// Versioned snapshot of an outgoing guidelines index.
pub fn index_snapshot(book_id: &str, version: u64) -> String {
    format!("books/{book_id}/guidelines/snapshots/index.v{version}.json")
}

/// Versioned snapshot of an outgoing page index.
pub fn page_index_snapshot(book_id: &str, version: u64) -> String {
    format!("books/{book_id}/guidelines/snapshots/page_index.v{version}.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_keys_are_zero_padded() {
        assert_eq!(page_image("b1", 7), "books/b1/pages/007.png");
        assert_eq!(page_text("b1", 42), "books/b1/pages/042.ocr.txt");
        assert_eq!(page_guideline("b1", 120), "books/b1/pages/120.page_guideline.json");
    }

    #[test]
    fn raw_and_legacy_keys_are_unpadded() {
        assert_eq!(raw_page("b1", 7, "jpg"), "books/b1/raw/7.jpg");
        assert_eq!(page_text_legacy("b1", 7), "books/b1/7.txt");
    }

    #[test]
    fn shard_key_nests_topic_and_subtopic() {
        assert_eq!(
            shard("b1", "fractions", "comparing-fractions"),
            "books/b1/guidelines/topics/fractions/subtopics/comparing-fractions.latest.json"
        );
    }

    #[test]
    fn snapshots_are_keyed_by_version() {
        assert_eq!(index_snapshot("b1", 3), "books/b1/guidelines/snapshots/index.v3.json");
        assert_eq!(
            page_index_snapshot("b1", 9),
            "books/b1/guidelines/snapshots/page_index.v9.json"
        );
    }
}
