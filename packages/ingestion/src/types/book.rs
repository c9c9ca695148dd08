//! The per-book metadata document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::page::PageMeta;

/// `books/{book_id}/metadata.json`: book reference data plus the per-page
/// map maintained by the OCR worker.
///
/// The book fields are owned by the calling system and treated as read-only
/// here; they condition the LLM prompts. The `pages` map is read, mutated in
/// memory, and flushed back periodically by the OCR worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookMetadata {
    pub book_id: String,
    #[serde(default)]
    pub grade: i32,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub board: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub pages: BTreeMap<u32, PageMeta>,
}

fn default_country() -> String {
    "India".to_string()
}

impl BookMetadata {
    pub fn new(book_id: impl Into<String>) -> Self {
        Self {
            book_id: book_id.into(),
            grade: 0,
            subject: String::new(),
            board: String::new(),
            country: default_country(),
            total_pages: 0,
            pages: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_map_keys_round_trip_as_json_strings() {
        let mut book = BookMetadata::new("b1");
        book.pages.insert(3, PageMeta::new("books/b1/raw/3.png"));
        let json = serde_json::to_string(&book).unwrap();
        assert!(json.contains("\"3\""));
        let back: BookMetadata = serde_json::from_str(&json).unwrap();
        assert!(back.pages.contains_key(&3));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let book: BookMetadata = serde_json::from_str(r#"{"book_id": "b1"}"#).unwrap();
        assert_eq!(book.country, "India");
        assert!(book.pages.is_empty());
    }
}
