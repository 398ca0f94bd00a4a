// ABOUTME: Output records populated by the Executor: search hits, book info, chapters, content.
// ABOUTME: Plain owned data, created per call; no shared mutable state.

use serde::{Deserialize, Serialize};

/// One entry from a search-results page.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub name: String,
    pub author: String,
    pub kind: String,
    pub last_chapter: String,
    pub intro: String,
    pub cover_url: String,
    pub book_url: String,
    pub word_count: String,
}

/// Metadata extracted from a book's detail page.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BookInfo {
    pub name: String,
    pub author: String,
    pub kind: String,
    pub last_chapter: String,
    pub intro: String,
    pub cover_url: String,
    /// Absolute URL of the table of contents; falls back to the book URL.
    pub toc_url: String,
    pub word_count: String,
}

/// One table-of-contents entry.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub name: String,
    pub url: String,
    pub is_vip: bool,
    /// True when the entry is a volume heading rather than a chapter.
    pub is_volume: bool,
}

/// Extracted text of a single chapter page.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChapterContent {
    pub text: String,
    /// Next pagination page of the same chapter, empty when the chapter
    /// ends on this page.
    pub next_url: String,
}
