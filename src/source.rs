// ABOUTME: BookSource configuration models: site-level settings plus the four rule groups.
// ABOUTME: Deserialized from JSON; absent fields mean "not extractable", never an error.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Site-level configuration for one book source.
///
/// Constructed once from external configuration and read-only afterwards;
/// wrap in `Arc` to share across concurrently running executors.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BookSource {
    /// Human-readable source name.
    pub name: String,
    /// Base URL of the site; relative extraction results resolve against it.
    pub url: String,
    /// Custom HTTP headers as JSON map text, e.g. `{"Referer": "..."}`.
    pub header: Option<String>,
    /// Script library source evaluated into the sandbox before any rule script.
    pub js_lib: Option<String>,
    /// Search URL template with `{{key}}` / `{{page}}` / `{{expr}}` tokens.
    pub search_url: Option<String>,
    pub rule_search: RuleSearch,
    pub rule_book_info: RuleBookInfo,
    pub rule_toc: RuleToc,
    pub rule_content: RuleContent,
}

impl BookSource {
    /// Parse this source from its JSON configuration text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Decode the `header` field into a header map. Malformed or absent
    /// header JSON yields an empty map.
    pub fn header_map(&self) -> HashMap<String, String> {
        self.header
            .as_deref()
            .and_then(|h| serde_json::from_str::<HashMap<String, String>>(h).ok())
            .unwrap_or_default()
    }
}

/// Rules for the search operation. Empty rule = field not extractable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleSearch {
    pub book_list: String,
    pub name: String,
    pub author: String,
    pub kind: String,
    pub last_chapter: String,
    pub intro: String,
    pub cover_url: String,
    pub book_url: String,
    pub word_count: String,
}

/// Rules for the book-info operation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleBookInfo {
    pub name: String,
    pub author: String,
    pub kind: String,
    pub last_chapter: String,
    pub intro: String,
    pub cover_url: String,
    pub toc_url: String,
    pub word_count: String,
}

/// Rules for the table-of-contents operation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleToc {
    pub chapter_list: String,
    pub chapter_name: String,
    pub chapter_url: String,
    pub is_vip: String,
    pub is_volume: String,
}

/// Rules for the chapter-content operation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleContent {
    pub content: String,
    pub next_content_url: String,
    /// Newline-separated `pattern##replacement` cleanup entries applied to
    /// chapter text after extraction.
    pub replace_regex: String,
}
