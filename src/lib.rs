// ABOUTME: Main library entry point for the ruleshelf book-source rule engine.
// ABOUTME: Re-exports the public API: Executor, BookSource, RuleAnalyzer, output models, errors.

//! Ruleshelf - a declarative content-extraction rule engine for book sources.
//!
//! Per-site rule strings (CSS, XPath, JSONPath, regex, default chains, and
//! sandboxed scripts) turn fetched HTML/JSON pages into structured book
//! metadata, chapter lists, and chapter text.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ruleshelf::{BookSource, Executor, SourceError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), SourceError> {
//!     let config = std::fs::read_to_string("source.json").expect("config file");
//!     let source = BookSource::from_json(&config).expect("valid source config");
//!     let executor = Executor::builder(Arc::new(source)).build();
//!     for hit in executor.search("mother of learning", 1).await? {
//!         println!("{} by {}", hit.name, hit.author);
//!     }
//!     Ok(())
//! }
//! ```

pub mod analyzer;
pub mod error;
pub mod executor;
pub mod model;
pub mod options;
pub mod resource;
pub mod script;
pub mod source;
pub mod urlutil;

pub use crate::analyzer::{Element, PlainEvaluator, RuleAnalyzer, RuleCombinator, RuleType};
pub use crate::error::{ErrorCode, SourceError};
pub use crate::executor::{Executor, MAX_CONTENT_PAGES};
pub use crate::model::{BookInfo, Chapter, ChapterContent, SearchResult};
pub use crate::options::{ExecutorBuilder, Options};
pub use crate::script::{RuleEvaluator, Sandbox};
pub use crate::source::{BookSource, RuleBookInfo, RuleContent, RuleSearch, RuleToc};
