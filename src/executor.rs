// ABOUTME: Executor orchestrating the four site operations: search, book info, TOC, chapter content.
// ABOUTME: Each call is fetch → analyze → map; pagination carries a cycle guard and a hard page cap.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::analyzer::{Element, PlainEvaluator, RuleAnalyzer};
use crate::error::SourceError;
use crate::model::{BookInfo, Chapter, ChapterContent, SearchResult};
use crate::options::{ExecutorBuilder, Options};
use crate::resource::{self, FetchMethod, FetchOptions, FetchResult};
use crate::script::{FetchFn, Sandbox};
use crate::source::BookSource;
use crate::urlutil;

/// Hard cap on pages fetched while following a chapter's pagination chain.
pub const MAX_CONTENT_PAGES: usize = 100;

static TEMPLATE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").unwrap());

/// One executor per concurrent unit of work. Holds the site configuration,
/// an HTTP client, and its own script sandbox; not shareable across threads
/// by construction.
pub struct Executor {
    source: Arc<BookSource>,
    opts: Options,
    http_client: reqwest::Client,
    sandbox: Rc<Sandbox>,
}

impl Executor {
    pub fn builder(source: Arc<BookSource>) -> ExecutorBuilder {
        ExecutorBuilder::new(source)
    }

    pub fn new(source: Arc<BookSource>, opts: Options) -> Self {
        let http_client = opts.http_client.clone().unwrap_or_else(|| {
            reqwest::Client::builder()
                .user_agent(&opts.user_agent)
                .timeout(opts.timeout)
                .cookie_store(true)
                .gzip(true)
                .brotli(true)
                .deflate(true)
                .build()
                .expect("failed to build HTTP client")
        });

        let fetcher = sandbox_fetcher(
            http_client.clone(),
            source.header_map(),
            opts.allow_private_networks,
        );
        let sandbox = Rc::new(
            Sandbox::new(fetcher, Box::new(PlainEvaluator))
                .expect("failed to initialize script sandbox"),
        );
        if let Some(lib) = source.js_lib.as_deref() {
            sandbox.load_library(lib);
        }
        sandbox.bind("", &source.url);

        Self {
            source,
            opts,
            http_client,
            sandbox,
        }
    }

    /// Ad-hoc analyzer over already-fetched content, bound to this
    /// executor's sandbox.
    pub fn create_analyzer(
        &self,
        content: impl Into<String>,
        base_url: impl Into<String>,
    ) -> RuleAnalyzer {
        RuleAnalyzer::with_sandbox(content, base_url, Rc::clone(&self.sandbox))
    }

    /// Search the source for a keyword. A source without a search template
    /// cannot search; that is "not extractable", not an error.
    pub async fn search(&self, key: &str, page: i32) -> Result<Vec<SearchResult>, SourceError> {
        let Some(template) = self.source.search_url.as_deref() else {
            return Ok(vec![]);
        };
        let url = self.render_url_template(template, key, page);
        let fetched = self.fetch_page(&url).await?;
        let base = fetched.final_url.clone();
        let analyzer = self.create_analyzer(fetched.text(), base.clone());

        let rules = &self.source.rule_search;
        let mut results = Vec::new();
        for element in analyzer.get_elements(&rules.book_list) {
            let name = first_of(&analyzer, &element, &rules.name);
            if name.is_empty() {
                debug!("search entry without a name discarded");
                continue;
            }
            results.push(SearchResult {
                name,
                author: first_of(&analyzer, &element, &rules.author),
                kind: first_of(&analyzer, &element, &rules.kind),
                last_chapter: first_of(&analyzer, &element, &rules.last_chapter),
                intro: first_of(&analyzer, &element, &rules.intro),
                cover_url: resolve_non_empty(&base, first_of(&analyzer, &element, &rules.cover_url)),
                book_url: resolve_non_empty(&base, first_of(&analyzer, &element, &rules.book_url)),
                word_count: first_of(&analyzer, &element, &rules.word_count),
            });
        }
        Ok(results)
    }

    /// Fetch a book's detail page and extract its metadata.
    pub async fn book_info(&self, book_url: &str) -> Result<BookInfo, SourceError> {
        let fetched = self.fetch_page(book_url).await?;
        let base = fetched.final_url.clone();
        let analyzer = self.create_analyzer(fetched.text(), base.clone());

        let rules = &self.source.rule_book_info;
        let toc_rule = rules.toc_url.trim();
        let toc_url = if toc_rule == "baseUrl" {
            // The literal token means "this very page is the TOC".
            base.clone()
        } else if toc_rule.is_empty() {
            book_url.to_string()
        } else {
            let extracted = first_rule(&analyzer, toc_rule);
            if extracted.is_empty() {
                book_url.to_string()
            } else {
                urlutil::resolve(&base, &extracted)
            }
        };

        Ok(BookInfo {
            name: first_rule(&analyzer, &rules.name),
            author: first_rule(&analyzer, &rules.author),
            kind: first_rule(&analyzer, &rules.kind),
            last_chapter: first_rule(&analyzer, &rules.last_chapter),
            intro: first_rule(&analyzer, &rules.intro),
            cover_url: resolve_non_empty(&base, first_rule(&analyzer, &rules.cover_url)),
            toc_url,
            word_count: first_rule(&analyzer, &rules.word_count),
        })
    }

    /// Fetch the table of contents and extract the chapter list.
    pub async fn chapter_list(&self, toc_url: &str) -> Result<Vec<Chapter>, SourceError> {
        let fetched = self.fetch_page(toc_url).await?;
        let base = fetched.final_url.clone();
        let analyzer = self.create_analyzer(fetched.text(), base.clone());

        let rules = &self.source.rule_toc;
        let mut chapters = Vec::new();
        for element in analyzer.get_elements(&rules.chapter_list) {
            let name = first_of(&analyzer, &element, &rules.chapter_name);
            let url = first_of(&analyzer, &element, &rules.chapter_url);
            if name.is_empty() && url.is_empty() {
                continue;
            }
            chapters.push(Chapter {
                name,
                url: resolve_non_empty(&base, url),
                is_vip: truthy(&first_of(&analyzer, &element, &rules.is_vip)),
                is_volume: truthy(&first_of(&analyzer, &element, &rules.is_volume)),
            });
        }
        Ok(chapters)
    }

    /// Fetch one chapter page: its text plus the next pagination URL.
    pub async fn chapter_content(&self, url: &str) -> Result<ChapterContent, SourceError> {
        let mut page = self.content_page(url).await?;
        page.text = self.apply_cleanup(&page.text);
        Ok(page)
    }

    /// Follow a chapter's pagination chain, joining page texts with a
    /// newline, until the next URL is empty, already visited, or the page
    /// cap is reached. A failure on the first page is a hard error; a
    /// failure later returns whatever accumulated.
    pub async fn full_chapter_content(&self, url: &str) -> Result<String, SourceError> {
        let first = self.content_page(url).await?;
        let mut text = first.text;
        let mut next = first.next_url;
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(url.to_string());
        let mut fetched_pages = 1usize;

        while !next.is_empty() && fetched_pages < MAX_CONTENT_PAGES {
            if !visited.insert(next.clone()) {
                debug!(url = %next, "pagination cycle detected");
                break;
            }
            match self.content_page(&next).await {
                Ok(page) => {
                    if !page.text.is_empty() {
                        text.push('\n');
                        text.push_str(&page.text);
                    }
                    next = page.next_url;
                    fetched_pages += 1;
                }
                Err(e) => {
                    warn!(error = %e, url = %next, "mid-pagination fetch failed, keeping partial content");
                    break;
                }
            }
        }
        Ok(self.apply_cleanup(&text))
    }

    /// One page of chapter content, without cleanup applied.
    async fn content_page(&self, url: &str) -> Result<ChapterContent, SourceError> {
        let fetched = self.fetch_page(url).await?;
        let base = fetched.final_url.clone();
        let analyzer = self.create_analyzer(fetched.text(), base.clone());
        let rules = &self.source.rule_content;

        let text = analyzer.parse_rule(&rules.content).join("\n");
        let next_url = {
            let raw = first_rule(&analyzer, &rules.next_content_url);
            if raw.is_empty() {
                String::new()
            } else {
                urlutil::resolve(&base, &raw)
            }
        };
        Ok(ChapterContent { text, next_url })
    }

    async fn fetch_page(&self, url: &str) -> Result<FetchResult, SourceError> {
        let (clean_url, method, body, extra_headers) = split_url_options(url);
        let mut headers = self.source.header_map();
        headers.extend(self.opts.headers.clone());
        headers.extend(extra_headers);
        let fetch_opts = FetchOptions {
            headers,
            method,
            body,
            allow_private_networks: self.opts.allow_private_networks,
            parse_non_200: false,
        };
        resource::fetch(&self.http_client, &clean_url, &fetch_opts).await
    }

    /// Expand `{{key}}` (URL-escaped), `{{page}}`, and arbitrary `{{expr}}`
    /// script sub-templates in a search URL.
    fn render_url_template(&self, template: &str, key: &str, page: i32) -> String {
        TEMPLATE_TOKEN
            .replace_all(template, |caps: &Captures| {
                let expr = caps[1].trim();
                if expr == "key" {
                    url_encode(key)
                } else if expr == "page" {
                    page.to_string()
                } else {
                    self.sandbox.eval_expr(expr, key, page)
                }
            })
            .into_owned()
    }

    /// Apply the source's `replaceRegex` cleanup lines to chapter text.
    /// Each line compiles independently; a bad pattern is skipped.
    fn apply_cleanup(&self, text: &str) -> String {
        let rules = self.source.rule_content.replace_regex.trim();
        if rules.is_empty() {
            return text.to_string();
        }
        let mut out = text.to_string();
        for line in rules.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let (pattern, replacement) = match line.split_once("##") {
                Some((p, r)) => (p, r.trim_end_matches("##")),
                None => (line, ""),
            };
            match Regex::new(pattern) {
                Ok(re) => out = re.replace_all(&out, replacement).into_owned(),
                Err(e) => debug!(pattern, error = %e, "cleanup pattern skipped"),
            }
        }
        out
    }
}

/// Synchronous fetch bridge for the sandbox's `ajax`: the request runs on a
/// dedicated thread with its own small runtime, so in-script fetches never
/// block the calling runtime's driver.
fn sandbox_fetcher(
    client: reqwest::Client,
    headers: HashMap<String, String>,
    allow_private_networks: bool,
) -> FetchFn {
    Box::new(move |url: &str| {
        let client = client.clone();
        let url = url.to_string();
        let headers = headers.clone();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .ok()?;
            runtime.block_on(async move {
                let opts = FetchOptions {
                    headers,
                    allow_private_networks,
                    ..Default::default()
                };
                match resource::fetch(&client, &url, &opts).await {
                    Ok(result) => Some(result.text()),
                    Err(e) => {
                        debug!(error = %e, url = %url, "ajax fetch failed");
                        None
                    }
                }
            })
        })
        .join()
        .ok()
        .flatten()
    })
}

fn first_of(analyzer: &RuleAnalyzer, element: &Element, rule: &str) -> String {
    if rule.trim().is_empty() {
        return String::new();
    }
    analyzer
        .parse_from_element(element, rule)
        .into_iter()
        .next()
        .unwrap_or_default()
}

fn first_rule(analyzer: &RuleAnalyzer, rule: &str) -> String {
    if rule.trim().is_empty() {
        return String::new();
    }
    analyzer.parse_rule(rule).into_iter().next().unwrap_or_default()
}

fn resolve_non_empty(base: &str, value: String) -> String {
    if value.is_empty() {
        value
    } else {
        urlutil::resolve(base, &value)
    }
}

/// Boolean rule fields are truthy unless empty, "false", or "0".
fn truthy(value: &str) -> bool {
    !value.is_empty() && value != "false" && value != "0"
}

fn url_encode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}

/// Split a `url,{...}` option payload off a rendered URL. The JSON object
/// may carry `method`, `body`, and `headers`; an unparseable payload leaves
/// the URL untouched.
fn split_url_options(url: &str) -> (String, FetchMethod, Option<String>, HashMap<String, String>) {
    if let Some(idx) = url.find(",{") {
        let (clean, rest) = url.split_at(idx);
        let payload = &rest[1..];
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(payload) {
            let method = if value
                .get("method")
                .and_then(|m| m.as_str())
                .map_or(false, |m| m.eq_ignore_ascii_case("post"))
            {
                FetchMethod::Post
            } else {
                FetchMethod::Get
            };
            let body = value.get("body").and_then(|b| b.as_str()).map(String::from);
            let headers = value
                .get("headers")
                .and_then(|h| serde_json::from_value::<HashMap<String, String>>(h.clone()).ok())
                .unwrap_or_default();
            return (clean.trim().to_string(), method, body, headers);
        }
    }
    (url.to_string(), FetchMethod::Get, None, HashMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy() {
        assert!(truthy("1"));
        assert!(truthy("true"));
        assert!(truthy("vip"));
        assert!(!truthy(""));
        assert!(!truthy("false"));
        assert!(!truthy("0"));
    }

    #[test]
    fn test_url_encode() {
        assert_eq!(url_encode("hello world"), "hello+world");
        assert_eq!(url_encode("a&b"), "a%26b");
    }

    #[test]
    fn test_split_url_options_plain() {
        let (url, method, body, headers) = split_url_options("https://example.com/s?q=x");
        assert_eq!(url, "https://example.com/s?q=x");
        assert_eq!(method, FetchMethod::Get);
        assert!(body.is_none());
        assert!(headers.is_empty());
    }

    #[test]
    fn test_split_url_options_post_payload() {
        let (url, method, body, headers) = split_url_options(
            r#"https://example.com/search,{"method":"POST","body":"q=x","headers":{"X-T":"1"}}"#,
        );
        assert_eq!(url, "https://example.com/search");
        assert_eq!(method, FetchMethod::Post);
        assert_eq!(body.as_deref(), Some("q=x"));
        assert_eq!(headers.get("X-T").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_split_url_options_bad_payload_left_alone() {
        let raw = "https://example.com/search,{not json";
        let (url, method, _, _) = split_url_options(raw);
        assert_eq!(url, raw);
        assert_eq!(method, FetchMethod::Get);
    }

    #[test]
    fn test_render_url_template() {
        let source = Arc::new(BookSource {
            url: "https://example.com".to_string(),
            ..Default::default()
        });
        let executor = Executor::new(source, Options::default());
        let rendered = executor.render_url_template(
            "https://example.com/s?q={{key}}&p={{page}}&o={{(page - 1) * 20}}",
            "rust lang",
            3,
        );
        assert_eq!(rendered, "https://example.com/s?q=rust+lang&p=3&o=40");
    }
}
