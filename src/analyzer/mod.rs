// ABOUTME: RuleAnalyzer façade: classifier → combinator → backend dispatch with multi-step pipelines.
// ABOUTME: Rule failures at every layer degrade to empty results; nothing here returns an error.

pub mod allinone;
pub mod chain;
pub mod compiled;
pub mod css;
pub mod element;
pub mod extract;
pub mod json;
pub mod rule;
pub mod xpath;

use std::cell::RefCell;
use std::rc::Rc;

use scraper::Html;
use tracing::debug;

use crate::script::{RuleEvaluator, Sandbox};

pub use element::{Element, HtmlHandle};
pub use rule::{RuleCombinator, RuleType};

use rule::ParsedRule;

/// Per-page rule analyzer. Holds the fetched content, its base URL, a
/// lazily parsed HTML tree, and optionally a bound script sandbox. Scoped
/// to one page; construct a fresh one per fetch.
pub struct RuleAnalyzer {
    content: String,
    base_url: String,
    doc: RefCell<Option<Rc<Html>>>,
    sandbox: Option<Rc<Sandbox>>,
}

impl RuleAnalyzer {
    pub fn new(content: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            base_url: base_url.into(),
            doc: RefCell::new(None),
            sandbox: None,
        }
    }

    pub fn with_sandbox(
        content: impl Into<String>,
        base_url: impl Into<String>,
        sandbox: Rc<Sandbox>,
    ) -> Self {
        Self {
            content: content.into(),
            base_url: base_url.into(),
            doc: RefCell::new(None),
            sandbox: Some(sandbox),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Parse a rule against the bound content, returning ordered strings.
    pub fn parse_rule(&self, rule: &str) -> Vec<String> {
        let rule = rule.trim();
        if rule.is_empty() || is_unsupported(rule) {
            return vec![];
        }

        let (parts, combinator) = rule::split_combined(rule);
        if parts.len() >= 2 {
            return merge(combinator, &parts, |part| {
                self.parse_single(&self.content, part)
            });
        }

        if rule.contains('\n') {
            return self.parse_pipeline(rule);
        }

        self.parse_single(&self.content, rule)
    }

    /// Multi-step pipeline: each step's first result becomes the next
    /// step's content; the last step's full list is the answer. Any step
    /// yielding nothing aborts the whole pipeline.
    fn parse_pipeline(&self, rule: &str) -> Vec<String> {
        let steps: Vec<&str> = rule.lines().map(str::trim).filter(|s| !s.is_empty()).collect();
        let Some((&last, init)) = steps.split_last() else {
            return vec![];
        };
        let mut current = self.content.clone();
        for step in init {
            let results = self.parse_single(&current, step);
            let Some(first) = results.into_iter().next() else {
                return vec![];
            };
            current = first;
        }
        self.parse_single(&current, last)
    }

    /// Single-rule path: suffix strip → classify → backend → suffix apply.
    fn parse_single(&self, content: &str, raw: &str) -> Vec<String> {
        let parsed = ParsedRule::parse(raw);
        let rule_type = rule::classify(&parsed.body);
        let extracted = match rule_type {
            RuleType::Default => {
                let doc = self.doc_for(content);
                let root = doc.root_element().id();
                chain::parse(&doc, root, &parsed.body, &self.base_url)
            }
            RuleType::Css => {
                let doc = self.doc_for(content);
                let root = doc.root_element().id();
                css::parse(
                    &doc,
                    root,
                    rule::strip_prefix(&parsed.body, rule_type),
                    &self.base_url,
                )
            }
            RuleType::XPath => {
                let doc = self.doc_for(content);
                let root = doc.root_element().id();
                xpath::parse(
                    &doc,
                    root,
                    rule::strip_prefix(&parsed.body, rule_type),
                    &self.base_url,
                )
            }
            RuleType::JsonPath => {
                json::parse_str(content, rule::strip_prefix(&parsed.body, rule_type))
            }
            RuleType::Regex => {
                allinone::parse(content, rule::strip_prefix(&parsed.body, rule_type))
            }
            RuleType::Script => self.eval_script(content, &parsed.body),
        };
        parsed.apply_replacement(extracted)
    }

    /// Element handles for list/chaining contexts. Mirrors `parse_rule`'s
    /// step-wise logic but stops at the last selector segment.
    pub fn get_elements(&self, rule: &str) -> Vec<Element> {
        let rule = rule.trim();
        if rule.is_empty() || is_unsupported(rule) {
            return vec![];
        }

        let (parts, combinator) = rule::split_combined(rule);
        if parts.len() >= 2 {
            return merge(combinator, &parts, |part| {
                self.elements_single(&self.content, part)
            });
        }

        if rule.contains('\n') {
            let steps: Vec<&str> =
                rule.lines().map(str::trim).filter(|s| !s.is_empty()).collect();
            let Some((&last, init)) = steps.split_last() else {
                return vec![];
            };
            let mut current = self.content.clone();
            for step in init {
                let results = self.parse_single(&current, step);
                let Some(first) = results.into_iter().next() else {
                    return vec![];
                };
                current = first;
            }
            return self.elements_single(&current, last);
        }

        self.elements_single(&self.content, rule)
    }

    fn elements_single(&self, content: &str, raw: &str) -> Vec<Element> {
        let parsed = ParsedRule::parse(raw);
        let rule_type = rule::classify(&parsed.body);
        match rule_type {
            RuleType::Default => {
                let doc = self.doc_for(content);
                let root = doc.root_element().id();
                chain::elements(&doc, root, &parsed.body)
                    .into_iter()
                    .map(|id| Element::Node(HtmlHandle::new(Rc::clone(&doc), id)))
                    .collect()
            }
            RuleType::Css => {
                let doc = self.doc_for(content);
                let root = doc.root_element().id();
                css::elements(&doc, root, rule::strip_prefix(&parsed.body, rule_type))
                    .into_iter()
                    .map(|id| Element::Node(HtmlHandle::new(Rc::clone(&doc), id)))
                    .collect()
            }
            RuleType::XPath => {
                let doc = self.doc_for(content);
                let root = doc.root_element().id();
                xpath::elements(&doc, root, rule::strip_prefix(&parsed.body, rule_type))
                    .into_iter()
                    .map(|id| Element::Node(HtmlHandle::new(Rc::clone(&doc), id)))
                    .collect()
            }
            RuleType::JsonPath => {
                json::elements_str(content, rule::strip_prefix(&parsed.body, rule_type))
                    .into_iter()
                    .map(Element::Json)
                    .collect()
            }
            RuleType::Regex => {
                allinone::rows(content, rule::strip_prefix(&parsed.body, rule_type))
                    .into_iter()
                    .map(Element::Match)
                    .collect()
            }
            RuleType::Script => self
                .eval_script(content, &parsed.body)
                .into_iter()
                .map(Element::Fragment)
                .collect(),
        }
    }

    /// Re-run the single-rule path rooted at a specific element, for
    /// extracting multiple fields per list item.
    pub fn parse_from_element(&self, element: &Element, rule: &str) -> Vec<String> {
        let rule = rule.trim();
        if rule.is_empty() || is_unsupported(rule) {
            return vec![];
        }
        let (parts, combinator) = rule::split_combined(rule);
        if parts.len() >= 2 {
            return merge(combinator, &parts, |part| {
                self.parse_element_single(element, part)
            });
        }
        self.parse_element_single(element, rule)
    }

    fn parse_element_single(&self, element: &Element, raw: &str) -> Vec<String> {
        let parsed = ParsedRule::parse(raw);
        let rule_type = rule::classify(&parsed.body);
        match element {
            Element::Node(handle) => {
                let extracted = match rule_type {
                    RuleType::Default => {
                        chain::parse(&handle.doc, handle.id, &parsed.body, &self.base_url)
                    }
                    RuleType::Css => css::parse(
                        &handle.doc,
                        handle.id,
                        rule::strip_prefix(&parsed.body, rule_type),
                        &self.base_url,
                    ),
                    RuleType::XPath => xpath::parse(
                        &handle.doc,
                        handle.id,
                        rule::strip_prefix(&parsed.body, rule_type),
                        &self.base_url,
                    ),
                    // Non-tree dialects run over the element's markup.
                    _ => {
                        let markup = handle
                            .element()
                            .map(|el| el.html())
                            .unwrap_or_default();
                        return self.parse_single(&markup, raw);
                    }
                };
                parsed.apply_replacement(extracted)
            }
            Element::Json(value) => match rule_type {
                RuleType::JsonPath => {
                    let extracted =
                        json::parse_value(value, rule::strip_prefix(&parsed.body, rule_type));
                    parsed.apply_replacement(extracted)
                }
                _ => self.parse_single(&json::value_to_string(value), raw),
            },
            Element::Match(row) => {
                if allinone::is_group_ref(&parsed.body) {
                    let extracted = allinone::project(row, &parsed.body)
                        .map_or_else(Vec::new, |s| vec![s]);
                    parsed.apply_replacement(extracted)
                } else {
                    let content = row.first().cloned().unwrap_or_default();
                    self.parse_single(&content, raw)
                }
            }
            Element::Fragment(text) => self.parse_single(text, raw),
        }
    }

    fn eval_script(&self, content: &str, body: &str) -> Vec<String> {
        match &self.sandbox {
            Some(sandbox) => sandbox.run_rule(body, content, &self.base_url),
            None => {
                debug!("script rule without a bound sandbox");
                vec![]
            }
        }
    }

    /// Parse the content as HTML once and reuse the tree for every rule
    /// against the analyzer's own content; pipeline steps over derived
    /// content parse fresh.
    fn doc_for(&self, content: &str) -> Rc<Html> {
        let is_root =
            content.as_ptr() == self.content.as_ptr() && content.len() == self.content.len();
        if !is_root {
            return Rc::new(Html::parse_document(content));
        }
        let mut cached = self.doc.borrow_mut();
        if let Some(doc) = cached.as_ref() {
            return Rc::clone(doc);
        }
        let doc = Rc::new(Html::parse_document(content));
        *cached = Some(Rc::clone(&doc));
        doc
    }
}

/// Evaluator capability injected into the sandbox: evaluates non-script
/// dialects only, so scripts cannot recurse into the interpreter.
pub struct PlainEvaluator;

impl RuleEvaluator for PlainEvaluator {
    fn eval_rule(&self, content: &str, base_url: &str, rule: &str) -> Vec<String> {
        RuleAnalyzer::new(content, base_url).parse_rule(rule)
    }
}

/// JSOUP-native markers not implemented by this engine; documented
/// limitation, not a crash.
fn is_unsupported(rule: &str) -> bool {
    rule.starts_with("@CSS:") || rule.starts_with("@JSon:")
}

fn merge<T, F>(combinator: RuleCombinator, parts: &[&str], mut eval: F) -> Vec<T>
where
    F: FnMut(&str) -> Vec<T>,
{
    match combinator {
        RuleCombinator::None | RuleCombinator::And => {
            let mut out = Vec::new();
            for part in parts {
                out.extend(eval(part));
            }
            out
        }
        RuleCombinator::Or => {
            for part in parts {
                let results = eval(part);
                if !results.is_empty() {
                    return results;
                }
            }
            vec![]
        }
        RuleCombinator::Percent => {
            let columns: Vec<Vec<T>> = parts.iter().map(|p| eval(p)).collect();
            let rounds = columns.iter().map(Vec::len).max().unwrap_or(0);
            let mut iters: Vec<_> = columns.into_iter().map(Vec::into_iter).collect();
            let mut out = Vec::new();
            for _ in 0..rounds {
                for iter in iters.iter_mut() {
                    if let Some(item) = iter.next() {
                        out.push(item);
                    }
                }
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const AUTHORS: &str =
        r#"<div class="author">Author A</div><div class="author">Author B</div>"#;

    #[test]
    fn test_default_chain_scenario() {
        let analyzer = RuleAnalyzer::new(AUTHORS, "");
        assert_eq!(
            analyzer.parse_rule("class.author@text"),
            vec!["Author A", "Author B"]
        );
    }

    #[test]
    fn test_css_with_regex_suffix_scenario() {
        let analyzer =
            RuleAnalyzer::new(r#"<div class="info">Author: John Doe</div>"#, "");
        assert_eq!(
            analyzer.parse_rule(r"@css:.info@text##Author:\s*##"),
            vec!["John Doe"]
        );
    }

    #[test]
    fn test_jsonpath_projection_scenario() {
        let analyzer = RuleAnalyzer::new(
            r#"{"data":{"books":[{"name":"A"},{"name":"B"}]}}"#,
            "",
        );
        assert_eq!(
            analyzer.parse_rule("$.data.books.#.name"),
            vec!["A", "B"]
        );
    }

    #[test]
    fn test_or_combinator_scenario() {
        let analyzer = RuleAnalyzer::new(AUTHORS, "");
        assert_eq!(
            analyzer.parse_rule("class.missing@text||class.author@text"),
            vec!["Author A", "Author B"]
        );
    }

    #[test]
    fn test_and_combinator_concatenates() {
        let analyzer = RuleAnalyzer::new(AUTHORS, "");
        let combined = analyzer.parse_rule("class.author@text&&class.author@text");
        let single = analyzer.parse_rule("class.author@text");
        let expected: Vec<String> =
            single.iter().chain(single.iter()).cloned().collect();
        assert_eq!(combined, expected);
    }

    #[test]
    fn test_percent_combinator_interleaves() {
        let html = r#"
            <div class="a">1</div><div class="a">2</div><div class="a">3</div>
            <div class="b">x</div>
        "#;
        let analyzer = RuleAnalyzer::new(html, "");
        assert_eq!(
            analyzer.parse_rule("class.a@text%%class.b@text"),
            vec!["1", "x", "2", "3"]
        );
    }

    #[test]
    fn test_or_short_circuits_on_first_non_empty() {
        let analyzer = RuleAnalyzer::new(AUTHORS, "");
        assert_eq!(
            analyzer.parse_rule("class.author@text||class.missing@text"),
            vec!["Author A", "Author B"]
        );
    }

    #[test]
    fn test_multi_step_pipeline() {
        let html = r#"<div id="wrap">{"data":{"books":[{"name":"A"}]}}</div>"#;
        let analyzer = RuleAnalyzer::new(html, "");
        assert_eq!(
            analyzer.parse_rule("id.wrap@text\n$.data.books.#.name"),
            vec!["A"]
        );
    }

    #[test]
    fn test_pipeline_aborts_when_step_is_empty() {
        let analyzer = RuleAnalyzer::new(AUTHORS, "");
        assert!(analyzer
            .parse_rule("class.missing@text\nclass.author@text")
            .is_empty());
    }

    #[test]
    fn test_unsupported_markers_return_empty() {
        let analyzer = RuleAnalyzer::new(AUTHORS, "");
        assert!(analyzer.parse_rule("@CSS:.author@text").is_empty());
        assert!(analyzer.parse_rule("@JSon:$.x").is_empty());
    }

    #[test]
    fn test_script_rule_without_sandbox_is_empty() {
        let analyzer = RuleAnalyzer::new(AUTHORS, "");
        assert!(analyzer.parse_rule("@js:1+1").is_empty());
    }

    #[test]
    fn test_parse_rule_is_pure() {
        let analyzer = RuleAnalyzer::new(AUTHORS, "");
        let a = analyzer.parse_rule("class.author@text");
        let b = analyzer.parse_rule("class.author@text");
        assert_eq!(a, b);
    }

    #[test]
    fn test_get_elements_and_field_extraction() {
        let html = r#"
            <ul>
                <li class="item"><a href="/b/1">One</a><span class="by">N1</span></li>
                <li class="item"><a href="/b/2">Two</a><span class="by">N2</span></li>
            </ul>
        "#;
        let analyzer = RuleAnalyzer::new(html, "https://example.com/s");
        let items = analyzer.get_elements("class.item");
        assert_eq!(items.len(), 2);
        assert_eq!(
            analyzer.parse_from_element(&items[0], "tag.a@text"),
            vec!["One"]
        );
        assert_eq!(
            analyzer.parse_from_element(&items[1], "tag.a@href"),
            vec!["https://example.com/b/2"]
        );
        assert_eq!(
            analyzer.parse_from_element(&items[1], "class.by@text"),
            vec!["N2"]
        );
    }

    #[test]
    fn test_json_elements_and_relative_rules() {
        let content = r#"{"books":[{"name":"A","url":"/b/1"},{"name":"B","url":"/b/2"}]}"#;
        let analyzer = RuleAnalyzer::new(content, "https://example.com/");
        let items = analyzer.get_elements("$.books[*]");
        assert_eq!(items.len(), 2);
        assert_eq!(analyzer.parse_from_element(&items[0], "$.name"), vec!["A"]);
        assert_eq!(analyzer.parse_from_element(&items[1], "$.url"), vec!["/b/2"]);
    }

    #[test]
    fn test_regex_elements_with_group_projection() {
        let content = r#"<a href="/b/1">Book One</a><a href="/b/2">Book Two</a>"#;
        let analyzer = RuleAnalyzer::new(content, "");
        let items = analyzer.get_elements(r#":<a href="([^"]+)">([^<]+)</a>"#);
        assert_eq!(items.len(), 2);
        assert_eq!(analyzer.parse_from_element(&items[0], "$1"), vec!["/b/1"]);
        assert_eq!(
            analyzer.parse_from_element(&items[1], "$2"),
            vec!["Book Two"]
        );
    }

    #[test]
    fn test_or_combinator_on_elements() {
        let html = r#"<ul><li class="real">x</li></ul>"#;
        let analyzer = RuleAnalyzer::new(html, "");
        let items = analyzer.get_elements("class.phantom||class.real");
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_xpath_rule_through_facade() {
        let html = r#"<ul class="toc"><li><a href="/c/1">One</a></li></ul>"#;
        let analyzer = RuleAnalyzer::new(html, "https://example.com/");
        assert_eq!(
            analyzer.parse_rule("@XPath://ul[@class='toc']//a/@href"),
            vec!["https://example.com/c/1"]
        );
        assert_eq!(
            analyzer.parse_rule("//ul[@class='toc']//a/text()"),
            vec!["One"]
        );
    }
}
