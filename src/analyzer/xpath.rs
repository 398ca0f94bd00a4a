// ABOUTME: XPath backend: a supported XPath subset translated to CSS selectors over the HTML tree.
// ABOUTME: Handles path steps, [n] indices, attribute predicates, contains(), position(), /text() and /@attr.

use std::rc::Rc;

use ego_tree::NodeId;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html};
use tracing::debug;

use crate::analyzer::compiled;
use crate::analyzer::extract::{self, Directive};

/// Supported XPath patterns:
/// - `//div` → `div`
/// - `//div[1]` → `div:nth-of-type(1)`
/// - `//div[@class='x']` → `div.x`
/// - `//div[@id='x']` → `div#x`
/// - `//div[contains(@class, 'x')]` → `div[class*="x"]`
/// - `//div/a` → `div > a`, `//div//a` → `div a`
/// - `//*[@id='x']` → `#x`
/// - `[position() > n]` → post-selection skip
/// - trailing `/text()` and `/@attr` become extraction directives
#[derive(Debug, Clone)]
struct Converted {
    selector: String,
    /// `position() > n` cannot be expressed in CSS; skip the first n matches.
    skip: Option<usize>,
    directive: Directive,
}

static RE_POSITION_INDEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").unwrap());

static RE_CLASS_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\[@class=['"]([^'"]+)['"]\]"#).unwrap());

static RE_ID_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\[@id=['"]([^'"]+)['"]\]"#).unwrap());

static RE_CONTAINS_CLASS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\[contains\s*\(\s*@class\s*,\s*['"]([^'"]+)['"]\s*\)\]"#).unwrap());

static RE_POSITION_GT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[position\s*\(\s*\)\s*>\s*(\d+)\]").unwrap());

static RE_GENERIC_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\[@([a-zA-Z_][a-zA-Z0-9_-]*)=['"]([^'"]+)['"]\]"#).unwrap());

static RE_TRAILING_ATTR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"/@([a-zA-Z_][a-zA-Z0-9_:-]*)$").unwrap());

/// Parse an XPath rule body and extract strings from the scope element.
pub fn parse(doc: &Rc<Html>, scope: NodeId, expr: &str, base_url: &str) -> Vec<String> {
    let Some(converted) = convert(expr) else {
        debug!(expr, "unsupported XPath expression");
        return vec![];
    };
    select(doc, scope, &converted)
        .into_iter()
        .filter_map(|id| doc.tree.get(id).and_then(ElementRef::wrap))
        .filter_map(|el| extract::apply(el, &converted.directive, base_url))
        .collect()
}

/// Matched element ids for an XPath rule body.
pub fn elements(doc: &Rc<Html>, scope: NodeId, expr: &str) -> Vec<NodeId> {
    let Some(converted) = convert(expr) else {
        debug!(expr, "unsupported XPath expression");
        return vec![];
    };
    select(doc, scope, &converted)
}

fn select(doc: &Rc<Html>, scope: NodeId, converted: &Converted) -> Vec<NodeId> {
    let Some(selector) = compiled::get_or_compile(&converted.selector) else {
        debug!(selector = %converted.selector, "translated selector failed to compile");
        return vec![];
    };
    let Some(el) = doc.tree.get(scope).and_then(ElementRef::wrap) else {
        return vec![];
    };
    el.select(&selector)
        .skip(converted.skip.unwrap_or(0))
        .map(|found| found.id())
        .collect()
}

fn convert(expr: &str) -> Option<Converted> {
    let mut xpath = expr.trim().to_string();
    if xpath.is_empty() {
        return None;
    }

    // Trailing extraction: /@attr or /text()
    let mut directive = Directive::Text;
    if let Some(caps) = RE_TRAILING_ATTR.captures(&xpath) {
        directive = extract::parse_directive(&caps[1]);
        let cut = caps.get(0).unwrap().start();
        xpath.truncate(cut);
    } else if xpath.ends_with("/text()") {
        xpath.truncate(xpath.len() - 7);
    }

    // Strip the leading axis marker.
    for prefix in [".//", "//", "./", "/"] {
        if let Some(rest) = xpath.strip_prefix(prefix) {
            xpath = rest.to_string();
            break;
        }
    }

    // position() > n needs post-selection filtering.
    let mut skip = None;
    if let Some(caps) = RE_POSITION_GT.captures(&xpath) {
        skip = caps.get(1).and_then(|m| m.as_str().parse::<usize>().ok());
        xpath = RE_POSITION_GT.replace_all(&xpath, "").to_string();
    }

    let segments = split_segments(&xpath);
    if segments.is_empty() {
        return None;
    }
    let mut selector = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let css = convert_segment(segment);
        if css.is_empty() {
            return None;
        }
        if i > 0 {
            // `/` is the child axis, `//` the descendant axis.
            selector.push_str(if segment.is_descendant { " " } else { " > " });
        }
        selector.push_str(&css);
    }

    Some(Converted {
        selector,
        skip,
        directive,
    })
}

#[derive(Debug)]
struct PathSegment {
    element: String,
    /// true when reached via `//` (descendant), false via `/` (child).
    is_descendant: bool,
}

fn split_segments(xpath: &str) -> Vec<PathSegment> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = xpath.chars().peekable();
    let mut is_descendant = false;

    while let Some(c) = chars.next() {
        if c == '/' {
            if !current.is_empty() {
                segments.push(PathSegment {
                    element: current.clone(),
                    is_descendant,
                });
                current.clear();
            }
            is_descendant = chars.peek() == Some(&'/');
            if is_descendant {
                chars.next();
            }
        } else {
            current.push(c);
        }
    }

    if !current.is_empty() {
        segments.push(PathSegment {
            element: current,
            is_descendant,
        });
    }

    segments
}

fn convert_segment(segment: &PathSegment) -> String {
    let mut element = segment.element.clone();

    // Wildcard: the predicates alone carry the selection.
    if element == "*" || element.starts_with("*[") {
        element = element.replacen('*', "", 1);
    }

    let element = RE_CLASS_ATTR
        .replace_all(&element, |caps: &regex::Captures| {
            // Space-separated class lists become .class1.class2
            caps[1]
                .split_whitespace()
                .map(|c| format!(".{}", c))
                .collect::<String>()
        })
        .to_string();

    let element = RE_ID_ATTR
        .replace_all(&element, |caps: &regex::Captures| format!("#{}", &caps[1]))
        .to_string();

    let element = RE_CONTAINS_CLASS
        .replace_all(&element, |caps: &regex::Captures| {
            format!("[class*=\"{}\"]", &caps[1])
        })
        .to_string();

    let element = RE_GENERIC_ATTR
        .replace_all(&element, |caps: &regex::Captures| {
            format!("[{}=\"{}\"]", &caps[1], &caps[2])
        })
        .to_string();

    RE_POSITION_INDEX
        .replace_all(&element, |caps: &regex::Captures| {
            format!(":nth-of-type({})", &caps[1])
        })
        .trim()
        .to_string()
}
