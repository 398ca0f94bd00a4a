// ABOUTME: CSS backend: @css:<selector>[@<contentType>] evaluated against a document or element scope.
// ABOUTME: Content extraction and URL resolution mirror the default chain's directive handling.

use std::rc::Rc;

use ego_tree::NodeId;
use scraper::{ElementRef, Html};
use tracing::debug;

use crate::analyzer::compiled;
use crate::analyzer::extract::{self, Directive};

/// Parse a CSS rule body (the text after `@css:`) and extract strings.
pub fn parse(doc: &Rc<Html>, scope: NodeId, body: &str, base_url: &str) -> Vec<String> {
    let (selector, directive) = split_selector_directive(body);
    select(doc, scope, selector)
        .into_iter()
        .filter_map(|id| wrap(doc, id))
        .filter_map(|el| extract::apply(el, &directive, base_url))
        .collect()
}

/// Matched element ids for a CSS rule body; a trailing directive is dropped.
pub fn elements(doc: &Rc<Html>, scope: NodeId, body: &str) -> Vec<NodeId> {
    let (selector, _) = split_selector_directive(body);
    select(doc, scope, selector)
}

fn wrap(doc: &Rc<Html>, id: NodeId) -> Option<ElementRef<'_>> {
    doc.tree.get(id).and_then(ElementRef::wrap)
}

fn select(doc: &Rc<Html>, scope: NodeId, selector: &str) -> Vec<NodeId> {
    let selector = selector.trim();
    if selector.is_empty() {
        return vec![];
    }
    let Some(compiled) = compiled::get_or_compile(selector) else {
        debug!(selector, "invalid CSS selector");
        return vec![];
    };
    let Some(el) = wrap(doc, scope) else {
        return vec![];
    };
    el.select(&compiled).map(|found| found.id()).collect()
}

/// Split `selector@contentType` at the last `@`. The suffix is a directive
/// only when it looks like a bare token (letters, digits, `-`, `_`);
/// anything else is part of the selector and the directive defaults to text.
fn split_selector_directive(body: &str) -> (&str, Directive) {
    if let Some(idx) = body.rfind('@') {
        let candidate = &body[idx + 1..];
        if !candidate.is_empty()
            && candidate
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return (&body[..idx], extract::parse_directive(candidate));
        }
    }
    (body, Directive::Text)
}
