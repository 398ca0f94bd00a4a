// ABOUTME: Default-chain backend: @-joined segments like class.author@tag.a@href.
// ABOUTME: Selector types class/id/tag/text/children with positions, exclusions, and a trailing directive.

use std::collections::HashSet;
use std::rc::Rc;

use ego_tree::NodeId;
use scraper::{ElementRef, Html};
use tracing::debug;

use crate::analyzer::compiled;
use crate::analyzer::extract::{self, Directive};

/// One selection step of a chain rule.
#[derive(Debug, Clone)]
enum SelectorStep {
    /// `class.name`: elements carrying the class.
    Class(String),
    /// `id.name`: elements with the id.
    Id(String),
    /// `tag.name`: elements by tag name.
    Tag(String),
    /// `text.needle`: elements whose own text contains the needle.
    TextContains(String),
    /// `children`: direct child elements.
    Children,
}

#[derive(Debug, Clone)]
struct SegmentSpec {
    step: SelectorStep,
    /// Trailing numeric position selecting a single match; negative counts
    /// from the end.
    position: Option<i64>,
    /// `!p1:p2` positions excluded from the match list.
    excludes: Vec<i64>,
}

#[derive(Debug, Clone)]
struct ChainRule {
    reverse: bool,
    segments: Vec<SegmentSpec>,
    directive: Directive,
}

/// Parse a chain rule and extract strings from the scope element.
pub fn parse(doc: &Rc<Html>, scope: NodeId, rule: &str, base_url: &str) -> Vec<String> {
    let Some(chain) = parse_rule_syntax(rule) else {
        debug!(rule, "malformed chain rule");
        return vec![];
    };
    let mut nodes = run_segments(doc, scope, &chain.segments);
    if chain.reverse {
        nodes.reverse();
    }
    nodes
        .into_iter()
        .filter_map(|id| wrap(doc, id))
        .filter_map(|el| extract::apply(el, &chain.directive, base_url))
        .collect()
}

/// Parse a chain rule and return the matched element ids (directive, if
/// any, is ignored: element context stops at the last selector segment).
pub fn elements(doc: &Rc<Html>, scope: NodeId, rule: &str) -> Vec<NodeId> {
    let Some(chain) = parse_rule_syntax(rule) else {
        debug!(rule, "malformed chain rule");
        return vec![];
    };
    let mut nodes = run_segments(doc, scope, &chain.segments);
    if chain.reverse {
        nodes.reverse();
    }
    nodes
}

fn wrap(doc: &Rc<Html>, id: NodeId) -> Option<ElementRef<'_>> {
    doc.tree.get(id).and_then(ElementRef::wrap)
}

fn run_segments(doc: &Rc<Html>, scope: NodeId, segments: &[SegmentSpec]) -> Vec<NodeId> {
    let mut current = vec![scope];
    for spec in segments {
        let mut matched: Vec<NodeId> = Vec::new();
        for &id in &current {
            let Some(el) = wrap(doc, id) else { continue };
            match &spec.step {
                SelectorStep::Class(name) => {
                    select_css(el, &format!("[class~=\"{}\"]", name), &mut matched)
                }
                SelectorStep::Id(name) => {
                    select_css(el, &format!("[id=\"{}\"]", name), &mut matched)
                }
                SelectorStep::Tag(name) => select_css(el, name, &mut matched),
                SelectorStep::TextContains(needle) => {
                    for node in el.descendants().skip(1) {
                        if let Some(child) = ElementRef::wrap(node) {
                            if own_text(child).contains(needle.as_str()) {
                                matched.push(child.id());
                            }
                        }
                    }
                }
                SelectorStep::Children => {
                    for node in el.children() {
                        if let Some(child) = ElementRef::wrap(node) {
                            matched.push(child.id());
                        }
                    }
                }
            }
        }
        current = apply_positions(matched, spec);
        if current.is_empty() {
            return vec![];
        }
    }
    current
}

fn select_css(el: ElementRef<'_>, css: &str, out: &mut Vec<NodeId>) {
    let Some(selector) = compiled::get_or_compile(css) else {
        return;
    };
    for found in el.select(&selector) {
        out.push(found.id());
    }
}

fn own_text(el: ElementRef<'_>) -> String {
    el.children()
        .filter_map(|node| node.value().as_text())
        .map(|t| t.to_string())
        .collect()
}

fn apply_positions(items: Vec<NodeId>, spec: &SegmentSpec) -> Vec<NodeId> {
    let n = items.len() as i64;
    if let Some(pos) = spec.position {
        let idx = if pos < 0 { n + pos } else { pos };
        if idx >= 0 && idx < n {
            return vec![items[idx as usize]];
        }
        return vec![];
    }
    if spec.excludes.is_empty() {
        return items;
    }
    let excluded: HashSet<usize> = spec
        .excludes
        .iter()
        .filter_map(|&e| {
            let idx = if e < 0 { n + e } else { e };
            if idx >= 0 && idx < n {
                Some(idx as usize)
            } else {
                None
            }
        })
        .collect();
    items
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !excluded.contains(i))
        .map(|(_, id)| id)
        .collect()
}

fn parse_rule_syntax(rule: &str) -> Option<ChainRule> {
    let rule = rule.trim();
    let (reverse, rule) = match rule.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, rule),
    };
    if rule.is_empty() {
        return None;
    }

    let parts: Vec<&str> = rule.split('@').map(str::trim).collect();
    let last = parts.len() - 1;
    let mut segments = Vec::new();
    let mut directive = Directive::Text;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            return None;
        }
        if is_selector_segment(part) {
            segments.push(parse_segment(part)?);
        } else if i == last {
            directive = extract::parse_directive(part);
        } else {
            // A non-selector token anywhere but the tail is malformed.
            return None;
        }
    }

    Some(ChainRule {
        reverse,
        segments,
        directive,
    })
}

fn is_selector_segment(part: &str) -> bool {
    if part == "children" || part.starts_with("children.") || part.starts_with("children!") {
        return true;
    }
    ["class.", "id.", "tag.", "text."]
        .iter()
        .any(|p| part.len() > p.len() && part.starts_with(p))
}

fn parse_segment(part: &str) -> Option<SegmentSpec> {
    let (main, excl) = match part.split_once('!') {
        Some((m, e)) => (m, Some(e)),
        None => (part, None),
    };

    let excludes = excl
        .map(|e| {
            e.split(':')
                .filter_map(|p| p.trim().parse::<i64>().ok())
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if main == "children" {
        return Some(SegmentSpec {
            step: SelectorStep::Children,
            position: None,
            excludes,
        });
    }
    if let Some(rest) = main.strip_prefix("children.") {
        return Some(SegmentSpec {
            step: SelectorStep::Children,
            position: rest.trim().parse::<i64>().ok(),
            excludes,
        });
    }

    let (sel_type, rest) = main.split_once('.')?;
    if rest.is_empty() {
        return None;
    }
    // A trailing numeric piece is a position, the rest is the name; names
    // themselves may contain dots.
    let (name, position) = match rest.rsplit_once('.') {
        Some((left, right)) => match right.trim().parse::<i64>() {
            Ok(pos) if !left.is_empty() => (left, Some(pos)),
            _ => (rest, None),
        },
        None => (rest, None),
    };

    let step = match sel_type {
        "class" => SelectorStep::Class(name.to_string()),
        "id" => SelectorStep::Id(name.to_string()),
        "tag" => SelectorStep::Tag(name.to_string()),
        "text" => SelectorStep::TextContains(name.to_string()),
        _ => return None,
    };

    Some(SegmentSpec {
        step,
        position,
        excludes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        <html><body>
            <div class="author">Author A</div>
            <div class="author">Author B</div>
            <div id="list">
                <ul class="chapters">
                    <li><a href="/c/1">One</a></li>
                    <li><a href="/c/2">Two</a></li>
                    <li><a href="/c/3">Three</a></li>
                </ul>
            </div>
            <div class="mixed">lead<span>inner</span>tail</div>
            <p class="hint">Latest: Chapter 3</p>
        </body></html>
    "#;

    fn doc() -> Rc<Html> {
        Rc::new(Html::parse_document(SAMPLE))
    }

    fn root(doc: &Rc<Html>) -> NodeId {
        doc.root_element().id()
    }

    #[test]
    fn test_class_with_text_directive() {
        let doc = doc();
        let out = parse(&doc, root(&doc), "class.author@text", "");
        assert_eq!(out, vec!["Author A", "Author B"]);
    }

    #[test]
    fn test_chain_through_tag_to_href() {
        let doc = doc();
        let out = parse(
            &doc,
            root(&doc),
            "class.chapters@tag.a@href",
            "https://example.com/book/",
        );
        assert_eq!(
            out,
            vec![
                "https://example.com/c/1",
                "https://example.com/c/2",
                "https://example.com/c/3"
            ]
        );
    }

    #[test]
    fn test_position_selects_single_match() {
        let doc = doc();
        let out = parse(&doc, root(&doc), "tag.li.1@text", "");
        assert_eq!(out, vec!["Two"]);
    }

    #[test]
    fn test_negative_position_counts_from_end() {
        let doc = doc();
        let out = parse(&doc, root(&doc), "tag.li.-1@text", "");
        assert_eq!(out, vec!["Three"]);
    }

    #[test]
    fn test_exclusions() {
        let doc = doc();
        let out = parse(&doc, root(&doc), "tag.li!0:-1@text", "");
        assert_eq!(out, vec!["Two"]);
    }

    #[test]
    fn test_reverse_prefix() {
        let doc = doc();
        let out = parse(&doc, root(&doc), "-class.author@text", "");
        assert_eq!(out, vec!["Author B", "Author A"]);
    }

    #[test]
    fn test_default_directive_is_text() {
        let doc = doc();
        let out = parse(&doc, root(&doc), "class.author", "");
        assert_eq!(out, vec!["Author A", "Author B"]);
    }

    #[test]
    fn test_children_step() {
        let doc = doc();
        let out = parse(&doc, root(&doc), "class.chapters@children@text", "");
        assert_eq!(out, vec!["One", "Two", "Three"]);
    }

    #[test]
    fn test_text_contains_step() {
        let doc = doc();
        let out = parse(&doc, root(&doc), "text.Latest@text", "");
        assert_eq!(out, vec!["Latest: Chapter 3"]);
    }

    #[test]
    fn test_own_text_directive() {
        let doc = doc();
        let out = parse(&doc, root(&doc), "class.mixed@ownText", "");
        assert_eq!(out, vec!["leadtail"]);
    }

    #[test]
    fn test_id_step() {
        let doc = doc();
        let out = parse(&doc, root(&doc), "id.list@tag.a.0@text", "");
        assert_eq!(out, vec!["One"]);
    }

    #[test]
    fn test_no_match_yields_empty() {
        let doc = doc();
        assert!(parse(&doc, root(&doc), "class.missing@text", "").is_empty());
    }

    #[test]
    fn test_malformed_rule_yields_empty() {
        let doc = doc();
        assert!(parse(&doc, root(&doc), "bogus@class.author@text", "").is_empty());
    }

    #[test]
    fn test_elements_ignores_trailing_directive() {
        let doc = doc();
        let with = elements(&doc, root(&doc), "class.chapters@tag.a@href");
        let without = elements(&doc, root(&doc), "class.chapters@tag.a");
        assert_eq!(with.len(), 3);
        assert_eq!(with, without);
    }

    #[test]
    fn test_parse_is_pure() {
        let doc = doc();
        let a = parse(&doc, root(&doc), "class.author@text", "");
        let b = parse(&doc, root(&doc), "class.author@text", "");
        assert_eq!(a, b);
    }
}
