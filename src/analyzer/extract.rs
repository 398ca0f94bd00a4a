// ABOUTME: Content directives shared by the HTML backends: text/textNodes/ownText/html/all/attrs.
// ABOUTME: Attribute directives named href, src, or *-src get URL resolution applied.

use scraper::ElementRef;

use crate::urlutil;

/// What to pull out of a matched element. The directive is the trailing
/// token of a default-chain or CSS rule (`...@text`, `...@href`); any token
/// that is not one of the named forms reads that attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// All descendant text.
    Text,
    /// Direct text-node children joined by newline.
    TextNodes,
    /// Own text with child elements stripped.
    OwnText,
    /// Inner markup.
    Html,
    /// Outer markup.
    All,
    /// A named attribute.
    Attr(String),
}

pub fn parse_directive(token: &str) -> Directive {
    match token {
        "text" => Directive::Text,
        "textNodes" => Directive::TextNodes,
        "ownText" => Directive::OwnText,
        "html" => Directive::Html,
        "all" => Directive::All,
        other => Directive::Attr(other.to_string()),
    }
}

/// True for attribute names whose values are URLs and get resolved against
/// the page base: `href`, `src`, and any `*-src` lazy-load variant.
pub fn is_url_attr(name: &str) -> bool {
    name == "href" || name == "src" || name.ends_with("-src")
}

/// Apply a directive to one element. Empty extractions yield `None`.
pub fn apply(el: ElementRef<'_>, directive: &Directive, base_url: &str) -> Option<String> {
    let value = match directive {
        Directive::Text => el.text().collect::<String>().trim().to_string(),
        Directive::TextNodes => own_text_nodes(el).join("\n"),
        Directive::OwnText => own_text_nodes(el).concat().trim().to_string(),
        Directive::Html => el.inner_html(),
        Directive::All => el.html(),
        Directive::Attr(name) => {
            let raw = el.value().attr(name)?.trim().to_string();
            if is_url_attr(name) {
                urlutil::resolve(base_url, &raw)
            } else {
                raw
            }
        }
    };
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Direct text-node children of an element, trimmed, empties dropped.
fn own_text_nodes(el: ElementRef<'_>) -> Vec<String> {
    el.children()
        .filter_map(|node| node.value().as_text())
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}
