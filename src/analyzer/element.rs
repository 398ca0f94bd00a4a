// ABOUTME: Opaque Element handles to matched nodes/values, reusable for chained extraction.
// ABOUTME: HTML nodes carry an Rc'd document plus NodeId so handles outlive the selection borrow.

use std::rc::Rc;

use ego_tree::NodeId;
use scraper::{ElementRef, Html};

/// An opaque handle to a matched node/value within a backend's native tree.
///
/// Handles are only meaningful to the analyzer that produced them; they hold
/// enough context (a shared document, a JSON value, a capture row) to re-root
/// further rule evaluation without re-parsing the page.
#[derive(Debug, Clone)]
pub enum Element {
    /// An HTML element inside a shared parsed document.
    Node(HtmlHandle),
    /// A JSON value produced by a JSONPath selection.
    Json(serde_json::Value),
    /// One regex match: capture groups, group 0 being the whole match.
    Match(Vec<String>),
    /// An opaque string fragment (script output), re-parsed on demand.
    Fragment(String),
}

/// Owning handle to one element of a parsed HTML document.
///
/// `scraper`'s `ElementRef` borrows the document, so the handle stores the
/// `Rc`'d document plus the node's `ego_tree::NodeId` and re-wraps on access.
#[derive(Debug, Clone)]
pub struct HtmlHandle {
    pub doc: Rc<Html>,
    pub id: NodeId,
}

impl HtmlHandle {
    pub fn new(doc: Rc<Html>, id: NodeId) -> Self {
        Self { doc, id }
    }

    /// Re-wrap the stored node id as an `ElementRef`. Returns `None` if the
    /// id does not name an element node (cannot happen for handles produced
    /// by the backends, which only collect element nodes).
    pub fn element(&self) -> Option<ElementRef<'_>> {
        self.doc.tree.get(self.id).and_then(ElementRef::wrap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_survives_selection_scope() {
        let doc = Rc::new(Html::parse_document(
            "<div class=\"a\"><span>hi</span></div>",
        ));
        let id = {
            let sel = scraper::Selector::parse("div.a").unwrap();
            doc.select(&sel).next().unwrap().id()
        };
        let handle = HtmlHandle::new(Rc::clone(&doc), id);
        let el = handle.element().expect("element resolves");
        assert_eq!(el.value().name(), "div");
        assert_eq!(el.text().collect::<String>(), "hi");
    }
}
