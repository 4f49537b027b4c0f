//! Token reconstruction.
//!
//! The parser cannot know at parse time whether an XML-ish tag is
//! balanced, so it emits flat sentinel nodes instead of nesting: a node
//! carrying `_parsestart` is an opening token, one carrying `_parseend` a
//! closing token. This pass rewrites the tree so every start node adopts
//! its following siblings up to the matching end node, which is removed.

use super::dom::{Document, NodeId};

/// Marks a node as an opening token.
pub(crate) const PARSE_START: &str = "_parsestart";
/// Marks a node as a closing token.
pub(crate) const PARSE_END: &str = "_parseend";
/// Reserved alongside the other two markers; nothing emits it, but the
/// sanitizer tolerates it the same way.
pub(crate) const PARSE_TOKEN: &str = "_parsetoken";

/// Tokens the pairing pass could not account for: closing tokens found
/// directly at the top level, with no start at any depth to terminate.
/// They are dropped from the tree; strict callers reject the document
/// when the count is non-zero.
///
/// Note that a closing token *inside* an element legitimately terminates
/// it early — that is how a run of sequential pairs reassembles — so only
/// the top level can prove a token unmatched.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Unbalanced {
    pub dropped_ends: usize,
}

/// Rewrites the subtree under `root`, pairing start and end tokens.
pub(crate) fn reconstruct(doc: &mut Document, root: NodeId) -> Unbalanced {
    let mut unbalanced = Unbalanced::default();
    let leftover = walk(doc, root, true, &mut unbalanced);
    debug_assert!(leftover.is_empty());
    unbalanced
}

/// When a closing token is found among the children of `n`, it is removed
/// and the siblings after it are detached and handed back to the caller,
/// which re-appends them under the parent of the enclosing start node. A
/// closing token found at the root has no start to terminate; it is
/// dropped and its trailing siblings keep their place.
fn walk(
    doc: &mut Document,
    n: NodeId,
    at_root: bool,
    unbalanced: &mut Unbalanced,
) -> Vec<NodeId> {
    let mut cursor = doc.first_child(n);
    while let Some(child) = cursor {
        if doc.has_attr(child, PARSE_START) {
            doc.remove_attr(child, PARSE_START);
            let remaining = doc.take_siblings_after(child);
            doc.append_children(child, remaining);
        } else if doc.has_attr(child, PARSE_END) {
            let remaining = doc.take_siblings_after(child);
            doc.detach(child);
            if at_root {
                unbalanced.dropped_ends += 1;
                let resume = remaining.first().copied();
                doc.append_children(n, remaining);
                cursor = resume;
                continue;
            }
            return remaining;
        }
        let leftover = walk(doc, child, false, unbalanced);
        doc.append_children(n, leftover);
        cursor = doc.next_sibling(child);
    }
    vec![]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a sentinel node.
    fn token(doc: &mut Document, name: &str, marker: &str) -> NodeId {
        let node = doc.create_element(name);
        doc.set_attr(node, marker, "");
        node
    }

    fn text(doc: &mut Document, s: &str) -> NodeId {
        doc.create_text(s)
    }

    fn balanced(doc: &mut Document) -> String {
        let root = doc.root();
        let unbalanced = reconstruct(doc, root);
        assert_eq!(unbalanced.dropped_ends, 0);
        doc.render_to_string(root)
    }

    #[test]
    fn test_empty_document() {
        let mut doc = Document::new();
        assert_eq!(balanced(&mut doc), "");
    }

    #[test]
    fn test_plain_nodes_untouched() {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.create_element("div");
        let t = text(&mut doc, "x");
        doc.append_child(div, t);
        doc.append_child(root, div);
        assert_eq!(balanced(&mut doc), "<div>x</div>");
    }

    #[test]
    fn test_nested_pairs() {
        let mut doc = Document::new();
        let root = doc.root();
        let nodes = [
            token(&mut doc, "div", PARSE_START),
            text(&mut doc, " "),
            token(&mut doc, "p", PARSE_START),
            text(&mut doc, " Foo "),
            token(&mut doc, "p", PARSE_END),
            text(&mut doc, " "),
            token(&mut doc, "div", PARSE_END),
        ];
        for node in nodes {
            doc.append_child(root, node);
        }
        assert_eq!(balanced(&mut doc), "<div> <p> Foo </p> </div>");
    }

    #[test]
    fn test_sequential_pairs() {
        let mut doc = Document::new();
        let root = doc.root();
        let nodes = [
            token(&mut doc, "div", PARSE_START),
            text(&mut doc, "Foo"),
            token(&mut doc, "div", PARSE_END),
            text(&mut doc, " asdf "),
            token(&mut doc, "div", PARSE_START),
            text(&mut doc, "Bar"),
            token(&mut doc, "div", PARSE_END),
        ];
        for node in nodes {
            doc.append_child(root, node);
        }
        assert_eq!(balanced(&mut doc), "<div>Foo</div> asdf <div>Bar</div>");
    }

    /// A closing token with no start at its depth is dropped; its
    /// trailing siblings keep their place.
    #[test]
    fn test_unmatched_end_is_dropped_and_counted() {
        let mut doc = Document::new();
        let root = doc.root();
        let nodes = [
            text(&mut doc, "a"),
            token(&mut doc, "div", PARSE_END),
            text(&mut doc, "b"),
        ];
        for node in nodes {
            doc.append_child(root, node);
        }
        let unbalanced = reconstruct(&mut doc, root);
        assert_eq!(unbalanced.dropped_ends, 1);
        assert_eq!(doc.render_to_string(root), "ab");
    }

    /// A closing token buried inside an element terminates it early and
    /// pushes the trailing content out to the enclosing level. That is
    /// the ordinary mechanism for sequential pairs, not an error.
    #[test]
    fn test_early_close_inside_element() {
        let mut doc = Document::new();
        let root = doc.root();
        let p = doc.create_element("p");
        let a = text(&mut doc, "a");
        let end = token(&mut doc, "div", PARSE_END);
        let b = text(&mut doc, "b");
        doc.append_child(p, a);
        doc.append_child(p, end);
        doc.append_child(p, b);
        doc.append_child(root, p);
        let unbalanced = reconstruct(&mut doc, root);
        assert_eq!(unbalanced.dropped_ends, 0);
        assert_eq!(doc.render_to_string(root), "<p>a</p>b");
    }

    /// Leftovers surfacing from inside a reconstructed element re-appear
    /// under the parent of the start node, not inside the start node.
    #[test]
    fn test_leftovers_reparent_to_start_nodes_parent() {
        let mut doc = Document::new();
        let root = doc.root();
        let outer = doc.create_element("section");
        let nodes = [
            token(&mut doc, "b", PARSE_START),
            text(&mut doc, "bold"),
            token(&mut doc, "b", PARSE_END),
            text(&mut doc, " tail"),
        ];
        for node in nodes {
            doc.append_child(outer, node);
        }
        doc.append_child(root, outer);
        assert_eq!(
            balanced(&mut doc),
            "<section><b>bold</b> tail</section>"
        );
    }

    #[test]
    fn test_no_markers_survive() {
        let mut doc = Document::new();
        let root = doc.root();
        let nodes = [
            token(&mut doc, "span", PARSE_START),
            text(&mut doc, "x"),
            token(&mut doc, "span", PARSE_END),
        ];
        for node in nodes {
            doc.append_child(root, node);
        }
        let html = balanced(&mut doc);
        assert!(!html.contains(PARSE_START));
        assert!(!html.contains(PARSE_END));
        assert_eq!(html, "<span>x</span>");
    }
}
