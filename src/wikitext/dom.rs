//! An arena-backed HTML document tree.
//!
//! The intermediate tree produced by the parser is mutated in place by the
//! token reconstructor (whole sibling runs get reparented), so nodes live
//! in a flat arena and refer to each other through integer handles; tree
//! edits are index swaps and nothing ever moves in memory.

use crate::wikitext::config::VOID_TAGS;
use std::fmt::Write;

/// A handle to a node in a [`Document`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// An attribute on an element node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DomAttr {
    pub name: String,
    pub value: String,
}

/// The payload of a node.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NodeKind {
    /// The document root. Renders as its children.
    Root,
    /// An element.
    Element { name: String, attrs: Vec<DomAttr> },
    /// A text run. Escaped on render.
    Text(String),
}

#[derive(Clone, Debug)]
struct NodeData {
    kind: NodeKind,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    prev_sibling: Option<NodeId>,
    next_sibling: Option<NodeId>,
}

/// An HTML document held in a node arena.
///
/// Detached nodes stay in the arena until the document is dropped; a
/// request-scoped document makes that a non-issue.
#[derive(Clone, Debug)]
pub struct Document {
    nodes: Vec<NodeData>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Creates an empty document containing only the root node.
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeData {
                kind: NodeKind::Root,
                parent: None,
                first_child: None,
                last_child: None,
                prev_sibling: None,
                next_sibling: None,
            }],
        }
    }

    /// The root node.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap());
        self.nodes.push(NodeData {
            kind,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
        });
        id
    }

    /// Creates a detached element node.
    pub fn create_element(&mut self, name: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Element {
            name: name.into(),
            attrs: vec![],
        })
    }

    /// Creates a detached text node.
    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.alloc(NodeKind::Text(text.into()))
    }

    /// The payload of `node`.
    pub fn kind(&self, node: NodeId) -> &NodeKind {
        &self.nodes[node.index()].kind
    }

    /// The element name of `node`, if it is an element.
    pub fn name(&self, node: NodeId) -> Option<&str> {
        match &self.nodes[node.index()].kind {
            NodeKind::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.index()].parent
    }

    pub fn first_child(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.index()].first_child
    }

    pub fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node.index()].next_sibling
    }

    /// The children of `node`, collected up front so the tree can be
    /// edited while walking.
    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut cursor = self.first_child(node);
        while let Some(child) = cursor {
            out.push(child);
            cursor = self.next_sibling(child);
        }
        out
    }

    /// Appends a detached node as the last child of `parent`.
    ///
    /// `node` must be detached; reparenting an attached node without
    /// [`detach`](Self::detach) would corrupt the sibling links.
    pub fn append_child(&mut self, parent: NodeId, node: NodeId) {
        debug_assert!(self.nodes[node.index()].parent.is_none());
        let last = self.nodes[parent.index()].last_child;
        self.nodes[node.index()].parent = Some(parent);
        self.nodes[node.index()].prev_sibling = last;
        self.nodes[node.index()].next_sibling = None;
        match last {
            Some(last) => self.nodes[last.index()].next_sibling = Some(node),
            None => self.nodes[parent.index()].first_child = Some(node),
        }
        self.nodes[parent.index()].last_child = Some(node);
    }

    /// Appends a run of detached nodes to `parent`, in order.
    pub fn append_children(&mut self, parent: NodeId, nodes: Vec<NodeId>) {
        for node in nodes {
            self.append_child(parent, node);
        }
    }

    /// Inserts a detached node immediately before `reference`.
    pub fn insert_before(&mut self, reference: NodeId, node: NodeId) {
        debug_assert!(self.nodes[node.index()].parent.is_none());
        let parent = self.nodes[reference.index()]
            .parent
            .expect("insert_before on detached reference");
        let prev = self.nodes[reference.index()].prev_sibling;
        self.nodes[node.index()].parent = Some(parent);
        self.nodes[node.index()].prev_sibling = prev;
        self.nodes[node.index()].next_sibling = Some(reference);
        self.nodes[reference.index()].prev_sibling = Some(node);
        match prev {
            Some(prev) => self.nodes[prev.index()].next_sibling = Some(node),
            None => self.nodes[parent.index()].first_child = Some(node),
        }
    }

    /// Unlinks `node` (and thereby its subtree) from its parent.
    pub fn detach(&mut self, node: NodeId) {
        let NodeData {
            parent,
            prev_sibling,
            next_sibling,
            ..
        } = self.nodes[node.index()];
        if let Some(prev) = prev_sibling {
            self.nodes[prev.index()].next_sibling = next_sibling;
        } else if let Some(parent) = parent {
            self.nodes[parent.index()].first_child = next_sibling;
        }
        if let Some(next) = next_sibling {
            self.nodes[next.index()].prev_sibling = prev_sibling;
        } else if let Some(parent) = parent {
            self.nodes[parent.index()].last_child = prev_sibling;
        }
        let data = &mut self.nodes[node.index()];
        data.parent = None;
        data.prev_sibling = None;
        data.next_sibling = None;
    }

    /// Detaches every sibling after `node` and returns them in order.
    pub fn take_siblings_after(&mut self, node: NodeId) -> Vec<NodeId> {
        let mut out = vec![];
        let mut cursor = self.next_sibling(node);
        while let Some(sibling) = cursor {
            out.push(sibling);
            cursor = self.next_sibling(sibling);
        }
        for sibling in &out {
            self.detach(*sibling);
        }
        out
    }

    /// Replaces `node` with its own children and detaches it. Returns the
    /// node that now occupies the position where `node` stood (its first
    /// promoted child, or the old next sibling).
    pub fn unwrap(&mut self, node: NodeId) -> Option<NodeId> {
        let children = self.children(node);
        for child in &children {
            self.detach(*child);
        }
        for child in &children {
            self.insert_before(node, *child);
        }
        let next = self.next_sibling(node);
        self.detach(node);
        children.first().copied().or(next)
    }

    /// True if `node` carries an attribute named `name`.
    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, name).is_some()
    }

    /// The value of the attribute `name` on `node`.
    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        match &self.nodes[node.index()].kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|attr| attr.name == name)
                .map(|attr| attr.value.as_str()),
            _ => None,
        }
    }

    /// Sets (or replaces) the attribute `name` on `node`.
    pub fn set_attr(&mut self, node: NodeId, name: &str, value: impl Into<String>) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[node.index()].kind {
            let value = value.into();
            match attrs.iter_mut().find(|attr| attr.name == name) {
                Some(attr) => attr.value = value,
                None => attrs.push(DomAttr {
                    name: name.to_string(),
                    value,
                }),
            }
        }
    }

    /// Removes the attribute `name` from `node`.
    pub fn remove_attr(&mut self, node: NodeId, name: &str) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[node.index()].kind {
            attrs.retain(|attr| attr.name != name);
        }
    }

    /// Retains only the attributes for which `keep` returns true.
    pub fn retain_attrs(&mut self, node: NodeId, mut keep: impl FnMut(&str) -> bool) {
        if let NodeKind::Element { attrs, .. } = &mut self.nodes[node.index()].kind {
            attrs.retain(|attr| keep(&attr.name));
        }
    }

    /// Serialises the subtree rooted at `node`.
    pub fn render_node(&self, node: NodeId, out: &mut String) {
        match &self.nodes[node.index()].kind {
            NodeKind::Root => self.render_children(node, out),
            NodeKind::Text(text) => {
                out.push_str(&html_escape::encode_text(text));
            }
            NodeKind::Element { name, attrs } => {
                out.push('<');
                out.push_str(name);
                for attr in attrs {
                    write!(
                        out,
                        " {}=\"{}\"",
                        attr.name,
                        html_escape::encode_double_quoted_attribute(&attr.value)
                    )
                    .unwrap();
                }
                if VOID_TAGS.contains(name.as_str()) {
                    out.push_str("/>");
                } else {
                    out.push('>');
                    self.render_children(node, out);
                    out.push_str("</");
                    out.push_str(name);
                    out.push('>');
                }
            }
        }
    }

    /// Serialises the children of `node`.
    pub fn render_children(&self, node: NodeId, out: &mut String) {
        let mut cursor = self.first_child(node);
        while let Some(child) = cursor {
            self.render_node(child, out);
            cursor = self.next_sibling(child);
        }
    }

    /// Serialises the children of `node` into a fresh string.
    pub fn render_to_string(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.render_children(node, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_render() {
        let mut doc = Document::new();
        let root = doc.root();
        let p = doc.create_element("p");
        let text = doc.create_text("a < b & c");
        doc.append_child(p, text);
        doc.append_child(root, p);
        let hr = doc.create_element("hr");
        doc.append_child(root, hr);
        assert_eq!(doc.render_to_string(root), "<p>a &lt; b &amp; c</p><hr/>");
    }

    #[test]
    fn test_attr_render_escapes() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = doc.create_element("a");
        doc.set_attr(a, "href", "./A \"B\"");
        doc.append_child(root, a);
        assert_eq!(doc.render_to_string(root), "<a href=\"./A &quot;B&quot;\"></a>");
    }

    #[test]
    fn test_take_siblings_after() {
        let mut doc = Document::new();
        let root = doc.root();
        let ids: Vec<_> = (0..4).map(|i| doc.create_text(i.to_string())).collect();
        for id in &ids {
            doc.append_child(root, *id);
        }
        let taken = doc.take_siblings_after(ids[1]);
        assert_eq!(taken, vec![ids[2], ids[3]]);
        assert_eq!(doc.render_to_string(root), "01");
        doc.append_children(ids[1], taken);
        assert_eq!(doc.children(ids[1]), vec![ids[2], ids[3]]);
    }

    #[test]
    fn test_unwrap_promotes_children() {
        let mut doc = Document::new();
        let root = doc.root();
        let div = doc.create_element("div");
        let before = doc.create_text("a");
        let inner = doc.create_text("b");
        let after = doc.create_text("c");
        doc.append_child(root, before);
        doc.append_child(div, inner);
        doc.append_child(root, div);
        doc.append_child(root, after);
        let next = doc.unwrap(div);
        assert_eq!(next, Some(inner));
        assert_eq!(doc.render_to_string(root), "abc");
    }
}
