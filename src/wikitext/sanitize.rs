//! HTML sanitization.
//!
//! A fixed allow-list policy applied to the reconstructed tree: the usual
//! permissive user-generated-content element set plus `ref`, a small set
//! of global attributes, and `rel="nofollow"` forced onto fully-qualified
//! external links. Elements outside the list are unwrapped (their content
//! is kept); `script` and `style` subtrees are dropped wholesale.

use super::{
    dom::{Document, NodeId, NodeKind},
    tokens::{PARSE_END, PARSE_START, PARSE_TOKEN},
};
use phf::{Map, Set};

/// Elements whose entire content is dropped along with the tag.
static SKIP_CONTENT: Set<&str> = phf::phf_set! {
    "script", "style",
};

/// Attributes allowed on every element. The parse markers are listed
/// defensively; reconstruction consumes them before this pass runs.
static GLOBAL_ATTRS: Set<&str> = phf::phf_set! {
    "class", "id", "name", "style",
    "_parsestart", "_parseend", "_parsetoken",
};

/// Allowed elements, each with its extra per-element attributes.
static ELEMENTS: Map<&str, &[&str]> = phf::phf_map! {
    "a" => &["href", "rel"] as &[&str],
    "abbr" => &["title"],
    "b" => &[],
    "bdi" => &["dir"],
    "bdo" => &["dir"],
    "big" => &[],
    "blockquote" => &["cite"],
    "br" => &[],
    "caption" => &[],
    "center" => &[],
    "cite" => &[],
    "code" => &[],
    "dd" => &[],
    "del" => &["cite", "datetime"],
    "details" => &["open"],
    "dfn" => &[],
    "div" => &[],
    "dl" => &[],
    "dt" => &[],
    "em" => &[],
    "figcaption" => &[],
    "figure" => &[],
    "h1" => &[],
    "h2" => &[],
    "h3" => &[],
    "h4" => &[],
    "h5" => &[],
    "h6" => &[],
    "hr" => &[],
    "i" => &[],
    "img" => &["align", "alt", "height", "src", "width"],
    "ins" => &["cite", "datetime"],
    "kbd" => &[],
    "li" => &[],
    "mark" => &[],
    "ol" => &["start", "type"],
    "p" => &[],
    "pre" => &[],
    "q" => &["cite"],
    "rb" => &[],
    "rp" => &[],
    "rt" => &[],
    "rtc" => &[],
    "ref" => &[],
    "ruby" => &[],
    "s" => &[],
    "samp" => &[],
    "small" => &[],
    "span" => &[],
    "strike" => &[],
    "strong" => &[],
    "sub" => &[],
    "summary" => &[],
    "sup" => &[],
    "table" => &["summary"],
    "tbody" => &[],
    "td" => &["colspan", "headers", "rowspan"],
    "tfoot" => &[],
    "th" => &["colspan", "headers", "rowspan", "scope"],
    "thead" => &[],
    "time" => &["datetime"],
    "tr" => &[],
    "tt" => &[],
    "u" => &[],
    "ul" => &["type"],
    "var" => &[],
    "wbr" => &[],
};

/// URL schemes permitted in `href` and `src` values.
static SCHEMES: Set<&str> = phf::phf_set! {
    "ftp", "http", "https", "mailto",
};

/// True when `name` is in the element allow-list, ignoring ASCII case.
/// The parser uses this as its definition of a literal HTML tag, so the
/// allow-list above is the single authority on elements.
pub(crate) fn allowed_element(name: &str) -> bool {
    ELEMENTS.contains_key(name)
        || (name.chars().any(|c| c.is_ascii_uppercase())
            && ELEMENTS.contains_key(name.to_ascii_lowercase().as_str()))
}

/// Applies the policy to the subtree under `root`, in place.
pub(crate) fn scrub(doc: &mut Document, root: NodeId) {
    scrub_children(doc, root);
}

fn scrub_children(doc: &mut Document, parent: NodeId) {
    let mut cursor = doc.first_child(parent);
    while let Some(node) = cursor {
        let next = doc.next_sibling(node);
        let name = match doc.kind(node) {
            NodeKind::Text(_) | NodeKind::Root => {
                cursor = next;
                continue;
            }
            NodeKind::Element { name, .. } => name.clone(),
        };

        if SKIP_CONTENT.contains(name.as_str()) {
            log::warn!("dropping <{name}> subtree");
            doc.detach(node);
            cursor = next;
        } else if let Some(allowed) = ELEMENTS.get(name.as_str()) {
            scrub_attrs(doc, node, &name, allowed);
            scrub_children(doc, node);
            cursor = next;
        } else {
            // Unknown element: keep the content, lose the tag. The
            // promoted children still need scrubbing, so rescan from the
            // first of them.
            cursor = doc.unwrap(node).or(next);
        }
    }
}

fn scrub_attrs(doc: &mut Document, node: NodeId, name: &str, allowed: &[&str]) {
    doc.retain_attrs(node, |attr| {
        GLOBAL_ATTRS.contains(attr) || allowed.contains(&attr)
    });

    for url_attr in ["href", "src"] {
        if let Some(value) = doc.attr(node, url_attr) {
            if !allowed_url(value) {
                log::warn!("dropping {url_attr}={value:?} on <{name}>");
                doc.remove_attr(node, url_attr);
            }
        }
    }

    if name == "a" {
        match doc.attr(node, "href") {
            Some(href) if fully_qualified(href) => {
                doc.set_attr(node, "rel", "nofollow");
            }
            Some(_) => {}
            None => doc.remove_attr(node, "rel"),
        }
    }
}

/// True for relative URLs and absolute URLs using a permitted scheme.
fn allowed_url(value: &str) -> bool {
    let value = value.trim();
    match value.split_once(':') {
        // A `:` after a path separator is part of the path, not a scheme.
        Some((scheme, _)) => {
            scheme.contains('/') || SCHEMES.contains(scheme.to_ascii_lowercase().as_str())
        }
        None => true,
    }
}

/// True when the URL names a host, which is what makes a link external.
fn fully_qualified(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    value.starts_with("//")
        || SCHEMES
            .iter()
            .any(|scheme| value.strip_prefix(scheme).is_some_and(|r| r.starts_with(':')))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scrub_html(build: impl FnOnce(&mut Document, NodeId)) -> String {
        let mut doc = Document::new();
        let root = doc.root();
        build(&mut doc, root);
        scrub(&mut doc, root);
        doc.render_to_string(root)
    }

    #[test]
    fn test_unknown_element_unwraps() {
        let html = scrub_html(|doc, root| {
            let bad = doc.create_element("blink");
            let t = doc.create_text("x");
            doc.append_child(bad, t);
            doc.append_child(root, bad);
        });
        assert_eq!(html, "x");
    }

    #[test]
    fn test_script_content_dropped() {
        let html = scrub_html(|doc, root| {
            let script = doc.create_element("script");
            let t = doc.create_text("alert(1)");
            doc.append_child(script, t);
            doc.append_child(root, script);
            let p = doc.create_element("p");
            let t = doc.create_text("ok");
            doc.append_child(p, t);
            doc.append_child(root, p);
        });
        assert_eq!(html, "<p>ok</p>");
    }

    #[test]
    fn test_disallowed_attrs_dropped() {
        let html = scrub_html(|doc, root| {
            let p = doc.create_element("p");
            doc.set_attr(p, "onclick", "alert(1)");
            doc.set_attr(p, "id", "keep");
            doc.append_child(root, p);
        });
        assert_eq!(html, "<p id=\"keep\"></p>");
    }

    #[test]
    fn test_nofollow_only_on_fully_qualified_links() {
        let html = scrub_html(|doc, root| {
            let a = doc.create_element("a");
            doc.set_attr(a, "href", "http://example.com/");
            doc.append_child(root, a);
            let b = doc.create_element("a");
            doc.set_attr(b, "href", "./Jordanstown");
            doc.append_child(root, b);
        });
        assert_eq!(
            html,
            "<a href=\"http://example.com/\" rel=\"nofollow\"></a><a href=\"./Jordanstown\"></a>"
        );
    }

    #[test]
    fn test_unsafe_scheme_dropped() {
        let html = scrub_html(|doc, root| {
            let a = doc.create_element("a");
            doc.set_attr(a, "href", "javascript:alert(1)");
            doc.append_child(root, a);
        });
        assert_eq!(html, "<a></a>");
    }

    #[test]
    fn test_ref_allowed_without_attrs() {
        let html = scrub_html(|doc, root| {
            let r = doc.create_element("ref");
            doc.set_attr(r, "group", "g");
            let t = doc.create_text("cite");
            doc.append_child(r, t);
            doc.append_child(root, r);
        });
        assert_eq!(html, "<ref>cite</ref>");
    }

    #[test]
    fn test_markers_are_tolerated() {
        // Defensive: the markers are consumed during reconstruction, but a
        // stray one must not be mangled into something dangerous.
        let html = scrub_html(|doc, root| {
            let span = doc.create_element("span");
            doc.set_attr(span, PARSE_START, "");
            doc.set_attr(span, PARSE_END, "");
            doc.set_attr(span, PARSE_TOKEN, "");
            doc.append_child(root, span);
        });
        assert_eq!(
            html,
            "<span _parsestart=\"\" _parseend=\"\" _parsetoken=\"\"></span>"
        );
    }
}
