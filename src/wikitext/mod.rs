//! Wikitext to HTML conversion.
//!
//! The pipeline: the PEG [`parser`] turns wikitext into a tree of
//! [`Fragment`]s mixing real HTML elements with sentinel token nodes for
//! XML-ish tags; the fragments are lowered into an arena [`dom::Document`];
//! the [`tokens`] pass pairs the sentinels into properly nested elements;
//! [`sanitize`] applies the fixed allow-list policy; the result renders to
//! UTF-8 HTML.

use crate::Cancel;
use std::cell::{Cell, RefCell};
use std::fmt::Write;

pub(crate) mod config;
pub(crate) mod dom;
mod parser;
pub mod parser_fns;
mod sanitize;
mod state;
#[cfg(test)]
mod tests;
mod tokens;
mod url;

pub use url::{title_to_url, url_to_title};

use config::{Configuration, CONFIG, VOID_TAGS};
use dom::{Document, NodeId};

/// A grammar-level parse error.
pub type GrammarError = peg::error::ParseError<peg::str::LineCol>;

/// A conversion error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The grammar rejected the input. Should not happen for any input in
    /// non-strict mode; the fallback productions decay everything to text.
    #[error("wikitext grammar error: {0}")]
    Grammar(#[from] GrammarError),

    /// A template or parser function failed in strict mode.
    #[error("template {name:?}: {source}")]
    Template {
        /// The template target as written, e.g. `#if:x`.
        name: String,
        source: HandlerError,
    },

    /// Unmatched tag tokens survived reconstruction in strict mode.
    #[error("{0} unmatched tag tokens left after reconstruction")]
    Residual(usize),

    /// The conversion was cancelled.
    #[error("conversion cancelled")]
    Cancelled,
}

/// An error returned by a template handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("unknown template")]
    UnknownTemplate,

    #[error("unknown parser function {0:?}")]
    UnknownFunction(String),

    #[error("{function} expects {expected} arguments, got {got}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("{0}")]
    Other(String),
}

/// The callback invoked for every `{{…}}` encountered by the parser. The
/// returned fragment is spliced into the output.
pub type TemplateHandler<'a> = dyn Fn(&str, &[Attribute]) -> Result<Fragment, HandlerError> + Sync + 'a;

/// Conversion options.
#[derive(Default)]
pub struct Options<'a> {
    /// Expands templates and parser functions. When absent, every template
    /// expands to nothing (non-strict) or fails the parse (strict).
    pub template_handler: Option<&'a TemplateHandler<'a>>,

    /// Reject documents with unknown templates or unmatched tag tokens
    /// instead of degrading them.
    pub strict: bool,

    /// Checked at block-rule entry; a cancelled parse aborts with
    /// [`Error::Cancelled`].
    pub cancel: Option<&'a Cancel>,
}

/// A parsed value produced by grammar actions and template handlers.
///
/// Grammar actions build trees mixing text, raw bytes, numbers, element
/// nodes, attributes, and nested lists; this is the tagged sum of all of
/// them. [`concat`] flattens any fragment to a string.
#[derive(Clone, Debug, Default)]
pub enum Fragment {
    /// Nothing. Templates without handlers expand to this.
    #[default]
    Empty,
    /// A run of plain text.
    Text(String),
    /// A run of raw bytes; decoded lossily when stringified.
    Raw(Vec<u8>),
    /// An integer, e.g. an article count.
    Int(i64),
    /// An element node, possibly carrying sentinel marker attributes.
    Node(Element),
    /// A grammar-level attribute.
    Attr(Box<Attribute>),
    /// A sequence of fragments.
    Seq(Vec<Fragment>),
}

impl Fragment {
    /// A text fragment.
    pub fn text(text: impl Into<String>) -> Self {
        Fragment::Text(text.into())
    }

    /// Flattens the fragment to a string. See [`concat`].
    pub fn into_text(self) -> String {
        let mut out = String::new();
        concat_into(&self, &mut out);
        out
    }
}

impl From<&str> for Fragment {
    fn from(text: &str) -> Self {
        Fragment::Text(text.to_string())
    }
}

impl From<String> for Fragment {
    fn from(text: String) -> Self {
        Fragment::Text(text)
    }
}

impl From<i64> for Fragment {
    fn from(value: i64) -> Self {
        Fragment::Int(value)
    }
}

/// An element node not yet lowered into the arena.
#[derive(Clone, Debug, Default)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Fragment>,
}

impl Element {
    /// An element with no attributes or children.
    pub fn new(name: impl Into<String>) -> Self {
        Element {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Adds an attribute.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    /// Adds a child fragment.
    pub fn child(mut self, child: Fragment) -> Self {
        self.children.push(child);
        self
    }
}

/// A template argument or tag attribute: `key` alone for positional
/// arguments, `key=val` otherwise. Both sides are arbitrary parsed
/// fragments, flattened to strings on demand.
#[derive(Clone, Debug, Default)]
pub struct Attribute {
    pub key: Fragment,
    pub val: Option<Fragment>,
}

impl Attribute {
    /// A positional argument.
    pub fn positional(key: impl Into<Fragment>) -> Self {
        Attribute {
            key: key.into(),
            val: None,
        }
    }

    /// The flattened key.
    pub fn key_text(&self) -> String {
        let mut out = String::new();
        concat_into(&self.key, &mut out);
        out
    }

    /// The flattened value; empty for positional arguments.
    pub fn value_text(&self) -> String {
        let mut out = String::new();
        if let Some(val) = &self.val {
            concat_into(val, &mut out);
        }
        out
    }

    /// The `key=val` (or bare `key`) form.
    pub fn to_text(&self) -> String {
        match &self.val {
            None => self.key_text(),
            Some(_) => format!("{}={}", self.key_text(), self.value_text()),
        }
    }
}

/// Flattens heterogeneous grammar fragments into a string, rendering
/// element nodes as HTML. This is what template handlers should use to
/// read their arguments.
pub fn concat(fragments: &[Fragment]) -> String {
    let mut out = String::new();
    for fragment in fragments {
        concat_into(fragment, &mut out);
    }
    out
}

fn concat_into(fragment: &Fragment, out: &mut String) {
    match fragment {
        Fragment::Empty => {}
        Fragment::Text(text) => out.push_str(text),
        Fragment::Raw(bytes) => out.push_str(&String::from_utf8_lossy(bytes)),
        Fragment::Int(value) => write!(out, "{value}").unwrap(),
        Fragment::Node(element) => render_element(element, out),
        Fragment::Attr(attr) => out.push_str(&attr.to_text()),
        Fragment::Seq(items) => {
            for item in items {
                concat_into(item, out);
            }
        }
    }
}

/// Renders an owned element as HTML, the same way the arena serialiser
/// does after lowering.
fn render_element(element: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&element.name);
    for (name, value) in &element.attrs {
        write!(
            out,
            " {}=\"{}\"",
            name,
            html_escape::encode_double_quoted_attribute(value)
        )
        .unwrap();
    }
    if VOID_TAGS.contains(element.name.as_str()) {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &element.children {
        render_child(child, out);
    }
    out.push_str("</");
    out.push_str(&element.name);
    out.push('>');
}

/// Renders one child of an element, escaping text content.
fn render_child(child: &Fragment, out: &mut String) {
    match child {
        Fragment::Text(text) => out.push_str(&html_escape::encode_text(text)),
        Fragment::Raw(bytes) => {
            out.push_str(&html_escape::encode_text(&String::from_utf8_lossy(bytes)));
        }
        Fragment::Seq(items) => {
            for item in items {
                render_child(item, out);
            }
        }
        other => concat_into(other, out),
    }
}

/// Converts wikitext to sanitized HTML.
///
/// Unknown constructs degrade to literal or empty output unless
/// `opts.strict` is set; an error is returned only for strict-mode
/// violations, cancellation, or a grammar failure.
pub fn convert(text: &str, opts: &Options<'_>) -> Result<String, Error> {
    // The grammar's block productions are written against newline
    // terminated lines; a sentinel newline lets input without a trailing
    // newline parse identically. It is trimmed back out of the output.
    let mut source = String::with_capacity(text.len() + 1);
    source.push_str(text);
    source.push('\n');

    let cx = Converter::new(opts);
    let parsed = parser::wikitext::document(&source, &cx);
    if cx.cancelled() {
        return Err(Error::Cancelled);
    }
    let fragments = parsed?;
    if let Some(err) = cx.failure.borrow_mut().take() {
        return Err(err);
    }

    let mut doc = Document::new();
    let root = doc.root();
    append_fragment(&mut doc, root, Fragment::Seq(fragments));

    let unbalanced = tokens::reconstruct(&mut doc, root);
    if opts.strict && unbalanced.dropped_ends > 0 {
        return Err(Error::Residual(unbalanced.dropped_ends));
    }

    sanitize::scrub(&mut doc, root);

    let html = doc.render_to_string(root);
    Ok(html.trim().to_string())
}

/// Per-conversion context threaded through the grammar.
pub(crate) struct Converter<'a> {
    /// The site configuration.
    pub(crate) config: &'static Configuration,
    /// The caller's options.
    opts: &'a Options<'a>,
    /// Ordinal source for unlabelled external links.
    extlink_ordinal: Cell<usize>,
    /// The first strict-mode failure, reported after the parse finishes.
    failure: RefCell<Option<Error>>,
}

impl<'a> Converter<'a> {
    fn new(opts: &'a Options<'a>) -> Self {
        Converter {
            config: &CONFIG,
            opts,
            extlink_ordinal: Cell::new(0),
            failure: RefCell::new(None),
        }
    }

    /// True once the caller's cancellation flag is raised.
    pub(crate) fn cancelled(&self) -> bool {
        self.opts.cancel.is_some_and(Cancel::is_cancelled)
    }

    /// The next autonumber ordinal for an unlabelled external link.
    pub(crate) fn next_extlink_ordinal(&self) -> usize {
        let next = self.extlink_ordinal.get() + 1;
        self.extlink_ordinal.set(next);
        next
    }

    /// Expands `{{name|args}}` through the caller's handler. Failures
    /// degrade to the empty fragment, or are recorded for strict mode.
    pub(crate) fn expand_template(&self, name: &str, args: &[Attribute]) -> Fragment {
        let result = match self.opts.template_handler {
            Some(handler) => handler(name, args),
            None => Err(HandlerError::UnknownTemplate),
        };
        match result {
            Ok(fragment) => fragment,
            Err(source) => {
                if self.opts.strict {
                    let mut failure = self.failure.borrow_mut();
                    if failure.is_none() {
                        *failure = Some(Error::Template {
                            name: name.to_string(),
                            source,
                        });
                    }
                } else {
                    log::warn!("template {name:?} expands to nothing: {source}");
                }
                Fragment::Empty
            }
        }
    }
}

/// Lowers a fragment tree into the arena under `parent`.
fn append_fragment(doc: &mut Document, parent: NodeId, fragment: Fragment) {
    match fragment {
        Fragment::Empty => {}
        Fragment::Seq(items) => {
            for item in items {
                append_fragment(doc, parent, item);
            }
        }
        Fragment::Text(text) => {
            if !text.is_empty() {
                let node = doc.create_text(text);
                doc.append_child(parent, node);
            }
        }
        Fragment::Raw(bytes) => {
            append_fragment(doc, parent, Fragment::Text(String::from_utf8_lossy(&bytes).into_owned()));
        }
        Fragment::Int(value) => {
            append_fragment(doc, parent, Fragment::Text(value.to_string()));
        }
        Fragment::Node(element) => {
            let node = doc.create_element(element.name);
            for (name, value) in element.attrs {
                doc.set_attr(node, &name, value);
            }
            for child in element.children {
                append_fragment(doc, node, child);
            }
            doc.append_child(parent, node);
        }
        Fragment::Attr(attr) => {
            // An attribute is not a child; degrade to its textual form.
            log::warn!("attribute {:?} in child position", attr.to_text());
            append_fragment(doc, parent, Fragment::Text(attr.to_text()));
        }
    }
}
