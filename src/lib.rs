//! Serve Wikipedia articles directly from the compressed multistream XML
//! dump, without an import step.
//!
//! Two subsystems make up the crate:
//!
//! - [`db`] locates and decodes a single article by title in bounded time,
//!   using the textual dump index to seek into the multistream articles
//!   file.
//! - [`wikitext`] converts MediaWiki wikitext to sanitized HTML: a PEG
//!   parser with context-sensitive inline termination, a token
//!   reconstructor that pairs up tag sentinels, and a fixed-policy
//!   sanitizer.
//!
//! ```no_run
//! use wikistream::{db::Database, wikitext};
//!
//! let db = Database::open(
//!     "enwiki-latest-pages-articles-multistream-index.txt.bz2",
//!     "enwiki-latest-pages-articles-multistream.xml.bz2",
//! );
//! let page = db.page("Jordanstown", None)?;
//! let site = db.site_context(&page)?;
//! let handler = wikitext::parser_fns::site_handler(site);
//! let opts = wikistream::wikitext::Options {
//!     template_handler: Some(&handler),
//!     ..Default::default()
//! };
//! let html = wikitext::convert(&page.revision.text, &opts)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

pub mod db;
pub mod wikitext;

/// A cloneable cancellation flag shared between a request handler and the
/// work it started.
///
/// The converter checks the flag at block-rule entry; the dump reader
/// checks it between successive page decodes.
#[derive(Clone, Debug, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    /// Creates a new, un-cancelled flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
