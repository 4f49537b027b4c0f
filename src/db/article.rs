//! Random-access page reads from the multistream articles dump.
//!
//! The dump is a concatenation of independently decodable bzip2 streams,
//! each holding a batch of MediaWiki `<page>` elements. Seeking to an
//! index offset and wrapping the suffix in a bzip2 decoder yields exactly
//! that batch; the pages in it stream-decode one at a time until the
//! wanted id turns up or the per-offset budget runs out.

use super::index::IndexEntry;
use crate::Cancel;
use bzip2::read::BzDecoder;
use quick_xml::{events::Event, Reader};
use std::{
    fs::File,
    io::{BufReader, Seek, SeekFrom},
    path::PathBuf,
    str::{self, FromStr},
};

/// Errors that may occur reading a page out of the dump.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML format error: {0}")]
    Xml(quick_xml::Error),

    #[error("UTF-8 format error: {0}")]
    Utf8(#[from] str::Utf8Error),

    #[error("invalid number in page XML: {0}")]
    BadNumber(#[from] core::num::ParseIntError),

    /// The sub-stream ran out of pages before the wanted id appeared.
    /// This indicates a corrupt or mismatched index.
    #[error("page {id} not found after {tries} tries")]
    NotFound { id: u32, tries: u32 },

    #[error("page read cancelled")]
    Cancelled,
}

// unnest some XML parsing errors
impl From<quick_xml::Error> for Error {
    fn from(error: quick_xml::Error) -> Error {
        match error {
            quick_xml::Error::Utf8(e) => Error::Utf8(e),
            quick_xml::Error::Io(e) => Error::Io(e),
            error => Error::Xml(error),
        }
    }
}

/// A decoded `<page>` element. Everything the dump carries beyond these
/// fields is skipped as opaque.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub title: String,
    pub namespace: i32,
    pub id: u32,
    /// Targets of `<redirect title="…"/>` elements, when present.
    pub redirects: Vec<String>,
    pub revision: Revision,
}

impl Page {
    /// True when the page is a redirect to another title.
    pub fn is_redirect(&self) -> bool {
        !self.redirects.is_empty()
    }
}

/// The single revision carried by a multistream articles dump page.
#[derive(Clone, Debug, Default)]
pub struct Revision {
    pub id: u64,
    pub timestamp: String,
    pub author: Contributor,
    /// `wikitext` for ordinary articles. Missing in very old dumps.
    pub model: String,
    /// `text/x-wiki` for ordinary articles. Missing in very old dumps.
    pub format: String,
    pub text: String,
}

/// The author of a revision. Anonymous edits carry no username or id.
#[derive(Clone, Debug, Default)]
pub struct Contributor {
    pub username: String,
    pub id: Option<u64>,
}

/// A handle on the articles dump. Holds only the path: every read opens
/// its own file handle and decoder, so concurrent reads never share
/// state.
pub(super) struct DumpReader {
    path: PathBuf,
}

impl DumpReader {
    pub(super) fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Reads the page named by `entry`, decoding at most `budget` pages
    /// from the sub-stream. The cancellation flag is checked between
    /// successive page decodes.
    pub(super) fn read_page(
        &self,
        entry: IndexEntry,
        budget: u32,
        cancel: Option<&Cancel>,
    ) -> Result<Page, Error> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(entry.byte_offset))?;
        let decoder = BzDecoder::new(BufReader::new(file));
        let mut reader = Reader::from_reader(BufReader::new(decoder));
        let mut buf = Vec::new();

        let budget = budget.max(1);
        let mut tries = 0;
        while tries < budget {
            if cancel.is_some_and(Cancel::is_cancelled) {
                return Err(Error::Cancelled);
            }
            if !skip_to_page(&mut reader, &mut buf)? {
                break;
            }
            let page = read_page_element(&mut reader, &mut buf)?;
            tries += 1;
            if page.id == entry.page_id {
                return Ok(page);
            }
            log::trace!("skipped page {} looking for {}", page.id, entry.page_id);
        }

        Err(Error::NotFound {
            id: entry.page_id,
            tries,
        })
    }
}

/// Advances the reader to the next `<page>` start tag. Returns false at
/// end of the sub-stream.
fn skip_to_page(
    reader: &mut Reader<impl std::io::BufRead>,
    buf: &mut Vec<u8>,
) -> Result<bool, Error> {
    loop {
        match reader.read_event(buf)? {
            Event::Start(ref e) if e.name() == b"page" => return Ok(true),
            Event::Eof => return Ok(false),
            _other => {}
        }
        buf.clear();
    }
}

/// Decodes one `<page>` element, cursor positioned just past its start
/// tag.
fn read_page_element(
    reader: &mut Reader<impl std::io::BufRead>,
    buf: &mut Vec<u8>,
) -> Result<Page, Error> {
    let mut page = Page::default();
    // Element names between `<page>` and the cursor, innermost last.
    let mut path: Vec<Vec<u8>> = Vec::new();

    loop {
        match reader.read_event(buf)? {
            Event::Start(ref e) => {
                if path.is_empty() && e.name() == b"redirect" {
                    push_redirect_title(&mut page, e.attributes())?;
                }
                path.push(e.name().to_vec());
            }
            Event::Empty(ref e) => {
                if path.is_empty() && e.name() == b"redirect" {
                    push_redirect_title(&mut page, e.attributes())?;
                }
            }
            Event::Text(ref t) => {
                let raw = t.unescaped()?;
                let text = str::from_utf8(&raw)?;
                if path_is(&path, &["title"]) {
                    page.title = text.to_string();
                } else if path_is(&path, &["ns"]) {
                    page.namespace = i32::from_str(text.trim())?;
                } else if path_is(&path, &["id"]) {
                    page.id = u32::from_str(text.trim())?;
                } else if path_is(&path, &["revision", "id"]) {
                    page.revision.id = u64::from_str(text.trim())?;
                } else if path_is(&path, &["revision", "timestamp"]) {
                    page.revision.timestamp = text.to_string();
                } else if path_is(&path, &["revision", "model"]) {
                    page.revision.model = text.to_string();
                } else if path_is(&path, &["revision", "format"]) {
                    page.revision.format = text.to_string();
                } else if path_is(&path, &["revision", "text"]) {
                    page.revision.text = text.to_string();
                } else if path_is(&path, &["revision", "contributor", "username"]) {
                    page.revision.author.username = text.to_string();
                } else if path_is(&path, &["revision", "contributor", "id"]) {
                    page.revision.author.id = Some(u64::from_str(text.trim())?);
                }
            }
            Event::End(_) => {
                if path.pop().is_none() {
                    // </page>
                    return Ok(page);
                }
            }
            Event::Eof => {
                return Err(Error::Xml(quick_xml::Error::UnexpectedEof(
                    "page".to_string(),
                )));
            }
            _other => {}
        }
        buf.clear();
    }
}

fn push_redirect_title(
    page: &mut Page,
    attributes: quick_xml::events::attributes::Attributes<'_>,
) -> Result<(), Error> {
    for attr in attributes {
        let attr = attr?;
        if attr.key == b"title" {
            let value = attr.unescaped_value()?;
            page.redirects.push(str::from_utf8(&value)?.to_string());
        }
    }
    Ok(())
}

fn path_is(path: &[Vec<u8>], names: &[&str]) -> bool {
    path.len() == names.len()
        && path
            .iter()
            .zip(names)
            .all(|(have, want)| have.as_slice() == want.as_bytes())
}
