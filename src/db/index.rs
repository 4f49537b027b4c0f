//! The multistream dump text index.
//!
//! The index is bzip2-compressed UTF-8 text, one article per line:
//!
//! ```text
//! <decimal-byte-offset>:<decimal-id>:<title>
//! ```
//!
//! The offset names the start of an independently decodable bzip2 stream
//! in the articles file; the id names one page inside that stream. Titles
//! may themselves contain `:`, so a line splits on the first two
//! separators only.

use rayon::prelude::*;
use std::{
    collections::HashMap,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

/// Errors that may occur when reading the dump index. Any malformed line
/// aborts the whole load; a partially built title map would silently
/// swallow articles.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An I/O error occurred reading or decompressing the index.
    #[error("{1}: I/O error: {0}")]
    Io(std::io::Error, PathBuf),

    /// The decompressed index was not UTF-8.
    #[error("index is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The offset column was missing from a line.
    ///
    /// ```text
    /// 000000000:00000:TITLE
    /// ^^^^^^^^^
    /// ```
    #[error("missing offset column in index")]
    MissingOffset,

    /// The page ID column was missing from a line.
    ///
    /// ```text
    /// 000000000:00000:TITLE
    ///           ^^^^^
    /// ```
    #[error("missing page ID column in index")]
    MissingId,

    /// The title column was missing from a line.
    ///
    /// ```text
    /// 000000000:00000:TITLE
    ///                 ^^^^^
    /// ```
    #[error("missing page name column in index")]
    MissingName,

    /// The offset or page ID column contained something other than an
    /// integer.
    #[error("invalid number in index: {0}")]
    BadNumber(#[from] core::num::ParseIntError),
}

/// Where to find one article: a bzip2 sub-stream boundary in the articles
/// file and the page id within that stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IndexEntry {
    pub page_id: u32,
    pub byte_offset: u64,
}

/// One parsed index line.
struct Line<'a> {
    offset: u64,
    id: u32,
    title: &'a str,
}

impl<'a> TryFrom<&'a str> for Line<'a> {
    type Error = Error;

    fn try_from(line: &'a str) -> Result<Self, Self::Error> {
        let mut line = line.splitn(3, ':');
        let offset = u64::from_str(line.next().ok_or(Error::MissingOffset)?)?;
        let id = u32::from_str(line.next().ok_or(Error::MissingId)?)?;
        let title = line.next().ok_or(Error::MissingName)?;

        Ok(Self { offset, id, title })
    }
}

/// The title → entry map built from the index, immutable once built.
pub struct TitleMap {
    /// Exact titles to entries. Later duplicates win.
    entries: HashMap<String, IndexEntry>,
    /// How many pages live in the sub-stream at each byte offset. This
    /// bounds how many pages the reader decodes before giving up.
    budgets: HashMap<u64, u32>,
}

impl TitleMap {
    /// Reads and decompresses the index file given by `path`.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let io_err = |err| Error::Io(err, path.into());

        let file = File::open(path).map_err(io_err)?;
        // Index dumps are sometimes produced as concatenated streams, so
        // use the multistream decoder.
        let mut decoder = bzip2::read::MultiBzDecoder::new(file);
        let mut bytes = Vec::new();
        decoder.read_to_end(&mut bytes).map_err(io_err)?;
        Self::from_text(&String::from_utf8(bytes)?)
    }

    /// Builds the map from decompressed index text.
    pub fn from_text(text: &str) -> Result<Self, Error> {
        let lines = text
            .par_lines()
            .map(Line::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        // Assembly stays sequential so that a title appearing twice keeps
        // its last entry.
        let mut entries = HashMap::with_capacity(lines.len());
        let mut budgets = HashMap::new();
        for line in lines {
            *budgets.entry(line.offset).or_insert(0_u32) += 1;
            entries.insert(
                line.title.to_string(),
                IndexEntry {
                    page_id: line.id,
                    byte_offset: line.offset,
                },
            );
        }

        Ok(Self { entries, budgets })
    }

    /// Finds the entry for an exact title.
    pub fn get(&self, title: &str) -> Option<IndexEntry> {
        self.entries.get(title).copied()
    }

    /// Finds the entry for a title, retrying with case normalization on an
    /// exact-match miss.
    pub fn lookup(&self, title: &str) -> Option<IndexEntry> {
        self.get(title).or_else(|| self.get(&normalize(title)))
    }

    /// The page count of the sub-stream at `offset`.
    pub fn budget(&self, offset: u64) -> u32 {
        self.budgets.get(&offset).copied().unwrap_or(1)
    }

    /// The number of distinct titles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the index contained no titles.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// An arbitrary title, freshly picked per call. Uniformity is not a
    /// goal; this backs the random-article feature.
    pub fn random_title(&self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        // splitmix64 step, to spread the clock bits around.
        let mut x = nanos.wrapping_add(0x9e3779b97f4a7c15);
        x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
        x ^= x >> 31;
        let index = (x % self.entries.len() as u64) as usize;
        self.entries.keys().nth(index).map(String::as_str)
    }
}

/// Normalizes a title for the fallback lookup: lowercase everything, then
/// capitalize the first character of each whitespace-delimited word.
pub(crate) fn normalize(title: &str) -> String {
    let lower = title.to_lowercase();
    let mut out = String::with_capacity(lower.len());
    let mut at_word_start = true;
    for c in lower.chars() {
        if c.is_whitespace() {
            out.push(c);
            at_word_start = true;
        } else if at_word_start {
            out.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            out.push(c);
        }
    }
    out
}
