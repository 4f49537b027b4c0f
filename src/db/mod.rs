//! The article database: dump index plus random-access reader.
//!
//! [`Database::open`] returns immediately and builds the title map on a
//! dedicated loader thread; every accessor blocks on a readiness latch
//! until the loader signals completion ([`Database::try_ready`] is the
//! non-blocking alternative for callers that would rather answer
//! service-unavailable). After the build the map is never mutated again.

mod article;
mod index;

pub use article::{Contributor, Error as ReadError, Page, Revision};
pub use index::{Error as IndexError, IndexEntry, TitleMap};

use crate::wikitext::parser_fns::SiteContext;
use crate::Cancel;
use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard};
use std::{path::PathBuf, sync::Arc, thread, time::Instant};

/// A database error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// No article with the requested title, even after case
    /// normalization.
    #[error("article not found")]
    NotFound,

    /// The title map is still loading (only from [`Database::try_ready`];
    /// the other accessors block instead).
    #[error("title map is still loading")]
    Unavailable,

    /// The index failed to load at startup. Every request observes the
    /// same failure, hence the shared handle.
    #[error("loading index: {0}")]
    Index(Arc<IndexError>),

    /// Reading or decoding the article failed.
    #[error("reading article: {0}")]
    Read(#[from] ReadError),
}

/// Loader progress, guarded by the latch mutex.
enum LoadState {
    Loading,
    Ready(TitleMap),
    Failed(Arc<IndexError>),
}

struct Latch {
    state: Mutex<LoadState>,
    ready: Condvar,
}

/// An open dump: title map plus articles file.
pub struct Database {
    latch: Arc<Latch>,
    reader: article::DumpReader,
}

impl Database {
    /// Opens the dump. Returns immediately; the index loads on a
    /// background thread and requests block until it is done.
    pub fn open(index_path: impl Into<PathBuf>, articles_path: impl Into<PathBuf>) -> Self {
        let latch = Arc::new(Latch {
            state: Mutex::new(LoadState::Loading),
            ready: Condvar::new(),
        });

        let index_path = index_path.into();
        let loader = Arc::clone(&latch);
        thread::spawn(move || {
            log::info!("reading index {}", index_path.display());
            let time = Instant::now();
            let result = TitleMap::from_file(&index_path);
            let mut state = loader.state.lock();
            *state = match result {
                Ok(map) => {
                    log::info!("read {} titles in {:.2?}", map.len(), time.elapsed());
                    LoadState::Ready(map)
                }
                Err(err) => {
                    log::error!("index load failed: {err}");
                    LoadState::Failed(Arc::new(err))
                }
            };
            loader.ready.notify_all();
        });

        Database {
            latch,
            reader: article::DumpReader::new(articles_path),
        }
    }

    /// Blocks until the loader finishes, then borrows the map.
    fn wait_map(&self) -> Result<MappedMutexGuard<'_, TitleMap>, Error> {
        let mut state = self.latch.state.lock();
        while matches!(*state, LoadState::Loading) {
            self.latch.ready.wait(&mut state);
        }
        if let LoadState::Failed(err) = &*state {
            return Err(Error::Index(Arc::clone(err)));
        }
        Ok(MutexGuard::map(state, |state| match state {
            LoadState::Ready(map) => map,
            _ => unreachable!("latch signalled while loading"),
        }))
    }

    /// Non-blocking readiness probe: `Ok(false)` while the loader is
    /// still running, so early requests can answer service-unavailable.
    pub fn try_ready(&self) -> Result<bool, Error> {
        match &*self.latch.state.lock() {
            LoadState::Loading => Ok(false),
            LoadState::Ready(_) => Ok(true),
            LoadState::Failed(err) => Err(Error::Index(Arc::clone(err))),
        }
    }

    /// Finds the index entry for a title: exact match first, then the
    /// case-normalized fallback.
    pub fn lookup(&self, title: &str) -> Result<IndexEntry, Error> {
        self.wait_map()?.lookup(title).ok_or(Error::NotFound)
    }

    /// Like [`lookup`](Self::lookup), but answers immediately with
    /// [`Error::Unavailable`] while the loader is still running.
    pub fn try_lookup(&self, title: &str) -> Result<IndexEntry, Error> {
        match &*self.latch.state.lock() {
            LoadState::Loading => Err(Error::Unavailable),
            LoadState::Failed(err) => Err(Error::Index(Arc::clone(err))),
            LoadState::Ready(map) => map.lookup(title).ok_or(Error::NotFound),
        }
    }

    /// Reads the page for a title out of the dump.
    pub fn page(&self, title: &str, cancel: Option<&Cancel>) -> Result<Page, Error> {
        let (entry, budget) = {
            let map = self.wait_map()?;
            let entry = map.lookup(title).ok_or(Error::NotFound)?;
            (entry, map.budget(entry.byte_offset))
        };
        // The articles file is opened fresh for every request; nothing is
        // shared with concurrent readers.
        Ok(self.reader.read_page(entry, budget, cancel)?)
    }

    /// An arbitrary loaded title.
    pub fn random_title(&self) -> Result<String, Error> {
        self.wait_map()?
            .random_title()
            .map(str::to_string)
            .ok_or(Error::NotFound)
    }

    /// The number of loaded titles.
    pub fn article_count(&self) -> Result<usize, Error> {
        Ok(self.wait_map()?.len())
    }

    /// The site context magic words draw from when rendering `page`.
    pub fn site_context(&self, page: &Page) -> Result<SiteContext, Error> {
        Ok(SiteContext {
            title: page.title.clone(),
            article_count: self.wait_map()?.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzip2::{write::BzEncoder, Compression};
    use std::fmt::Write as _;
    use std::fs;
    use std::io::Write as _;

    struct Fixture {
        dir: PathBuf,
        index_path: PathBuf,
        articles_path: PathBuf,
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn bz(data: &[u8]) -> Vec<u8> {
        let mut encoder = BzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn page_xml(title: &str, id: u32, text: &str) -> String {
        let mut out = String::new();
        write!(
            out,
            "  <page>\n    <title>{}</title>\n    <ns>0</ns>\n    <id>{id}</id>\n",
            html_escape::encode_text(title),
        )
        .unwrap();
        if title.starts_with("Redirect") {
            out.push_str("    <redirect title=\"Target &amp; Friend\" />\n");
        }
        write!(
            out,
            "    <revision>\n      <id>{}</id>\n      <timestamp>2018-04-03T20:38:02Z</timestamp>\n      <contributor>\n        <username>Example</username>\n        <id>7</id>\n      </contributor>\n      <model>wikitext</model>\n      <format>text/x-wiki</format>\n      <text xml:space=\"preserve\">{}</text>\n    </revision>\n  </page>\n",
            u64::from(id) * 100,
            html_escape::encode_text(text),
        )
        .unwrap();
        out
    }

    /// Writes a multistream articles file plus its index: each batch of
    /// pages becomes one independently decodable bzip2 stream.
    fn fixture(name: &str, batches: &[&[(&str, u32, &str)]]) -> Fixture {
        let dir = std::env::temp_dir().join(format!(
            "wikistream-test-{}-{name}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();

        let mut articles = Vec::new();
        let mut index_text = String::new();
        for batch in batches {
            let offset = articles.len() as u64;
            let mut xml = String::new();
            for (title, id, text) in *batch {
                xml.push_str(&page_xml(title, *id, text));
                writeln!(index_text, "{offset}:{id}:{title}").unwrap();
            }
            articles.extend_from_slice(&bz(xml.as_bytes()));
        }

        let index_path = dir.join("index.txt.bz2");
        let articles_path = dir.join("articles.xml.bz2");
        fs::write(&index_path, bz(index_text.as_bytes())).unwrap();
        fs::write(&articles_path, articles).unwrap();

        Fixture {
            dir,
            index_path,
            articles_path,
        }
    }

    fn standard_fixture(name: &str) -> Fixture {
        fixture(
            name,
            &[
                &[
                    ("Jordanstown", 10, "'''Jordanstown''' is a townland."),
                    ("Anarchism in Spain", 12, "Blah"),
                    ("Foo: A History", 13, "Colons: everywhere"),
                ],
                &[
                    ("Redirect Me", 25, "#REDIRECT [[Target &amp; Friend]]"),
                    ("Second Stream", 26, "Text & more <b>text</b>"),
                ],
            ],
        )
    }

    fn open(fixture: &Fixture) -> Database {
        Database::open(&fixture.index_path, &fixture.articles_path)
    }

    /// Every title in the map reads back a page with the id the map
    /// promised.
    #[test]
    fn test_every_title_round_trips() {
        let fx = standard_fixture("round-trip");
        let db = open(&fx);
        for (title, id) in [
            ("Jordanstown", 10),
            ("Anarchism in Spain", 12),
            ("Foo: A History", 13),
            ("Redirect Me", 25),
            ("Second Stream", 26),
        ] {
            let entry = db.lookup(title).unwrap();
            assert_eq!(entry.page_id, id, "{title}");
            let page = db.page(title, None).unwrap();
            assert_eq!(page.id, id, "{title}");
            assert_eq!(page.title, title);
        }
        assert_eq!(db.article_count().unwrap(), 5);
    }

    #[test]
    fn test_page_fields_decode() {
        let fx = standard_fixture("fields");
        let db = open(&fx);
        let page = db.page("Second Stream", None).unwrap();
        assert_eq!(page.namespace, 0);
        assert_eq!(page.revision.id, 2600);
        assert_eq!(page.revision.timestamp, "2018-04-03T20:38:02Z");
        assert_eq!(page.revision.author.username, "Example");
        assert_eq!(page.revision.author.id, Some(7));
        assert_eq!(page.revision.model, "wikitext");
        assert_eq!(page.revision.format, "text/x-wiki");
        assert_eq!(page.revision.text, "Text & more <b>text</b>");
        assert!(!page.is_redirect());
    }

    #[test]
    fn test_redirect_metadata() {
        let fx = standard_fixture("redirect");
        let db = open(&fx);
        let page = db.page("Redirect Me", None).unwrap();
        assert!(page.is_redirect());
        assert_eq!(page.redirects, vec!["Target & Friend".to_string()]);
    }

    #[test]
    fn test_case_fold_fallback() {
        let fx = standard_fixture("case-fold");
        let db = open(&fx);
        let page = db.page("anarchism in spain", None).unwrap();
        assert_eq!(page.id, 12);
        assert!(matches!(db.page("no such page", None), Err(Error::NotFound)));

        // Once loading has finished the non-blocking path works too.
        assert!(db.try_ready().unwrap());
        assert_eq!(db.try_lookup("Jordanstown").unwrap().page_id, 10);
    }

    #[test]
    fn test_random_title_and_site_context() {
        let fx = standard_fixture("random");
        let db = open(&fx);
        let title = db.random_title().unwrap();
        let page = db.page(&title, None).unwrap();
        let site = db.site_context(&page).unwrap();
        assert_eq!(site.title, page.title);
        assert_eq!(site.article_count, 5);
    }

    #[test]
    fn test_cancelled_read() {
        let fx = standard_fixture("cancel");
        let db = open(&fx);
        let cancel = Cancel::new();
        cancel.cancel();
        assert!(matches!(
            db.page("Jordanstown", Some(&cancel)),
            Err(Error::Read(ReadError::Cancelled))
        ));
    }

    /// A mismatched index entry exhausts the sub-stream budget instead of
    /// scanning forever.
    #[test]
    fn test_budget_exhaustion_reports_tries() {
        let fx = standard_fixture("budget");
        let db = open(&fx);
        let entry = db.lookup("Jordanstown").unwrap();
        let bogus = IndexEntry {
            page_id: 9999,
            byte_offset: entry.byte_offset,
        };
        let err = db
            .reader
            .read_page(bogus, 3, None)
            .expect_err("bogus id must not resolve");
        match err {
            ReadError::NotFound { id: 9999, tries } => assert_eq!(tries, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_index_load_failure_propagates() {
        let dir = std::env::temp_dir().join(format!(
            "wikistream-test-{}-bad-index",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        let index_path = dir.join("index.txt.bz2");
        fs::write(&index_path, bz(b"garbage line\n")).unwrap();
        let db = Database::open(&index_path, dir.join("missing.xml.bz2"));
        assert!(matches!(db.article_count(), Err(Error::Index(_))));
        assert!(matches!(db.try_ready(), Err(Error::Index(_))));
        let _ = fs::remove_dir_all(&dir);
    }
}
