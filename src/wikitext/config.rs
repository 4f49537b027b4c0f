//! Parser configuration data.

use super::sanitize;
use phf::Set;

/// Site specific configuration of a wiki.
///
/// Only the parts of the site configuration the grammar consults are
/// carried; everything is compile-time static.
#[derive(Debug)]
pub(crate) struct Configuration {
    /// Tag names of registered extension tags, lowercased.
    pub extension_tags: &'static Set<&'static str>,

    /// Protocols that can be used for external links, lowercased.
    pub protocols: &'static Set<&'static str>,
}

/// The default configuration.
pub(crate) static CONFIG: Configuration = Configuration {
    extension_tags: &EXTENSION_TAGS,
    protocols: &PROTOCOLS,
};

/// Tag names which are handled by extensions rather than being plain
/// HTML.
static EXTENSION_TAGS: Set<&str> = phf::phf_set! {
    "gallery", "indicator", "nowiki", "poem", "ref", "references",
    "section", "syntaxhighlight", "timeline",
};

/// Protocols usable in external links.
static PROTOCOLS: Set<&str> = phf::phf_set! {
    "//", "ftp://", "ftps://", "http://", "https://", "irc://",
    "ircs://", "mailto:", "news:",
};

/// True for HTML tags that may be written literally in wikitext.
///
/// There is deliberately no second tag table here: the grammar admits
/// exactly what the sanitizer will keep, so a tag either round-trips or
/// never parses. The one exception is `a`, which wikitext reserves for
/// its own link syntax even though sanitized output contains anchors.
pub(crate) fn is_html_tag(name: &str) -> bool {
    !name.eq_ignore_ascii_case("a") && sanitize::allowed_element(name)
}

/// The void elements among the tags admitted above. These serialise
/// self-closed and never produce open/close token pairs.
pub(crate) static VOID_TAGS: Set<&str> = phf::phf_set! {
    "br", "hr", "img", "wbr",
};

/// Case-insensitive membership test for the phf tag sets, which store
/// lowercased names.
pub(crate) fn contains_ignore_case(set: &Set<&str>, name: &str) -> bool {
    if set.contains(name) {
        return true;
    }
    name.chars().any(|c| c.is_ascii_uppercase()) && set.contains(name.to_ascii_lowercase().as_str())
}
