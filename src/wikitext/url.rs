//! URL path segment ↔ article title transformation.
//!
//! Titles travel through URLs with `_` standing in for spaces; the dump
//! index and reader only ever see the space form.

/// Converts a URL path segment to an article title.
pub fn url_to_title(segment: &str) -> String {
    segment.replace('_', " ")
}

/// Converts an article title to a relative URL.
pub fn title_to_url(title: &str) -> String {
    format!("./{}", title.replace(' ', "_"))
}
