use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Title used when a feed document carries none.
pub const UNTITLED_FEED: &str = "Untitled Feed";

/// Title used when an entry carries none.
pub const UNTITLED_ENTRY: &str = "Untitled";

/// Normalized, format-independent view of a fetched RSS/Atom document.
///
/// Every field is already defaulted, so downstream code never has to
/// distinguish "missing" from "empty".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedDocument {
    pub title: String,
    pub description: String,
    pub link: String,
    pub entries: Vec<RawEntry>,
}

/// One entry of a [`FeedDocument`], in document order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEntry {
    /// Entry identifier, falling back to the link, then to `""`.
    pub id: String,
    pub link: String,
    pub title: String,
    pub description: String,
    pub author: String,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl RawEntry {
    /// Publication time used for storage: `published`, else `updated`.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        self.published.or(self.updated)
    }
}

/// Successful parse, possibly of a document that was not well-formed.
///
/// `warnings` is non-empty when the strict parser rejected the document and the
/// entries were recovered by the lenient scanner instead.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub document: FeedDocument,
    pub warnings: Vec<String>,
}

impl ParsedFeed {
    pub fn is_degraded(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// The document was structurally invalid and yielded no entries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid feed: {reason}")]
pub struct ParseFailure {
    pub reason: String,
}

/// Entry as shown by a preview (legacy `parse-feed` shape).
#[derive(Debug, Clone, Serialize)]
pub struct PreviewEntry {
    pub title: String,
    pub link: String,
    pub description: String,
    pub published: Option<DateTime<Utc>>,
    pub author: String,
}

/// Feed metadata plus the first [`FeedPreview::MAX_ENTRIES`] entries, nothing stored.
#[derive(Debug, Clone, Serialize)]
pub struct FeedPreview {
    pub title: String,
    pub description: String,
    pub link: String,
    pub entries: Vec<PreviewEntry>,
    pub warnings: Vec<String>,
}

impl FeedPreview {
    pub const MAX_ENTRIES: usize = 50;
}

impl From<ParsedFeed> for FeedPreview {
    fn from(parsed: ParsedFeed) -> Self {
        let ParsedFeed { document, warnings } = parsed;
        let entries = document
            .entries
            .into_iter()
            .take(Self::MAX_ENTRIES)
            .map(|e| PreviewEntry {
                published: e.published_at(),
                title: e.title,
                link: e.link,
                description: e.description,
                author: e.author,
            })
            .collect();

        Self {
            title: document.title,
            description: document.description,
            link: document.link,
            entries,
            warnings,
        }
    }
}

/// Picks the first non-blank candidate, trimmed.
pub(crate) fn first_non_blank<I, S>(candidates: I) -> Option<String>
where
    I: IntoIterator<Item = Option<S>>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .flatten()
        .map(|s| s.as_ref().trim().to_owned())
        .find(|s| !s.is_empty())
}
