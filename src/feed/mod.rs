//! Feed retrieval and parsing.
//!
//! - [`fetcher`] - HTTP retrieval with URL policy, timeout and size limit
//! - [`parser`] - strict `feed-rs` parse, normalized into a [`FeedDocument`]
//! - `lenient` - `quick-xml` recovery scan for documents the strict parser rejects
//! - [`opml`] - OPML 2.0 subscription import/export
//!
//! Parsing has a two-level result: a [`ParsedFeed`] (possibly with warnings when
//! entries were recovered from malformed XML) or a [`ParseFailure`].

mod document;
pub mod fetcher;
mod lenient;
pub mod opml;
pub mod parser;

pub use document::{
    FeedDocument, FeedPreview, ParseFailure, ParsedFeed, PreviewEntry, RawEntry, UNTITLED_ENTRY,
    UNTITLED_FEED,
};
pub use fetcher::{FeedFetcher, FetchError, FetchSettings};
pub use opml::{export_opml, parse_opml, OpmlError, OpmlFeed};
pub use parser::parse_document;
