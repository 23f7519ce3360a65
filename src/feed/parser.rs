use feed_rs::model::{Entry, Feed, Link};
use feed_rs::parser;

use super::document::{
    first_non_blank, FeedDocument, ParseFailure, ParsedFeed, RawEntry, UNTITLED_ENTRY,
    UNTITLED_FEED,
};
use super::lenient;

/// Parses raw feed bytes into a [`ParsedFeed`].
///
/// The strict `feed-rs` parser runs first. When it rejects the document, the lenient
/// scanner tries to recover entries from the broken XML; the document is accepted
/// if at least one entry comes back. Only a document that is both invalid and empty
/// is a [`ParseFailure`].
pub fn parse_document(bytes: &[u8]) -> Result<ParsedFeed, ParseFailure> {
    let strict_error = match strict_parser().parse(bytes) {
        Ok(feed) => {
            return Ok(ParsedFeed {
                document: normalize(feed),
                warnings: Vec::new(),
            })
        }
        Err(e) => e.to_string(),
    };

    let scan = lenient::scan(bytes);
    if scan.document.entries.is_empty() {
        let reason = match scan.error {
            Some(xml_error) => format!("{strict_error} ({xml_error})"),
            None => strict_error,
        };
        return Err(ParseFailure { reason });
    }

    tracing::debug!(
        entries = scan.document.entries.len(),
        error = %strict_error,
        "Recovered entries from malformed feed"
    );

    let mut warnings = vec![strict_error];
    warnings.extend(scan.error);
    Ok(ParsedFeed {
        document: scan.document,
        warnings,
    })
}

/// `feed-rs` invents an id for entries without one. Blank ids are kept blank
/// here so the link fallback in [`normalize_entry`] can apply.
fn strict_parser() -> parser::Parser {
    parser::Builder::new()
        .id_generator(|_links, _title, _uri| String::new())
        .build()
}

fn normalize(feed: Feed) -> FeedDocument {
    let title = first_non_blank([feed.title.as_ref().map(|t| t.content.as_str())])
        .unwrap_or_else(|| UNTITLED_FEED.to_owned());
    // feed-rs maps both RSS <description> and Atom <subtitle> onto `description`
    let description =
        first_non_blank([feed.description.as_ref().map(|t| t.content.as_str())])
            .unwrap_or_default();
    let link = preferred_link(&feed.links).unwrap_or_default();

    FeedDocument {
        title,
        description,
        link,
        entries: feed.entries.into_iter().map(normalize_entry).collect(),
    }
}

fn normalize_entry(entry: Entry) -> RawEntry {
    let link = preferred_link(&entry.links).unwrap_or_default();
    let id = first_non_blank([Some(entry.id.as_str()), Some(link.as_str())]).unwrap_or_default();
    let title = first_non_blank([entry.title.as_ref().map(|t| t.content.as_str())])
        .unwrap_or_else(|| UNTITLED_ENTRY.to_owned());
    let description = first_non_blank([
        entry.summary.as_ref().map(|s| s.content.as_str()),
        entry.content.as_ref().and_then(|c| c.body.as_deref()),
    ])
    .unwrap_or_default();
    let author = first_non_blank(entry.authors.iter().map(|p| Some(p.name.as_str())))
        .unwrap_or_default();

    RawEntry {
        id,
        link,
        title,
        description,
        author,
        published: entry.published,
        updated: entry.updated,
    }
}

/// The page link: an `alternate` (or untyped) link if there is one, else the first link.
fn preferred_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| links.first())
        .map(|l| l.href.trim().to_owned())
        .filter(|href| !href.is_empty())
}
