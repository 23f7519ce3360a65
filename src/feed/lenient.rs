//! Best-effort entry recovery for feeds that are not well-formed XML.
//!
//! The scanner walks the token stream with end-name checking disabled. It keeps
//! an explicit element stack so unclosed elements are closed implicitly and stray end
//! tags are skipped. It stops at the first error the tokenizer cannot get past and
//! keeps everything recovered up to that point.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::document::{first_non_blank, FeedDocument, RawEntry, UNTITLED_ENTRY, UNTITLED_FEED};

pub(crate) struct LenientScan {
    pub document: FeedDocument,
    /// Tokenizer error that ended the scan early, if any.
    pub error: Option<String>,
}

struct Frame {
    name: String,
    text: String,
}

#[derive(Default)]
struct EntryDraft {
    id: Option<String>,
    link: Option<String>,
    title: Option<String>,
    description: Option<String>,
    content: Option<String>,
    author: Option<String>,
    published: Option<DateTime<Utc>>,
    updated: Option<DateTime<Utc>>,
}

impl EntryDraft {
    fn is_blank(&self) -> bool {
        self.id.is_none() && self.link.is_none() && self.title.is_none()
    }

    fn finish(self) -> RawEntry {
        let link = self.link.unwrap_or_default();
        RawEntry {
            id: first_non_blank([self.id.as_deref(), Some(link.as_str())]).unwrap_or_default(),
            title: self.title.unwrap_or_else(|| UNTITLED_ENTRY.to_owned()),
            description: first_non_blank([self.description, self.content]).unwrap_or_default(),
            author: self.author.unwrap_or_default(),
            published: self.published,
            updated: self.updated,
            link,
        }
    }
}

#[derive(Default)]
struct Scanner {
    stack: Vec<Frame>,
    /// Stack index of the open `<item>`/`<entry>` frame.
    entry_at: Option<usize>,
    draft: Option<EntryDraft>,
    entries: Vec<RawEntry>,
    title: Option<String>,
    description: Option<String>,
    subtitle: Option<String>,
    link: Option<String>,
    /// Set once the input is exhausted and remaining frames are being unwound.
    draining: bool,
}

pub(crate) fn scan(bytes: &[u8]) -> LenientScan {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);
    reader.config_mut().check_end_names = false;

    let mut scanner = Scanner::default();
    let mut buf = Vec::new();
    let mut error = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if name == "link" {
                    scanner.link_attribute(href_of(&e, &reader));
                }
                scanner.open(name);
            }
            Ok(Event::Empty(e)) => {
                if local_name(&e) == "link" {
                    scanner.link_attribute(href_of(&e, &reader));
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase();
                scanner.close(&name);
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                scanner.text(&text);
            }
            Ok(Event::CData(c)) => scanner.text(&String::from_utf8_lossy(&c)),
            Ok(Event::Eof) => break,
            Err(e) => {
                error = Some(format!(
                    "XML error near byte {}: {}",
                    reader.buffer_position(),
                    e
                ));
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    scanner.close_all();
    LenientScan {
        document: scanner.into_document(),
        error,
    }
}

impl Scanner {
    fn open(&mut self, name: String) {
        if matches!(name.as_str(), "item" | "entry") {
            // A new entry while one is still open means the previous one was never closed
            self.finish_entry(true);
            self.entry_at = Some(self.stack.len());
            self.draft = Some(EntryDraft::default());
        }
        self.stack.push(Frame {
            name,
            text: String::new(),
        });
    }

    fn text(&mut self, text: &str) {
        if let Some(frame) = self.stack.last_mut() {
            frame.text.push_str(text);
        }
    }

    /// Closes the innermost open element called `name` and everything opened inside it.
    /// End tags with no matching open element are ignored.
    fn close(&mut self, name: &str) {
        let Some(pos) = self.stack.iter().rposition(|f| f.name == name) else {
            return;
        };
        while self.stack.len() > pos {
            self.pop();
        }
    }

    fn close_all(&mut self) {
        self.draining = true;
        while !self.stack.is_empty() {
            self.pop();
        }
        self.finish_entry(true);
    }

    fn pop(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };
        let index = self.stack.len();
        let parent = self.stack.last().map(|f| f.name.as_str()).unwrap_or("");
        let text = frame.text.trim();

        if self.entry_at == Some(index) {
            self.finish_entry(self.draining);
            return;
        }

        match (self.entry_at, self.draft.as_mut()) {
            (Some(entry_at), Some(draft)) if index > entry_at => {
                let direct = index == entry_at + 1;
                assign_entry_field(draft, &frame.name, parent, text, direct);
            }
            _ if matches!(parent, "channel" | "feed") && !text.is_empty() => {
                let slot = match frame.name.as_str() {
                    "title" => &mut self.title,
                    "description" => &mut self.description,
                    "subtitle" => &mut self.subtitle,
                    "link" => &mut self.link,
                    _ => return,
                };
                slot.get_or_insert_with(|| text.to_owned());
            }
            _ => {}
        }
    }

    /// `implicit` marks entries whose end tag never arrived; those are kept
    /// only if something identifying was recovered.
    fn finish_entry(&mut self, implicit: bool) {
        self.entry_at = None;
        if let Some(draft) = self.draft.take() {
            if implicit && draft.is_blank() {
                return;
            }
            self.entries.push(draft.finish());
        }
    }

    fn link_attribute(&mut self, href: Option<String>) {
        let Some(href) = href else {
            return;
        };
        let parent = self.stack.last().map(|f| f.name.as_str()).unwrap_or("");
        match (self.entry_at, self.draft.as_mut()) {
            (Some(entry_at), Some(draft)) if self.stack.len() == entry_at + 1 => {
                draft.link.get_or_insert(href);
            }
            (None, _) if parent == "feed" => {
                self.link.get_or_insert(href);
            }
            _ => {}
        }
    }

    fn into_document(self) -> FeedDocument {
        FeedDocument {
            title: self.title.unwrap_or_else(|| UNTITLED_FEED.to_owned()),
            description: first_non_blank([self.description, self.subtitle]).unwrap_or_default(),
            link: self.link.unwrap_or_default(),
            entries: self.entries,
        }
    }
}

fn assign_entry_field(draft: &mut EntryDraft, name: &str, parent: &str, text: &str, direct: bool) {
    if text.is_empty() {
        return;
    }
    let owned = || text.to_owned();
    if !direct {
        // Atom <author><name>..</name></author>
        if name == "name" && parent == "author" {
            draft.author.get_or_insert_with(owned);
        }
        return;
    }
    match name {
        "title" => {
            draft.title.get_or_insert_with(owned);
        }
        "link" => {
            draft.link.get_or_insert_with(owned);
        }
        "guid" | "id" => {
            draft.id.get_or_insert_with(owned);
        }
        "description" | "summary" => {
            draft.description.get_or_insert_with(owned);
        }
        "encoded" | "content" => {
            draft.content.get_or_insert_with(owned);
        }
        "author" | "creator" => {
            draft.author.get_or_insert_with(owned);
        }
        "pubdate" | "published" | "issued" => {
            if draft.published.is_none() {
                draft.published = parse_date(text);
            }
        }
        "updated" | "modified" | "date" => {
            if draft.updated.is_none() {
                draft.updated = parse_date(text);
            }
        }
        _ => {}
    }
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_ascii_lowercase()
}

/// `href` of an Atom link, if it is the page link (`alternate` or no `rel`).
fn href_of(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<String> {
    let mut href = None;
    let mut alternate = true;
    for attr in e.attributes().with_checks(false).flatten() {
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map(|v| v.into_owned())
            .unwrap_or_else(|_| String::from_utf8_lossy(&attr.value).into_owned());
        match attr.key.local_name().as_ref() {
            b"href" => href = Some(value.trim().to_owned()),
            b"rel" => alternate = value.trim() == "alternate",
            _ => {}
        }
    }
    href.filter(|h| alternate && !h.is_empty())
}

/// RFC 2822 (RSS) or RFC 3339 (Atom); anything else is treated as absent.
fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(text)
        .or_else(|_| DateTime::parse_from_rfc3339(text))
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_stray_end_tag_is_ignored() {
        let xml = br#"<rss><channel><title>Feed</title>
            <item><guid>1</guid><title>One</title></oops></item>
            <item><guid>2</guid><title>Two</title></item>
        </channel></rss>"#;
        let scan = scan(xml);
        let ids: Vec<_> = scan.document.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert_eq!(scan.document.title, "Feed");
    }

    #[test]
    fn test_unclosed_items_are_closed_implicitly() {
        let xml = br#"<rss><channel>
            <item><title>First</title><link>https://e.com/1</link>
            <item><title>Second</title><link>https://e.com/2</link>
        "#;
        let entries = scan(xml).document.entries;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "First");
        assert_eq!(entries[0].id, "https://e.com/1");
        assert_eq!(entries[1].link, "https://e.com/2");
    }

    #[test]
    fn test_atom_links_authors_and_dates() {
        let xml = br#"<feed xmlns="http://www.w3.org/2005/Atom"><title>A</title>
            <subtitle>Sub</subtitle>
            <link rel="self" href="https://e.org/feed"/>
            <link href="https://e.org/"/>
            <entry>
                <link rel="replies" href="https://e.org/1#comments"/>
                <link rel="alternate" href="https://e.org/1"/>
                <author><name>Carol</name></author>
                <updated>2024-05-06T07:08:09Z</updated>
                <content>Body</content>
            </entry>
        "#;
        let doc = scan(xml).document;
        assert_eq!(doc.link, "https://e.org/");
        assert_eq!(doc.description, "Sub");

        let e = &doc.entries[0];
        assert_eq!(e.link, "https://e.org/1");
        assert_eq!(e.id, "https://e.org/1");
        assert_eq!(e.author, "Carol");
        assert_eq!(e.description, "Body");
        assert_eq!(e.title, UNTITLED_ENTRY);
        assert_eq!(
            e.published_at(),
            Some(Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap())
        );
    }

    #[test]
    fn test_item_title_does_not_leak_to_feed() {
        let xml = br#"<rss><channel><item><title>Entry</title></item></channel>"#;
        let doc = scan(xml).document;
        assert_eq!(doc.title, UNTITLED_FEED);
        assert_eq!(doc.entries[0].title, "Entry");
    }

    #[test]
    fn test_cdata_and_bad_dates() {
        let xml = br#"<rss><channel><item>
            <title><![CDATA[Fish & Chips]]></title>
            <pubDate>sometime</pubDate>
        </item></channel></rss>"#;
        let e = &scan(xml).document.entries[0];
        assert_eq!(e.title, "Fish & Chips");
        assert_eq!(e.published, None);
    }

    #[test]
    fn test_plain_text_recovers_nothing() {
        let scan = scan(b"this is not xml at all");
        assert!(scan.document.entries.is_empty());
    }
}
