use std::collections::BTreeMap;
use std::io::Cursor;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;

use crate::util::UrlPolicy;

/// Maximum allowed nesting depth for outline elements.
const MAX_OPML_DEPTH: usize = 50;

/// Group label for feeds that have no folder.
pub const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Debug, Error)]
pub enum OpmlError {
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("Failed to write OPML: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generated OPML contains invalid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// A feed subscription read from, or written to, an OPML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpmlFeed {
    /// `title` attribute, falling back to `text`, then to the feed URL.
    pub title: String,
    pub xml_url: String,
    pub html_url: Option<String>,
    /// Label of the closest enclosing category outline. `None` at top level
    /// or under the [`UNCATEGORIZED`] group.
    pub folder: Option<String>,
}

/// Parses OPML text into the feed outlines it contains.
///
/// Category outlines (no `xmlUrl`) are traversed at any depth and become the
/// `folder` of the feeds nested inside them. Outlines whose URL fails `policy`
/// are skipped with a warning.
///
/// `quick-xml` never expands `<!ENTITY>` declarations; only the five XML
/// builtins are resolved, so entity payloads cannot leak into feed data.
pub fn parse_opml(content: &str, policy: &UrlPolicy) -> Result<Vec<OpmlFeed>, OpmlError> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut feeds = Vec::new();
    let mut buf = Vec::new();
    // One slot per open <outline>; category outlines carry their label
    let mut categories: Vec<Option<String>> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.name().as_ref() == b"outline" => {
                if categories.len() >= MAX_OPML_DEPTH {
                    return Err(OpmlError::MaxDepthExceeded(MAX_OPML_DEPTH));
                }
                let outline = read_outline(&e, &reader)?;
                let label = match outline.xml_url {
                    Some(_) => None,
                    None => outline.label.clone(),
                };
                if let Some(feed) = outline.into_feed(current_folder(&categories), policy) {
                    feeds.push(feed);
                }
                categories.push(label);
            }
            Ok(Event::Empty(e)) if e.name().as_ref() == b"outline" => {
                let outline = read_outline(&e, &reader)?;
                if let Some(feed) = outline.into_feed(current_folder(&categories), policy) {
                    feeds.push(feed);
                }
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"outline" => {
                categories.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(OpmlError::XmlParse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(feeds)
}

fn current_folder(categories: &[Option<String>]) -> Option<String> {
    categories
        .iter()
        .rev()
        .flatten()
        .next()
        .filter(|label| label.as_str() != UNCATEGORIZED)
        .cloned()
}

/// Raw attributes of one `<outline>` element.
struct Outline {
    xml_url: Option<String>,
    html_url: Option<String>,
    label: Option<String>,
}

impl Outline {
    fn into_feed(self, folder: Option<String>, policy: &UrlPolicy) -> Option<OpmlFeed> {
        let xml_url = self.xml_url?;
        if let Err(e) = policy.check(&xml_url) {
            tracing::warn!(url = %xml_url, error = %e, "Skipping invalid feed URL in OPML");
            return None;
        }
        let html_url = self.html_url.filter(|url| match policy.check(url) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Ignoring invalid htmlUrl in OPML");
                false
            }
        });

        Some(OpmlFeed {
            title: self.label.unwrap_or_else(|| xml_url.clone()),
            xml_url,
            html_url,
            folder,
        })
    }
}

fn read_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Outline, OpmlError> {
    let mut xml_url = None;
    let mut html_url = None;
    let mut title = None;
    let mut text = None;

    for attr in e.attributes() {
        let attr = match attr {
            Ok(attr) => attr,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed OPML attribute");
                continue;
            }
        };
        let slot = match attr.key.as_ref() {
            b"xmlUrl" => &mut xml_url,
            b"htmlUrl" => &mut html_url,
            b"title" => &mut title,
            b"text" => &mut text,
            _ => continue,
        };
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|e| OpmlError::XmlParse(e.to_string()))?;
        let value = value.trim();
        if !value.is_empty() {
            *slot = Some(value.to_owned());
        }
    }

    Ok(Outline {
        xml_url,
        html_url,
        label: title.or(text),
    })
}

/// Renders feeds as an OPML 2.0 document.
///
/// Feeds are grouped into one category outline per folder, sorted by folder
/// name; feeds without a folder go under [`UNCATEGORIZED`]. Feed order within
/// a group follows the input.
pub fn export_opml(feeds: &[OpmlFeed]) -> Result<String, OpmlError> {
    let mut groups: BTreeMap<&str, Vec<&OpmlFeed>> = BTreeMap::new();
    for feed in feeds {
        let group = feed.folder.as_deref().unwrap_or(UNCATEGORIZED);
        groups.entry(group).or_default().push(feed);
    }

    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut opml = BytesStart::new("opml");
    opml.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(opml))?;

    writer.write_event(Event::Start(BytesStart::new("head")))?;
    writer.write_event(Event::Start(BytesStart::new("title")))?;
    writer.write_event(Event::Text(BytesText::new("feedvault subscriptions")))?;
    writer.write_event(Event::End(BytesEnd::new("title")))?;
    writer.write_event(Event::End(BytesEnd::new("head")))?;

    writer.write_event(Event::Start(BytesStart::new("body")))?;

    for (group, members) in groups {
        let mut category = BytesStart::new("outline");
        category.push_attribute(("text", group));
        category.push_attribute(("title", group));
        writer.write_event(Event::Start(category))?;

        for feed in members {
            let mut outline = BytesStart::new("outline");
            outline.push_attribute(("type", "rss"));
            outline.push_attribute(("text", feed.title.as_str()));
            outline.push_attribute(("title", feed.title.as_str()));
            outline.push_attribute(("xmlUrl", feed.xml_url.as_str()));
            if let Some(ref html_url) = feed.html_url {
                outline.push_attribute(("htmlUrl", html_url.as_str()));
            }
            writer.write_event(Event::Empty(outline))?;
        }

        writer.write_event(Event::End(BytesEnd::new("outline")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("body")))?;
    writer.write_event(Event::End(BytesEnd::new("opml")))?;

    Ok(String::from_utf8(writer.into_inner().into_inner())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn strict() -> UrlPolicy {
        UrlPolicy::default()
    }

    fn feed(title: &str, url: &str, folder: Option<&str>) -> OpmlFeed {
        OpmlFeed {
            title: title.to_string(),
            xml_url: url.to_string(),
            html_url: None,
            folder: folder.map(str::to_string),
        }
    }

    #[test]
    fn test_parse_nested_categories_become_folders() {
        let content = r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Test Feeds</title></head>
  <body>
    <outline text="Blogs" title="Blogs">
      <outline type="rss" text="Example Blog" title="Example Blog" xmlUrl="https://example.com/feed.xml" htmlUrl="https://example.com"/>
      <outline text="Nested">
        <outline type="rss" text="Deep" xmlUrl="https://deep.example.com/rss"/>
      </outline>
    </outline>
    <outline type="rss" text="Top Level" xmlUrl="https://top.example.com/rss"/>
  </body>
</opml>"#;

        let feeds = parse_opml(content, &strict()).unwrap();
        assert_eq!(
            feeds,
            vec![
                OpmlFeed {
                    title: "Example Blog".to_string(),
                    xml_url: "https://example.com/feed.xml".to_string(),
                    html_url: Some("https://example.com".to_string()),
                    folder: Some("Blogs".to_string()),
                },
                feed("Deep", "https://deep.example.com/rss", Some("Nested")),
                feed("Top Level", "https://top.example.com/rss", None),
            ]
        );
    }

    #[test]
    fn test_title_falls_back_to_text_then_url() {
        let content = r#"<opml version="2.0"><body>
            <outline type="rss" text="Text Only" xmlUrl="https://textonly.com/feed"/>
            <outline type="rss" xmlUrl="https://notitle.com/feed"/>
        </body></opml>"#;

        let feeds = parse_opml(content, &strict()).unwrap();
        assert_eq!(feeds[0].title, "Text Only");
        assert_eq!(feeds[1].title, "https://notitle.com/feed");
    }

    #[test]
    fn test_uncategorized_group_maps_to_no_folder() {
        let content = r#"<opml version="2.0"><body>
            <outline text="Uncategorized">
                <outline xmlUrl="https://a.example.com/feed"/>
            </outline>
        </body></opml>"#;

        let feeds = parse_opml(content, &strict()).unwrap();
        assert_eq!(feeds[0].folder, None);
    }

    #[test]
    fn test_policy_skips_rejected_urls() {
        let content = r#"<opml version="2.0"><body>
            <outline xmlUrl="https://valid.com/feed"/>
            <outline xmlUrl="http://192.168.1.1/feed"/>
            <outline xmlUrl="http://localhost/feed"/>
            <outline xmlUrl="file:///etc/passwd"/>
        </body></opml>"#;

        let feeds = parse_opml(content, &strict()).unwrap();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].xml_url, "https://valid.com/feed");

        let permissive = parse_opml(content, &UrlPolicy::permissive()).unwrap();
        assert_eq!(permissive.len(), 3);
    }

    #[test]
    fn test_malformed_xml_error() {
        assert!(matches!(
            parse_opml("<not valid xml", &strict()),
            Err(OpmlError::XmlParse(_))
        ));
    }

    #[test]
    fn test_custom_entities_are_not_expanded() {
        let content = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<opml version="2.0"><body>
    <outline text="&xxe;" xmlUrl="https://example.com/feed.xml"/>
</body></opml>"#;

        if let Ok(feeds) = parse_opml(content, &strict()) {
            for feed in feeds {
                assert!(!feed.title.contains("root:"));
            }
        }
    }

    #[test]
    fn test_deeply_nested_opml_rejected() {
        let mut opml = String::from(r#"<opml version="2.0"><body>"#);
        for _ in 0..100 {
            opml.push_str(r#"<outline text="level">"#);
        }
        for _ in 0..100 {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let err = parse_opml(&opml, &strict()).unwrap_err();
        assert!(matches!(err, OpmlError::MaxDepthExceeded(50)));
    }

    #[test]
    fn test_export_groups_by_folder() {
        let feeds = vec![
            feed("Zeta", "https://z.example.com/feed", Some("Tech")),
            feed("Loose", "https://l.example.com/feed", None),
            feed("Alpha", "https://a.example.com/feed", Some("Tech")),
        ];

        let exported = export_opml(&feeds).unwrap();
        assert!(exported.starts_with("<?xml"));
        assert!(exported.contains(r#"<outline text="Tech" title="Tech">"#));
        assert!(exported.contains(r#"<outline text="Uncategorized" title="Uncategorized">"#));

        let parsed = parse_opml(&exported, &strict()).unwrap();
        let by_folder: Vec<_> = parsed
            .iter()
            .map(|f| (f.folder.as_deref(), f.title.as_str()))
            .collect();
        assert_eq!(
            by_folder,
            vec![(Some("Tech"), "Zeta"), (Some("Tech"), "Alpha"), (None, "Loose")]
        );
    }

    #[test]
    fn test_export_escapes_special_characters() {
        let feeds = vec![feed(
            "Feed with <special> & \"chars\"",
            "https://example.com/feed?a=1&b=2",
            None,
        )];

        let exported = export_opml(&feeds).unwrap();
        let parsed = parse_opml(&exported, &strict()).unwrap();
        assert_eq!(parsed[0].title, "Feed with <special> & \"chars\"");
        assert_eq!(parsed[0].xml_url, "https://example.com/feed?a=1&b=2");
    }

    #[test]
    fn test_export_empty() {
        let exported = export_opml(&[]).unwrap();
        assert!(exported.contains("<body"));
        assert!(parse_opml(&exported, &strict()).unwrap().is_empty());
    }
}
