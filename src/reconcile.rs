//! Turns a parsed [`FeedDocument`] into stored articles.
//!
//! [`prepare`] is pure: it derives guids and timestamps and drops repeated
//! guids. [`reconcile`] then applies the prepared set to one feed under the
//! configured [`ReconcilePolicy`], inside a single storage transaction.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::feed::FeedDocument;
use crate::storage::{Database, DatabaseError, NewArticle, ReconcileResult};

/// How a refresh treats articles already stored for the feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcilePolicy {
    /// Delete every stored article, then insert the document's entries.
    /// Read and starred flags are lost.
    #[default]
    Replace,
    /// Upsert by guid: retained articles keep their flags, new guids are
    /// inserted and guids missing from the document are deleted.
    Merge,
}

impl ReconcilePolicy {
    pub async fn apply(
        self,
        db: &Database,
        feed_id: i64,
        articles: &[NewArticle],
    ) -> Result<ReconcileResult, DatabaseError> {
        match self {
            Self::Replace => db.replace_articles(feed_id, articles).await,
            Self::Merge => db.merge_articles(feed_id, articles).await,
        }
    }
}

/// Articles to store for `document`, in document order.
///
/// The guid is the entry id (already falling back to the link, then `""`).
/// When several entries share a guid only the first is kept.
pub fn prepare(document: &FeedDocument) -> Vec<NewArticle> {
    let mut seen = HashSet::new();
    document
        .entries
        .iter()
        .filter(|entry| seen.insert(entry.id.as_str()))
        .map(|entry| NewArticle {
            guid: entry.id.clone(),
            title: entry.title.clone(),
            link: entry.link.clone(),
            description: entry.description.clone(),
            author: entry.author.clone(),
            published: entry.published_at().map(|t| t.timestamp()),
        })
        .collect()
}

/// Prepare `document` and apply it to `feed_id` in one transaction.
pub async fn reconcile(
    db: &Database,
    policy: ReconcilePolicy,
    feed_id: i64,
    document: &FeedDocument,
) -> Result<ReconcileResult, DatabaseError> {
    let articles = prepare(document);
    let dropped = document.entries.len() - articles.len();
    if dropped > 0 {
        tracing::debug!(feed_id = feed_id, dropped, "Skipped entries with repeated guids");
    }
    policy.apply(db, feed_id, &articles).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::RawEntry;
    use crate::storage::{ArticleFilter, NewFeed};
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn entry(id: &str, title: &str) -> RawEntry {
        RawEntry {
            id: id.to_string(),
            link: format!("https://example.com/{id}"),
            title: title.to_string(),
            description: String::new(),
            author: String::new(),
            published: None,
            updated: None,
        }
    }

    fn document(entries: Vec<RawEntry>) -> FeedDocument {
        FeedDocument {
            title: "Doc".to_string(),
            description: String::new(),
            link: String::new(),
            entries,
        }
    }

    #[test]
    fn test_prepare_dedups_and_keeps_order() {
        let doc = document(vec![
            entry("a", "A"),
            entry("b", "B"),
            entry("a", "A again"),
            entry("", "No id 1"),
            entry("", "No id 2"),
        ]);
        let prepared = prepare(&doc);
        let titles: Vec<_> = prepared.iter().map(|a| a.title.as_str()).collect();
        assert_eq!(titles, vec!["A", "B", "No id 1"]);
    }

    #[test]
    fn test_prepare_timestamp_fallback() {
        let updated = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let mut e = entry("a", "A");
        e.updated = Some(updated);
        let prepared = prepare(&document(vec![e, entry("b", "B")]));
        assert_eq!(prepared[0].published, Some(updated.timestamp()));
        assert_eq!(prepared[1].published, None);
    }

    #[test]
    fn test_policy_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: ReconcilePolicy,
        }
        let w: Wrapper = toml::from_str(r#"policy = "merge""#).unwrap();
        assert_eq!(w.policy, ReconcilePolicy::Merge);
        assert_eq!(ReconcilePolicy::default(), ReconcilePolicy::Replace);
    }

    #[tokio::test]
    async fn test_reconcile_under_each_policy() {
        let db = Database::open(":memory:").await.unwrap();
        let feed_id = db
            .create_feed(&NewFeed {
                url: "https://example.com/feed".to_string(),
                title: "Feed".to_string(),
                ..NewFeed::default()
            })
            .await
            .unwrap();

        let first = document(vec![entry("a", "A"), entry("b", "B")]);
        reconcile(&db, ReconcilePolicy::Replace, feed_id, &first)
            .await
            .unwrap();
        let stored = db.list_articles(&ArticleFilter::default()).await.unwrap();
        let a = stored.iter().find(|x| x.guid == "a").unwrap();
        db.set_starred(a.id, true).await.unwrap();

        let second = document(vec![entry("a", "A"), entry("c", "C")]);
        let result = reconcile(&db, ReconcilePolicy::Merge, feed_id, &second)
            .await
            .unwrap();
        assert_eq!((result.inserted, result.updated, result.deleted), (1, 1, 1));
        let stored = db.list_articles(&ArticleFilter::default()).await.unwrap();
        assert!(stored.iter().find(|x| x.guid == "a").unwrap().starred);

        let result = reconcile(&db, ReconcilePolicy::Replace, feed_id, &second)
            .await
            .unwrap();
        assert_eq!((result.inserted, result.updated, result.deleted), (2, 0, 2));
        let stored = db.list_articles(&ArticleFilter::default()).await.unwrap();
        assert!(stored.iter().all(|x| !x.starred));
    }
}
