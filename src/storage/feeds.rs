use sqlx::QueryBuilder;

use super::articles::insert_articles;
use super::schema::Database;
use super::types::{
    is_foreign_key_violation, is_unique_violation, DatabaseError, Feed, FeedSummary, FeedUpdate,
    NewArticle, NewFeed,
};

impl Database {
    // ========================================================================
    // Feed Queries
    // ========================================================================

    /// Active (not soft-deleted) feeds with folder name and unread count,
    /// ordered by title.
    pub async fn list_feeds(&self) -> Result<Vec<FeedSummary>, DatabaseError> {
        let feeds = sqlx::query_as::<_, FeedSummary>(
            r#"
            SELECT
                f.id, f.url, f.title, f.description, f.link, f.folder_id,
                f.last_updated, f.deleted,
                fo.name AS folder_name,
                COUNT(CASE WHEN a.read = 0 THEN 1 END) AS unread_count
            FROM feeds f
            LEFT JOIN folders fo ON fo.id = f.folder_id
            LEFT JOIN articles a ON a.feed_id = f.id
            WHERE f.deleted = 0
            GROUP BY f.id
            ORDER BY f.title COLLATE NOCASE, f.id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(feeds)
    }

    /// Single feed by id, including soft-deleted ones.
    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, url, title, description, link, folder_id, last_updated, deleted
            FROM feeds
            WHERE id = ?
        "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(feed)
    }

    /// Feed subscribed at exactly `url`, including soft-deleted ones.
    pub async fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>, DatabaseError> {
        let feed = sqlx::query_as::<_, Feed>(
            r#"
            SELECT id, url, title, description, link, folder_id, last_updated, deleted
            FROM feeds
            WHERE url = ?
        "#,
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(feed)
    }

    pub async fn count_active_feeds(&self) -> Result<i64, DatabaseError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM feeds WHERE deleted = 0")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Insert a feed with no articles, returning its id.
    ///
    /// # Errors
    ///
    /// - [`DatabaseError::Duplicate`] - the URL is already subscribed
    /// - [`DatabaseError::UnknownFolder`] - `folder_id` names no folder
    pub async fn create_feed(&self, feed: &NewFeed) -> Result<i64, DatabaseError> {
        let mut conn = self.pool.acquire().await?;
        let id = insert_feed(&mut *conn, feed, None).await?;
        tracing::info!(feed_id = id, url = %feed.url, "Feed created");
        Ok(id)
    }

    /// Insert a feed and its initial articles in one transaction.
    ///
    /// Returns the new feed id and the number of articles stored. The feed's
    /// `last_updated` is set, since its content was just fetched.
    pub async fn create_feed_with_articles(
        &self,
        feed: &NewFeed,
        articles: &[NewArticle],
    ) -> Result<(i64, u64), DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        let id = insert_feed(&mut *tx, feed, Some(now)).await?;
        let inserted = insert_articles(&mut *tx, id, articles, now).await?;

        tx.commit().await?;
        tracing::info!(feed_id = id, url = %feed.url, articles = inserted, "Feed created");
        Ok((id, inserted))
    }

    /// Apply a partial update. Only the supplied fields change.
    pub async fn update_feed(&self, id: i64, update: &FeedUpdate) -> Result<(), DatabaseError> {
        if update.is_empty() {
            return match self.get_feed(id).await? {
                Some(_) => Ok(()),
                None => Err(DatabaseError::not_found("feed", id)),
            };
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE feeds SET ");
        let mut fields = builder.separated(", ");
        if let Some(title) = &update.title {
            fields.push("title = ").push_bind_unseparated(title);
        }
        if let Some(folder_id) = update.folder {
            fields.push("folder_id = ").push_bind_unseparated(folder_id);
        }
        builder.push(" WHERE id = ").push_bind(id);

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| match (is_foreign_key_violation(&e), update.folder) {
                (true, Some(Some(folder_id))) => DatabaseError::UnknownFolder(folder_id),
                _ => DatabaseError::Other(e),
            })?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("feed", id));
        }
        tracing::debug!(feed_id = id, ?update, "Feed updated");
        Ok(())
    }

    /// Hide a feed from listings. The row and its articles stay.
    pub async fn soft_delete_feed(&self, id: i64) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE feeds SET deleted = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("feed", id));
        }
        tracing::info!(feed_id = id, "Feed deleted");
        Ok(())
    }
}

async fn insert_feed(
    conn: &mut sqlx::SqliteConnection,
    feed: &NewFeed,
    last_updated: Option<i64>,
) -> Result<i64, DatabaseError> {
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO feeds (url, title, description, link, folder_id, last_updated)
        VALUES (?, ?, ?, ?, ?, ?)
        RETURNING id
    "#,
    )
    .bind(&feed.url)
    .bind(&feed.title)
    .bind(&feed.description)
    .bind(&feed.link)
    .bind(feed.folder_id)
    .bind(last_updated)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            DatabaseError::Duplicate {
                entity: "feed",
                value: feed.url.clone(),
            }
        } else if let (true, Some(folder_id)) = (is_foreign_key_violation(&e), feed.folder_id) {
            DatabaseError::UnknownFolder(folder_id)
        } else {
            DatabaseError::Other(e)
        }
    })?;

    Ok(row.0)
}

#[cfg(test)]
mod tests {
    use crate::storage::{ArticleFilter, Database, DatabaseError, FeedUpdate, NewArticle, NewFeed};
    use pretty_assertions::assert_eq;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_feed(id: i64) -> NewFeed {
        NewFeed {
            url: format!("https://feed{}.example.com/rss", id),
            title: format!("Test Feed {}", id),
            description: "About things".to_string(),
            link: format!("https://feed{}.example.com/", id),
            folder_id: None,
        }
    }

    fn test_article(guid: &str, title: &str) -> NewArticle {
        NewArticle {
            guid: guid.to_string(),
            title: title.to_string(),
            link: format!("https://example.com/{}", guid),
            description: "Test summary".to_string(),
            author: String::new(),
            published: Some(1704067200),
        }
    }

    #[tokio::test]
    async fn test_create_and_get_feed() {
        let db = test_db().await;
        let id = db.create_feed(&test_feed(1)).await.unwrap();

        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.url, "https://feed1.example.com/rss");
        assert_eq!(feed.title, "Test Feed 1");
        assert_eq!(feed.description, "About things");
        assert_eq!(feed.last_updated, None);
        assert!(!feed.deleted);

        assert!(db.get_feed(id + 1).await.unwrap().is_none());

        let by_url = db
            .find_feed_by_url("https://feed1.example.com/rss")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_url.id, id);
        assert!(db
            .find_feed_by_url("https://other.example.com/rss")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_duplicate_url_rejected() {
        let db = test_db().await;
        db.create_feed(&test_feed(1)).await.unwrap();

        let err = db.create_feed(&test_feed(1)).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { entity: "feed", .. }));
        assert_eq!(db.count_active_feeds().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unknown_folder_rejected() {
        let db = test_db().await;
        let feed = NewFeed {
            folder_id: Some(77),
            ..test_feed(1)
        };
        let err = db.create_feed(&feed).await.unwrap_err();
        assert!(matches!(err, DatabaseError::UnknownFolder(77)));
    }

    #[tokio::test]
    async fn test_create_feed_with_articles_is_atomic() {
        let db = test_db().await;
        let articles = vec![test_article("a", "A"), test_article("b", "B")];
        let (id, inserted) = db
            .create_feed_with_articles(&test_feed(1), &articles)
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert!(db.get_feed(id).await.unwrap().unwrap().last_updated.is_some());

        // Conflicting URL: neither the feed nor its articles are written
        let err = db
            .create_feed_with_articles(&test_feed(1), &[test_article("c", "C")])
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { .. }));

        let all = db.list_articles(&ArticleFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_list_feeds_unread_counts_and_order() {
        let db = test_db().await;
        let b = NewFeed {
            title: "beta".to_string(),
            ..test_feed(1)
        };
        let a = NewFeed {
            title: "Alpha".to_string(),
            ..test_feed(2)
        };
        let (b_id, _) = db
            .create_feed_with_articles(&b, &[test_article("1", "One"), test_article("2", "Two")])
            .await
            .unwrap();
        db.create_feed(&a).await.unwrap();

        let articles = db
            .list_articles(&ArticleFilter {
                feed_id: Some(b_id),
                ..ArticleFilter::default()
            })
            .await
            .unwrap();
        db.set_read(articles[0].id, true).await.unwrap();

        let feeds = db.list_feeds().await.unwrap();
        let summary: Vec<_> = feeds
            .iter()
            .map(|f| (f.feed.title.as_str(), f.unread_count))
            .collect();
        assert_eq!(summary, vec![("Alpha", 0), ("beta", 1)]);
    }

    #[tokio::test]
    async fn test_update_feed_partial() {
        let db = test_db().await;
        let folder = db.create_folder("Tech").await.unwrap();
        let id = db.create_feed(&test_feed(1)).await.unwrap();

        db.update_feed(
            id,
            &FeedUpdate {
                title: Some("Renamed".to_string()),
                folder: None,
            },
        )
        .await
        .unwrap();
        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.title, "Renamed");
        assert_eq!(feed.folder_id, None);

        db.update_feed(
            id,
            &FeedUpdate {
                title: None,
                folder: Some(Some(folder)),
            },
        )
        .await
        .unwrap();
        let feed = db.get_feed(id).await.unwrap().unwrap();
        assert_eq!(feed.title, "Renamed");
        assert_eq!(feed.folder_id, Some(folder));

        db.update_feed(
            id,
            &FeedUpdate {
                title: None,
                folder: Some(None),
            },
        )
        .await
        .unwrap();
        assert_eq!(db.get_feed(id).await.unwrap().unwrap().folder_id, None);
    }

    #[tokio::test]
    async fn test_update_feed_errors() {
        let db = test_db().await;
        let id = db.create_feed(&test_feed(1)).await.unwrap();

        let err = db
            .update_feed(
                id,
                &FeedUpdate {
                    folder: Some(Some(404)),
                    ..FeedUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::UnknownFolder(404)));

        let err = db
            .update_feed(
                id + 100,
                &FeedUpdate {
                    title: Some("x".to_string()),
                    ..FeedUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { entity: "feed", .. }));

        let err = db
            .update_feed(id + 100, &FeedUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_soft_delete_hides_feed_keeps_articles() {
        let db = test_db().await;
        let (id, _) = db
            .create_feed_with_articles(&test_feed(1), &[test_article("a", "A")])
            .await
            .unwrap();

        db.soft_delete_feed(id).await.unwrap();

        assert!(db.list_feeds().await.unwrap().is_empty());
        assert_eq!(db.count_active_feeds().await.unwrap(), 0);
        assert!(db.get_feed(id).await.unwrap().unwrap().deleted);

        let articles = db.list_articles(&ArticleFilter::default()).await.unwrap();
        assert_eq!(articles.len(), 1);

        // URL stays taken by the soft-deleted row
        let err = db.create_feed(&test_feed(1)).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_soft_delete_missing_feed() {
        let db = test_db().await;
        let err = db.soft_delete_feed(5).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { id: 5, .. }));
    }
}
