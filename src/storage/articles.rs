use std::collections::HashSet;

use sqlx::{QueryBuilder, SqliteConnection};

use super::schema::Database;
use super::types::{Article, ArticleFilter, DatabaseError, NewArticle, ReconcileResult};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles any single listing returns
pub const MAX_ARTICLES: u32 = 2000;

/// Rows per multi-row INSERT (8 binds each, well under SQLite's variable limit)
const BATCH_SIZE: usize = 50;

const ARTICLE_COLUMNS: &str = "SELECT a.id, a.feed_id, f.title AS feed_title, a.guid, a.title, \
     a.link, a.description, a.author, a.published, a.read, a.starred, a.created_at \
     FROM articles a JOIN feeds f ON f.id = a.feed_id";

impl Database {
    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Articles matching `filter`, newest first.
    ///
    /// Undated articles sort last; ties keep insertion order. `limit` is capped
    /// at [`MAX_ARTICLES`] and a limit of zero returns nothing.
    pub async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>, DatabaseError> {
        let limit = filter.limit.min(MAX_ARTICLES);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(ARTICLE_COLUMNS);
        builder.push(" WHERE 1 = 1");

        if let Some(feed_id) = filter.feed_id {
            builder.push(" AND a.feed_id = ").push_bind(feed_id);
        }
        if let Some(read) = filter.read {
            builder.push(" AND a.read = ").push_bind(read);
        }
        if let Some(starred) = filter.starred {
            builder.push(" AND a.starred = ").push_bind(starred);
        }
        if let Some(term) = filter.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", escape_like(term));
            builder
                .push(" AND (a.title LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR a.description LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }

        // DESC puts NULL published last in SQLite
        builder
            .push(" ORDER BY a.published DESC, a.id ASC LIMIT ")
            .push_bind(i64::from(limit));

        let articles = builder
            .build_query_as::<Article>()
            .fetch_all(&self.pool)
            .await?;
        Ok(articles)
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>, DatabaseError> {
        let sql = format!("{ARTICLE_COLUMNS} WHERE a.id = ?");
        let article = sqlx::query_as::<_, Article>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(article)
    }

    // ========================================================================
    // Article State
    // ========================================================================

    pub async fn set_read(&self, id: i64, read: bool) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE articles SET read = ? WHERE id = ?")
            .bind(read)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("article", id));
        }
        Ok(())
    }

    pub async fn set_starred(&self, id: i64, starred: bool) -> Result<(), DatabaseError> {
        let result = sqlx::query("UPDATE articles SET starred = ? WHERE id = ?")
            .bind(starred)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("article", id));
        }
        Ok(())
    }

    /// Mark unread articles as read, in one feed or everywhere.
    /// Returns the number of articles that changed.
    pub async fn mark_all_read(&self, feed_id: Option<i64>) -> Result<u64, DatabaseError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE articles SET read = 1 WHERE read = 0");
        if let Some(feed_id) = feed_id {
            builder.push(" AND feed_id = ").push_bind(feed_id);
        }
        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // Reconcile Transactions
    // ========================================================================

    /// Replace every article of a feed with `articles`, in one transaction.
    ///
    /// Read and starred flags do not survive. The transaction opens by stamping
    /// the feed's `last_updated`, which takes the SQLite write lock before any
    /// article is touched, so concurrent refreshes of one feed serialize.
    pub async fn replace_articles(
        &self,
        feed_id: i64,
        articles: &[NewArticle],
    ) -> Result<ReconcileResult, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        if !touch_feed(&mut *tx, feed_id, now).await? {
            tx.rollback().await?;
            return Err(DatabaseError::not_found("feed", feed_id));
        }

        let deleted = sqlx::query("DELETE FROM articles WHERE feed_id = ?")
            .bind(feed_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let inserted = insert_articles(&mut *tx, feed_id, articles, now).await?;

        tx.commit().await?;

        let result = ReconcileResult {
            inserted,
            updated: 0,
            deleted,
        };
        tracing::debug!(feed_id = feed_id, ?result, "Articles replaced");
        Ok(result)
    }

    /// Upsert `articles` by guid and delete the feed's articles whose guid is
    /// absent. Retained articles get fresh metadata and keep their flags.
    ///
    /// Locking is the same as [`Database::replace_articles`].
    pub async fn merge_articles(
        &self,
        feed_id: i64,
        articles: &[NewArticle],
    ) -> Result<ReconcileResult, DatabaseError> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        if !touch_feed(&mut *tx, feed_id, now).await? {
            tx.rollback().await?;
            return Err(DatabaseError::not_found("feed", feed_id));
        }

        let existing: HashSet<String> =
            sqlx::query_as::<_, (String,)>("SELECT guid FROM articles WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_all(&mut *tx)
                .await?
                .into_iter()
                .map(|(guid,)| guid)
                .collect();

        let mut seen = HashSet::new();
        let incoming: Vec<&NewArticle> = articles
            .iter()
            .filter(|a| seen.insert(a.guid.as_str()))
            .collect();

        let absent: Vec<&String> = existing.iter().filter(|g| !seen.contains(g.as_str())).collect();
        let mut deleted = 0;
        for chunk in absent.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("DELETE FROM articles WHERE feed_id = ");
            builder.push_bind(feed_id).push(" AND guid IN (");
            let mut guids = builder.separated(", ");
            for guid in chunk {
                guids.push_bind(guid.as_str());
            }
            guids.push_unseparated(")");
            deleted += builder.build().execute(&mut *tx).await?.rows_affected();
        }

        let (retained, fresh): (Vec<&NewArticle>, Vec<&NewArticle>) = incoming
            .into_iter()
            .partition(|a| existing.contains(&a.guid));

        let mut updated = 0;
        for article in &retained {
            updated += sqlx::query(
                r#"
                UPDATE articles
                SET title = ?, link = ?, description = ?, author = ?, published = ?
                WHERE feed_id = ? AND guid = ?
            "#,
            )
            .bind(&article.title)
            .bind(&article.link)
            .bind(&article.description)
            .bind(&article.author)
            .bind(article.published)
            .bind(feed_id)
            .bind(&article.guid)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        let fresh: Vec<NewArticle> = fresh.into_iter().cloned().collect();
        let inserted = insert_articles(&mut *tx, feed_id, &fresh, now).await?;

        tx.commit().await?;

        let result = ReconcileResult {
            inserted,
            updated,
            deleted,
        };
        tracing::debug!(feed_id = feed_id, ?result, "Articles merged");
        Ok(result)
    }
}

/// Stamp `last_updated`; false when the feed row does not exist.
async fn touch_feed(
    conn: &mut SqliteConnection,
    feed_id: i64,
    now: i64,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE feeds SET last_updated = ? WHERE id = ?")
        .bind(now)
        .bind(feed_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Batch-insert articles in the given order. Guids already present for the
/// feed are skipped, so the first occurrence of a repeated guid wins.
pub(super) async fn insert_articles(
    conn: &mut SqliteConnection,
    feed_id: i64,
    articles: &[NewArticle],
    now: i64,
) -> Result<u64, sqlx::Error> {
    let mut inserted = 0;

    for chunk in articles.chunks(BATCH_SIZE) {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "INSERT OR IGNORE INTO articles \
             (feed_id, guid, title, link, description, author, published, created_at) ",
        );
        builder.push_values(chunk, |mut b, article| {
            b.push_bind(feed_id)
                .push_bind(&article.guid)
                .push_bind(&article.title)
                .push_bind(&article.link)
                .push_bind(&article.description)
                .push_bind(&article.author)
                .push_bind(article.published)
                .push_bind(now);
        });
        inserted += builder.build().execute(&mut *conn).await?.rows_affected();
    }

    Ok(inserted)
}

/// Escape `%`, `_` and the escape character itself for `LIKE ... ESCAPE '\'`.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
