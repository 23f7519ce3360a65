//! Caller-facing commands and queries over feeds, folders and articles.
//!
//! [`Aggregator`] owns the injected [`Database`] and [`FeedFetcher`], validates
//! input, and maps storage and fetch failures onto [`ServiceError`].

use futures::stream::{self, StreamExt};
use serde::Serialize;
use thiserror::Error;

use crate::feed::{self, FeedFetcher, FeedPreview, FetchError, OpmlError, OpmlFeed};
use crate::reconcile::{self, ReconcilePolicy};
use crate::storage::{
    Article, ArticleFilter, Database, DatabaseError, Feed, FeedSummary, FeedUpdate, Folder,
    NewFeed, ReconcileResult,
};
use crate::util::clean_label;

const DEFAULT_REFRESH_CONCURRENCY: usize = 10;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    DuplicateConflict(String),

    /// Fetch or parse failed; nothing was stored.
    #[error("Invalid feed {url}: {source}")]
    InvalidFeed {
        url: String,
        #[source]
        source: FetchError,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Failed to export OPML: {0}")]
    Export(#[from] OpmlError),

    #[error(transparent)]
    Storage(DatabaseError),
}

impl ServiceError {
    /// True when the caller can fix the request; false for internal failures.
    pub fn is_caller_error(&self) -> bool {
        !matches!(self, Self::Storage(_) | Self::Export(_))
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::DuplicateConflict(_) => "duplicate_conflict",
            Self::InvalidFeed { .. } => "invalid_feed",
            Self::NotFound { .. } => "not_found",
            Self::Export(_) => "export",
            Self::Storage(_) => "storage",
        }
    }
}

impl From<DatabaseError> for ServiceError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Duplicate { .. } => Self::DuplicateConflict(err.to_string()),
            DatabaseError::NotFound { entity, id } => Self::NotFound { entity, id },
            DatabaseError::UnknownFolder(id) => {
                Self::InvalidInput(format!("folder {id} does not exist"))
            }
            other => {
                tracing::error!(error = %other, "Storage operation failed");
                Self::Storage(other)
            }
        }
    }
}

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub feed_id: i64,
    #[serde(flatten)]
    pub result: ReconcileResult,
    /// Non-empty when entries were recovered from malformed XML
    pub warnings: Vec<String>,
}

/// Per-feed result of [`Aggregator::refresh_all`].
#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    pub feed_id: i64,
    pub url: String,
    pub report: Option<RefreshReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub errors: Vec<ImportFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportFailure {
    pub url: String,
    pub error: String,
}

// ============================================================================
// Aggregator
// ============================================================================

#[derive(Debug, Clone)]
pub struct Aggregator {
    db: Database,
    fetcher: FeedFetcher,
    policy: ReconcilePolicy,
    refresh_concurrency: usize,
}

impl Aggregator {
    pub fn new(db: Database, fetcher: FeedFetcher) -> Self {
        Self {
            db,
            fetcher,
            policy: ReconcilePolicy::default(),
            refresh_concurrency: DEFAULT_REFRESH_CONCURRENCY,
        }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_refresh_concurrency(mut self, limit: usize) -> Self {
        self.refresh_concurrency = limit.max(1);
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.policy
    }

    // ========================================================================
    // Subscription Lifecycle
    // ========================================================================

    /// Subscribe to the feed at `url`, storing it with its current entries.
    ///
    /// A URL that is already subscribed (even soft-deleted) is rejected before
    /// any request is made. Fetch and parse failures abort with
    /// [`ServiceError::InvalidFeed`] and leave nothing behind.
    pub async fn subscribe_feed(&self, url: &str, folder_id: Option<i64>) -> Result<i64> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ServiceError::InvalidInput("feed URL must not be empty".into()));
        }

        if let Some(existing) = self.db.find_feed_by_url(url).await? {
            return Err(ServiceError::DuplicateConflict(format!(
                "feed already exists: {} (id {})",
                url, existing.id
            )));
        }

        let parsed = self.fetch(url).await?;
        let articles = reconcile::prepare(&parsed.document);
        let document = parsed.document;
        let new_feed = NewFeed {
            url: url.to_owned(),
            title: document.title,
            description: document.description,
            link: document.link,
            folder_id,
        };

        let (id, inserted) = self
            .db
            .create_feed_with_articles(&new_feed, &articles)
            .await?;
        tracing::info!(feed_id = id, url = %url, articles = inserted, "Subscribed to feed");
        Ok(id)
    }

    /// Fetch the feed again and reconcile its articles under the configured policy.
    ///
    /// Returns `Ok(None)` when no feed has this id. On failure the stored
    /// articles and `last_updated` are left as they were.
    pub async fn refresh_feed(&self, id: i64) -> Result<Option<RefreshReport>> {
        let Some(feed) = self.db.get_feed(id).await? else {
            tracing::debug!(feed_id = id, "Refresh requested for unknown feed");
            return Ok(None);
        };

        let parsed = self.fetch(&feed.url).await?;
        let result = reconcile::reconcile(&self.db, self.policy, id, &parsed.document).await?;

        tracing::info!(
            feed_id = id,
            inserted = result.inserted,
            updated = result.updated,
            deleted = result.deleted,
            "Feed refreshed"
        );
        Ok(Some(RefreshReport {
            feed_id: id,
            result,
            warnings: parsed.warnings,
        }))
    }

    /// Refresh every listed feed, at most `refresh_concurrency` at a time.
    /// One feed failing does not stop the others.
    pub async fn refresh_all(&self) -> Result<Vec<RefreshOutcome>> {
        let feeds = self.db.list_feeds().await?;

        let mut outcomes: Vec<RefreshOutcome> = stream::iter(feeds)
            .map(|summary| async move {
                let FeedSummary { feed, .. } = summary;
                match self.refresh_feed(feed.id).await {
                    Ok(report) => RefreshOutcome {
                        feed_id: feed.id,
                        url: feed.url,
                        report,
                        error: None,
                    },
                    Err(e) => RefreshOutcome {
                        feed_id: feed.id,
                        url: feed.url,
                        report: None,
                        error: Some(e.to_string()),
                    },
                }
            })
            .buffer_unordered(self.refresh_concurrency)
            .collect()
            .await;

        outcomes.sort_by_key(|o| o.feed_id);
        let failed = outcomes.iter().filter(|o| o.error.is_some()).count();
        tracing::info!(feeds = outcomes.len(), failed, "Refresh complete");
        Ok(outcomes)
    }

    /// Fetch and parse `url` without storing anything.
    pub async fn preview_feed(&self, url: &str) -> Result<FeedPreview> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ServiceError::InvalidInput("feed URL must not be empty".into()));
        }
        Ok(self.fetch(url).await?.into())
    }

    /// Subscribe to each of `urls` when no active feed exists yet.
    /// Returns how many subscriptions succeeded; failures are logged and skipped.
    pub async fn seed_default_feeds(&self, urls: &[String]) -> Result<usize> {
        if self.db.count_active_feeds().await? > 0 {
            return Ok(0);
        }

        let results: Vec<_> = stream::iter(urls)
            .map(|url| async move { (url, self.subscribe_feed(url, None).await) })
            .buffered(self.refresh_concurrency)
            .collect()
            .await;

        let mut seeded = 0;
        for (url, result) in results {
            match result {
                Ok(_) => seeded += 1,
                Err(ServiceError::Storage(e)) => return Err(ServiceError::Storage(e)),
                Err(e) => tracing::warn!(url = %url, error = %e, "Skipping default feed"),
            }
        }
        tracing::info!(seeded, total = urls.len(), "Seeded default feeds");
        Ok(seeded)
    }

    async fn fetch(&self, url: &str) -> Result<feed::ParsedFeed> {
        self.fetcher.fetch_document(url).await.map_err(|source| {
            tracing::warn!(url = %url, error = %source, "Feed fetch failed");
            ServiceError::InvalidFeed {
                url: url.to_owned(),
                source,
            }
        })
    }

    // ========================================================================
    // OPML
    // ========================================================================

    /// Subscribe to every feed outline in `content`.
    ///
    /// Category outlines map to folders by name, created when missing.
    /// Per-feed failures are collected in the report; storage failures abort.
    pub async fn import_opml(&self, content: &str) -> Result<ImportReport> {
        let outlines = feed::parse_opml(content, &self.fetcher.settings().url_policy)
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;

        let mut report = ImportReport::default();
        for outline in outlines {
            let folder_id = match outline.folder.as_deref() {
                Some(name) => Some(self.folder_for_import(name).await?),
                None => None,
            };
            match self.subscribe_feed(&outline.xml_url, folder_id).await {
                Ok(_) => report.imported += 1,
                Err(ServiceError::Storage(e)) => return Err(ServiceError::Storage(e)),
                Err(e) => {
                    tracing::warn!(url = %outline.xml_url, error = %e, "OPML entry not imported");
                    report.errors.push(ImportFailure {
                        url: outline.xml_url,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            imported = report.imported,
            failed = report.errors.len(),
            "OPML import complete"
        );
        Ok(report)
    }

    async fn folder_for_import(&self, name: &str) -> Result<i64> {
        let Some(name) = clean_label(name) else {
            return Err(ServiceError::InvalidInput("folder name must not be empty".into()));
        };
        let existing = self.db.list_folders().await?;
        if let Some(folder) = existing.into_iter().find(|f| f.name == name) {
            return Ok(folder.id);
        }
        Ok(self.db.create_folder(&name).await?)
    }

    /// All listed feeds as OPML, grouped by folder.
    pub async fn export_opml(&self) -> Result<String> {
        let feeds: Vec<OpmlFeed> = self
            .db
            .list_feeds()
            .await?
            .into_iter()
            .map(|summary| OpmlFeed {
                title: summary.feed.title,
                xml_url: summary.feed.url,
                html_url: Some(summary.feed.link).filter(|link| !link.is_empty()),
                folder: summary.folder_name,
            })
            .collect();
        Ok(feed::export_opml(&feeds)?)
    }

    // ========================================================================
    // Folders
    // ========================================================================

    pub async fn list_folders(&self) -> Result<Vec<Folder>> {
        Ok(self.db.list_folders().await?)
    }

    pub async fn create_folder(&self, name: &str) -> Result<i64> {
        let name = required_label(name, "folder name")?;
        Ok(self.db.create_folder(&name).await?)
    }

    pub async fn rename_folder(&self, id: i64, name: &str) -> Result<()> {
        let name = required_label(name, "folder name")?;
        Ok(self.db.rename_folder(id, &name).await?)
    }

    pub async fn delete_folder(&self, id: i64) -> Result<()> {
        Ok(self.db.delete_folder(id).await?)
    }

    // ========================================================================
    // Feeds
    // ========================================================================

    pub async fn list_feeds(&self) -> Result<Vec<FeedSummary>> {
        Ok(self.db.list_feeds().await?)
    }

    pub async fn get_feed(&self, id: i64) -> Result<Feed> {
        self.db
            .get_feed(id)
            .await?
            .ok_or(ServiceError::NotFound { entity: "feed", id })
    }

    pub async fn update_feed(&self, id: i64, update: FeedUpdate) -> Result<()> {
        let update = FeedUpdate {
            title: update
                .title
                .map(|t| required_label(&t, "feed title"))
                .transpose()?,
            folder: update.folder,
        };
        Ok(self.db.update_feed(id, &update).await?)
    }

    /// Soft delete: the feed leaves every listing, its articles stay.
    pub async fn unsubscribe_feed(&self, id: i64) -> Result<()> {
        Ok(self.db.soft_delete_feed(id).await?)
    }

    // ========================================================================
    // Articles
    // ========================================================================

    pub async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>> {
        Ok(self.db.list_articles(filter).await?)
    }

    pub async fn get_article(&self, id: i64) -> Result<Article> {
        self.db
            .get_article(id)
            .await?
            .ok_or(ServiceError::NotFound {
                entity: "article",
                id,
            })
    }

    pub async fn set_read(&self, id: i64, read: bool) -> Result<()> {
        Ok(self.db.set_read(id, read).await?)
    }

    pub async fn set_starred(&self, id: i64, starred: bool) -> Result<()> {
        Ok(self.db.set_starred(id, starred).await?)
    }

    pub async fn mark_all_read(&self, feed_id: Option<i64>) -> Result<u64> {
        Ok(self.db.mark_all_read(feed_id).await?)
    }
}

fn required_label(value: &str, what: &str) -> Result<String> {
    clean_label(value).ok_or_else(|| ServiceError::InvalidInput(format!("{what} must not be empty")))
}
