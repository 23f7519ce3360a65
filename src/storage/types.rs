use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Storage-layer errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A unique constraint rejected the write (feed URL, folder name)
    #[error("{entity} already exists: {value}")]
    Duplicate { entity: &'static str, value: String },

    /// A targeted read or mutation named a row that does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// A feed referenced a folder id that does not exist
    #[error("Folder {0} does not exist")]
    UnknownFolder(i64),

    #[error("Database migration failed: {0}")]
    Migration(String),

    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    pub(crate) fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(e) if e.is_unique_violation())
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(e) if e.is_foreign_key_violation())
}

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Folder {
    pub id: i64,
    pub name: String,
}

/// Feed row. Soft-deleted feeds keep their row with `deleted = true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub folder_id: Option<i64>,
    /// Unix seconds of the last successful reconcile
    pub last_updated: Option<i64>,
    pub deleted: bool,
}

/// Feed as listed to clients: joined folder name and unread count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct FeedSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub feed: Feed,
    pub folder_name: Option<String>,
    pub unread_count: i64,
}

#[derive(Debug, Clone, Default)]
pub struct NewFeed {
    pub url: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub folder_id: Option<i64>,
}

/// Partial feed update. `None` leaves a field untouched; `folder: Some(None)`
/// moves the feed out of its folder.
#[derive(Debug, Clone, Default)]
pub struct FeedUpdate {
    pub title: Option<String>,
    pub folder: Option<Option<i64>>,
}

impl FeedUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.folder.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub feed_title: String,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub author: String,
    /// Unix seconds; `None` when the entry carried no usable date
    pub published: Option<i64>,
    pub read: bool,
    pub starred: bool,
    pub created_at: i64,
}

/// Article content as produced by the reconciler, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub guid: String,
    pub title: String,
    pub link: String,
    pub description: String,
    pub author: String,
    pub published: Option<i64>,
}

/// Filters for [`Database::list_articles`](super::Database::list_articles),
/// combined with AND.
#[derive(Debug, Clone)]
pub struct ArticleFilter {
    pub feed_id: Option<i64>,
    pub read: Option<bool>,
    pub starred: Option<bool>,
    /// Case-insensitive substring of title or description. Blank is ignored.
    pub search: Option<String>,
    pub limit: u32,
}

impl ArticleFilter {
    pub const DEFAULT_LIMIT: u32 = 100;
}

impl Default for ArticleFilter {
    fn default() -> Self {
        Self {
            feed_id: None,
            read: None,
            starred: None,
            search: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// Row counts from one reconcile transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileResult {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
}
