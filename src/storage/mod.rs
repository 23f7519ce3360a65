//! SQLite persistence for folders, feeds and articles.
//!
//! [`Database`] wraps a cloneable `sqlx` pool. Operations are split by entity
//! across `folders`, `feeds` and `articles`, all as inherent methods.

mod articles;
mod feeds;
mod folders;
mod schema;
mod types;

pub use articles::MAX_ARTICLES;
pub use schema::{Database, IN_MEMORY};
pub use types::{
    Article, ArticleFilter, DatabaseError, Feed, FeedSummary, FeedUpdate, Folder, NewArticle,
    NewFeed, ReconcileResult,
};
