//! feedvault: RSS/Atom subscriptions stored in SQLite.
//!
//! The [`service::Aggregator`] is the entry point. It fetches documents with
//! [`feed::FeedFetcher`], reconciles their entries into [`storage::Database`]
//! under a [`reconcile::ReconcilePolicy`], and answers folder, feed and
//! article queries.

pub mod config;
pub mod feed;
pub mod reconcile;
pub mod service;
pub mod storage;
pub mod util;

pub use config::Config;
pub use reconcile::ReconcilePolicy;
pub use service::{Aggregator, ServiceError};
pub use storage::Database;
