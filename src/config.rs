//! Configuration file parser for ~/.config/feedvault/config.toml.
//!
//! The config file is optional: a missing or blank file yields `Config::default()`.
//! Unknown keys are accepted but logged, since they are usually typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::FetchSettings;
use crate::reconcile::ReconcilePolicy;
use crate::util::UrlPolicy;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration
// ============================================================================

/// Feeds subscribed on first run, when the database has no active feeds.
pub const DEFAULT_FEEDS: [&str; 8] = [
    "https://jvns.ca/atom.xml",
    "https://simonwillison.net/atom/everything/",
    "https://lucumr.pocoo.org/feed.atom",
    "https://samwho.dev/rss.xml",
    "https://blog.miguelgrinberg.com/feed",
    "https://world.hey.com/dhh/feed.atom",
    "https://herman.bearblog.dev/feed/",
    "https://harper.blog/index.xml",
];

/// Top-level configuration. Any subset of keys may be given.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite file. `None` means `feedvault.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log_level: String,

    pub request_timeout_secs: u64,

    pub max_feed_bytes: usize,

    pub user_agent: String,

    /// Permit feeds on loopback and private networks.
    pub allow_private_addresses: bool,

    /// Upper bound on feeds fetched at once by a full refresh.
    pub refresh_concurrency: usize,

    pub reconcile_policy: ReconcilePolicy,

    /// Subscribe to `default_feeds` when the database has no active feeds.
    pub seed_default_feeds: bool,

    pub default_feeds: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        let fetch = FetchSettings::default();
        Self {
            database_path: None,
            log_level: "info".to_string(),
            request_timeout_secs: fetch.timeout.as_secs(),
            max_feed_bytes: fetch.max_bytes,
            user_agent: fetch.user_agent,
            allow_private_addresses: false,
            refresh_concurrency: 10,
            reconcile_policy: ReconcilePolicy::default(),
            seed_default_feeds: true,
            default_feeds: DEFAULT_FEEDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "database_path",
        "log_level",
        "request_timeout_secs",
        "max_feed_bytes",
        "user_agent",
        "allow_private_addresses",
        "refresh_concurrency",
        "reconcile_policy",
        "seed_default_feeds",
        "default_feeds",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check the size before reading so a huge file is never loaded
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            policy = ?config.reconcile_policy,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Fetcher settings derived from this config.
    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_bytes: self.max_feed_bytes,
            url_policy: UrlPolicy {
                allow_private: self.allow_private_addresses,
            },
            user_agent: self.user_agent.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!(
            "feedvault_config_test_{}_{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.database_path, None);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.max_feed_bytes, 10 * 1024 * 1024);
        assert!(!config.allow_private_addresses);
        assert_eq!(config.refresh_concurrency, 10);
        assert_eq!(config.reconcile_policy, ReconcilePolicy::Replace);
        assert!(config.seed_default_feeds);
        assert_eq!(config.default_feeds.len(), 8);
        assert_eq!(config.default_feeds[0], "https://jvns.ca/atom.xml");
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedvault_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (dir, path) = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.refresh_concurrency, 10);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (dir, path) = write_config("partial", "reconcile_policy = \"merge\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.reconcile_policy, ReconcilePolicy::Merge);
        assert_eq!(config.request_timeout_secs, 30);
        assert!(config.seed_default_feeds);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let content = r#"
database_path = "/var/lib/feedvault/feeds.db"
log_level = "debug"
request_timeout_secs = 5
max_feed_bytes = 2048
user_agent = "test-agent"
allow_private_addresses = true
refresh_concurrency = 2
reconcile_policy = "replace"
seed_default_feeds = false
default_feeds = ["https://example.com/feed"]
"#;
        let (dir, path) = write_config("full", content);
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.database_path,
            Some(PathBuf::from("/var/lib/feedvault/feeds.db"))
        );
        assert_eq!(config.log_level, "debug");
        assert!(!config.seed_default_feeds);
        assert_eq!(config.default_feeds, vec!["https://example.com/feed"]);

        let settings = config.fetch_settings();
        assert_eq!(settings.timeout, Duration::from_secs(5));
        assert_eq!(settings.max_bytes, 2048);
        assert_eq!(settings.user_agent, "test-agent");
        assert!(settings.url_policy.allow_private);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (dir, path) = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_policy_rejected() {
        let (dir, path) = write_config("bad_policy", "reconcile_policy = \"sometimes\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (dir, path) = write_config("unknown", "log_level = \"warn\"\ntotally_fake_key = 1\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.log_level, "warn");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (dir, path) = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        std::fs::remove_dir_all(&dir).ok();
    }
}
