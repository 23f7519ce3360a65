use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use feedvault::feed::FeedFetcher;
use feedvault::storage::{ArticleFilter, Database, FeedUpdate};
use feedvault::{Aggregator, Config, ServiceError};

/// Get the config directory path (~/.config/feedvault/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedvault"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedvault",
    version,
    about = "RSS/Atom feed aggregator. Results are printed as JSON."
)]
struct Args {
    /// Config file (default: ~/.config/feedvault/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// SQLite database file, or ":memory:"
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Do not subscribe to the default feeds on an empty database
    #[arg(long, global = true)]
    no_seed: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Subscribe to a feed URL
    Subscribe {
        url: String,
        #[arg(long)]
        folder: Option<i64>,
    },
    /// Refresh one feed, or every feed when no id is given
    Refresh { id: Option<i64> },
    /// List feeds with unread counts
    Feeds,
    /// Show one feed
    Feed { id: i64 },
    /// Rename a feed or move it between folders
    UpdateFeed {
        id: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "no_folder")]
        folder: Option<i64>,
        /// Remove the feed from its folder
        #[arg(long)]
        no_folder: bool,
    },
    /// Unsubscribe from a feed (its articles are kept)
    Unsubscribe { id: i64 },
    /// List articles, newest first
    Articles {
        #[arg(long)]
        feed: Option<i64>,
        #[arg(long)]
        read: Option<bool>,
        #[arg(long)]
        starred: Option<bool>,
        /// Substring matched against title and description
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = ArticleFilter::DEFAULT_LIMIT)]
        limit: u32,
    },
    /// Show one article
    Article { id: i64 },
    /// Mark an article read
    Read {
        id: i64,
        #[arg(long)]
        unread: bool,
    },
    /// Star an article
    Star {
        id: i64,
        #[arg(long)]
        unstar: bool,
    },
    /// Mark every article read, optionally for one feed
    MarkAllRead {
        #[arg(long)]
        feed: Option<i64>,
    },
    /// List folders
    Folders,
    /// Create a folder
    FolderAdd { name: String },
    /// Rename a folder
    FolderRename { id: i64, name: String },
    /// Delete a folder (its feeds become unfiled)
    FolderRm { id: i64 },
    /// Fetch and parse a feed without storing it
    Preview { url: String },
    /// Subscribe to every feed in an OPML file
    Import { file: PathBuf },
    /// Print subscriptions as OPML
    Export,
}

impl Command {
    /// Commands that never read stored feeds skip first-run seeding.
    fn wants_seed(&self) -> bool {
        !matches!(self, Command::Preview { .. } | Command::Import { .. })
    }
}

#[derive(Serialize)]
struct Created {
    id: i64,
}

#[derive(Serialize)]
struct Changed {
    ok: bool,
}

#[derive(Serialize)]
struct Marked {
    marked: u64,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
    println!("{out}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(1);
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(args, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => match e.downcast_ref::<ServiceError>() {
            Some(service_err) => {
                let body = ErrorBody {
                    error: service_err.kind(),
                    message: service_err.to_string(),
                };
                match serde_json::to_string(&body) {
                    Ok(json) => eprintln!("{json}"),
                    Err(_) => eprintln!("Error: {service_err}"),
                }
                if service_err.is_caller_error() {
                    ExitCode::from(2)
                } else {
                    ExitCode::from(1)
                }
            }
            None => {
                eprintln!("Error: {e:#}");
                ExitCode::from(1)
            }
        },
    }
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => get_config_dir()?.join("config.toml"),
    };
    Config::load(&path).with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Resolve the database location, creating the config directory when the
/// default location is used.
fn database_path(args: &Args, config: &Config) -> Result<String> {
    if let Some(path) = args.db.as_ref().or(config.database_path.as_ref()) {
        return path
            .to_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"));
    }

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        tracing::info!(path = %config_dir.display(), "Created config directory");

        // User-only access
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) =
                std::fs::set_permissions(&config_dir, std::fs::Permissions::from_mode(0o700))
            {
                tracing::warn!(
                    path = %config_dir.display(),
                    error = %e,
                    "Failed to set config directory permissions to 0700"
                );
            }
        }
    }

    config_dir
        .join("feedvault.db")
        .to_str()
        .map(str::to_owned)
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))
}

fn read_opml_file(file: &Path) -> Result<String> {
    let canonical = file
        .canonicalize()
        .with_context(|| format!("Failed to resolve import file: {}", file.display()))?;
    let metadata = std::fs::metadata(&canonical)?;
    if !metadata.is_file() {
        anyhow::bail!("Import path must be a regular file");
    }
    std::fs::read_to_string(&canonical)
        .with_context(|| format!("Failed to read import file: {}", canonical.display()))
}

async fn run(args: Args, config: Config) -> Result<()> {
    let db_path = database_path(&args, &config)?;
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {db_path}"))?;

    let fetcher = FeedFetcher::new(config.fetch_settings()).context("Failed to build HTTP client")?;
    let aggregator = Aggregator::new(db.clone(), fetcher)
        .with_policy(config.reconcile_policy)
        .with_refresh_concurrency(config.refresh_concurrency);

    if config.seed_default_feeds && !args.no_seed && args.command.wants_seed() {
        aggregator.seed_default_feeds(&config.default_feeds).await?;
    }

    let result = execute(&aggregator, args.command).await;
    db.close().await;
    result
}

async fn execute(agg: &Aggregator, command: Command) -> Result<()> {
    match command {
        Command::Subscribe { url, folder } => {
            let id = agg.subscribe_feed(&url, folder).await?;
            print_json(&Created { id })
        }
        Command::Refresh { id: Some(id) } => print_json(&agg.refresh_feed(id).await?),
        Command::Refresh { id: None } => print_json(&agg.refresh_all().await?),
        Command::Feeds => print_json(&agg.list_feeds().await?),
        Command::Feed { id } => print_json(&agg.get_feed(id).await?),
        Command::UpdateFeed {
            id,
            title,
            folder,
            no_folder,
        } => {
            let folder = if no_folder { Some(None) } else { folder.map(Some) };
            agg.update_feed(id, FeedUpdate { title, folder }).await?;
            print_json(&Changed { ok: true })
        }
        Command::Unsubscribe { id } => {
            agg.unsubscribe_feed(id).await?;
            print_json(&Changed { ok: true })
        }
        Command::Articles {
            feed,
            read,
            starred,
            search,
            limit,
        } => {
            let filter = ArticleFilter {
                feed_id: feed,
                read,
                starred,
                search,
                limit,
            };
            print_json(&agg.list_articles(&filter).await?)
        }
        Command::Article { id } => print_json(&agg.get_article(id).await?),
        Command::Read { id, unread } => {
            agg.set_read(id, !unread).await?;
            print_json(&Changed { ok: true })
        }
        Command::Star { id, unstar } => {
            agg.set_starred(id, !unstar).await?;
            print_json(&Changed { ok: true })
        }
        Command::MarkAllRead { feed } => {
            let marked = agg.mark_all_read(feed).await?;
            print_json(&Marked { marked })
        }
        Command::Folders => print_json(&agg.list_folders().await?),
        Command::FolderAdd { name } => {
            let id = agg.create_folder(&name).await?;
            print_json(&Created { id })
        }
        Command::FolderRename { id, name } => {
            agg.rename_folder(id, &name).await?;
            print_json(&Changed { ok: true })
        }
        Command::FolderRm { id } => {
            agg.delete_folder(id).await?;
            print_json(&Changed { ok: true })
        }
        Command::Preview { url } => print_json(&agg.preview_feed(&url).await?),
        Command::Import { file } => {
            let content = read_opml_file(&file)?;
            print_json(&agg.import_opml(&content).await?)
        }
        Command::Export => {
            let opml = agg.export_opml().await?;
            println!("{opml}");
            Ok(())
        }
    }
}
