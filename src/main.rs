use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use offsync::cache::{CacheLayer, CacheResult, CachedItem, ContentCache, FlagUpdate};
use offsync::config::Config;
use offsync::connectivity::{ConnectivityMonitor, ConnectivityProbe, Reachability};
use offsync::content::{ContentKind, EventItem, NewsItem};
use offsync::db::{Store, StoreMode};
use offsync::queue::{ActionQueue, ActionType, TargetType};
use offsync::quota::{QuotaReporter, SqliteEstimator};
use offsync::remote::{FetchParams, HttpRemote};
use offsync::settings::Settings;
use offsync::sync::{partition_by_target, Backoff, SyncDriver};

#[derive(Parser, Debug)]
#[command(name = "offsync")]
#[command(about = "Offline content cache and pending-action sync queue")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Store file, overriding storage.path
  #[arg(long)]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Store, queue and quota summary
  Status,
  /// Refresh content from the remote, falling back to the cache
  Fetch {
    #[arg(value_enum, default_value_t = KindArg::All)]
    kind: KindArg,
    #[arg(long)]
    category: Option<String>,
  },
  /// Show cached content without touching the network
  List {
    #[arg(value_enum)]
    kind: KindArg,
    #[arg(short, long)]
    limit: Option<usize>,
  },
  /// Mark a cached news item read or an event attended
  Mark {
    #[arg(value_enum)]
    kind: KindArg,
    id: String,
    /// Clear the flag instead of setting it
    #[arg(long)]
    unset: bool,
  },
  /// Queue an action for replay
  Enqueue {
    action_type: ActionType,
    target_type: TargetType,
    target_id: String,
    /// JSON payload
    #[arg(long, default_value = "{}")]
    payload: String,
  },
  /// Show queued actions
  Queue {
    #[arg(short, long, default_value_t = 20)]
    limit: usize,
    /// Group unsynced actions by target in replay order
    #[arg(long)]
    by_target: bool,
  },
  /// Drain the queue once
  Sync,
  /// Probe connectivity and drain whenever the remote is reachable
  Watch,
  /// Drop cached content older than the configured max age
  Evict {
    /// Override cache.max_age_days
    #[arg(long)]
    days: Option<u64>,
  },
  /// Drop all cached content of a kind
  Clear {
    #[arg(value_enum)]
    kind: KindArg,
  },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum KindArg {
  News,
  Events,
  All,
}

impl KindArg {
  fn includes(self, kind: ContentKind) -> bool {
    match self {
      Self::All => true,
      Self::News => kind == ContentKind::News,
      Self::Events => kind == ContentKind::Events,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;
  let _log_guard = offsync::logging::init(&config.logging)?;

  let store_path = match args.store.or_else(|| config.storage.path.clone()) {
    Some(path) => path,
    None => Store::default_path()?,
  };
  let (store, mode) = Store::open_or_memory(&store_path)?;
  if mode == StoreMode::MemoryOnly {
    eprintln!(
      "warning: {} is unavailable, nothing will be kept after exit",
      store_path.display()
    );
  }

  match args.command {
    Command::Status => status(&store, &config)?,
    Command::Fetch { kind, category } => fetch(&store, &config, kind, category).await?,
    Command::List { kind, limit } => {
      let limit = limit.unwrap_or(config.cache.list_limit);
      if kind.includes(ContentKind::News) {
        print_news(&ContentCache::<NewsItem>::new(store.clone()).list(limit));
      }
      if kind.includes(ContentKind::Events) {
        print_events(&ContentCache::<EventItem>::new(store.clone()).list(limit));
      }
    }
    Command::Mark { kind, id, unset } => {
      let result = match kind {
        KindArg::News => ContentCache::<NewsItem>::new(store.clone()).mark_flag(&id, !unset)?,
        KindArg::Events => ContentCache::<EventItem>::new(store.clone()).mark_flag(&id, !unset)?,
        KindArg::All => return Err(eyre!("Pick news or events to mark")),
      };
      if result == FlagUpdate::NotFound {
        println!("{} is not cached", id);
      }
    }
    Command::Enqueue {
      action_type,
      target_type,
      target_id,
      payload,
    } => {
      let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| eyre!("Invalid payload JSON: {}", e))?;
      let action =
        ActionQueue::new(store.clone()).enqueue(action_type, &target_id, target_type, payload)?;
      println!("queued {} {} {}", action.id, action.action_type, action.target_id);
    }
    Command::Queue { limit, by_target } => {
      let queue = ActionQueue::new(store.clone());
      if by_target {
        let pending = queue.list_unsynced()?;
        for (target, actions) in partition_by_target(&pending) {
          println!("{}", target);
          for action in actions {
            println!("  {} {} @{}", action.id, action.action_type, action.timestamp);
          }
        }
      } else {
        for action in queue.list_recent(limit)? {
          let state = if action.synced { "synced" } else { "pending" };
          println!(
            "{} {:<8} {:<8} {} ({})",
            action.id, action.action_type, action.target_type, action.target_id, state
          );
        }
      }
    }
    Command::Sync => sync_once(&store, &config).await?,
    Command::Watch => watch(&store, &config).await?,
    Command::Evict { days } => {
      let max_age = match days {
        Some(days) => Duration::from_secs(days * 24 * 60 * 60),
        None => config.cache.max_age(),
      };
      let news = ContentCache::<NewsItem>::new(store.clone()).evict_older_than(max_age)?;
      let events = ContentCache::<EventItem>::new(store.clone()).evict_older_than(max_age)?;
      println!("evicted {} news, {} events", news, events);
    }
    Command::Clear { kind } => {
      let mut removed = 0;
      if kind.includes(ContentKind::News) {
        removed += ContentCache::<NewsItem>::new(store.clone()).clear()?;
      }
      if kind.includes(ContentKind::Events) {
        removed += ContentCache::<EventItem>::new(store.clone()).clear()?;
      }
      println!("cleared {} items", removed);
    }
  }

  store.close()?;
  Ok(())
}

fn http_remote(config: &Config) -> Result<HttpRemote> {
  Ok(HttpRemote::new(
    config.remote_url()?,
    Config::get_api_token(),
    Duration::from_secs(config.remote.timeout_secs),
  )?)
}

fn sync_driver(
  store: &Store,
  config: &Config,
  remote: HttpRemote,
  monitor: ConnectivityMonitor,
) -> SyncDriver<HttpRemote> {
  SyncDriver::new(
    ActionQueue::new(store.clone()),
    Settings::new(store.clone()),
    remote,
    monitor,
  )
  .with_backoff(Backoff::new(
    Duration::from_millis(config.sync.backoff_initial_ms),
    Duration::from_millis(config.sync.backoff_max_ms),
  ))
}

fn status(store: &Store, config: &Config) -> Result<()> {
  let quota = QuotaReporter::new(SqliteEstimator::new(
    store.clone(),
    config.storage.quota_bytes,
  ));
  let estimate = quota.estimate();

  match store.path() {
    Some(path) => println!("store:    {} (schema v{})", path.display(), store.schema_version()),
    None => println!("store:    memory-only (schema v{})", store.schema_version()),
  }
  println!("news:     {}", ContentCache::<NewsItem>::new(store.clone()).count()?);
  println!("events:   {}", ContentCache::<EventItem>::new(store.clone()).count()?);
  println!("pending:  {}", ActionQueue::new(store.clone()).pending_count()?);

  let last_sync = Settings::new(store.clone())
    .last_sync_at()?
    .and_then(chrono::DateTime::from_timestamp_millis)
    .map(|t| t.to_rfc3339())
    .unwrap_or_else(|| "never".into());
  println!("synced:   {}", last_sync);

  let ratio = estimate
    .usage_ratio()
    .map(|r| format!("{:.1}%", r * 100.0))
    .unwrap_or_else(|| "unknown".into());
  println!("usage:    {} / {} bytes ({})", estimate.used, estimate.quota, ratio);
  if quota.is_over(config.storage.quota_threshold) {
    println!(
      "storage is above {:.0}% of quota; consider `offsync evict`",
      config.storage.quota_threshold * 100.0
    );
  }
  Ok(())
}

async fn fetch(
  store: &Store,
  config: &Config,
  kind: KindArg,
  category: Option<String>,
) -> Result<()> {
  let layer = CacheLayer::new(store.clone(), http_remote(config)?)
    .with_stale_time(config.cache.stale_time());
  let params = FetchParams {
    limit: Some(config.cache.list_limit),
    category,
    ..FetchParams::default()
  };
  let limit = config.cache.list_limit;

  let (news, events) = futures::join!(
    async {
      if kind.includes(ContentKind::News) {
        Some(layer.news(&params, limit).await)
      } else {
        None
      }
    },
    async {
      if kind.includes(ContentKind::Events) {
        Some(layer.events(&params, limit).await)
      } else {
        None
      }
    }
  );

  if let Some(news) = news {
    let news = news?;
    print_source("news", &news);
    print_news(&news.data);
  }
  if let Some(events) = events {
    let events = events?;
    print_source("events", &events);
    print_events(&events.data);
  }
  Ok(())
}

async fn sync_once(store: &Store, config: &Config) -> Result<()> {
  let remote = http_remote(config)?;
  let monitor = ConnectivityMonitor::new(remote.is_reachable().await);
  if !monitor.is_online() {
    println!("{} is unreachable, nothing replayed", remote.base_url());
    return Ok(());
  }

  let report = sync_driver(store, config, remote, monitor).drain().await?;
  println!(
    "applied {}, rejected {}, remaining {}",
    report.applied, report.permanent_failures, report.remaining
  );
  if !report.stalled_targets.is_empty() {
    println!("held back: {}", report.stalled_targets.join(", "));
  }
  Ok(())
}

async fn watch(store: &Store, config: &Config) -> Result<()> {
  let remote = http_remote(config)?;
  let monitor = ConnectivityMonitor::new(false);
  let _token = monitor.register(|online| {
    println!("{}", if online { "online" } else { "offline" });
  });

  let probe = ConnectivityProbe::spawn(
    monitor.clone(),
    remote.clone(),
    Duration::from_secs(config.connectivity.probe_interval_secs),
  );
  let driver = Arc::new(sync_driver(store, config, remote, monitor));
  let handle = driver.clone().spawn();

  tokio::signal::ctrl_c()
    .await
    .map_err(|e| eyre!("Failed to listen for ctrl-c: {}", e))?;

  driver.cancel();
  probe.stop();
  handle.shutdown().await;
  Ok(())
}

fn print_source<T>(label: &str, result: &CacheResult<T>) {
  let age = result
    .cached_at
    .and_then(chrono::DateTime::from_timestamp_millis)
    .map(|t| format!(", cached {}", t.to_rfc3339()))
    .unwrap_or_default();
  println!("# {} ({:?}{})", label, result.source, age);
}

fn print_news(items: &[CachedItem<NewsItem>]) {
  for entry in items {
    let mark = if entry.is_read() { " " } else { "*" };
    println!("{} {:<12} {}", mark, entry.item.id, entry.item.title);
  }
}

fn print_events(items: &[CachedItem<EventItem>]) {
  for entry in items {
    let mark = if entry.is_attending() { "+" } else { " " };
    let location = entry.item.location.as_deref().unwrap_or("");
    println!("{} {:<12} {} {}", mark, entry.item.id, entry.item.title, location);
  }
}
