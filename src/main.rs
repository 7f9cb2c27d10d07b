mod api;
mod config;
mod error;
mod net;
mod store;
mod sync;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

use api::ApiClient;
use config::Config;
use error::FetchError;
use net::Connectivity;
use store::LocalStore;
use sync::SyncEngine;
use worker::cache::{ResponseCache, StoredResponse};
use worker::messages::PageMessage;
use worker::{HttpRequest, Interceptor};

#[derive(Parser, Debug)]
#[command(name = "lmsync")]
#[command(about = "Offline-first sync agent for the Learning Manager course platform")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lmsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Watch connectivity and drain the pending queue whenever it returns
  Run,
  /// Replay the pending queue once and exit
  Drain,
  /// Show queue depth, cache contents, and connectivity
  Status,
  /// Fetch a URL through the interceptor's caching strategies
  Get {
    /// Absolute URL or server-relative path (e.g. /api/courses)
    url: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  match args.command {
    Command::Run => run(&config).await,
    Command::Drain => drain_once(&config).await,
    Command::Status => status(&config).await,
    Command::Get { url } => get(&config, &url).await,
  }
}

/// Set up tracing. `run` mode also writes a daily-rolled log file, since the
/// agent is expected to outlive any one terminal session.
fn init_logging(to_file: bool) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
  let filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

  if to_file {
    let dir = dirs::data_dir()
      .map(|d| d.join("lmsync").join("logs"))
      .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)?;

    let appender = tracing_appender::rolling::daily(dir, "lmsync.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(writer)
      .with_ansi(false)
      .init();
    Ok(Some(guard))
  } else {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    Ok(None)
  }
}

fn open_store(config: &Config) -> Result<Arc<LocalStore>> {
  let store = match &config.database.path {
    Some(path) => LocalStore::open(path)?,
    None => LocalStore::open_default()?,
  };
  Ok(Arc::new(store))
}

fn open_cache(config: &Config) -> Result<ResponseCache> {
  let cache = match &config.database.cache_path {
    Some(path) => ResponseCache::open(path)?,
    None => ResponseCache::open_default()?,
  };
  Ok(cache)
}

/// Perform a real network fetch on behalf of the interceptor.
async fn fetch_url(http: reqwest::Client, url: Url) -> Result<StoredResponse, FetchError> {
  let response = http
    .get(url)
    .send()
    .await
    .map_err(|e| FetchError(e.to_string()))?;

  let status = response.status().as_u16();
  let content_type = response
    .headers()
    .get(reqwest::header::CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .map(String::from);
  let body = response
    .bytes()
    .await
    .map_err(|e| FetchError(e.to_string()))?
    .to_vec();

  Ok(StoredResponse {
    status,
    content_type,
    body,
  })
}

/// The long-running agent: probe connectivity, relay wake-ups, drain.
async fn run(config: &Config) -> Result<()> {
  let _log_guard = init_logging(true)?;

  let base = Url::parse(&config.server.url)?;
  let store = open_store(config)?;
  let connectivity = Connectivity::new(false);

  let engine = Arc::new(
    SyncEngine::new(
      store.clone(),
      ApiClient::new(&config.server.url)?,
      connectivity.clone(),
    )
    .with_max_retries(config.sync.max_retries)
    .with_refresh_hook(|| info!("drain finished; course and lesson views need reload")),
  );

  let http = reqwest::Client::new();
  let mut interceptor = Interceptor::new(base.clone(), open_cache(config)?);
  {
    let http = http.clone();
    interceptor.install(move |url| fetch_url(http.clone(), url)).await?;
  }
  interceptor.activate()?;
  interceptor.register_sync(worker::SYNC_TAG);
  let mut wakeups = interceptor.subscribe();

  net::spawn_probe(
    connectivity.clone(),
    base.clone(),
    Duration::from_secs(config.sync.probe_interval_secs),
  );
  let mut online_rx = connectivity.subscribe();
  let mut was_online = *online_rx.borrow();

  info!(server = %config.server.url, "lmsync agent running");

  loop {
    tokio::select! {
      changed = online_rx.changed() => {
        if changed.is_err() {
          break;
        }
        let online = *online_rx.borrow();
        if online && !was_online {
          interceptor.network_restored();
        }
        was_online = online;
      }
      msg = wakeups.recv() => {
        match msg {
          Ok(PageMessage::SyncOfflineData) => {
            let report = engine.drain_queue().await?;
            if !report.dropped.is_empty() {
              warn!(dropped = ?report.dropped, "operations discarded during drain");
            }
          }
          Err(broadcast::error::RecvError::Lagged(_)) => continue,
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    }
  }

  Ok(())
}

async fn drain_once(config: &Config) -> Result<()> {
  let _log_guard = init_logging(false)?;

  let base = Url::parse(&config.server.url)?;
  let store = open_store(config)?;

  let connectivity = Connectivity::new(false);
  connectivity.set_online(net::probe_once(&reqwest::Client::new(), &base).await);

  let engine = SyncEngine::new(
    store.clone(),
    ApiClient::new(&config.server.url)?,
    connectivity.clone(),
  )
  .with_max_retries(config.sync.max_retries);

  let report = engine.drain_queue().await?;

  if connectivity.is_online() {
    println!(
      "applied {}, retried {}, dropped {}, skipped {} ({} still queued)",
      report.applied,
      report.retried,
      report.dropped.len(),
      report.skipped,
      store.pending_count()?
    );
  } else {
    println!(
      "offline; drain deferred ({} operations queued)",
      store.pending_count()?
    );
  }

  Ok(())
}

async fn status(config: &Config) -> Result<()> {
  let _log_guard = init_logging(false)?;

  let base = Url::parse(&config.server.url)?;
  let store = open_store(config)?;
  let online = net::probe_once(&reqwest::Client::new(), &base).await;

  println!(
    "server:  {} ({})",
    config.server.url,
    if online { "online" } else { "offline" }
  );
  println!("queued:  {} pending operations", store.pending_count()?);
  println!(
    "cached:  {} courses, {} lessons",
    store.courses()?.len(),
    store.lessons()?.len()
  );

  Ok(())
}

async fn get(config: &Config, raw_url: &str) -> Result<()> {
  let _log_guard = init_logging(false)?;

  let base = Url::parse(&config.server.url)?;
  let url = base.join(raw_url)?;

  let interceptor = Interceptor::new(base, open_cache(config)?);
  let req = HttpRequest::get(url.clone());

  let http = reqwest::Client::new();
  let response = interceptor
    .handle_fetch(&req, || fetch_url(http.clone(), url.clone()))
    .await?;

  println!(
    "HTTP {} ({}, {} bytes)",
    response.status,
    response.content_type.as_deref().unwrap_or("unknown type"),
    response.body.len()
  );
  if let Ok(text) = String::from_utf8(response.body) {
    println!("{}", text);
  }

  Ok(())
}
