//! Request interceptor: keeps the application serving reads while offline.
//!
//! Sits in front of every page request and applies a per-resource-class
//! strategy — network-first for API and HTML, cache-first for static assets
//! — against named response cache partitions. Also relays the
//! background-sync wake-up to page contexts; it never touches the
//! pending-operation queue itself.

pub mod cache;
pub mod messages;

use std::collections::HashSet;
use std::future::Future;

use reqwest::Method;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

use crate::error::{FetchError, StoreError};
use cache::{ResponseCache, StoredResponse};
use messages::{PageMessage, WorkerMessage};

/// Cache partition names. Bumping these invalidates all previously cached
/// content on the next activation.
pub const CACHE_NAME: &str = "lmsync-v1";
pub const API_CACHE_NAME: &str = "lmsync-api-v1";
pub const STATIC_CACHE_NAME: &str = "lmsync-static-v1";

const CURRENT_CACHES: [&str; 3] = [CACHE_NAME, API_CACHE_NAME, STATIC_CACHE_NAME];

/// Assets precached during install.
const STATIC_ASSETS: [&str; 7] = [
  "/",
  "/static/css/style.css",
  "/static/js/app.js",
  "/static/manifest.json",
  "https://cdn.jsdelivr.net/npm/bootstrap@5.3.0/dist/css/bootstrap.min.css",
  "https://cdn.jsdelivr.net/npm/chart.js@4.4.0/dist/chart.umd.min.js",
  "https://cdn.jsdelivr.net/npm/sortablejs@1.15.0/Sortable.min.js",
];

const CDN_HOST: &str = "cdn.jsdelivr.net";

/// Background-sync tag whose registration enables the drain wake-up relay.
pub const SYNC_TAG: &str = "sync-offline-data";

const OFFLINE_MESSAGE: &str =
  "Connection unavailable. Changes will be synced when connectivity returns.";

/// A request as seen by the interceptor.
#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub method: Method,
  pub url: Url,
  /// Accept header, when the caller sent one
  pub accept: Option<String>,
}

impl HttpRequest {
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      accept: None,
    }
  }

  pub fn with_accept(mut self, accept: &str) -> Self {
    self.accept = Some(accept.to_string());
    self
  }
}

/// The fixed 503 served for an API request that is neither reachable nor
/// cached.
pub fn offline_response() -> StoredResponse {
  StoredResponse::json(503, &json!({ "error": "Offline", "message": OFFLINE_MESSAGE }))
}

/// Which strategy a request falls under. Evaluated in declaration order;
/// only GETs are ever cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
  Api,
  Static,
  Html,
  Passthrough,
}

fn classify(req: &HttpRequest) -> Route {
  if req.method != Method::GET {
    return Route::Passthrough;
  }
  if req.url.path().starts_with("/api/") {
    return Route::Api;
  }
  if req.url.path().starts_with("/static/") || req.url.host_str() == Some(CDN_HOST) {
    return Route::Static;
  }
  if req
    .accept
    .as_deref()
    .is_some_and(|accept| accept.contains("text/html"))
  {
    return Route::Html;
  }
  Route::Passthrough
}

/// Interceptor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  Installed,
  Active,
}

pub struct Interceptor {
  state: WorkerState,
  origin: Url,
  cache: ResponseCache,
  pages: broadcast::Sender<PageMessage>,
  sync_tags: HashSet<String>,
}

impl Interceptor {
  pub fn new(origin: Url, cache: ResponseCache) -> Self {
    let (pages, _) = broadcast::channel(16);
    Self {
      state: WorkerState::Installing,
      origin,
      cache,
      pages,
      sync_tags: HashSet::new(),
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  /// Precache the static asset list. Best-effort: an asset that fails to
  /// fetch is logged and skipped, and installation still completes.
  pub async fn install<F, Fut>(&mut self, fetch: F) -> Result<(), StoreError>
  where
    F: Fn(Url) -> Fut,
    Fut: Future<Output = Result<StoredResponse, FetchError>>,
  {
    for asset in STATIC_ASSETS {
      let url = match self.origin.join(asset) {
        Ok(url) => url,
        Err(e) => {
          warn!(asset, error = %e, "unresolvable static asset");
          continue;
        }
      };

      match fetch(url.clone()).await {
        Ok(response) if response.is_success() => {
          self
            .cache
            .put(STATIC_CACHE_NAME, &Method::GET, url.as_str(), &response)?;
        }
        Ok(response) => {
          warn!(asset, status = response.status, "static asset not cached");
        }
        Err(e) => {
          warn!(asset, error = %e, "static asset not cached");
        }
      }
    }

    self.state = WorkerState::Installed;
    info!("interceptor installed");
    Ok(())
  }

  /// Evict cache partitions left behind by older deployments, then go
  /// active.
  pub fn activate(&mut self) -> Result<(), StoreError> {
    let removed = self.cache.delete_partitions_except(&CURRENT_CACHES)?;
    if removed > 0 {
      info!(removed, "removed stale cache entries");
    }
    self.state = WorkerState::Active;
    info!("interceptor active");
    Ok(())
  }

  /// Route one request. `fetch` performs the real network call when the
  /// strategy asks for one.
  pub async fn handle_fetch<F, Fut>(
    &self,
    req: &HttpRequest,
    fetch: F,
  ) -> Result<StoredResponse, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse, FetchError>>,
  {
    match classify(req) {
      Route::Passthrough => fetch().await,
      Route::Api => self.network_first_api(req, fetch).await,
      Route::Static => self.cache_first(req, fetch).await,
      Route::Html => self.network_first_html(req, fetch).await,
    }
  }

  /// API: prefer the live response, caching a copy; fall back to the cached
  /// response for the identical request, else the fixed offline 503.
  async fn network_first_api<F, Fut>(
    &self,
    req: &HttpRequest,
    fetch: F,
  ) -> Result<StoredResponse, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse, FetchError>>,
  {
    match fetch().await {
      Ok(response) => {
        self.store_response(API_CACHE_NAME, req, &response);
        Ok(response)
      }
      Err(_) => {
        if let Some(cached) = self.lookup(API_CACHE_NAME, req) {
          return Ok(cached);
        }
        Ok(offline_response())
      }
    }
  }

  /// Static assets: serve from cache without touching the network; fetch
  /// and cache only on a miss.
  async fn cache_first<F, Fut>(
    &self,
    req: &HttpRequest,
    fetch: F,
  ) -> Result<StoredResponse, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse, FetchError>>,
  {
    if let Some(cached) = self.lookup(STATIC_CACHE_NAME, req) {
      return Ok(cached);
    }

    let response = fetch().await?;
    self.store_response(STATIC_CACHE_NAME, req, &response);
    Ok(response)
  }

  /// HTML navigation: prefer the network, caching a copy; fall back to the
  /// cached root page, else a plain 503.
  async fn network_first_html<F, Fut>(
    &self,
    req: &HttpRequest,
    fetch: F,
  ) -> Result<StoredResponse, FetchError>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<StoredResponse, FetchError>>,
  {
    match fetch().await {
      Ok(response) => {
        self.store_response(STATIC_CACHE_NAME, req, &response);
        Ok(response)
      }
      Err(_) => {
        if let Ok(root) = self.origin.join("/") {
          if let Some(cached) = self.lookup_url(STATIC_CACHE_NAME, root.as_str()) {
            return Ok(cached);
          }
        }
        Ok(StoredResponse {
          status: 503,
          content_type: Some("text/plain".to_string()),
          body: b"Offline".to_vec(),
        })
      }
    }
  }

  /// Handle a page→worker message.
  pub fn on_message(&mut self, msg: WorkerMessage) -> Result<(), StoreError> {
    match msg {
      WorkerMessage::SkipWaiting => self.activate(),
      WorkerMessage::CacheApi { url, data } => {
        let response = StoredResponse::json(200, &data);
        self.cache.put(API_CACHE_NAME, &Method::GET, &url, &response)
      }
    }
  }

  /// Register a background-sync tag.
  pub fn register_sync(&mut self, tag: &str) {
    self.sync_tags.insert(tag.to_string());
  }

  /// Platform signal: connectivity is back. Relays the wake-up to every
  /// subscribed page context; the queue itself belongs to the pages.
  pub fn network_restored(&self) {
    if self.sync_tags.contains(SYNC_TAG) {
      info!("relaying sync wake-up to pages");
      let _ = self.pages.send(PageMessage::SyncOfflineData);
    }
  }

  /// Receiver a page context listens on.
  pub fn subscribe(&self) -> broadcast::Receiver<PageMessage> {
    self.pages.subscribe()
  }

  // A cache problem must not take down request serving; log and move on.

  fn store_response(&self, cache_name: &str, req: &HttpRequest, response: &StoredResponse) {
    if let Err(e) = self
      .cache
      .put(cache_name, &req.method, req.url.as_str(), response)
    {
      warn!(url = %req.url, error = %e, "failed to cache response");
    }
  }

  fn lookup(&self, cache_name: &str, req: &HttpRequest) -> Option<StoredResponse> {
    match self.cache.get(cache_name, &req.method, req.url.as_str()) {
      Ok(found) => found,
      Err(e) => {
        warn!(url = %req.url, error = %e, "cache lookup failed");
        None
      }
    }
  }

  fn lookup_url(&self, cache_name: &str, url: &str) -> Option<StoredResponse> {
    match self.cache.get(cache_name, &Method::GET, url) {
      Ok(found) => found,
      Err(e) => {
        warn!(url, error = %e, "cache lookup failed");
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  fn origin() -> Url {
    Url::parse("https://app.example").unwrap()
  }

  fn interceptor() -> Interceptor {
    Interceptor::new(origin(), ResponseCache::open_in_memory().unwrap())
  }

  fn request(path: &str) -> HttpRequest {
    HttpRequest::get(origin().join(path).unwrap())
  }

  fn text(body: &str) -> StoredResponse {
    StoredResponse {
      status: 200,
      content_type: Some("text/plain".to_string()),
      body: body.as_bytes().to_vec(),
    }
  }

  /// Fetch closure that counts invocations and returns a fixed result.
  fn counting_fetch(
    count: Arc<AtomicUsize>,
    result: Result<StoredResponse, FetchError>,
  ) -> impl FnOnce() -> std::future::Ready<Result<StoredResponse, FetchError>> {
    move || {
      count.fetch_add(1, Ordering::SeqCst);
      std::future::ready(result)
    }
  }

  #[test]
  fn test_classify_routes() {
    assert_eq!(classify(&request("/api/courses")), Route::Api);
    assert_eq!(classify(&request("/static/css/style.css")), Route::Static);
    assert_eq!(
      classify(&HttpRequest::get(
        Url::parse("https://cdn.jsdelivr.net/npm/chart.js").unwrap()
      )),
      Route::Static
    );
    assert_eq!(
      classify(&request("/dashboard").with_accept("text/html,application/xhtml+xml")),
      Route::Html
    );
    assert_eq!(classify(&request("/favicon.ico")), Route::Passthrough);

    // Non-GET never hits a cache strategy
    let mut post = request("/api/courses");
    post.method = Method::POST;
    assert_eq!(classify(&post), Route::Passthrough);
  }

  #[tokio::test]
  async fn test_cached_static_asset_resolves_without_network() {
    let sw = interceptor();
    let req = request("/static/css/style.css");
    sw.cache
      .put(STATIC_CACHE_NAME, &Method::GET, req.url.as_str(), &text("body { }"))
      .unwrap();

    let fetches = Arc::new(AtomicUsize::new(0));
    let response = sw
      .handle_fetch(&req, counting_fetch(fetches.clone(), Ok(text("fresh"))))
      .await
      .unwrap();

    assert_eq!(response.body, b"body { }");
    assert_eq!(fetches.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_static_miss_fetches_and_caches() {
    let sw = interceptor();
    let req = request("/static/js/app.js");

    let fetches = Arc::new(AtomicUsize::new(0));
    let response = sw
      .handle_fetch(&req, counting_fetch(fetches.clone(), Ok(text("app"))))
      .await
      .unwrap();
    assert_eq!(response.body, b"app");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    // Second request is a cache hit
    let response = sw
      .handle_fetch(
        &req,
        counting_fetch(fetches.clone(), Err(FetchError("offline".into()))),
      )
      .await
      .unwrap();
    assert_eq!(response.body, b"app");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_api_network_failure_falls_back_to_cached_response() {
    let sw = interceptor();
    let req = request("/api/courses");

    // Online round populates the API cache
    let body = serde_json::json!([{ "id": 1, "code": "A" }]);
    sw.handle_fetch(&req, || std::future::ready(Ok(StoredResponse::json(200, &body))))
      .await
      .unwrap();

    // Offline round serves the copy
    let response = sw
      .handle_fetch(&req, || {
        std::future::ready(Err(FetchError("connection refused".into())))
      })
      .await
      .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, body.to_string().into_bytes());
  }

  #[tokio::test]
  async fn test_api_offline_without_cache_synthesizes_503() {
    let sw = interceptor();
    let req = request("/api/courses");

    let response = sw
      .handle_fetch(&req, || {
        std::future::ready(Err(FetchError("connection refused".into())))
      })
      .await
      .unwrap();

    assert_eq!(response.status, 503);
    let parsed: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(parsed["error"], "Offline");
    assert!(parsed["message"].is_string());
  }

  #[tokio::test]
  async fn test_html_falls_back_to_cached_root() {
    let sw = interceptor();
    let root = origin().join("/").unwrap();
    sw.cache
      .put(STATIC_CACHE_NAME, &Method::GET, root.as_str(), &text("<html>app</html>"))
      .unwrap();

    let req = request("/courses/7").with_accept("text/html");
    let response = sw
      .handle_fetch(&req, || std::future::ready(Err(FetchError("offline".into()))))
      .await
      .unwrap();

    assert_eq!(response.body, b"<html>app</html>");
  }

  #[tokio::test]
  async fn test_html_without_cached_root_is_plain_503() {
    let sw = interceptor();
    let req = request("/courses/7").with_accept("text/html");

    let response = sw
      .handle_fetch(&req, || std::future::ready(Err(FetchError("offline".into()))))
      .await
      .unwrap();

    assert_eq!(response.status, 503);
    assert_eq!(response.body, b"Offline");
  }

  #[tokio::test]
  async fn test_install_is_best_effort() {
    let mut sw = interceptor();

    // Only style.css fetches successfully; everything else is unreachable
    sw.install(|url| {
      let ok = url.path().ends_with("style.css");
      std::future::ready(if ok {
        Ok(text("body { }"))
      } else {
        Err(FetchError("unreachable".into()))
      })
    })
    .await
    .unwrap();

    assert_eq!(sw.state(), WorkerState::Installed);
    let css = origin().join("/static/css/style.css").unwrap();
    assert!(sw
      .cache
      .get(STATIC_CACHE_NAME, &Method::GET, css.as_str())
      .unwrap()
      .is_some());
  }

  #[tokio::test]
  async fn test_activate_evicts_stale_partitions() {
    let mut sw = interceptor();
    let url = origin().join("/static/js/app.js").unwrap();

    sw.cache
      .put("lmsync-static-v0", &Method::GET, url.as_str(), &text("old"))
      .unwrap();
    sw.cache
      .put(STATIC_CACHE_NAME, &Method::GET, url.as_str(), &text("new"))
      .unwrap();

    sw.activate().unwrap();

    assert_eq!(sw.state(), WorkerState::Active);
    assert_eq!(sw.cache.partition_names().unwrap(), vec![STATIC_CACHE_NAME]);
  }

  #[tokio::test]
  async fn test_cache_api_message_seeds_offline_reads() {
    let mut sw = interceptor();
    let req = request("/api/courses");

    let data = serde_json::json!([{ "id": 1, "code": "A" }]);
    sw.on_message(WorkerMessage::CacheApi {
      url: req.url.to_string(),
      data: data.clone(),
    })
    .unwrap();

    let response = sw
      .handle_fetch(&req, || std::future::ready(Err(FetchError("offline".into()))))
      .await
      .unwrap();
    assert_eq!(response.body, data.to_string().into_bytes());
  }

  #[tokio::test]
  async fn test_skip_waiting_activates() {
    let mut sw = interceptor();
    sw.on_message(WorkerMessage::SkipWaiting).unwrap();
    assert_eq!(sw.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn test_network_restored_relays_wake_up_when_registered() {
    let mut sw = interceptor();
    let mut pages = sw.subscribe();

    // Unregistered tag: nothing is relayed
    sw.network_restored();
    assert!(pages.try_recv().is_err());

    sw.register_sync(SYNC_TAG);
    sw.network_restored();
    assert_eq!(pages.try_recv().unwrap(), PageMessage::SyncOfflineData);
  }
}
