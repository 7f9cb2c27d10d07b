//! Named HTTP response caches backing the interceptor.
//!
//! Responses live in their own SQLite database, not the page store — the
//! interceptor runs in a separate context and shares no transaction scope
//! with it. Partitions are addressed by name; removing every partition
//! outside the current named set is how a deploy invalidates old content.

use reqwest::Method;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StoreError;

/// A response as stored and served by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl StoredResponse {
  /// A JSON response with the given status.
  pub fn json(status: u16, body: &serde_json::Value) -> Self {
    Self {
      status,
      content_type: Some("application/json".to_string()),
      body: body.to_string().into_bytes(),
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS responses (
    cache_name TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_name, request_key)
);
"#;

/// SQLite-backed response cache with named partitions.
pub struct ResponseCache {
  conn: Mutex<Connection>,
}

impl ResponseCache {
  /// Open (creating if needed) the cache at the default location.
  pub fn open_default() -> Result<Self, StoreError> {
    Self::open(&Self::default_path()?)
  }

  pub fn open(path: &Path) -> Result<Self, StoreError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| {
        StoreError::Unavailable(format!("cannot create {}: {}", parent.display(), e))
      })?;
    }

    let conn = Connection::open(path)
      .map_err(|e| StoreError::Unavailable(format!("cannot open {}: {}", path.display(), e)))?;
    Self::from_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory()
      .map_err(|e| StoreError::Unavailable(format!("cannot open in-memory cache: {}", e)))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| StoreError::Unavailable(format!("cache schema failed: {}", e)))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StoreError::Unavailable("could not determine data directory".into()))?;

    Ok(data_dir.join("lmsync").join("http_cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
  }

  /// Stable fixed-length key for a request.
  fn request_key(method: &Method, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b" ");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
  }

  /// Store a response, replacing any previous entry for the same request.
  pub fn put(
    &self,
    cache_name: &str,
    method: &Method,
    url: &str,
    response: &StoredResponse,
  ) -> Result<(), StoreError> {
    let conn = self.lock()?;
    let key = Self::request_key(method, url);
    conn.execute(
      "INSERT OR REPLACE INTO responses
       (cache_name, request_key, url, status, content_type, body, cached_at)
       VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
      params![
        cache_name,
        key,
        url,
        response.status,
        response.content_type,
        response.body
      ],
    )?;
    Ok(())
  }

  /// Look up the cached response for a request, if any.
  pub fn get(
    &self,
    cache_name: &str,
    method: &Method,
    url: &str,
  ) -> Result<Option<StoredResponse>, StoreError> {
    let conn = self.lock()?;
    let key = Self::request_key(method, url);

    let found = conn
      .query_row(
        "SELECT status, content_type, body FROM responses
         WHERE cache_name = ? AND request_key = ?",
        params![cache_name, key],
        |row| {
          Ok(StoredResponse {
            status: row.get(0)?,
            content_type: row.get(1)?,
            body: row.get(2)?,
          })
        },
      )
      .optional()?;

    Ok(found)
  }

  /// Names of every partition currently holding at least one response.
  pub fn partition_names(&self) -> Result<Vec<String>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT DISTINCT cache_name FROM responses ORDER BY cache_name")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut names = Vec::new();
    for name in rows {
      names.push(name?);
    }
    Ok(names)
  }

  /// Delete every partition whose name is not in `keep`. Returns the number
  /// of entries removed.
  pub fn delete_partitions_except(&self, keep: &[&str]) -> Result<usize, StoreError> {
    let conn = self.lock()?;
    let placeholders = vec!["?"; keep.len()].join(", ");
    let sql = format!(
      "DELETE FROM responses WHERE cache_name NOT IN ({})",
      placeholders
    );
    let removed = conn.execute(&sql, params_from_iter(keep.iter()))?;
    Ok(removed)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn response(body: &str) -> StoredResponse {
    StoredResponse {
      status: 200,
      content_type: Some("text/css".to_string()),
      body: body.as_bytes().to_vec(),
    }
  }

  #[test]
  fn test_put_get_roundtrip() {
    let cache = ResponseCache::open_in_memory().unwrap();
    let url = "https://app.example/static/css/style.css";

    cache
      .put("static-v1", &Method::GET, url, &response("body { }"))
      .unwrap();

    let found = cache.get("static-v1", &Method::GET, url).unwrap().unwrap();
    assert_eq!(found.status, 200);
    assert_eq!(found.body, b"body { }");

    // Same URL in another partition is a separate entry
    assert!(cache.get("api-v1", &Method::GET, url).unwrap().is_none());
  }

  #[test]
  fn test_put_replaces_previous_entry() {
    let cache = ResponseCache::open_in_memory().unwrap();
    let url = "https://app.example/api/courses";

    cache
      .put("api-v1", &Method::GET, url, &StoredResponse::json(200, &json!([1])))
      .unwrap();
    cache
      .put("api-v1", &Method::GET, url, &StoredResponse::json(200, &json!([1, 2])))
      .unwrap();

    let found = cache.get("api-v1", &Method::GET, url).unwrap().unwrap();
    assert_eq!(found.body, b"[1,2]");
  }

  #[test]
  fn test_delete_partitions_except_keeps_current_set() {
    let cache = ResponseCache::open_in_memory().unwrap();
    let url = "https://app.example/";

    cache.put("static-v0", &Method::GET, url, &response("old")).unwrap();
    cache.put("static-v1", &Method::GET, url, &response("new")).unwrap();
    cache.put("api-v1", &Method::GET, url, &response("api")).unwrap();

    let removed = cache
      .delete_partitions_except(&["static-v1", "api-v1"])
      .unwrap();
    assert_eq!(removed, 1);

    assert_eq!(
      cache.partition_names().unwrap(),
      vec!["api-v1".to_string(), "static-v1".to_string()]
    );
    assert!(cache.get("static-v0", &Method::GET, url).unwrap().is_none());
  }

  #[test]
  fn test_json_response_shape() {
    let resp = StoredResponse::json(503, &json!({ "error": "Offline" }));
    assert_eq!(resp.status, 503);
    assert_eq!(resp.content_type.as_deref(), Some("application/json"));
    assert!(!resp.is_success());
  }
}
