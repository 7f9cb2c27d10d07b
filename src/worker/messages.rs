//! Cross-context message protocol between page contexts and the
//! interceptor. The wire shapes are fixed; both sides only ever exchange
//! these tagged variants.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a page sends to the interceptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
  /// Activate immediately instead of waiting for old contexts to go away.
  SkipWaiting,
  /// Seed the API cache for a URL with a known-good JSON body.
  CacheApi { url: String, data: Value },
}

/// Messages the interceptor broadcasts to every page context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PageMessage {
  /// Connectivity is back; pages should run their local drain.
  SyncOfflineData,
}
