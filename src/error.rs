//! Error taxonomy shared across the store, sync engine, and interceptor.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors raised by the local store.
#[derive(Debug, Error)]
pub enum StoreError {
  /// The persistent database could not be opened at all (missing data
  /// directory, quota, permissions). Callers should degrade to online-only
  /// operation.
  #[error("local store unavailable: {0}")]
  Unavailable(String),

  /// A statement or transaction against an open database failed. The
  /// attempted mutation is not durable.
  #[error("store transaction failed: {0}")]
  Transaction(#[from] rusqlite::Error),

  /// A record could not be serialized or deserialized.
  #[error("failed to encode record: {0}")]
  Encode(#[from] serde_json::Error),
}

/// Errors raised when replaying an operation against the backend.
#[derive(Debug, Error)]
pub enum ApiError {
  /// The server could not be reached.
  #[error("network failure: {0}")]
  Network(#[from] reqwest::Error),

  /// The server was reached but returned an error status.
  #[error("server rejected request with status {0}")]
  Rejection(StatusCode),

  /// The operation payload is missing a field required to build its
  /// endpoint (e.g. an update without an id). Can never succeed.
  #[error("malformed operation payload: {0}")]
  Malformed(String),
}

impl ApiError {
  /// Whether retrying this failure could ever succeed.
  ///
  /// Client errors are permanent except 408 (timeout) and 429 (throttling);
  /// server errors and network failures are transient.
  pub fn is_permanent(&self) -> bool {
    match self {
      ApiError::Malformed(_) => true,
      ApiError::Rejection(status) => {
        status.is_client_error()
          && *status != StatusCode::REQUEST_TIMEOUT
          && *status != StatusCode::TOO_MANY_REQUESTS
      }
      ApiError::Network(_) => false,
    }
  }
}

/// A network fetch performed on behalf of the interceptor failed.
#[derive(Debug, Error)]
#[error("fetch failed: {0}")]
pub struct FetchError(pub String);

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_validation_rejection_is_permanent() {
    assert!(ApiError::Rejection(StatusCode::UNPROCESSABLE_ENTITY).is_permanent());
    assert!(ApiError::Rejection(StatusCode::NOT_FOUND).is_permanent());
  }

  #[test]
  fn test_server_errors_are_transient() {
    assert!(!ApiError::Rejection(StatusCode::INTERNAL_SERVER_ERROR).is_permanent());
    assert!(!ApiError::Rejection(StatusCode::SERVICE_UNAVAILABLE).is_permanent());
  }

  #[test]
  fn test_retryable_client_errors() {
    assert!(!ApiError::Rejection(StatusCode::REQUEST_TIMEOUT).is_permanent());
    assert!(!ApiError::Rejection(StatusCode::TOO_MANY_REQUESTS).is_permanent());
  }
}
