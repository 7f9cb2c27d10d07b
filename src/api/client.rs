//! REST client for the Learning Manager backend.
//!
//! The sync engine talks to the network only through the [`Transport`]
//! trait, so tests can script outcomes without a server. [`ApiClient`] is
//! the real implementation over reqwest.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde_json::Value;
use url::Url;

use crate::error::ApiError;
use crate::sync::op::OperationKind;

/// One concrete HTTP call implied by a pending operation.
///
/// The kind→endpoint mapping is fixed: Create posts to the collection,
/// Update puts to the item, Delete deletes the item; lesson endpoints are
/// nested under their course.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiCall {
  pub method: Method,
  pub path: String,
  pub body: Option<Value>,
}

impl ApiCall {
  /// Build the call for an operation, or fail if the payload is missing the
  /// id fields its endpoint needs. A payload that cannot address its target
  /// can never be dispatched, so this failure is permanent.
  pub fn for_operation(kind: OperationKind, data: &Value) -> Result<Self, ApiError> {
    let call = match kind {
      OperationKind::CreateCourse => Self {
        method: Method::POST,
        path: "/api/courses".to_string(),
        body: Some(data.clone()),
      },
      OperationKind::UpdateCourse => Self {
        method: Method::PUT,
        path: format!("/api/courses/{}", require_id(data, "id")?),
        body: Some(data.clone()),
      },
      OperationKind::DeleteCourse => Self {
        method: Method::DELETE,
        path: format!("/api/courses/{}", require_id(data, "id")?),
        body: None,
      },
      OperationKind::CreateLesson => Self {
        method: Method::POST,
        path: format!("/api/courses/{}/lessons", require_id(data, "course_id")?),
        body: Some(data.clone()),
      },
      OperationKind::UpdateLesson => Self {
        method: Method::PUT,
        path: format!(
          "/api/courses/{}/lessons/{}",
          require_id(data, "course_id")?,
          require_id(data, "id")?
        ),
        body: Some(data.clone()),
      },
      OperationKind::DeleteLesson => Self {
        method: Method::DELETE,
        path: format!(
          "/api/courses/{}/lessons/{}",
          require_id(data, "course_id")?,
          require_id(data, "id")?
        ),
        body: None,
      },
    };

    Ok(call)
  }
}

fn require_id(data: &Value, field: &str) -> Result<i64, ApiError> {
  data
    .get(field)
    .and_then(Value::as_i64)
    .ok_or_else(|| ApiError::Malformed(format!("payload is missing '{}'", field)))
}

/// Network seam used by the sync engine.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Dispatch a call; `Ok(())` means the server reported success.
  async fn execute(&self, call: &ApiCall) -> Result<(), ApiError>;
}

/// Backend client over reqwest.
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base: Url,
}

impl ApiClient {
  pub fn new(base_url: &str) -> Result<Self> {
    let base = Url::parse(base_url).map_err(|e| eyre!("Invalid server URL {}: {}", base_url, e))?;

    Ok(Self {
      http: reqwest::Client::new(),
      base,
    })
  }
}

#[async_trait]
impl Transport for ApiClient {
  async fn execute(&self, call: &ApiCall) -> Result<(), ApiError> {
    let url = self
      .base
      .join(&call.path)
      .map_err(|e| ApiError::Malformed(format!("bad endpoint {}: {}", call.path, e)))?;

    let mut request = self.http.request(call.method.clone(), url);
    if let Some(body) = &call.body {
      request = request.json(body);
    }

    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
      Ok(())
    } else {
      Err(ApiError::Rejection(status))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_create_course_posts_to_collection() {
    let call =
      ApiCall::for_operation(OperationKind::CreateCourse, &json!({ "code": "X" })).unwrap();
    assert_eq!(call.method, Method::POST);
    assert_eq!(call.path, "/api/courses");
    assert!(call.body.is_some());
  }

  #[test]
  fn test_lesson_endpoints_nest_under_course() {
    let data = json!({ "id": 3, "course_id": 5, "title": "X" });

    let create = ApiCall::for_operation(OperationKind::CreateLesson, &data).unwrap();
    assert_eq!(create.path, "/api/courses/5/lessons");

    let update = ApiCall::for_operation(OperationKind::UpdateLesson, &data).unwrap();
    assert_eq!(update.method, Method::PUT);
    assert_eq!(update.path, "/api/courses/5/lessons/3");

    let delete = ApiCall::for_operation(OperationKind::DeleteLesson, &data).unwrap();
    assert_eq!(delete.method, Method::DELETE);
    assert_eq!(delete.path, "/api/courses/5/lessons/3");
    assert!(delete.body.is_none());
  }

  #[test]
  fn test_update_without_id_is_malformed() {
    let err =
      ApiCall::for_operation(OperationKind::UpdateCourse, &json!({ "title": "X" })).unwrap_err();
    assert!(matches!(err, ApiError::Malformed(_)));
    assert!(err.is_permanent());
  }

  #[test]
  fn test_lesson_without_course_id_is_malformed() {
    let err =
      ApiCall::for_operation(OperationKind::CreateLesson, &json!({ "title": "X" })).unwrap_err();
    assert!(matches!(err, ApiError::Malformed(_)));
  }
}
