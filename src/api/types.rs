//! Entity types mirrored from the server.
//!
//! The server is authoritative: cached records are replaced wholesale, never
//! merged field by field. Only the identity and index fields are typed; the
//! rest of each record rides along as opaque JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A course as returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Course {
  pub id: i64,
  pub code: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// A lesson as returned by the backend. Always belongs to a course.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lesson {
  pub id: i64,
  pub course_id: i64,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_course_roundtrip_preserves_unknown_fields() {
    let raw = json!({
      "id": 7,
      "code": "RUST-101",
      "title": "Intro to Rust",
      "total_hours": 40
    });

    let course: Course = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(course.id, 7);
    assert_eq!(course.code, "RUST-101");
    assert_eq!(course.extra["total_hours"], json!(40));

    let back = serde_json::to_value(&course).unwrap();
    assert_eq!(back, raw);
  }

  #[test]
  fn test_lesson_carries_course_id() {
    let lesson: Lesson = serde_json::from_value(json!({
      "id": 3,
      "course_id": 7,
      "title": "Ownership",
      "duration": 2
    }))
    .unwrap();

    assert_eq!(lesson.course_id, 7);
    assert_eq!(lesson.extra["duration"], serde_json::json!(2));
  }
}
