//! Pending operation model and the replay state machine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// The six mutation kinds the backend understands, with their wire names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
  CreateCourse,
  UpdateCourse,
  DeleteCourse,
  CreateLesson,
  UpdateLesson,
  DeleteLesson,
}

impl OperationKind {
  /// Parse a stored kind string. Returns `None` for kinds this build does
  /// not understand; callers must skip those without deleting them.
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "CREATE_COURSE" => Some(Self::CreateCourse),
      "UPDATE_COURSE" => Some(Self::UpdateCourse),
      "DELETE_COURSE" => Some(Self::DeleteCourse),
      "CREATE_LESSON" => Some(Self::CreateLesson),
      "UPDATE_LESSON" => Some(Self::UpdateLesson),
      "DELETE_LESSON" => Some(Self::DeleteLesson),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::CreateCourse => "CREATE_COURSE",
      Self::UpdateCourse => "UPDATE_COURSE",
      Self::DeleteCourse => "DELETE_COURSE",
      Self::CreateLesson => "CREATE_LESSON",
      Self::UpdateLesson => "UPDATE_LESSON",
      Self::DeleteLesson => "DELETE_LESSON",
    }
  }
}

/// One deferred mutation awaiting replay against the server.
///
/// `id` is assigned by the store and doubles as the insertion-order key;
/// `kind` is kept as the raw stored string so operations written by a newer
/// build survive a downgrade unreplayed rather than being lost.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
  pub id: i64,
  pub kind: String,
  pub data: Value,
  /// Creation time, milliseconds since epoch
  pub timestamp: i64,
  pub retries: u32,
}

/// Why an operation was removed from the queue without being applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
  /// The allowed number of transient-failure attempts was used up.
  RetriesExhausted,
  /// The server rejected the operation in a way retrying cannot fix.
  PermanentRejection,
}

/// Where a replay attempt leaves an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
  /// Server acknowledged; delete the operation.
  Applied,
  /// Transient failure; persist the new retry count and try again on the
  /// next drain.
  Retrying(u32),
  /// Terminal; delete the operation and report the drop.
  Dropped(DropReason),
}

impl ReplayOutcome {
  /// Decide what happens to an operation after one replay attempt.
  ///
  /// `retries_before` is the persisted counter going into this attempt.
  pub fn after_attempt(
    retries_before: u32,
    max_retries: u32,
    result: &Result<(), ApiError>,
  ) -> Self {
    match result {
      Ok(()) => Self::Applied,
      Err(err) if err.is_permanent() => Self::Dropped(DropReason::PermanentRejection),
      Err(_) => {
        let retries = retries_before + 1;
        if retries >= max_retries {
          Self::Dropped(DropReason::RetriesExhausted)
        } else {
          Self::Retrying(retries)
        }
      }
    }
  }
}
