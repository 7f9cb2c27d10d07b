//! Durable local persistence: cached entities, the pending-operation queue,
//! and preferences.
//!
//! Everything the page layer queues or caches while offline lives here, in
//! one SQLite database. Each public operation runs as a single statement or
//! transaction, so a crash mid-write never leaves a half-applied mutation.

pub mod schema;

use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::Value;

use crate::api::types::{Course, Lesson};
use crate::error::StoreError;
use crate::sync::op::{OperationKind, PendingOperation};

/// Handle to the local database. Cheap to share behind an `Arc`.
pub struct LocalStore {
  conn: Mutex<Connection>,
}

impl LocalStore {
  /// Open (creating if needed) the store at the default location.
  pub fn open_default() -> Result<Self, StoreError> {
    Self::open(&Self::default_path()?)
  }

  /// Open (creating if needed) the store at `path` and migrate it to the
  /// current schema version.
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

  /// Open a throwaway in-memory store.
  pub fn open_in_memory() -> Result<Self, StoreError> {
    let conn = Connection::open_in_memory()
      .map_err(|e| StoreError::Unavailable(format!("cannot open in-memory store: {}", e)))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self, StoreError> {
    schema::migrate(&conn)
      .map_err(|e| StoreError::Unavailable(format!("schema migration failed: {}", e)))?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Default database path: $XDG_DATA_HOME/lmsync/local.db
  fn default_path() -> Result<PathBuf, StoreError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StoreError::Unavailable("could not determine data directory".into()))?;

    Ok(data_dir.join("lmsync").join("local.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
    self
      .conn
      .lock()
      .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
  }

  // --- cached entities -----------------------------------------------------

  /// Upsert a course wholesale; returns its id.
  pub fn put_course(&self, course: &Course) -> Result<i64, StoreError> {
    let conn = self.lock()?;
    let data = serde_json::to_string(course)?;
    conn.execute(
      "INSERT OR REPLACE INTO courses (id, code, data) VALUES (?, ?, ?)",
      params![course.id, course.code, data],
    )?;
    Ok(course.id)
  }

  /// All cached courses, in no particular order.
  pub fn courses(&self) -> Result<Vec<Course>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT data FROM courses")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut courses = Vec::new();
    for data in rows {
      courses.push(serde_json::from_str(&data?)?);
    }
    Ok(courses)
  }

  /// Remove a cached course (used after the server acknowledges a delete).
  pub fn delete_course(&self, id: i64) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM courses WHERE id = ?", params![id])?;
    Ok(())
  }

  /// Upsert a lesson wholesale; returns its id.
  pub fn put_lesson(&self, lesson: &Lesson) -> Result<i64, StoreError> {
    let conn = self.lock()?;
    let data = serde_json::to_string(lesson)?;
    conn.execute(
      "INSERT OR REPLACE INTO lessons (id, course_id, data) VALUES (?, ?, ?)",
      params![lesson.id, lesson.course_id, data],
    )?;
    Ok(lesson.id)
  }

  /// All cached lessons, in no particular order.
  pub fn lessons(&self) -> Result<Vec<Lesson>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT data FROM lessons")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

    let mut lessons = Vec::new();
    for data in rows {
      lessons.push(serde_json::from_str(&data?)?);
    }
    Ok(lessons)
  }

  /// Cached lessons belonging to one course, via the course_id index.
  pub fn lessons_for_course(&self, course_id: i64) -> Result<Vec<Lesson>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare("SELECT data FROM lessons WHERE course_id = ?")?;
    let rows = stmt.query_map(params![course_id], |row| row.get::<_, String>(0))?;

    let mut lessons = Vec::new();
    for data in rows {
      lessons.push(serde_json::from_str(&data?)?);
    }
    Ok(lessons)
  }

  /// Remove a cached lesson.
  pub fn delete_lesson(&self, id: i64) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM lessons WHERE id = ?", params![id])?;
    Ok(())
  }

  // --- pending-operation queue ---------------------------------------------

  /// Queue a mutation for later replay. Stamps the creation time and a zero
  /// retry counter; returns the store-assigned id, which is also the replay
  /// order.
  pub fn enqueue_operation(&self, kind: OperationKind, data: Value) -> Result<i64, StoreError> {
    let conn = self.lock()?;
    let payload = serde_json::to_string(&data)?;
    let timestamp = chrono::Utc::now().timestamp_millis();
    conn.execute(
      "INSERT INTO pending_operations (kind, data, timestamp, retries) VALUES (?, ?, ?, 0)",
      params![kind.as_str(), payload, timestamp],
    )?;
    Ok(conn.last_insert_rowid())
  }

  /// All queued operations, ascending id — the order they must replay in.
  pub fn pending_operations(&self) -> Result<Vec<PendingOperation>, StoreError> {
    let conn = self.lock()?;
    let mut stmt = conn.prepare(
      "SELECT id, kind, data, timestamp, retries FROM pending_operations ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([], |row| {
      Ok((
        row.get::<_, i64>(0)?,
        row.get::<_, String>(1)?,
        row.get::<_, String>(2)?,
        row.get::<_, i64>(3)?,
        row.get::<_, u32>(4)?,
      ))
    })?;

    let mut ops = Vec::new();
    for row in rows {
      let (id, kind, data, timestamp, retries) = row?;
      ops.push(PendingOperation {
        id,
        kind,
        data: serde_json::from_str(&data)?,
        timestamp,
        retries,
      });
    }
    Ok(ops)
  }

  /// Number of queued operations.
  pub fn pending_count(&self) -> Result<u64, StoreError> {
    let conn = self.lock()?;
    let count: i64 = conn.query_row("SELECT count(*) FROM pending_operations", [], |row| {
      row.get(0)
    })?;
    Ok(count as u64)
  }

  /// Remove an operation by id. Deleting an id that is already gone is a
  /// no-op, so retry logic can call this without checking first.
  pub fn delete_operation(&self, id: i64) -> Result<(), StoreError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM pending_operations WHERE id = ?", params![id])?;
    Ok(())
  }

  /// Overwrite a stored operation — in practice, persist an incremented
  /// retry counter. Single statement, so the counter and the queued row can
  /// never disagree after a crash.
  pub fn update_operation(&self, op: &PendingOperation) -> Result<(), StoreError> {
    let conn = self.lock()?;
    let payload = serde_json::to_string(&op.data)?;
    conn.execute(
      "UPDATE pending_operations SET kind = ?, data = ?, timestamp = ?, retries = ? WHERE id = ?",
      params![op.kind, payload, op.timestamp, op.retries, op.id],
    )?;
    Ok(())
  }

  // --- preferences ---------------------------------------------------------

  /// Point lookup of a preference value.
  pub fn get_preference(&self, key: &str) -> Result<Option<Value>, StoreError> {
    let conn = self.lock()?;
    let raw: Option<String> = conn
      .query_row(
        "SELECT value FROM preferences WHERE key = ?",
        params![key],
        |row| row.get(0),
      )
      .optional()?;

    match raw {
      Some(s) => Ok(Some(serde_json::from_str(&s)?)),
      None => Ok(None),
    }
  }

  /// Upsert a preference value.
  pub fn set_preference(&self, key: &str, value: &Value) -> Result<(), StoreError> {
    let conn = self.lock()?;
    let raw = serde_json::to_string(value)?;
    conn.execute(
      "INSERT OR REPLACE INTO preferences (key, value) VALUES (?, ?)",
      params![key, raw],
    )?;
    Ok(())
  }
}
