//! Versioned schema for the local store.
//!
//! The schema version lives in `PRAGMA user_version`. Upgrades only ever
//! happen here, as explicit per-version batches — adding a table or index
//! means a new version constant and a new migration arm, never an edit to a
//! shipped batch.

use rusqlite::Connection;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

const V1: &str = r#"
-- Cached courses mirrored from the server
CREATE TABLE IF NOT EXISTS courses (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_courses_code ON courses(code);

-- Cached lessons, keyed to their course
CREATE TABLE IF NOT EXISTS lessons (
    id INTEGER PRIMARY KEY,
    course_id INTEGER NOT NULL,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_lessons_course ON lessons(course_id);

-- Durable queue of mutations awaiting replay
CREATE TABLE IF NOT EXISTS pending_operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    data TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pending_timestamp ON pending_operations(timestamp);
CREATE INDEX IF NOT EXISTS idx_pending_kind ON pending_operations(kind);

-- Small key/value preferences
CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Bring the database up to `SCHEMA_VERSION`.
pub fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
  let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

  if version < 1 {
    conn.execute_batch(V1)?;
    conn.pragma_update(None, "user_version", 1)?;
  }

  Ok(())
}
