//! Durable submission queue.
//!
//! Transactional record store for pending and completed form submissions,
//! independent of the cache namespaces. The queue exclusively owns its
//! records: submissions are enqueued when immediate delivery fails, mutated
//! only by the sync coordinator, and moved to the completed table once the
//! server acknowledges receipt.
//!
//! `mark_synced` and `remove` are idempotent so overlapping drain runs
//! cannot corrupt state (at-least-once delivery is the accepted policy).

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

/// Schema for the durable queue. Creation is additive and idempotent.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_forms (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
);

CREATE INDEX IF NOT EXISTS idx_pending_forms_created
    ON pending_forms(created_at);

CREATE TABLE IF NOT EXISTS completed_forms (
    id TEXT PRIMARY KEY,
    payload TEXT NOT NULL,
    created_at TEXT NOT NULL,
    form_type TEXT NOT NULL,
    synced_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_completed_forms_created
    ON completed_forms(created_at);
CREATE INDEX IF NOT EXISTS idx_completed_forms_type
    ON completed_forms(form_type);
"#;

/// Status of a pending submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionStatus {
  Pending,
  InFlight,
  Failed,
  Synced,
}

impl SubmissionStatus {
  fn as_str(&self) -> &'static str {
    match self {
      SubmissionStatus::Pending => "pending",
      SubmissionStatus::InFlight => "in-flight",
      SubmissionStatus::Failed => "failed",
      SubmissionStatus::Synced => "synced",
    }
  }

  fn parse(s: &str) -> Self {
    match s {
      "in-flight" => SubmissionStatus::InFlight,
      "failed" => SubmissionStatus::Failed,
      "synced" => SubmissionStatus::Synced,
      _ => SubmissionStatus::Pending,
    }
  }
}

/// A form payload persisted because immediate delivery failed.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
  pub id: String,
  pub payload: serde_json::Value,
  pub created_at: DateTime<Utc>,
  pub status: SubmissionStatus,
}

/// Terminal audit record of a successfully delivered submission.
#[derive(Debug, Clone)]
pub struct CompletedSubmission {
  pub id: String,
  pub payload: serde_json::Value,
  pub created_at: DateTime<Utc>,
  pub form_type: String,
  pub synced_at: DateTime<Utc>,
}

/// SQLite-backed durable queue of form submissions.
pub struct SubmissionQueue {
  conn: Mutex<Connection>,
}

impl SubmissionQueue {
  /// Open (or create) the queue database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  /// In-memory queue, used by tests and throwaway instances.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory queue database: {}", e))?;

    let queue = Self {
      conn: Mutex::new(conn),
    };
    queue.run_migrations()?;

    Ok(queue)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to run queue migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Persist a payload as pending and return its id.
  ///
  /// Ids are millisecond timestamp plus a random suffix; an id, once
  /// assigned, is never reused and never overwritten.
  pub fn enqueue(&self, payload: &serde_json::Value) -> Result<String> {
    let now = Utc::now();
    let suffix = Uuid::new_v4().simple().to_string();
    let id = format!("{}-{}", now.timestamp_millis(), &suffix[..8]);

    let serialized = serde_json::to_string(payload)
      .map_err(|e| eyre!("Failed to serialize submission payload: {}", e))?;

    let conn = self.lock()?;
    conn
      .execute(
        "INSERT INTO pending_forms (id, payload, created_at, status) VALUES (?, ?, ?, ?)",
        params![
          id,
          serialized,
          format_datetime(now),
          SubmissionStatus::Pending.as_str()
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue submission: {}", e))?;

    Ok(id)
  }

  /// Snapshot of all pending submissions in creation order.
  pub fn list_pending(&self) -> Result<Vec<PendingSubmission>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, payload, created_at, status FROM pending_forms
         ORDER BY created_at, rowid",
      )
      .map_err(|e| eyre!("Failed to prepare pending listing: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list pending submissions: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read pending row: {}", e))?;

    let mut pending = Vec::with_capacity(rows.len());
    for (id, payload, created_at, status) in rows {
      pending.push(PendingSubmission {
        id,
        payload: serde_json::from_str(&payload)
          .map_err(|e| eyre!("Failed to deserialize submission payload: {}", e))?,
        created_at: parse_datetime(&created_at)?,
        status: SubmissionStatus::parse(&status),
      });
    }
    Ok(pending)
  }

  /// Atomically move a pending record into the completed table.
  ///
  /// The form-type tag is read from the payload's `form_type` field.
  /// Idempotent: a second call for the same id, or a call after `remove`,
  /// finds no pending record and changes nothing.
  pub fn mark_synced(&self, id: &str) -> Result<()> {
    let conn = self.lock()?;

    let row: Option<(String, String)> = conn
      .query_row(
        "SELECT payload, created_at FROM pending_forms WHERE id = ?",
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read pending submission {}: {}", id, e))?;

    let (payload, created_at) = match row {
      Some(row) => row,
      None => return Ok(()),
    };

    let form_type = serde_json::from_str::<serde_json::Value>(&payload)
      .ok()
      .and_then(|v| v.get("form_type").and_then(|t| t.as_str()).map(String::from))
      .unwrap_or_else(|| "unknown".to_string());

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    conn
      .execute(
        "INSERT OR IGNORE INTO completed_forms (id, payload, created_at, form_type, synced_at)
         VALUES (?, ?, ?, ?, ?)",
        params![id, payload, created_at, form_type, format_datetime(Utc::now())],
      )
      .map_err(|e| eyre!("Failed to record completed submission {}: {}", id, e))?;
    conn
      .execute("DELETE FROM pending_forms WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete pending submission {}: {}", id, e))?;
    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  /// Delete a pending record. Removing a non-existent id is not an error.
  pub fn remove(&self, id: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM pending_forms WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove pending submission {}: {}", id, e))?;
    Ok(())
  }

  pub fn pending_count(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM pending_forms", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending submissions: {}", e))?;
    Ok(count as usize)
  }

  pub fn completed_count(&self) -> Result<usize> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM completed_forms", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count completed submissions: {}", e))?;
    Ok(count as usize)
  }

  /// Audit history of delivered submissions, newest first.
  pub fn list_completed(&self) -> Result<Vec<CompletedSubmission>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT id, payload, created_at, form_type, synced_at FROM completed_forms
         ORDER BY synced_at DESC, id",
      )
      .map_err(|e| eyre!("Failed to prepare completed listing: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, String>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to list completed submissions: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read completed row: {}", e))?;

    let mut completed = Vec::with_capacity(rows.len());
    for (id, payload, created_at, form_type, synced_at) in rows {
      completed.push(CompletedSubmission {
        id,
        payload: serde_json::from_str(&payload)
          .map_err(|e| eyre!("Failed to deserialize submission payload: {}", e))?,
        created_at: parse_datetime(&created_at)?,
        form_type,
        synced_at: parse_datetime(&synced_at)?,
      });
    }
    Ok(completed)
  }
}

/// Millisecond precision so ids and ordering agree within a burst.
fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.3f")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
