//! Namespaced response cache over SQLite.
//!
//! A namespace is a named, versioned partition of response snapshots.
//! Namespaces are registered explicitly so that an empty namespace still
//! exists and shows up in cache info snapshots.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use crate::http::ResponseSnapshot;

/// Schema for the response cache. Creation is additive and idempotent.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_namespaces (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    captured_at TEXT NOT NULL,
    PRIMARY KEY (namespace, request_key)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_captured
    ON cache_entries(namespace, captured_at);
"#;

/// SQLite-backed store of named response caches.
pub struct CacheStore {
  conn: Mutex<Connection>,
}

impl CacheStore {
  /// Open (or create) the cache database at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory store, used by tests and throwaway instances.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(())
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Register a namespace so it exists even while empty.
  pub fn register_namespace(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to register namespace {}: {}", name, e))?;
    Ok(())
  }

  /// Store a response snapshot, overwriting any previous entry for the key.
  /// The namespace is registered on first write.
  pub fn put(&self, namespace: &str, key: &str, response: &ResponseSnapshot) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize response headers: {}", e))?;

    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_namespaces (name) VALUES (?)",
        params![namespace],
      )
      .map_err(|e| eyre!("Failed to register namespace {}: {}", namespace, e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (namespace, request_key, status, headers, body, captured_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          namespace,
          key,
          response.status,
          headers,
          response.body,
          format_datetime(response.captured_at),
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;

    Ok(())
  }

  /// Look up a response snapshot by namespace and key.
  pub fn get(&self, namespace: &str, key: &str) -> Result<Option<ResponseSnapshot>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, captured_at FROM cache_entries
         WHERE namespace = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare cache lookup: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String)> = stmt
      .query_row(params![namespace, key], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    match row {
      Some((status, headers, body, captured_at)) => {
        let headers: BTreeMap<String, String> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to deserialize response headers: {}", e))?;
        Ok(Some(ResponseSnapshot {
          status,
          headers,
          body,
          captured_at: parse_datetime(&captured_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  /// Delete a single entry. Deleting a missing entry is not an error.
  pub fn delete_entry(&self, namespace: &str, key: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "DELETE FROM cache_entries WHERE namespace = ? AND request_key = ?",
        params![namespace, key],
      )
      .map_err(|e| eyre!("Failed to delete cache entry {}: {}", key, e))?;
    Ok(())
  }

  /// All registered namespace names.
  pub fn list_namespaces(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_namespaces ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare namespace listing: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list namespaces: {}", e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read namespace row: {}", e))?;

    Ok(names)
  }

  /// All keys stored in a namespace.
  pub fn list_keys(&self, namespace: &str) -> Result<Vec<String>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT request_key FROM cache_entries WHERE namespace = ? ORDER BY request_key")
      .map_err(|e| eyre!("Failed to prepare key listing: {}", e))?;

    let keys = stmt
      .query_map(params![namespace], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list keys for {}: {}", namespace, e))?
      .collect::<std::result::Result<Vec<String>, _>>()
      .map_err(|e| eyre!("Failed to read key row: {}", e))?;

    Ok(keys)
  }

  /// Keys with their capture timestamps, for age-based eviction scans.
  pub fn list_entries(&self, namespace: &str) -> Result<Vec<(String, DateTime<Utc>)>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(
        "SELECT request_key, captured_at FROM cache_entries
         WHERE namespace = ? ORDER BY captured_at",
      )
      .map_err(|e| eyre!("Failed to prepare entry listing: {}", e))?;

    let rows = stmt
      .query_map(params![namespace], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
      })
      .map_err(|e| eyre!("Failed to list entries for {}: {}", namespace, e))?
      .collect::<std::result::Result<Vec<(String, String)>, _>>()
      .map_err(|e| eyre!("Failed to read entry row: {}", e))?;

    let mut entries = Vec::with_capacity(rows.len());
    for (key, captured_at) in rows {
      entries.push((key, parse_datetime(&captured_at)?));
    }
    Ok(entries)
  }

  /// Delete a namespace and everything it contains.
  pub fn delete_namespace(&self, name: &str) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    conn
      .execute("DELETE FROM cache_entries WHERE namespace = ?", params![name])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", name, e))?;
    conn
      .execute("DELETE FROM cache_namespaces WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete namespace {}: {}", name, e))?;
    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  /// Delete every namespace.
  pub fn clear_all(&self) -> Result<()> {
    let conn = self.lock()?;
    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    conn
      .execute("DELETE FROM cache_entries", [])
      .map_err(|e| eyre!("Failed to clear cache entries: {}", e))?;
    conn
      .execute("DELETE FROM cache_namespaces", [])
      .map_err(|e| eyre!("Failed to clear namespaces: {}", e))?;
    conn
      .execute("COMMIT", [])
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }
}

/// Format a timestamp in the store's column format.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
  dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a timestamp from the store's column format.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
