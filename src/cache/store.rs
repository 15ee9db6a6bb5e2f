//! Persistent key to checksum map

use crate::error::KeelResult;
use crate::store::Store;
use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::debug;

/// A stored cache entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub checksum: String,
    pub updated_at: String,
}

/// Checksum cache shared by every invocation using the same database
///
/// keel never interprets the contents; keys are namespaced however plugin
/// authors choose. There is no eviction.
#[derive(Debug, Clone)]
pub struct Cache {
    store: Store,
}

impl Cache {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Stored checksum for `key`, if any
    pub fn get(&self, key: &str) -> KeelResult<Option<String>> {
        self.store.read(|conn| {
            let checksum = conn
                .query_row(
                    "SELECT checksum FROM cache WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(checksum)
        })
    }

    /// Store `checksum` for `key`, replacing any previous value
    pub fn set(&self, key: &str, checksum: &str) -> KeelResult<()> {
        self.store.with_immediate_tx(|tx| {
            tx.execute(
                "INSERT INTO cache (key, checksum, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT (key) DO UPDATE SET checksum = excluded.checksum,
                                                 updated_at = excluded.updated_at",
                params![key, checksum, Utc::now().to_rfc3339()],
            )?;
            Ok(())
        })?;
        debug!("Cache set {} = {}", key, checksum);
        Ok(())
    }

    /// Whether `key` currently maps to exactly `checksum`
    pub fn is_fresh(&self, key: &str, checksum: &str) -> KeelResult<bool> {
        Ok(self.get(key)?.as_deref() == Some(checksum))
    }

    /// Delete `key`, returning whether it existed
    pub fn remove(&self, key: &str) -> KeelResult<bool> {
        self.store.with_immediate_tx(|tx| {
            let removed = tx.execute("DELETE FROM cache WHERE key = ?1", params![key])?;
            Ok(removed > 0)
        })
    }

    /// All entries ordered by key
    pub fn list(&self) -> KeelResult<Vec<CacheEntry>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare("SELECT key, checksum, updated_at FROM cache ORDER BY key")?;
            let rows = stmt.query_map([], |row| {
                Ok(CacheEntry {
                    key: row.get(0)?,
                    checksum: row.get(1)?,
                    updated_at: row.get(2)?,
                })
            })?;
            let entries = rows.collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
    }
}
