//! Shared SQLite database holding the ledger and the cache
//!
//! Every invocation opens its own connection. WAL mode plus a busy timeout
//! lets concurrent processes queue behind each other instead of failing, and
//! every read-modify-write runs inside an IMMEDIATE transaction so the write
//! lock is taken before the first read.

use crate::error::{KeelError, KeelResult};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// How long a connection waits for another process's write lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ledger (
    sha TEXT NOT NULL,
    phase_group TEXT NOT NULL,
    status TEXT NOT NULL,
    owner_token TEXT NOT NULL,
    owner_pid INTEGER NOT NULL,
    reference TEXT NOT NULL,
    actor TEXT NOT NULL,
    claimed_at TEXT NOT NULL,
    finished_at TEXT NULL,
    PRIMARY KEY (sha, phase_group)
);
CREATE TABLE IF NOT EXISTS ledger_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sha TEXT NOT NULL,
    phase_group TEXT NOT NULL,
    event TEXT NOT NULL,
    status TEXT NOT NULL,
    owner_token TEXT NOT NULL,
    owner_pid INTEGER NOT NULL,
    reference TEXT NOT NULL,
    actor TEXT NOT NULL,
    recorded_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS ledger_history_sha ON ledger_history (sha);
CREATE TABLE IF NOT EXISTS cache (
    key TEXT PRIMARY KEY,
    checksum TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Handle to the keel database, cheap to clone
#[derive(Clone)]
pub struct Store {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if necessary) the database at `path`
    pub fn open(path: &Path) -> KeelResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    KeelError::io(format!("creating database directory {}", parent.display()), e)
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.execute_batch(SCHEMA)?;

        debug!("Opened database {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside an IMMEDIATE transaction, committing on success
    pub(crate) fn with_immediate_tx<T, F>(&self, f: F) -> KeelResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> KeelResult<T>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    /// Run a read-only closure against the connection
    pub(crate) fn read<T, F>(&self, f: F) -> KeelResult<T>
    where
        F: FnOnce(&Connection) -> KeelResult<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    fn lock(&self) -> KeelResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| KeelError::Internal("database connection mutex poisoned".to_string()))
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("path", &self.path).finish()
    }
}
