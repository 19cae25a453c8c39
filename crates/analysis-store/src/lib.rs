//! SQLite persistence for linked credentials and analysis results
//!
//! One `Database` owns one connection behind a `std::sync::Mutex`. Every
//! public operation is synchronous and holds the lock for exactly one
//! statement or one transaction. Async callers run them through
//! `tokio::task::spawn_blocking` with a cloned `Arc<Database>`.

pub mod analysis;
pub mod credentials;
mod error;
pub mod handshakes;
pub mod ingest;
mod migrations;

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, Transaction};
use tracing::info;

pub use analysis::{AnalysisFilter, AnalysisRecord, AuthorSummary};
pub use credentials::{LinkStatus, StoredCredential};
pub use error::{Error, Result};
pub use handshakes::SqliteHandshakeStore;
pub use ingest::{IngestSummary, LabelCounts, ScoredPost};

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent readers
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "busy_timeout", 5000)?;

        migrations::run(&conn)?;

        info!(path = %path.display(), "database opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|_| Error::Poisoned)?;
        f(&conn)
    }

    /// Run `f` inside a transaction. Commits on `Ok`, rolls back on `Err`
    /// (the transaction is dropped uncommitted).
    pub fn with_tx<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| Error::Poisoned)?;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Current wall-clock time as unix seconds.
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
