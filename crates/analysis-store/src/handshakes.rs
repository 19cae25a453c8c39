//! SQLite-backed handshake store
//!
//! Lets pending authorizations survive a restart and be shared by replicas
//! using the same database file. Consumption is a single
//! `DELETE ... RETURNING`, so the storage engine decides which of several
//! concurrent callbacks wins.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::OptionalExtension;
use tracing::{debug, error};
use x_auth::handshake::new_state_token;
use x_auth::{Handshake, HandshakeStore};

use crate::{Database, unix_now};

pub struct SqliteHandshakeStore {
    db: Arc<Database>,
    ttl: Duration,
}

impl SqliteHandshakeStore {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    fn ttl_secs(&self) -> i64 {
        i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX)
    }
}

fn insert(db: &Database, ttl_secs: i64, verifier: &str, user_id: i64) -> crate::Result<String> {
    let token = new_state_token();
    let now = unix_now();
    let cutoff = now.saturating_sub(ttl_secs);
    db.with_tx(|tx| {
        let pruned = tx.execute("DELETE FROM handshakes WHERE created_at <= ?1", [cutoff])?;
        tx.execute(
            "INSERT INTO handshakes (token, verifier, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![token, verifier, user_id, now],
        )?;
        debug!(user_id, pruned, "handshake created");
        Ok(())
    })?;
    Ok(token)
}

fn take(db: &Database, ttl_secs: i64, token: &str) -> crate::Result<Option<Handshake>> {
    let row: Option<(String, i64, i64)> = db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "DELETE FROM handshakes WHERE token = ?1 RETURNING verifier, user_id, created_at",
                [token],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?)
    })?;

    Ok(row.and_then(|(verifier, user_id, created_at)| {
        if unix_now().saturating_sub(created_at) < ttl_secs {
            Some(Handshake { verifier, user_id })
        } else {
            debug!(user_id, "handshake expired");
            None
        }
    }))
}

fn join_error(e: tokio::task::JoinError) -> x_auth::Error {
    error!(error = %e, "handshake store task failed");
    x_auth::Error::Store(e.to_string())
}

impl HandshakeStore for SqliteHandshakeStore {
    fn create(
        &self,
        verifier: String,
        user_id: i64,
    ) -> Pin<Box<dyn Future<Output = x_auth::Result<String>> + Send + '_>> {
        // SQLite calls block; keep them off the async runtime
        let db = self.db.clone();
        let ttl_secs = self.ttl_secs();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || insert(&db, ttl_secs, &verifier, user_id))
                .await
                .map_err(join_error)?
                .map_err(|e| x_auth::Error::Store(e.to_string()))
        })
    }

    fn consume<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = x_auth::Result<Option<Handshake>>> + Send + 'a>> {
        let db = self.db.clone();
        let ttl_secs = self.ttl_secs();
        let token = token.to_string();
        Box::pin(async move {
            tokio::task::spawn_blocking(move || take(&db, ttl_secs, &token))
                .await
                .map_err(join_error)?
                .map_err(|e| x_auth::Error::Store(e.to_string()))
        })
    }
}
