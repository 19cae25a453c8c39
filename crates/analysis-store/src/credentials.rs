//! Linked provider credentials
//!
//! Token fields are encrypted one by one with `SecretCodec` before they are
//! bound to the statement; plaintext never reaches SQLite. Metadata (scope,
//! token type, lifetime) stays readable so link status can be answered
//! without touching key material.

use common::{Secret, SecretCodec};
use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::info;
use x_auth::TokenResponse;

use crate::error::Result;
use crate::{Database, unix_now};

/// A credentials row with ciphertext still sealed.
#[derive(Debug, Clone)]
pub struct StoredCredential {
    pub user_id: i64,
    pub provider: String,
    pub access_token: Vec<u8>,
    pub refresh_token: Option<Vec<u8>>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    /// Unix seconds of the last write
    pub updated_at: i64,
}

impl StoredCredential {
    /// Unix seconds at which the access token stops being valid, if the
    /// provider reported a lifetime.
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_in.map(|secs| self.updated_at.saturating_add(secs))
    }

    /// True when the access token is expired or expires within `skew_secs`
    /// of `now`. Credentials without a reported lifetime never expire here.
    pub fn expires_within(&self, now: i64, skew_secs: i64) -> bool {
        self.expires_at()
            .is_some_and(|at| at.saturating_sub(skew_secs) <= now)
    }

    pub fn access_token(&self, codec: &SecretCodec) -> Result<Secret<String>> {
        Ok(codec.decrypt(&self.access_token)?)
    }

    pub fn refresh_token(&self, codec: &SecretCodec) -> Result<Option<Secret<String>>> {
        self.refresh_token
            .as_deref()
            .map(|cipher| codec.decrypt(cipher))
            .transpose()
            .map_err(Into::into)
    }

    pub fn scopes(&self) -> Vec<String> {
        split_scopes(self.scope.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub linked: bool,
    pub scopes: Vec<String>,
}

fn split_scopes(scope: Option<&str>) -> Vec<String> {
    scope
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

impl Database {
    /// Insert or replace the credential for `(user_id, provider)`.
    ///
    /// Last write wins: every field, including an absent refresh token,
    /// comes from `token`.
    pub fn upsert_credential(
        &self,
        user_id: i64,
        provider: &str,
        token: &TokenResponse,
        codec: &SecretCodec,
    ) -> Result<()> {
        let access = codec.encrypt(&token.access_token)?;
        let refresh = token
            .refresh_token
            .as_deref()
            .map(|r| codec.encrypt(r))
            .transpose()?;
        let now = unix_now();

        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO credentials
                    (user_id, provider, access_token, refresh_token, scope, token_type, expires_in, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(user_id, provider) DO UPDATE SET
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    scope = excluded.scope,
                    token_type = excluded.token_type,
                    expires_in = excluded.expires_in,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    user_id,
                    provider,
                    access,
                    refresh,
                    token.scope,
                    token.token_type,
                    token.expires_in,
                    now,
                ],
            )?;
            Ok(())
        })?;

        info!(user_id, provider, "credential stored");
        Ok(())
    }

    pub fn credential(&self, user_id: i64, provider: &str) -> Result<Option<StoredCredential>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT user_id, provider, access_token, refresh_token, scope, token_type, expires_in, updated_at
                     FROM credentials WHERE user_id = ?1 AND provider = ?2",
                    rusqlite::params![user_id, provider],
                    |row| {
                        Ok(StoredCredential {
                            user_id: row.get(0)?,
                            provider: row.get(1)?,
                            access_token: row.get(2)?,
                            refresh_token: row.get(3)?,
                            scope: row.get(4)?,
                            token_type: row.get(5)?,
                            expires_in: row.get(6)?,
                            updated_at: row.get(7)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn link_status(&self, user_id: i64, provider: &str) -> Result<LinkStatus> {
        self.with_conn(|conn| {
            let scope: Option<Option<String>> = conn
                .query_row(
                    "SELECT scope FROM credentials WHERE user_id = ?1 AND provider = ?2",
                    rusqlite::params![user_id, provider],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(match scope {
                Some(scope) => LinkStatus {
                    linked: true,
                    scopes: split_scopes(scope.as_deref()),
                },
                None => LinkStatus {
                    linked: false,
                    scopes: Vec::new(),
                },
            })
        })
    }
}
