//! Handshake state for in-flight authorizations
//!
//! `start` stores the PKCE verifier and the requesting user under a fresh
//! opaque token, which travels through the provider as the OAuth `state`
//! parameter. `callback` consumes it. Consumption is an atomic
//! read-and-delete: of any number of concurrent callbacks carrying the same
//! token, exactly one gets the entry back. Entries expire after a TTL even if
//! never consumed.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;

/// How long a started authorization may wait for its callback.
pub const DEFAULT_HANDSHAKE_TTL: Duration = Duration::from_secs(600);

/// What a callback recovers from its `state` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub verifier: String,
    pub user_id: i64,
}

/// Storage for pending handshakes.
///
/// Uses `Pin<Box<dyn Future>>` return types so handlers can hold an
/// `Arc<dyn HandshakeStore>` and the backend is chosen at startup.
pub trait HandshakeStore: Send + Sync {
    /// Persist a verifier for `user_id` and return the new state token.
    fn create(
        &self,
        verifier: String,
        user_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Remove and return the entry for `token`.
    ///
    /// `None` when the token was never issued, was already consumed, or has
    /// outlived the TTL.
    fn consume<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Handshake>>> + Send + 'a>>;
}

/// Generate an unguessable state token (256 random bits, base64url).
pub fn new_state_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

struct PendingHandshake {
    handshake: Handshake,
    created_at: Instant,
}

/// Process-local store. Suitable for a single replica.
pub struct MemoryHandshakeStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, PendingHandshake>>,
}

impl MemoryHandshakeStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of entries currently held, expired ones included until the
    /// next `create` prunes them.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryHandshakeStore {
    fn default() -> Self {
        Self::new(DEFAULT_HANDSHAKE_TTL)
    }
}

impl HandshakeStore for MemoryHandshakeStore {
    fn create(
        &self,
        verifier: String,
        user_id: i64,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        Box::pin(async move {
            let token = new_state_token();
            let mut entries = self.entries.lock().await;
            // Lazy cleanup while holding the lock
            entries.retain(|_, pending| pending.created_at.elapsed() < self.ttl);
            entries.insert(
                token.clone(),
                PendingHandshake {
                    handshake: Handshake { verifier, user_id },
                    created_at: Instant::now(),
                },
            );
            debug!(user_id, pending = entries.len(), "handshake created");
            Ok(token)
        })
    }

    fn consume<'a>(
        &'a self,
        token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Handshake>>> + Send + 'a>> {
        Box::pin(async move {
            let pending = self.entries.lock().await.remove(token);
            Ok(pending.and_then(|p| {
                if p.created_at.elapsed() < self.ttl {
                    Some(p.handshake)
                } else {
                    debug!(user_id = p.handshake.user_id, "handshake expired");
                    None
                }
            }))
        })
    }
}
