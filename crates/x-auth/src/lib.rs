//! X (Twitter) OAuth 2.0 account linking
//!
//! Provides PKCE generation, the handshake-state store that correlates an
//! in-flight authorization with the user who started it, and the token
//! endpoint calls. No storage of durable credentials happens here; callers
//! hand the `TokenResponse` to the credential store.
//!
//! Linking flow:
//! 1. `pkce::generate_verifier()` + `pkce::compute_challenge()`
//! 2. `HandshakeStore::create()` returns the opaque `state` token
//! 3. User authorizes at `pkce::build_authorization_url()`
//! 4. Callback: `HandshakeStore::consume()` (at most once) yields the verifier
//! 5. `token::exchange_code()` trades code + verifier for tokens
//! 6. `token::refresh_token()` renews an expired access token later

pub mod config;
pub mod error;
pub mod handshake;
pub mod pkce;
pub mod token;

pub use config::OAuthConfig;
pub use error::{Error, Result};
pub use handshake::{DEFAULT_HANDSHAKE_TTL, Handshake, HandshakeStore, MemoryHandshakeStore};
pub use pkce::{build_authorization_url, compute_challenge, generate_verifier};
pub use token::{TokenResponse, exchange_code, refresh_token};
