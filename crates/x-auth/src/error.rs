//! Error types for account-linking operations

/// Errors from the token endpoint and the handshake store.
///
/// `AuthorizationFailed` is terminal for an attempt: an authorization code
/// is single-use, so the caller must restart the handshake.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("identity provider unreachable: {0}")]
    UpstreamUnavailable(String),

    #[error("authorization rejected by provider ({status}): {body}")]
    AuthorizationFailed { status: u16, body: String },

    #[error("unexpected token endpoint response: {0}")]
    Protocol(String),

    #[error("invalid OAuth configuration: {0}")]
    Config(String),

    #[error("handshake store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, Error>;
