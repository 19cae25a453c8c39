//! Error types for feed retrieval

use crate::ratelimit::RateLimit;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("rate limited on {}", .0.resource)]
    RateLimited(RateLimit),

    /// The stored access token was rejected; the account must be re-linked.
    #[error("feed provider rejected credentials ({status})")]
    Unauthorized { status: u16 },

    #[error("feed provider unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("unexpected feed provider response: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, Error>;
