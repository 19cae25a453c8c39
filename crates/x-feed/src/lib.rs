//! Social feed retrieval from the X API v2
//!
//! Defines the `FeedSource` trait that decouples feed assembly from the
//! concrete HTTP API, the `XApiClient` implementation of it, and the
//! `FeedFetcher` that walks the follow graph and collects recent posts.
//!
//! Upstream throttling is never an opaque failure here: a 429 becomes a
//! structured `RateLimit`, and the fetcher reports it as
//! `FeedOutcome::RateLimited` instead of a partial post list.

pub mod error;
pub mod fetcher;
pub mod post;
pub mod ratelimit;
pub mod source;
pub mod x;

pub use error::{Error, Result};
pub use fetcher::{FeedFetcher, FeedOutcome};
pub use post::FeedPost;
pub use ratelimit::RateLimit;
pub use source::{Account, FeedSource, Page};
pub use x::XApiClient;
