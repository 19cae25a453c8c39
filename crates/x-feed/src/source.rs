//! Feed source abstraction
//!
//! The fetcher only needs three reads from a social provider: who the token
//! belongs to, whom they follow, and what those accounts posted recently.
//! Keeping them behind a trait lets the fetcher's abort-on-throttle logic be
//! tested without a network.

use std::future::Future;
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::post::FeedPost;

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page, `None` on the last page.
    pub next: Option<String>,
}

/// The account an access token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Read access to a provider's follow graph and timelines.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn FeedSource>`).
pub trait FeedSource: Send + Sync {
    /// Provider tag stored alongside results (e.g. "x").
    fn id(&self) -> &str;

    /// Account the access token belongs to.
    fn me<'a>(
        &'a self,
        token: &'a Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<Account>> + Send + 'a>>;

    /// One page of account ids followed by `account_id`.
    fn following<'a>(
        &'a self,
        token: &'a Secret<String>,
        account_id: &'a str,
        page_size: usize,
        cursor: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Page<String>>> + Send + 'a>>;

    /// Most recent posts by `author_id`, newest first, at most `max_results`.
    fn recent_posts<'a>(
        &'a self,
        token: &'a Secret<String>,
        author_id: &'a str,
        max_results: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<FeedPost>>> + Send + 'a>>;
}
