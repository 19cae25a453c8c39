//! Feed assembly: follow graph walk plus per-author timelines
//!
//! A throttled upstream call anywhere in the walk ends it. The caller gets
//! `FeedOutcome::RateLimited` and no further requests are made, so a partial
//! post list never masquerades as a complete feed.

use std::sync::Arc;

use common::Secret;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::post::FeedPost;
use crate::ratelimit::RateLimit;
use crate::source::{Account, FeedSource};

/// Result of a feed fetch. Exhaustively matched by callers.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedOutcome {
    Posts(Vec<FeedPost>),
    RateLimited(RateLimit),
}

pub struct FeedFetcher {
    source: Arc<dyn FeedSource>,
}

impl FeedFetcher {
    pub fn new(source: Arc<dyn FeedSource>) -> Self {
        Self { source }
    }

    /// Provider tag of the underlying source.
    pub fn source_id(&self) -> &str {
        self.source.id()
    }

    /// Collect up to `per_batch` recent posts from each of the first
    /// `authors_limit` followed accounts, preserving provider order.
    #[instrument(skip(self, token), fields(source = self.source.id()))]
    pub async fn fetch(
        &self,
        token: &Secret<String>,
        authors_limit: usize,
        per_batch: usize,
    ) -> Result<FeedOutcome> {
        match self.collect(token, authors_limit, per_batch).await {
            Ok(posts) => {
                info!(posts = posts.len(), "feed fetched");
                Ok(FeedOutcome::Posts(posts))
            }
            Err(Error::RateLimited(limit)) => {
                warn!(
                    resource = %limit.resource,
                    reset_epoch = ?limit.reset_epoch,
                    "feed fetch aborted by upstream rate limit"
                );
                Ok(FeedOutcome::RateLimited(limit))
            }
            Err(e) => Err(e),
        }
    }

    /// Account the token belongs to.
    pub async fn account(&self, token: &Secret<String>) -> Result<Account> {
        self.source.me(token).await
    }

    /// Up to `limit` recent posts by the token's own account. Throttling
    /// surfaces as `Error::RateLimited`.
    #[instrument(skip(self, token), fields(source = self.source.id()))]
    pub async fn own_posts(&self, token: &Secret<String>, limit: usize) -> Result<Vec<FeedPost>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let me = self.source.me(token).await?;
        let mut posts = self.source.recent_posts(token, &me.id, limit).await?;
        posts.truncate(limit);
        debug!(account = %me.id, posts = posts.len(), "own posts fetched");
        Ok(posts)
    }

    async fn collect(
        &self,
        token: &Secret<String>,
        authors_limit: usize,
        per_batch: usize,
    ) -> Result<Vec<FeedPost>> {
        if authors_limit == 0 || per_batch == 0 {
            return Ok(Vec::new());
        }

        let me = self.source.me(token).await?;

        let mut authors: Vec<String> = Vec::with_capacity(authors_limit);
        let mut cursor: Option<String> = None;
        while authors.len() < authors_limit {
            let page = self
                .source
                .following(token, &me.id, authors_limit, cursor.as_deref())
                .await?;
            if page.items.is_empty() {
                break;
            }
            let room = authors_limit - authors.len();
            authors.extend(page.items.into_iter().take(room));
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        debug!(authors = authors.len(), "following resolved");

        let mut posts = Vec::new();
        for author in &authors {
            let batch = self.source.recent_posts(token, author, per_batch).await?;
            posts.extend(batch.into_iter().take(per_batch));
        }
        Ok(posts)
    }
}
