//! Normalized feed posts
//!
//! X returns tweets with string ids and RFC 3339 timestamps; everything
//! downstream works with `FeedPost` instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A post as the classifier and ingestion engine see it.
///
/// `source_id` is the provider's post id and doubles as the dedup key when
/// results are stored. It is optional because not every source guarantees one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedPost {
    #[serde(rename = "post_id")]
    pub source_id: Option<String>,
    pub author_id: String,
    pub lang: Option<String>,
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Tweet object as returned with `tweet.fields=created_at,lang,author_id`.
#[derive(Debug, Deserialize)]
pub(crate) struct XTweet {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub author_id: Option<String>,
    #[serde(default)]
    pub lang: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl XTweet {
    /// `fallback_author` is the account whose timeline was fetched; tweets
    /// normally carry `author_id` themselves but it is only present when
    /// requested in `tweet.fields`.
    pub(crate) fn into_post(self, fallback_author: &str) -> FeedPost {
        let created_at = self
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        FeedPost {
            source_id: self.id,
            author_id: self
                .author_id
                .unwrap_or_else(|| fallback_author.to_string()),
            lang: self.lang,
            text: self.text,
            created_at,
        }
    }
}
