//! Idempotent ingestion of classified posts
//!
//! Results are keyed by `(user_id, source, post_id)`. Re-analyzing a post
//! overwrites its row in place instead of adding a duplicate, so repeated
//! previews of an overlapping feed leave one row per post.

use chrono::Utc;
use classifier::Prediction;
use rusqlite::OptionalExtension;
use serde::Serialize;
use tracing::info;
use x_feed::FeedPost;

use crate::Database;
use crate::error::Result;

/// A feed post paired with the classifier's verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredPost {
    pub post: FeedPost,
    #[serde(flatten)]
    pub prediction: Prediction,
}

/// Label tallies for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelCounts {
    pub harmful: u64,
    pub safe: u64,
    pub unknown: u64,
}

impl LabelCounts {
    pub fn tally<'a>(predictions: impl IntoIterator<Item = &'a Prediction>) -> Self {
        let mut counts = Self::default();
        for p in predictions {
            if p.is_harmful() {
                counts.harmful += 1;
            } else if p.is_safe() {
                counts.safe += 1;
            } else {
                counts.unknown += 1;
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Counts for this batch only, never cumulative.
    pub counts: LabelCounts,
    pub inserted: u64,
    pub updated: u64,
}

impl Database {
    /// Upsert a batch of results in one transaction.
    ///
    /// Items without a `source_id` cannot be matched and are always
    /// inserted. Any storage error rolls back the whole batch.
    pub fn ingest(&self, user_id: i64, source: &str, items: &[ScoredPost]) -> Result<IngestSummary> {
        let now = Utc::now();

        let (inserted, updated) = self.with_tx(|tx| {
            let mut inserted = 0u64;
            let mut updated = 0u64;

            let mut find = tx.prepare_cached(
                "SELECT id FROM analyses WHERE user_id = ?1 AND source = ?2 AND post_id = ?3",
            )?;
            let mut update = tx.prepare_cached(
                "UPDATE analyses
                 SET author_id = ?2, lang = ?3, text = ?4, label = ?5, score = ?6,
                     post_created_at = ?7, created_at = ?8
                 WHERE id = ?1",
            )?;
            let mut insert = tx.prepare_cached(
                "INSERT INTO analyses
                    (user_id, source, post_id, author_id, lang, text, label, score, post_created_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;

            for item in items {
                let post = &item.post;
                let existing: Option<i64> = match &post.source_id {
                    Some(post_id) => find
                        .query_row(rusqlite::params![user_id, source, post_id], |row| row.get(0))
                        .optional()?,
                    None => None,
                };

                match existing {
                    Some(id) => {
                        update.execute(rusqlite::params![
                            id,
                            post.author_id,
                            post.lang,
                            post.text,
                            item.prediction.label,
                            item.prediction.score,
                            post.created_at,
                            now,
                        ])?;
                        updated += 1;
                    }
                    None => {
                        insert.execute(rusqlite::params![
                            user_id,
                            source,
                            post.source_id,
                            post.author_id,
                            post.lang,
                            post.text,
                            item.prediction.label,
                            item.prediction.score,
                            post.created_at,
                            now,
                        ])?;
                        inserted += 1;
                    }
                }
            }
            Ok((inserted, updated))
        })?;

        let counts = LabelCounts::tally(items.iter().map(|i| &i.prediction));
        info!(
            user_id,
            source,
            inserted,
            updated,
            harmful = counts.harmful,
            safe = counts.safe,
            unknown = counts.unknown,
            "analysis batch stored"
        );
        Ok(IngestSummary {
            counts,
            inserted,
            updated,
        })
    }
}
