//! Read-side queries over stored analyses

use chrono::{DateTime, Utc};
use rusqlite::ToSql;
use serde::Serialize;

use crate::Database;
use crate::error::Result;

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub id: i64,
    pub user_id: i64,
    pub source: String,
    pub post_id: Option<String>,
    pub author_id: String,
    pub lang: Option<String>,
    pub text: String,
    pub label: String,
    pub score: f64,
    pub post_created_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorSummary {
    pub author_id: String,
    pub post_count: u64,
    pub harmful_count: u64,
    pub safe_count: u64,
    /// Any label other than harmful or safe
    pub unknown_count: u64,
    pub harmful_ratio: f64,
}

/// Filters for `list_analyses`. Unset fields do not constrain the query.
#[derive(Debug, Clone, Default)]
pub struct AnalysisFilter {
    pub user_id: i64,
    pub label: Option<String>,
    pub author_id: Option<String>,
    pub lang: Option<String>,
    pub from_created_at: Option<DateTime<Utc>>,
    pub to_created_at: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl AnalysisFilter {
    pub fn for_user(user_id: i64) -> Self {
        Self {
            user_id,
            ..Self::default()
        }
    }
}

/// Clamp paging to `1..=200` and a non-negative offset.
pub fn clamp_page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (
        limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
        offset.unwrap_or(0).max(0),
    )
}

impl Database {
    /// Matching analyses, newest first, plus the total match count.
    pub fn list_analyses(&self, filter: &AnalysisFilter) -> Result<(u64, Vec<AnalysisRecord>)> {
        let mut clauses = vec!["user_id = ?"];
        let mut params: Vec<&dyn ToSql> = vec![&filter.user_id];

        if let Some(label) = &filter.label {
            clauses.push("label = ?");
            params.push(label);
        }
        if let Some(author) = &filter.author_id {
            clauses.push("author_id = ?");
            params.push(author);
        }
        if let Some(lang) = &filter.lang {
            clauses.push("lang = ?");
            params.push(lang);
        }
        if let Some(from) = &filter.from_created_at {
            clauses.push("created_at >= ?");
            params.push(from);
        }
        if let Some(to) = &filter.to_created_at {
            clauses.push("created_at <= ?");
            params.push(to);
        }
        let where_sql = clauses.join(" AND ");
        let (limit, offset) = clamp_page(filter.limit, filter.offset);

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM analyses WHERE {where_sql}"),
                params.as_slice(),
                |row| row.get(0),
            )?;

            let mut page_params = params.clone();
            page_params.push(&limit);
            page_params.push(&offset);

            let mut stmt = conn.prepare(&format!(
                "SELECT id, user_id, source, post_id, author_id, lang, text, label, score, post_created_at, created_at
                 FROM analyses WHERE {where_sql}
                 ORDER BY created_at DESC, id DESC
                 LIMIT ? OFFSET ?"
            ))?;
            let items = stmt
                .query_map(page_params.as_slice(), |row| {
                    Ok(AnalysisRecord {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        source: row.get(2)?,
                        post_id: row.get(3)?,
                        author_id: row.get(4)?,
                        lang: row.get(5)?,
                        text: row.get(6)?,
                        label: row.get(7)?,
                        score: row.get(8)?,
                        post_created_at: row.get(9)?,
                        created_at: row.get(10)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok((total as u64, items))
        })
    }

    /// Per-author label tallies for `user_id`, most harmful authors first.
    /// The total is the number of distinct authors.
    pub fn author_summaries(
        &self,
        user_id: i64,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<(u64, Vec<AuthorSummary>)> {
        let (limit, offset) = clamp_page(limit, offset);

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT author_id) FROM analyses WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare(
                "SELECT author_id,
                        COUNT(*),
                        SUM(CASE WHEN label = 'harmful' THEN 1 ELSE 0 END) AS harmful,
                        SUM(CASE WHEN label = 'safe' THEN 1 ELSE 0 END),
                        SUM(CASE WHEN label NOT IN ('harmful', 'safe') THEN 1 ELSE 0 END)
                 FROM analyses
                 WHERE user_id = ?1
                 GROUP BY author_id
                 ORDER BY harmful DESC, author_id ASC
                 LIMIT ?2 OFFSET ?3",
            )?;
            let items = stmt
                .query_map(rusqlite::params![user_id, limit, offset], |row| {
                    let post_count: i64 = row.get(1)?;
                    let harmful_count: i64 = row.get(2)?;
                    let harmful_ratio = if post_count > 0 {
                        harmful_count as f64 / post_count as f64
                    } else {
                        0.0
                    };
                    Ok(AuthorSummary {
                        author_id: row.get(0)?,
                        post_count: post_count as u64,
                        harmful_count: harmful_count as u64,
                        safe_count: row.get::<_, i64>(3)? as u64,
                        unknown_count: row.get::<_, i64>(4)? as u64,
                        harmful_ratio,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            Ok((total as u64, items))
        })
    }
}
