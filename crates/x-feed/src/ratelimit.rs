//! Rate-limit signal mapping for X API responses
//!
//! X reports its per-endpoint window in three headers on every response:
//! `x-rate-limit-limit`, `x-rate-limit-remaining` and `x-rate-limit-reset`
//! (unix seconds). A 429 turns those into a `RateLimit` that callers can
//! forward to clients as a "try again after" hint.

use chrono::{Local, TimeZone};
use reqwest::header::HeaderMap;
use serde::Serialize;

use crate::error::Error;

const LIMIT_HEADER: &str = "x-rate-limit-limit";
const REMAINING_HEADER: &str = "x-rate-limit-remaining";
const RESET_HEADER: &str = "x-rate-limit-reset";

/// Structured throttling condition for one upstream resource.
///
/// Every numeric field is optional: a missing or garbled header must not turn
/// an advisory retry hint into a hard failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimit {
    /// Endpoint that was limited, e.g. `/2/users/:id/tweets`
    pub resource: String,
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    /// Unix time (seconds) at which the window resets
    pub reset_epoch: Option<i64>,
}

impl RateLimit {
    pub fn from_headers(resource: impl Into<String>, headers: &HeaderMap) -> Self {
        Self {
            resource: resource.into(),
            limit: header_number(headers, LIMIT_HEADER),
            remaining: header_number(headers, REMAINING_HEADER),
            reset_epoch: header_number(headers, RESET_HEADER),
        }
    }

    /// Reset time in the serving process's local time zone,
    /// `%Y-%m-%d %H:%M:%S`. `None` when the epoch is absent or out of range.
    pub fn reset_time_local(&self) -> Option<String> {
        let epoch = self.reset_epoch?;
        Local
            .timestamp_opt(epoch, 0)
            .single()
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    /// Seconds until reset relative to `now_epoch`, if the reset is in the future.
    pub fn retry_after_secs(&self, now_epoch: i64) -> Option<u64> {
        let epoch = self.reset_epoch?;
        u64::try_from(epoch - now_epoch).ok().filter(|s| *s > 0)
    }
}

fn header_number<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Classify a non-success X API response.
///
/// - 429 → `RateLimited` with the window parsed from headers
/// - 401/403 → `Unauthorized` (token revoked or expired)
/// - 408/5xx → `UpstreamUnavailable`
/// - anything else → `Protocol`
pub fn classify_status(resource: &str, status: u16, headers: &HeaderMap, body: &str) -> Error {
    match status {
        429 => Error::RateLimited(RateLimit::from_headers(resource, headers)),
        401 | 403 => Error::Unauthorized { status },
        408 | 500..=599 => Error::UpstreamUnavailable(format!("{resource} returned {status}")),
        _ => Error::Protocol(format!("{resource} returned {status}: {body}")),
    }
}
