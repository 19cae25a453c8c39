//! Feed analysis pipeline
//!
//! credential lookup → (refresh) → feed fetch → classify → idempotent store.
//! Storage calls run on the blocking pool through `with_db`; no database
//! lock is held while waiting on the network.

use common::Secret;
use tracing::{error, info, instrument, warn};
use x_feed::{Account, FeedOutcome, FeedPost};

use analysis_store::{Database, IngestSummary, ScoredPost, StoredCredential};

use crate::error::ApiError;
use crate::metrics;
use crate::routes::AppState;

/// Provider tag under which X credentials are stored.
pub const PROVIDER_X: &str = "x";

/// Refresh the access token when it expires within this many seconds.
const REFRESH_SKEW_SECS: i64 = 60;

/// Largest accepted `authors_limit`, `per_batch` or own-posts `limit`.
pub const MAX_FEED_LIMIT: usize = 100;

pub struct PreviewReport {
    pub items: Vec<ScoredPost>,
    pub summary: IngestSummary,
}

/// `value` as a count in `1..=MAX_FEED_LIMIT`.
pub fn validate_limit(name: &str, value: i64) -> Result<usize, ApiError> {
    usize::try_from(value)
        .ok()
        .filter(|v| (1..=MAX_FEED_LIMIT).contains(v))
        .ok_or_else(|| {
            ApiError::InvalidRequest(format!("{name} must be between 1 and {MAX_FEED_LIMIT}"))
        })
}

pub fn validate_limits(authors_limit: i64, per_batch: i64) -> Result<(usize, usize), ApiError> {
    Ok((
        validate_limit("authors_limit", authors_limit)?,
        validate_limit("per_batch", per_batch)?,
    ))
}

/// Run a storage call on the blocking pool. SQLite calls block the calling
/// thread and must never run on an async worker.
pub async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> analysis_store::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!(error = %e, "storage task failed");
            ApiError::Internal(format!("storage task failed: {e}"))
        })?
        .map_err(ApiError::from)
}

async fn stored_credential(
    state: &AppState,
    user_id: i64,
) -> Result<Option<StoredCredential>, ApiError> {
    with_db(state, move |db| db.credential(user_id, PROVIDER_X)).await
}

/// Decrypted access token for `user_id`, refreshed first when it is about
/// to expire and a refresh token is on file.
async fn access_token(state: &AppState, user_id: i64) -> Result<Secret<String>, ApiError> {
    let credential = stored_credential(state, user_id)
        .await?
        .ok_or(ApiError::NotLinked)?;

    let now = chrono::Utc::now().timestamp();
    if !credential.expires_within(now, REFRESH_SKEW_SECS) {
        return Ok(credential.access_token(&state.codec)?);
    }

    let Some(refresh) = credential.refresh_token(&state.codec)? else {
        // Nothing to refresh with; let the provider decide whether the token
        // still works.
        return Ok(credential.access_token(&state.codec)?);
    };

    let mut token = match x_auth::refresh_token(&state.http, &state.oauth, refresh.expose()).await
    {
        Ok(token) => token,
        Err(x_auth::Error::AuthorizationFailed { status, .. }) => {
            // A concurrent request may have rotated the refresh token first.
            let rotated = stored_credential(state, user_id)
                .await?
                .filter(|current| current.access_token != credential.access_token);
            if let Some(current) = rotated {
                info!(user_id, "refresh lost a race, using the stored token");
                return Ok(current.access_token(&state.codec)?);
            }
            warn!(user_id, status, "refresh token rejected, re-link required");
            return Err(ApiError::NotLinked);
        }
        Err(e) => {
            metrics::record_upstream_error("x_oauth", "refresh");
            return Err(e.into());
        }
    };

    // Fields the provider leaves out of a refresh response keep their
    // stored values.
    if token.refresh_token.is_none() {
        token.refresh_token = Some(refresh.expose().clone());
    }
    if token.scope.is_none() {
        token.scope = credential.scope;
    }
    if token.token_type.is_none() {
        token.token_type = credential.token_type;
    }

    let access = Secret::new(token.access_token.clone());
    let codec = state.codec.clone();
    with_db(state, move |db| {
        db.upsert_credential(user_id, PROVIDER_X, &token, &codec)
    })
    .await?;
    info!(user_id, "access token refreshed");

    Ok(access)
}

/// Map a provider error for `user_id`: throttling keeps its window, a
/// rejected token means the account must be linked again.
fn provider_error(user_id: i64, op: &'static str, e: x_feed::Error) -> ApiError {
    match e {
        x_feed::Error::RateLimited(limit) => {
            metrics::record_rate_limited(&limit.resource);
            ApiError::UpstreamRateLimited(limit)
        }
        x_feed::Error::Unauthorized { status } => {
            warn!(user_id, status, "feed provider rejected stored token");
            ApiError::NotLinked
        }
        e => {
            metrics::record_upstream_error("x_api", op);
            e.into()
        }
    }
}

/// The X account linked for `user_id`.
#[instrument(skip(state))]
pub async fn linked_account(state: &AppState, user_id: i64) -> Result<Account, ApiError> {
    let token = access_token(state, user_id).await?;
    state
        .fetcher
        .account(&token)
        .await
        .map_err(|e| provider_error(user_id, "me", e))
}

/// Recent posts by the linked account itself.
#[instrument(skip(state))]
pub async fn own_posts(
    state: &AppState,
    user_id: i64,
    limit: usize,
) -> Result<Vec<FeedPost>, ApiError> {
    let token = access_token(state, user_id).await?;
    state
        .fetcher
        .own_posts(&token, limit)
        .await
        .map_err(|e| provider_error(user_id, "own_posts", e))
}

/// Fetch the user's feed without classifying it.
#[instrument(skip(state))]
pub async fn fetch_feed(
    state: &AppState,
    user_id: i64,
    authors_limit: usize,
    per_batch: usize,
) -> Result<Vec<FeedPost>, ApiError> {
    let token = access_token(state, user_id).await?;

    match state.fetcher.fetch(&token, authors_limit, per_batch).await {
        Ok(FeedOutcome::Posts(posts)) => Ok(posts),
        Ok(FeedOutcome::RateLimited(limit)) => {
            metrics::record_rate_limited(&limit.resource);
            Err(ApiError::UpstreamRateLimited(limit))
        }
        Err(e) => Err(provider_error(user_id, "fetch", e)),
    }
}

/// Fetch, classify and store the user's feed.
///
/// A rate-limited fetch returns before the classifier or the store is
/// touched. Classifier or storage failures fail the whole request; nothing
/// from a failed batch is stored.
#[instrument(skip(state), fields(request_id = %request_id()))]
pub async fn run_preview(
    state: &AppState,
    user_id: i64,
    authors_limit: usize,
    per_batch: usize,
) -> Result<PreviewReport, ApiError> {
    let posts = fetch_feed(state, user_id, authors_limit, per_batch).await?;
    if posts.is_empty() {
        info!(user_id, "empty feed, nothing to classify");
        return Ok(PreviewReport {
            items: Vec::new(),
            summary: IngestSummary::default(),
        });
    }

    let texts: Vec<String> = posts.iter().map(|p| p.text.clone()).collect();
    let predictions = state.classifier.score_batch(&texts).await.map_err(|e| {
        metrics::record_upstream_error("classifier", "score");
        ApiError::from(e)
    })?;

    let items: Vec<ScoredPost> = posts
        .into_iter()
        .zip(predictions)
        .map(|(post, prediction)| ScoredPost { post, prediction })
        .collect();

    let source = state.fetcher.source_id().to_string();
    let (items, summary) = with_db(state, move |db| {
        let summary = db.ingest(user_id, &source, &items)?;
        Ok((items, summary))
    })
    .await?;
    metrics::record_ingested(&summary.counts);

    Ok(PreviewReport { items, summary })
}

fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}
