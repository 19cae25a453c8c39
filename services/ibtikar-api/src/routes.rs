//! HTTP routes
//!
//! Endpoints:
//! - GET  /v1/oauth/x/start        — create handshake, redirect to X
//! - GET  /v1/oauth/x/callback     — consume handshake, exchange code, store credential
//! - GET  /v1/me/link-status       — whether a user has linked X
//! - GET  /v1/x/me                 — the linked X account
//! - GET  /v1/x/my-posts           — recent posts by the linked account
//! - GET  /v1/x/feed               — normalized feed without classification
//! - GET  /v1/x/feed/normalized    — same as /v1/x/feed
//! - POST /v1/analysis/preview     — fetch, classify and store the feed
//! - GET  /v1/analysis/posts       — stored results with filters
//! - GET  /v1/analysis/authors     — per-author aggregates
//! - GET  /health, GET /metrics

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::QueryRejection;
use axum::extract::{MatchedPath, Query, Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use common::SecretCodec;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use x_auth::{HandshakeStore, OAuthConfig};
use x_feed::{Account, FeedFetcher, FeedPost};

use analysis_store::{AnalysisFilter, Database, ScoredPost};
use classifier::Classifier;

use crate::error::ApiError;
use crate::metrics;
use crate::pipeline::{self, PROVIDER_X};

/// Default user when the caller does not name one (single-tenant setups).
const DEFAULT_USER_ID: i64 = 1;
const DEFAULT_AUTHORS_LIMIT: i64 = 15;
const DEFAULT_PER_BATCH: i64 = 15;
const DEFAULT_OWN_POSTS_LIMIT: i64 = 20;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub oauth: Arc<OAuthConfig>,
    /// Client for the token endpoint.
    pub http: reqwest::Client,
    pub handshakes: Arc<dyn HandshakeStore>,
    pub db: Arc<Database>,
    pub codec: Arc<SecretCodec>,
    pub fetcher: Arc<FeedFetcher>,
    pub classifier: Arc<dyn Classifier>,
    pub prometheus: PrometheusHandle,
    pub started_at: Instant,
}

/// Build the axum router with all routes and shared state.
///
/// Applies a concurrency limit layer based on `max_connections`.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/v1/oauth/x/start", get(oauth_start))
        .route("/v1/oauth/x/callback", get(oauth_callback))
        .route("/v1/me/link-status", get(link_status))
        .route("/v1/x/me", get(x_me))
        .route("/v1/x/my-posts", get(my_posts))
        .route("/v1/x/feed", get(feed))
        .route("/v1/x/feed/normalized", get(feed))
        .route("/v1/analysis/preview", post(analysis_preview))
        .route("/v1/analysis/posts", get(analysis_posts))
        .route("/v1/analysis/authors", get(analysis_authors))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(middleware::from_fn(track_request))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

async fn track_request(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let start = Instant::now();
    let response = next.run(request).await;
    metrics::record_request(
        &route,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: Option<i64>,
}

impl UserQuery {
    fn user_id(&self) -> i64 {
        self.user_id.unwrap_or(DEFAULT_USER_ID)
    }
}

/// GET /v1/oauth/x/start — begin linking: PKCE pair + handshake, 302 to X.
async fn oauth_start(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query?;
    let user_id = query.user_id();

    let verifier = x_auth::generate_verifier();
    let challenge = x_auth::compute_challenge(&verifier);
    let token = state.handshakes.create(verifier, user_id).await?;
    let url = match x_auth::build_authorization_url(&state.oauth, &token, &challenge) {
        Ok(url) => url,
        Err(e) => {
            // Nobody can complete this handshake; drop it now.
            if let Err(discard) = state.handshakes.consume(&token).await {
                warn!(error = %discard, "failed to discard handshake");
            }
            return Err(e.into());
        }
    };

    info!(user_id, "link flow started");
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    /// Set by X when the user denies access.
    error: Option<String>,
}

#[derive(Serialize)]
struct LinkResponse {
    linked: bool,
    user_id: i64,
    scopes: Vec<String>,
}

/// GET /v1/oauth/x/callback — finish linking.
///
/// The handshake is consumed before the code exchange, so a replayed
/// callback fails even if the first exchange is still in flight.
async fn oauth_callback(
    State(state): State<AppState>,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> Result<Json<LinkResponse>, ApiError> {
    let Query(query) = query?;

    let (code, token) = match (query.code.as_deref(), query.state.as_deref()) {
        (Some(code), Some(token)) if !code.is_empty() && !token.is_empty() => (code, token),
        _ => {
            if let Some(error) = &query.error {
                warn!(error = %error, "provider returned an error to the callback");
            }
            return Err(ApiError::InvalidRequest("missing code or state".into()));
        }
    };

    let handshake = state
        .handshakes
        .consume(token)
        .await?
        .ok_or(ApiError::HandshakeExpiredOrReplayed)?;
    let user_id = handshake.user_id;

    let grant = x_auth::exchange_code(&state.http, &state.oauth, code, &handshake.verifier)
        .await
        .inspect_err(|_| metrics::record_upstream_error("x_oauth", "exchange"))?;

    let stored = grant.clone();
    let codec = state.codec.clone();
    pipeline::with_db(&state, move |db| {
        db.upsert_credential(user_id, PROVIDER_X, &stored, &codec)
    })
    .await?;
    metrics::record_oauth_link();
    info!(user_id, "X account linked");

    let scopes = grant
        .scope
        .as_deref()
        .map(|s| s.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    Ok(Json(LinkResponse {
        linked: true,
        user_id,
        scopes,
    }))
}

/// GET /v1/me/link-status
async fn link_status(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(query) = query?;
    let user_id = query.user_id();
    let status = pipeline::with_db(&state, move |db| db.link_status(user_id, PROVIDER_X)).await?;

    Ok(Json(json!({
        "user_id": user_id,
        "linked": status.linked,
        "scopes": status.scopes,
    })))
}

/// GET /v1/x/me — the account behind the stored token.
async fn x_me(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(query) = query?;
    let user_id = query.user_id();

    let account: Account = pipeline::linked_account(&state, user_id).await?;
    Ok(Json(json!({ "user_id": user_id, "account": account })))
}

#[derive(Deserialize)]
struct OwnPostsQuery {
    user_id: Option<i64>,
    limit: Option<i64>,
}

/// GET /v1/x/my-posts — the linked account's own recent posts.
async fn my_posts(
    State(state): State<AppState>,
    query: Result<Query<OwnPostsQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(query) = query?;
    let limit =
        pipeline::validate_limit("limit", query.limit.unwrap_or(DEFAULT_OWN_POSTS_LIMIT))?;
    let user_id = query.user_id.unwrap_or(DEFAULT_USER_ID);

    let posts = pipeline::own_posts(&state, user_id, limit).await?;
    Ok(Json(json!({ "items": posts })))
}

#[derive(Deserialize)]
struct FeedQuery {
    user_id: Option<i64>,
    authors_limit: Option<i64>,
    per_batch: Option<i64>,
}

impl FeedQuery {
    fn resolve(&self) -> Result<(i64, usize, usize), ApiError> {
        let (authors_limit, per_batch) = pipeline::validate_limits(
            self.authors_limit.unwrap_or(DEFAULT_AUTHORS_LIMIT),
            self.per_batch.unwrap_or(DEFAULT_PER_BATCH),
        )?;
        Ok((
            self.user_id.unwrap_or(DEFAULT_USER_ID),
            authors_limit,
            per_batch,
        ))
    }
}

/// GET /v1/x/feed and /v1/x/feed/normalized — normalized posts from
/// followed accounts.
async fn feed(
    State(state): State<AppState>,
    query: Result<Query<FeedQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(query) = query?;
    let (user_id, authors_limit, per_batch) = query.resolve()?;

    let posts: Vec<FeedPost> =
        pipeline::fetch_feed(&state, user_id, authors_limit, per_batch).await?;
    Ok(Json(json!({ "items": posts })))
}

#[derive(Serialize)]
struct PreviewResponse {
    items: Vec<ScoredPost>,
    harmful_count: u64,
    safe_count: u64,
    unknown_count: u64,
}

/// POST /v1/analysis/preview
async fn analysis_preview(
    State(state): State<AppState>,
    query: Result<Query<FeedQuery>, QueryRejection>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let Query(query) = query?;
    let (user_id, authors_limit, per_batch) = query.resolve()?;

    let report = pipeline::run_preview(&state, user_id, authors_limit, per_batch).await?;
    let counts = report.summary.counts;
    Ok(Json(PreviewResponse {
        items: report.items,
        harmful_count: counts.harmful,
        safe_count: counts.safe,
        unknown_count: counts.unknown,
    }))
}

#[derive(Deserialize)]
struct PostsQuery {
    user_id: Option<i64>,
    label: Option<String>,
    author_id: Option<String>,
    lang: Option<String>,
    from_created_at: Option<DateTime<Utc>>,
    to_created_at: Option<DateTime<Utc>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// GET /v1/analysis/posts
async fn analysis_posts(
    State(state): State<AppState>,
    query: Result<Query<PostsQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(q) = query?;
    let filter = AnalysisFilter {
        user_id: q.user_id.unwrap_or(DEFAULT_USER_ID),
        label: q.label.filter(|s| !s.is_empty()),
        author_id: q.author_id.filter(|s| !s.is_empty()),
        lang: q.lang.filter(|s| !s.is_empty()),
        from_created_at: q.from_created_at,
        to_created_at: q.to_created_at,
        limit: q.limit,
        offset: q.offset,
    };

    let (total, items) = pipeline::with_db(&state, move |db| db.list_analyses(&filter)).await?;
    Ok(Json(json!({ "total": total, "items": items })))
}

#[derive(Deserialize)]
struct PageQuery {
    user_id: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
}

/// GET /v1/analysis/authors
async fn analysis_authors(
    State(state): State<AppState>,
    query: Result<Query<PageQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Query(q) = query?;
    let user_id = q.user_id.unwrap_or(DEFAULT_USER_ID);
    let (total, items) = pipeline::with_db(&state, move |db| {
        db.author_summaries(user_id, q.limit, q.offset)
    })
    .await?;
    Ok(Json(json!({ "total": total, "items": items })))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "ibtikar-api",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

/// Prometheus metrics endpoint — returns metrics in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}
