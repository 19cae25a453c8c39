//! Request-level error taxonomy
//!
//! Every handler returns `Result<_, ApiError>`. Library errors are mapped in
//! via `From` so handlers can use `?`. Provider error bodies and storage
//! details go to the log only; clients get a stable `type` and a generic
//! message.

use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use x_feed::RateLimit;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("no linked X account; start the link flow at /v1/oauth/x/start")]
    NotLinked,

    #[error("authorization state is invalid, expired or already used")]
    HandshakeExpiredOrReplayed,

    #[error("rate limited on {}", .0.resource)]
    UpstreamRateLimited(RateLimit),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("authorization rejected by provider: {0}")]
    AuthorizationFailed(String),

    #[error("unexpected upstream response: {0}")]
    Protocol(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error("credential decryption failed: {0}")]
    Crypto(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::HandshakeExpiredOrReplayed => StatusCode::BAD_REQUEST,
            Self::NotLinked => StatusCode::CONFLICT,
            Self::UpstreamRateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamUnavailable(_) | Self::AuthorizationFailed(_) | Self::Protocol(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::Storage(_) | Self::Crypto(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable error type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotLinked => "not_linked",
            Self::HandshakeExpiredOrReplayed => "handshake_expired_or_replayed",
            Self::UpstreamRateLimited(_) => "rate_limited",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::AuthorizationFailed(_) => "authorization_failed",
            Self::Protocol(_) => "protocol_error",
            Self::Storage(_) => "storage_error",
            Self::Crypto(_) => "crypto_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Message safe to show a client.
    fn public_message(&self) -> String {
        match self {
            Self::AuthorizationFailed(_) => {
                "identity provider rejected the authorization; restart the link flow".into()
            }
            Self::Protocol(_) => "unexpected response from an upstream service".into(),
            Self::Storage(_) | Self::Crypto(_) | Self::Internal(_) => {
                "internal server error".into()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.kind(), error = %self, "request failed");
        } else {
            warn!(kind = self.kind(), error = %self, "request rejected");
        }

        if let Self::UpstreamRateLimited(limit) = &self {
            return rate_limited_response(limit, chrono::Utc::now().timestamp());
        }

        let body = json!({
            "error": {
                "type": self.kind(),
                "message": self.public_message(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// 429 body carrying the upstream window, plus `Retry-After` when the reset
/// lies in the future.
pub fn rate_limited_response(limit: &RateLimit, now_epoch: i64) -> Response {
    let mut body = json!({
        "error": "rate_limited",
        "resource": limit.resource,
        "reset_epoch": limit.reset_epoch,
        "limit": limit.limit,
        "remaining": limit.remaining,
    });
    if let Some(reset_time) = limit.reset_time_local() {
        body["reset_time"] = json!(reset_time);
    }

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    if let Some(secs) = limit.retry_after_secs(now_epoch) {
        if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
    }
    response
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidRequest(rejection.body_text())
    }
}

impl From<x_auth::Error> for ApiError {
    fn from(e: x_auth::Error) -> Self {
        match e {
            x_auth::Error::UpstreamUnavailable(msg) => Self::UpstreamUnavailable(msg),
            x_auth::Error::AuthorizationFailed { status, body } => {
                Self::AuthorizationFailed(format!("token endpoint returned {status}: {body}"))
            }
            x_auth::Error::Protocol(msg) => Self::Protocol(msg),
            x_auth::Error::Store(msg) => Self::Storage(msg),
            x_auth::Error::Config(msg) => Self::Internal(msg),
        }
    }
}

impl From<x_feed::Error> for ApiError {
    fn from(e: x_feed::Error) -> Self {
        match e {
            x_feed::Error::RateLimited(limit) => Self::UpstreamRateLimited(limit),
            x_feed::Error::Unauthorized { .. } => Self::NotLinked,
            x_feed::Error::UpstreamUnavailable(msg) => Self::UpstreamUnavailable(msg),
            x_feed::Error::Protocol(msg) => Self::Protocol(msg),
        }
    }
}

impl From<classifier::Error> for ApiError {
    fn from(e: classifier::Error) -> Self {
        match e {
            classifier::Error::Unavailable(_) | classifier::Error::Status { .. } => {
                Self::UpstreamUnavailable(format!("classifier: {e}"))
            }
            classifier::Error::Protocol(_) | classifier::Error::Misaligned { .. } => {
                Self::Protocol(format!("classifier: {e}"))
            }
        }
    }
}

impl From<analysis_store::Error> for ApiError {
    fn from(e: analysis_store::Error) -> Self {
        match e {
            analysis_store::Error::Codec(c) => Self::Crypto(c.to_string()),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn limit(reset_epoch: Option<i64>) -> RateLimit {
        RateLimit {
            resource: "/2/users/:id/tweets".into(),
            limit: Some(1500),
            remaining: Some(0),
            reset_epoch,
        }
    }

    #[test]
    fn statuses_follow_taxonomy() {
        assert_eq!(ApiError::InvalidRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotLinked.status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::HandshakeExpiredOrReplayed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::UpstreamRateLimited(limit(None)).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ApiError::AuthorizationFailed("x".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(ApiError::Storage("x".into()).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn error_body_hides_provider_detail() {
        let err = ApiError::from(x_auth::Error::AuthorizationFailed {
            status: 400,
            body: "secret-ish provider detail".into(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "authorization_failed");
        assert!(!json.to_string().contains("secret-ish"));
    }

    #[tokio::test]
    async fn storage_errors_are_generic() {
        let response = ApiError::Storage("disk I/O error at /var/lib/x".into()).into_response();
        let json = body_json(response).await;
        assert_eq!(json["error"]["type"], "storage_error");
        assert_eq!(json["error"]["message"], "internal server error");
    }

    #[tokio::test]
    async fn rate_limited_body_carries_window() {
        let response = rate_limited_response(&limit(Some(1_700_000_000)), 1_699_999_940);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");

        let json = body_json(response).await;
        assert_eq!(json["error"], "rate_limited");
        assert_eq!(json["resource"], "/2/users/:id/tweets");
        assert_eq!(json["reset_epoch"], 1_700_000_000);
        assert_eq!(json["limit"], 1500);
        assert_eq!(json["remaining"], 0);
        assert_eq!(
            json["reset_time"].as_str(),
            limit(Some(1_700_000_000)).reset_time_local().as_deref()
        );
    }

    #[tokio::test]
    async fn rate_limited_without_reset_omits_time_and_retry_after() {
        let response = rate_limited_response(&limit(None), 0);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
        let json = body_json(response).await;
        assert!(json.get("reset_time").is_none());
        assert!(json["reset_epoch"].is_null());
    }

    #[test]
    fn feed_unauthorized_means_relink() {
        let err = ApiError::from(x_feed::Error::Unauthorized { status: 401 });
        assert!(matches!(err, ApiError::NotLinked));
    }

    #[test]
    fn misaligned_classifier_is_protocol_error() {
        let err = ApiError::from(classifier::Error::Misaligned {
            expected: 3,
            got: 2,
        });
        assert!(matches!(err, ApiError::Protocol(_)));
    }
}
