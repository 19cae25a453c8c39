//! OAuth token exchange and refresh
//!
//! Both grants POST a form to `OAuthConfig::token_url`. Confidential clients
//! add HTTP Basic credentials; public clients rely on PKCE alone. Neither call
//! retries: an authorization code is single-use, and refresh failures are
//! reported to the caller to decide.

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::OAuthConfig;
use crate::error::{Error, Result};

/// Token endpoint payload for both grants.
///
/// `expires_in` is a delta in seconds from issue time. Fields other than
/// `access_token` are optional because providers omit them freely (a refresh
/// response may not repeat `scope`, a client without `offline.access` gets no
/// `refresh_token`).
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("scope", &self.scope)
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Exchange an authorization code for tokens.
///
/// The verifier proves this process started the flow whose challenge the
/// provider saw in the authorization URL.
pub async fn exchange_code(
    client: &reqwest::Client,
    config: &OAuthConfig,
    code: &str,
    verifier: &str,
) -> Result<TokenResponse> {
    let form = [
        ("grant_type", "authorization_code"),
        ("code", code),
        ("code_verifier", verifier),
        ("redirect_uri", config.redirect_uri.as_str()),
        ("client_id", config.client_id.as_str()),
    ];
    post_token_form(client, config, &form, "authorization_code").await
}

/// Obtain a new access token from a refresh token.
pub async fn refresh_token(
    client: &reqwest::Client,
    config: &OAuthConfig,
    refresh: &str,
) -> Result<TokenResponse> {
    let form = [
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh),
        ("client_id", config.client_id.as_str()),
    ];
    post_token_form(client, config, &form, "refresh_token").await
}

async fn post_token_form(
    client: &reqwest::Client,
    config: &OAuthConfig,
    form: &[(&str, &str)],
    grant: &'static str,
) -> Result<TokenResponse> {
    let mut request = client.post(&config.token_url).form(form);
    if let Some(secret) = &config.client_secret {
        request = request.basic_auth(&config.client_id, Some(secret.expose()));
    }

    let response = request
        .send()
        .await
        .map_err(|e| Error::UpstreamUnavailable(format!("{grant} request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        warn!(grant, status = status.as_u16(), "token endpoint rejected grant");
        return Err(Error::AuthorizationFailed {
            status: status.as_u16(),
            body,
        });
    }

    let token = response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::Protocol(format!("invalid {grant} response: {e}")))?;

    debug!(
        grant,
        scope = token.scope.as_deref().unwrap_or(""),
        has_refresh = token.refresh_token.is_some(),
        "token endpoint granted tokens"
    );
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Captured = Arc<Mutex<Vec<(HashMap<String, String>, Option<String>)>>>;

    /// Start a token endpoint that records each form and Authorization header
    /// and answers with a fixed status and body.
    async fn start_token_server(status: StatusCode, body: &'static str) -> (String, Captured) {
        let captured: Captured = Arc::new(Mutex::new(Vec::new()));
        let sink = captured.clone();
        let app = axum::Router::new().route(
            "/2/oauth2/token",
            post(
                move |headers: HeaderMap, axum::Form(form): axum::Form<HashMap<String, String>>| {
                    let sink = sink.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        sink.lock().unwrap().push((form, auth));
                        (status, [("content-type", "application/json")], body)
                    }
                },
            ),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/2/oauth2/token"), captured)
    }

    fn config_for(token_url: &str) -> OAuthConfig {
        let mut config = OAuthConfig::x("client-123", "https://app.example/callback");
        config.token_url = token_url.to_string();
        config
    }

    #[test]
    fn token_response_deserializes_full_payload() {
        let json = r#"{"token_type":"bearer","expires_in":7200,"access_token":"at_abc","scope":"tweet.read users.read","refresh_token":"rt_def"}"#;
        let token: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(token.access_token, "at_abc");
        assert_eq!(token.refresh_token.as_deref(), Some("rt_def"));
        assert_eq!(token.scope.as_deref(), Some("tweet.read users.read"));
        assert_eq!(token.token_type.as_deref(), Some("bearer"));
        assert_eq!(token.expires_in, Some(7200));
    }

    #[test]
    fn token_response_tolerates_missing_optionals() {
        let token: TokenResponse = serde_json::from_str(r#"{"access_token":"at_only"}"#).unwrap();
        assert!(token.refresh_token.is_none());
        assert!(token.expires_in.is_none());
    }

    #[test]
    fn token_response_debug_redacts_tokens() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"at_abc","refresh_token":"rt_def"}"#).unwrap();
        let debug = format!("{token:?}");
        assert!(!debug.contains("at_abc") && !debug.contains("rt_def"), "{debug}");
    }

    #[tokio::test]
    async fn exchange_sends_code_and_verifier() {
        let (url, captured) = start_token_server(
            StatusCode::OK,
            r#"{"access_token":"at_new","refresh_token":"rt_new","scope":"tweet.read","token_type":"bearer","expires_in":7200}"#,
        )
        .await;

        let token = exchange_code(&reqwest::Client::new(), &config_for(&url), "code-1", "verifier-1")
            .await
            .unwrap();
        assert_eq!(token.access_token, "at_new");

        let calls = captured.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (form, auth) = &calls[0];
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "code-1");
        assert_eq!(form["code_verifier"], "verifier-1");
        assert_eq!(form["client_id"], "client-123");
        assert_eq!(form["redirect_uri"], "https://app.example/callback");
        assert!(auth.is_none(), "public client must not send basic auth");
    }

    #[tokio::test]
    async fn confidential_client_uses_basic_auth() {
        let (url, captured) =
            start_token_server(StatusCode::OK, r#"{"access_token":"at_new"}"#).await;
        let config = config_for(&url).with_client_secret(common::Secret::new("shh".into()));

        exchange_code(&reqwest::Client::new(), &config, "code-1", "verifier-1")
            .await
            .unwrap();

        let calls = captured.lock().unwrap();
        let auth = calls[0].1.as_deref().unwrap();
        assert!(auth.starts_with("Basic "), "got: {auth}");
    }

    #[tokio::test]
    async fn rejected_code_is_authorization_failed_with_body() {
        let (url, captured) = start_token_server(
            StatusCode::BAD_REQUEST,
            r#"{"error":"invalid_request","error_description":"Value passed for the authorization code was invalid."}"#,
        )
        .await;

        let err = exchange_code(&reqwest::Client::new(), &config_for(&url), "used-code", "v")
            .await
            .unwrap_err();
        match err {
            Error::AuthorizationFailed { status, body } => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_request"));
            }
            other => panic!("expected AuthorizationFailed, got {other:?}"),
        }
        // single attempt, never retried
        assert_eq!(captured.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_protocol_error() {
        let (url, _) = start_token_server(StatusCode::OK, r#"{"token":"nope"}"#).await;
        let err = exchange_code(&reqwest::Client::new(), &config_for(&url), "c", "v")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_upstream_unavailable() {
        let err = exchange_code(
            &reqwest::Client::new(),
            &config_for("http://127.0.0.1:1/2/oauth2/token"),
            "c",
            "v",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::UpstreamUnavailable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn refresh_sends_refresh_grant() {
        let (url, captured) =
            start_token_server(StatusCode::OK, r#"{"access_token":"at_2","expires_in":7200}"#).await;

        let token = refresh_token(&reqwest::Client::new(), &config_for(&url), "rt_old")
            .await
            .unwrap();
        assert_eq!(token.access_token, "at_2");

        let calls = captured.lock().unwrap();
        assert_eq!(calls[0].0["grant_type"], "refresh_token");
        assert_eq!(calls[0].0["refresh_token"], "rt_old");
    }
}
