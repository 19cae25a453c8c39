//! X API v2 implementation of `FeedSource`

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::post::{FeedPost, XTweet};
use crate::ratelimit::classify_status;
use crate::source::{Account, FeedSource, Page};

pub const X_API_BASE_URL: &str = "https://api.x.com";

const ME_RESOURCE: &str = "/2/users/me";
const FOLLOWING_RESOURCE: &str = "/2/users/:id/following";
const TWEETS_RESOURCE: &str = "/2/users/:id/tweets";

/// The following endpoint accepts at most this many ids per page.
pub(crate) const MAX_FOLLOWING_PAGE: usize = 1000;
/// Timeline endpoint bounds on `max_results`.
const MIN_TWEETS_PAGE: usize = 5;
const MAX_TWEETS_PAGE: usize = 100;

/// Missing `data` means an empty result, not an error.
#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    meta: Option<Meta>,
}

#[derive(Deserialize)]
struct Meta {
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
struct XUser {
    id: String,
}

/// reqwest client bound to an X API base URL.
#[derive(Clone)]
pub struct XApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl XApiClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Build a client with its own connection pool and request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::UpstreamUnavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::new(client, base_url))
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        Url::parse_with_params(&format!("{}{path}", self.base_url), params)
            .map_err(|e| Error::Protocol(format!("invalid X API url: {e}")))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        resource: &'static str,
        url: Url,
        token: &Secret<String>,
    ) -> Result<Envelope<T>> {
        let response = self
            .client
            .get(url)
            .bearer_auth(token.expose())
            .send()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("{resource} request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            let err = classify_status(resource, status.as_u16(), &headers, &body);
            warn!(resource, status = status.as_u16(), error = %err, "X API request failed");
            return Err(err);
        }

        response
            .json::<Envelope<T>>()
            .await
            .map_err(|e| Error::Protocol(format!("invalid {resource} response: {e}")))
    }
}

impl FeedSource for XApiClient {
    fn id(&self) -> &str {
        "x"
    }

    fn me<'a>(
        &'a self,
        token: &'a Secret<String>,
    ) -> Pin<Box<dyn Future<Output = Result<Account>> + Send + 'a>> {
        Box::pin(async move {
            let url = self.url(ME_RESOURCE, &[])?;
            let envelope: Envelope<Account> = self.get_json(ME_RESOURCE, url, token).await?;
            envelope
                .data
                .ok_or_else(|| Error::Protocol("/2/users/me returned no data".into()))
        })
    }

    fn following<'a>(
        &'a self,
        token: &'a Secret<String>,
        account_id: &'a str,
        page_size: usize,
        cursor: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<Page<String>>> + Send + 'a>> {
        Box::pin(async move {
            let mut params = vec![(
                "max_results",
                page_size.clamp(1, MAX_FOLLOWING_PAGE).to_string(),
            )];
            if let Some(cursor) = cursor {
                params.push(("pagination_token", cursor.to_string()));
            }
            let url = self.url(&format!("/2/users/{account_id}/following"), &params)?;
            let envelope: Envelope<Vec<XUser>> =
                self.get_json(FOLLOWING_RESOURCE, url, token).await?;

            let items: Vec<String> = envelope
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|u| u.id)
                .collect();
            let next = envelope.meta.and_then(|m| m.next_token);
            debug!(account_id, count = items.len(), has_next = next.is_some(), "following page");
            Ok(Page { items, next })
        })
    }

    fn recent_posts<'a>(
        &'a self,
        token: &'a Secret<String>,
        author_id: &'a str,
        max_results: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<FeedPost>>> + Send + 'a>> {
        Box::pin(async move {
            let params = [
                (
                    "max_results",
                    max_results
                        .clamp(MIN_TWEETS_PAGE, MAX_TWEETS_PAGE)
                        .to_string(),
                ),
                ("tweet.fields", "created_at,lang,author_id".to_string()),
            ];
            let url = self.url(&format!("/2/users/{author_id}/tweets"), &params)?;
            let envelope: Envelope<Vec<XTweet>> =
                self.get_json(TWEETS_RESOURCE, url, token).await?;

            Ok(envelope
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|t| t.into_post(author_id))
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Seen = Arc<Mutex<Vec<(String, HashMap<String, String>, Option<String>)>>>;

    fn record(seen: &Seen, path: String, q: HashMap<String, String>, headers: &HeaderMap) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen.lock().unwrap().push((path, q, auth));
    }

    /// Mock X API: user 100 follows 200 and 300 (two pages), 300's timeline
    /// is throttled.
    async fn start_mock_x() -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let (s1, s2, s3) = (seen.clone(), seen.clone(), seen.clone());

        let app = axum::Router::new()
            .route(
                "/2/users/me",
                get(move |headers: HeaderMap| {
                    let seen = s1.clone();
                    async move {
                        record(&seen, "/2/users/me".into(), HashMap::new(), &headers);
                        r#"{"data":{"id":"100","name":"Me","username":"me"}}"#
                    }
                }),
            )
            .route(
                "/2/users/{id}/following",
                get(
                    move |Path(id): Path<String>,
                          Query(q): Query<HashMap<String, String>>,
                          headers: HeaderMap| {
                        let seen = s2.clone();
                        async move {
                            let body = if q.get("pagination_token").map(String::as_str) == Some("p2") {
                                r#"{"data":[{"id":"300","name":"C","username":"c"}],"meta":{"result_count":1}}"#
                            } else {
                                r#"{"data":[{"id":"200","name":"B","username":"b"}],"meta":{"result_count":1,"next_token":"p2"}}"#
                            };
                            record(&seen, format!("/2/users/{id}/following"), q, &headers);
                            body
                        }
                    },
                ),
            )
            .route(
                "/2/users/{id}/tweets",
                get(
                    move |Path(id): Path<String>,
                          Query(q): Query<HashMap<String, String>>,
                          headers: HeaderMap| {
                        let seen = s3.clone();
                        async move {
                            record(&seen, format!("/2/users/{id}/tweets"), q, &headers);
                            match id.as_str() {
                                "200" => (
                                    StatusCode::OK,
                                    r#"{"data":[{"id":"t1","text":"first","author_id":"200","lang":"en","created_at":"2024-01-01T00:00:00.000Z"}],"meta":{"result_count":1}}"#,
                                )
                                    .into_response(),
                                "400" => (StatusCode::OK, r#"{"meta":{"result_count":0}}"#)
                                    .into_response(),
                                "401" => (StatusCode::UNAUTHORIZED, r#"{"title":"Unauthorized"}"#)
                                    .into_response(),
                                _ => (
                                    StatusCode::TOO_MANY_REQUESTS,
                                    [
                                        ("x-rate-limit-limit", "1500"),
                                        ("x-rate-limit-remaining", "0"),
                                        ("x-rate-limit-reset", "1700000000"),
                                    ],
                                    r#"{"title":"Too Many Requests"}"#,
                                )
                                    .into_response(),
                            }
                        }
                    },
                ),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), seen)
    }

    fn token() -> Secret<String> {
        Secret::new("at_test".into())
    }

    #[tokio::test]
    async fn me_returns_account_id_with_bearer_token() {
        let (base, seen) = start_mock_x().await;
        let client = XApiClient::new(reqwest::Client::new(), base);

        let account = client.me(&token()).await.unwrap();
        assert_eq!(account.id, "100");
        assert_eq!(account.username.as_deref(), Some("me"));
        assert_eq!(account.name.as_deref(), Some("Me"));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].2.as_deref(), Some("Bearer at_test"));
    }

    #[tokio::test]
    async fn following_follows_pagination_cursor() {
        let (base, seen) = start_mock_x().await;
        let client = XApiClient::new(reqwest::Client::new(), base);

        let first = client.following(&token(), "100", 10, None).await.unwrap();
        assert_eq!(first.items, vec!["200".to_string()]);
        assert_eq!(first.next.as_deref(), Some("p2"));

        let second = client
            .following(&token(), "100", 10, first.next.as_deref())
            .await
            .unwrap();
        assert_eq!(second.items, vec!["300".to_string()]);
        assert!(second.next.is_none());

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1["max_results"], "10");
        assert_eq!(seen[1].1["pagination_token"], "p2");
    }

    #[tokio::test]
    async fn following_page_size_is_clamped_to_provider_maximum() {
        let (base, seen) = start_mock_x().await;
        let client = XApiClient::new(reqwest::Client::new(), base);

        client.following(&token(), "100", 5000, None).await.unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1["max_results"], MAX_FOLLOWING_PAGE.to_string());
    }

    #[tokio::test]
    async fn recent_posts_are_normalized_and_page_size_clamped() {
        let (base, seen) = start_mock_x().await;
        let client = XApiClient::new(reqwest::Client::new(), base);

        let posts = client.recent_posts(&token(), "200", 2).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].source_id.as_deref(), Some("t1"));
        assert_eq!(posts[0].author_id, "200");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].1["max_results"], "5");
        assert_eq!(seen[0].1["tweet.fields"], "created_at,lang,author_id");
    }

    #[tokio::test]
    async fn missing_data_is_an_empty_timeline() {
        let (base, _) = start_mock_x().await;
        let client = XApiClient::new(reqwest::Client::new(), base);
        assert!(client.recent_posts(&token(), "400", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn throttled_timeline_is_structured_rate_limit() {
        let (base, _) = start_mock_x().await;
        let client = XApiClient::new(reqwest::Client::new(), base);

        match client.recent_posts(&token(), "300", 10).await.unwrap_err() {
            Error::RateLimited(rl) => {
                assert_eq!(rl.resource, "/2/users/:id/tweets");
                assert_eq!(rl.limit, Some(1500));
                assert_eq!(rl.remaining, Some(0));
                assert_eq!(rl.reset_epoch, Some(1_700_000_000));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rejected_token_is_unauthorized() {
        let (base, _) = start_mock_x().await;
        let client = XApiClient::new(reqwest::Client::new(), base);
        assert!(matches!(
            client.recent_posts(&token(), "401", 10).await.unwrap_err(),
            Error::Unauthorized { status: 401 }
        ));
    }

    #[tokio::test]
    async fn unreachable_api_is_upstream_unavailable() {
        let client = XApiClient::new(reqwest::Client::new(), "http://127.0.0.1:1");
        assert!(matches!(
            client.me(&token()).await.unwrap_err(),
            Error::UpstreamUnavailable(_)
        ));
    }
}
