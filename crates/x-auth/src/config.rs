//! OAuth client configuration for the X authorization server
//!
//! The endpoint constants are X's public OAuth 2.0 endpoints. The client id
//! and redirect URI come from the service config; the client secret (only
//! present for confidential clients) is loaded from the environment or a
//! secret file and never from the TOML itself.

use common::Secret;

/// Authorization endpoint users are redirected to.
pub const X_AUTHORIZE_ENDPOINT: &str = "https://x.com/i/oauth2/authorize";

/// Token endpoint for code exchange and refresh.
pub const X_TOKEN_ENDPOINT: &str = "https://api.x.com/2/oauth2/token";

/// Scopes needed to read the follow graph and recent posts.
/// `offline.access` is what makes the provider issue a refresh token.
pub const DEFAULT_SCOPES: &str = "tweet.read users.read follows.read offline.access";

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    /// Confidential clients authenticate to the token endpoint with HTTP Basic.
    pub client_secret: Option<Secret<String>>,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub scopes: String,
}

impl OAuthConfig {
    /// Config pointing at X's production endpoints with the default scopes.
    pub fn x(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            authorize_url: X_AUTHORIZE_ENDPOINT.to_string(),
            token_url: X_TOKEN_ENDPOINT.to_string(),
            scopes: DEFAULT_SCOPES.to_string(),
        }
    }

    pub fn with_client_secret(mut self, secret: Secret<String>) -> Self {
        self.client_secret = Some(secret);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn x_config_uses_public_endpoints() {
        let config = OAuthConfig::x("client-abc", "https://app.example/callback");
        assert_eq!(config.authorize_url, X_AUTHORIZE_ENDPOINT);
        assert_eq!(config.token_url, X_TOKEN_ENDPOINT);
        assert!(config.scopes.contains("offline.access"));
        assert!(config.client_secret.is_none());
    }

    #[test]
    fn client_secret_never_shows_in_debug() {
        let config = OAuthConfig::x("client-abc", "https://app.example/callback")
            .with_client_secret(Secret::new("s3cr3t".into()));
        let debug = format!("{config:?}");
        assert!(!debug.contains("s3cr3t"), "debug leaked secret: {debug}");
    }
}
