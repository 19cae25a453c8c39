//! PKCE (Proof Key for Code Exchange) per RFC 7636
//!
//! The verifier stays server-side in the handshake store and is sent with the
//! token exchange; the S256 challenge goes into the authorization URL so the
//! provider can bind the returned code to whoever started the flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};

use crate::config::OAuthConfig;
use crate::error::{Error, Result};

/// Random bytes behind each verifier. 64 bytes encode to 86 base64url
/// characters, inside RFC 7636's 43..=128 length bound.
const VERIFIER_BYTES: usize = 64;

/// Generate a fresh code verifier from the unreserved character set.
pub fn generate_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(verifier))`, unpadded.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Build the provider authorization URL.
///
/// `state` is the handshake token; the provider echoes it back on the
/// callback, which is how the verifier and requesting user are recovered.
pub fn build_authorization_url(config: &OAuthConfig, state: &str, challenge: &str) -> Result<String> {
    let url = reqwest::Url::parse_with_params(
        &config.authorize_url,
        &[
            ("response_type", "code"),
            ("client_id", config.client_id.as_str()),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("scope", config.scopes.as_str()),
            ("state", state),
            ("code_challenge", challenge),
            ("code_challenge_method", "S256"),
        ],
    )
    .map_err(|e| Error::Config(format!("authorize_url {}: {e}", config.authorize_url)))?;

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> OAuthConfig {
        OAuthConfig::x("client-123", "https://app.example/v1/oauth/x/callback")
    }

    #[test]
    fn verifier_is_unreserved_and_in_range() {
        let verifier = generate_verifier();
        assert_eq!(verifier.len(), 86);
        assert!((43..=128).contains(&verifier.len()));
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier must be URL-safe base64 (no padding): {verifier}"
        );
    }

    #[test]
    fn verifiers_are_unique() {
        assert_ne!(generate_verifier(), generate_verifier());
    }

    #[test]
    fn challenge_matches_known_value() {
        // SHA256("hello") = 2cf24dba...9824, base64url of those 32 bytes:
        assert_eq!(
            compute_challenge("hello"),
            "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ"
        );
    }

    #[test]
    fn challenge_is_unpadded_sha256() {
        let challenge = compute_challenge(&generate_verifier());
        assert_eq!(challenge.len(), 43);
        assert!(!challenge.contains('='));
        let decoded = URL_SAFE_NO_PAD.decode(&challenge).expect("valid base64url");
        assert_eq!(decoded.len(), 32);
    }

    #[test]
    fn authorization_url_carries_pkce_and_state() {
        let config = test_config();
        let challenge = compute_challenge("test-verifier");
        let url = build_authorization_url(&config, "state-token-123", &challenge).unwrap();

        let parsed = reqwest::Url::parse(&url).unwrap();
        assert!(url.starts_with(crate::config::X_AUTHORIZE_ENDPOINT));
        let params: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "client-123");
        assert_eq!(params["redirect_uri"], "https://app.example/v1/oauth/x/callback");
        assert_eq!(params["scope"], crate::config::DEFAULT_SCOPES);
        assert_eq!(params["state"], "state-token-123");
        assert_eq!(params["code_challenge"], challenge);
        assert_eq!(params["code_challenge_method"], "S256");
    }

    #[test]
    fn bad_authorize_url_is_a_config_error() {
        let mut config = test_config();
        config.authorize_url = "not a url".into();
        assert!(matches!(
            build_authorization_url(&config, "s", "c"),
            Err(Error::Config(_))
        ));
    }
}
