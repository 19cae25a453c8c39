//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The X client secret and the credential encryption key are loaded from
//! env vars or secret files, never stored in the TOML directly.

use common::{Secret, SecretCodec};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use x_auth::OAuthConfig;
use x_auth::config::{DEFAULT_SCOPES, X_AUTHORIZE_ENDPOINT, X_TOKEN_ENDPOINT};
use x_feed::x::X_API_BASE_URL;

const CLIENT_SECRET_ENV: &str = "X_CLIENT_SECRET";
const ENCRYPTION_KEY_ENV: &str = "ENCRYPTION_KEY";

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub oauth: OAuthSection,
    #[serde(default)]
    pub x_api: XApiConfig,
    pub classifier: ClassifierConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub handshake: HandshakeConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

/// HTTP listener settings
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// X OAuth 2.0 client registration
#[derive(Debug, Deserialize)]
pub struct OAuthSection {
    pub client_id: String,
    pub redirect_uri: String,
    #[serde(default = "default_authorize_url")]
    pub authorize_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_scopes")]
    pub scopes: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to X_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct XApiConfig {
    #[serde(default = "default_x_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_x_api_timeout")]
    pub timeout_secs: u64,
}

impl Default for XApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_x_api_base_url(),
            timeout_secs: default_x_api_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClassifierConfig {
    /// Full predict endpoint, e.g. `http://127.0.0.1:9000/predict`
    pub url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeBackend {
    /// Process-local; pending logins are lost on restart.
    #[default]
    Memory,
    /// Rows in the analysis database.
    Sqlite,
}

#[derive(Debug, Deserialize)]
pub struct HandshakeConfig {
    #[serde(default)]
    pub backend: HandshakeBackend,
    #[serde(default = "default_handshake_ttl")]
    pub ttl_secs: u64,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            backend: HandshakeBackend::default(),
            ttl_secs: default_handshake_ttl(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip)]
    pub encryption_key: Option<Secret<String>>,
    /// Path to a file containing the base64 encryption key (alternative to ENCRYPTION_KEY)
    #[serde(default)]
    pub encryption_key_file: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_authorize_url() -> String {
    X_AUTHORIZE_ENDPOINT.to_string()
}

fn default_token_url() -> String {
    X_TOKEN_ENDPOINT.to_string()
}

fn default_scopes() -> String {
    DEFAULT_SCOPES.to_string()
}

fn default_x_api_base_url() -> String {
    X_API_BASE_URL.to_string()
}

fn default_x_api_timeout() -> u64 {
    20
}

fn default_handshake_ttl() -> u64 {
    x_auth::DEFAULT_HANDSHAKE_TTL.as_secs()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Secret resolution order (client secret and encryption key alike):
    /// 1. env var (X_CLIENT_SECRET / ENCRYPTION_KEY)
    /// 2. *_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        for (name, url) in [
            ("oauth.authorize_url", &config.oauth.authorize_url),
            ("oauth.token_url", &config.oauth.token_url),
            ("x_api.base_url", &config.x_api.base_url),
            ("classifier.url", &config.classifier.url),
        ] {
            require_http_url(name, url)?;
        }

        if config.oauth.client_id.trim().is_empty() {
            return Err(common::Error::Config("oauth.client_id must not be empty".into()));
        }

        for (name, value) in [
            ("server.timeout_secs", config.server.timeout_secs),
            ("x_api.timeout_secs", config.x_api.timeout_secs),
            ("classifier.timeout_secs", config.classifier.timeout_secs),
            ("handshake.ttl_secs", config.handshake.ttl_secs),
        ] {
            if value == 0 {
                return Err(common::Error::Config(format!(
                    "{name} must be greater than 0"
                )));
            }
        }

        if config.server.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        config.oauth.client_secret =
            resolve_secret(CLIENT_SECRET_ENV, config.oauth.client_secret_file.as_deref())?;
        config.security.encryption_key = resolve_secret(
            ENCRYPTION_KEY_ENV,
            config.security.encryption_key_file.as_deref(),
        )?;

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("ibtikar-api.toml")
    }

    /// OAuth client settings for the `x-auth` calls.
    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig {
            client_id: self.oauth.client_id.clone(),
            client_secret: self.oauth.client_secret.clone(),
            redirect_uri: self.oauth.redirect_uri.clone(),
            authorize_url: self.oauth.authorize_url.clone(),
            token_url: self.oauth.token_url.clone(),
            scopes: self.oauth.scopes.clone(),
        }
    }

    /// Build the credential codec. Fails when no key is configured or the
    /// key is not 32 bytes of base64.
    pub fn codec(&self) -> common::Result<SecretCodec> {
        let key = self.security.encryption_key.as_ref().ok_or_else(|| {
            common::Error::Config(format!(
                "no encryption key: set {ENCRYPTION_KEY_ENV} or security.encryption_key_file"
            ))
        })?;
        Ok(SecretCodec::from_base64_key(key)?)
    }
}

fn require_http_url(name: &str, url: &str) -> common::Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{name} must start with http:// or https://, got: {url}"
        )))
    }
}

/// Env var wins over file; an empty or whitespace-only value counts as unset.
fn resolve_secret(env: &str, file: Option<&Path>) -> common::Result<Option<Secret<String>>> {
    if let Ok(value) = std::env::var(env) {
        let secret = Secret::new(value);
        if !secret.is_blank() {
            return Ok(Some(secret));
        }
    }
    let Some(file) = file else {
        return Ok(None);
    };
    let value = std::fs::read_to_string(file).map_err(|e| {
        common::Error::Config(format!("failed to read {}: {e}", file.display()))
    })?;
    let value = value.trim().to_owned();
    Ok((!value.is_empty()).then(|| Secret::new(value)))
}
