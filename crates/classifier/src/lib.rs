//! Harm classifier gateway
//!
//! The model runs as a separate HTTP service that scores a batch of texts in
//! one call. This crate hides that behind the `Classifier` trait: one
//! `Prediction` per input text, in input order, or an error. It never returns
//! a shorter or reordered list.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const LABEL_HARMFUL: &str = "harmful";
pub const LABEL_SAFE: &str = "safe";
pub const LABEL_UNKNOWN: &str = "unknown";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("classifier unreachable: {0}")]
    Unavailable(String),

    #[error("classifier returned {status}")]
    Status { status: u16 },

    #[error("invalid classifier response: {0}")]
    Protocol(String),

    /// The response did not carry exactly one prediction per input.
    #[error("classifier returned {got} predictions for {expected} texts")]
    Misaligned { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Label and confidence for one text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(default = "default_label")]
    pub label: String,
    #[serde(default)]
    pub score: f64,
}

fn default_label() -> String {
    LABEL_UNKNOWN.to_string()
}

impl Prediction {
    pub fn is_harmful(&self) -> bool {
        self.label == LABEL_HARMFUL
    }

    pub fn is_safe(&self) -> bool {
        self.label == LABEL_SAFE
    }
}

/// Batch text scorer.
///
/// Uses `Pin<Box<dyn Future>>` so the service can hold `Arc<dyn Classifier>`.
pub trait Classifier: Send + Sync {
    fn score_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Prediction>>> + Send + 'a>>;
}

#[derive(Serialize)]
struct PredictRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct PredictResponse {
    #[serde(default)]
    preds: Vec<Prediction>,
}

/// Client for a `POST /predict` classifier service.
#[derive(Clone)]
pub struct HttpClassifier {
    client: reqwest::Client,
    url: String,
}

impl HttpClassifier {
    /// `url` is the full predict endpoint, e.g. `http://classifier:9000/predict`.
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::new(client, url))
    }

    async fn predict(&self, texts: &[String]) -> Result<Vec<Prediction>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.url)
            .json(&PredictRequest { texts })
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %body, "classifier request failed");
            return Err(Error::Status {
                status: status.as_u16(),
            });
        }

        let parsed = response
            .json::<PredictResponse>()
            .await
            .map_err(|e| Error::Protocol(e.to_string()))?;

        if parsed.preds.len() != texts.len() {
            return Err(Error::Misaligned {
                expected: texts.len(),
                got: parsed.preds.len(),
            });
        }
        debug!(count = texts.len(), "classified batch");
        Ok(parsed.preds)
    }
}

impl Classifier for HttpClassifier {
    fn score_batch<'a>(
        &'a self,
        texts: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Prediction>>> + Send + 'a>> {
        Box::pin(self.predict(texts))
    }
}
