//! HTTP embedding provider (OpenAI-compatible embeddings endpoint).

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::deadline::Deadline;
use crate::embeddings::Embedder;
use crate::error::{QaError, Result};

pub struct HttpEmbedder {
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingsDatum>,
}

#[derive(Deserialize)]
struct EmbeddingsDatum {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| QaError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            dimension,
            client,
        })
    }

    fn request_once(&self, text: &str, deadline: Deadline) -> Result<Vec<f32>> {
        let budget = deadline
            .remaining()
            .ok_or(QaError::UpstreamTimeout { stage: "embed" })?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(budget)
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    QaError::UpstreamTimeout { stage: "embed" }
                } else {
                    QaError::Upstream {
                        status: None,
                        message: format!("embeddings request failed: {}", e),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().map_err(|e| QaError::Upstream {
            status: Some(status.as_u16()),
            message: format!("failed to read embeddings response: {}", e),
        })?;
        if !status.is_success() {
            let preview: String = body.chars().take(200).collect();
            return Err(QaError::Upstream {
                status: Some(status.as_u16()),
                message: preview,
            });
        }

        let parsed: EmbeddingsResponse =
            serde_json::from_str(&body).map_err(|e| QaError::Upstream {
                status: Some(status.as_u16()),
                message: format!("bad embeddings payload: {}", e),
            })?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| QaError::Upstream {
                status: Some(status.as_u16()),
                message: "embeddings payload contained no vectors".into(),
            })?;
        if embedding.len() != self.dimension {
            return Err(QaError::Upstream {
                status: Some(status.as_u16()),
                message: format!(
                    "provider returned dimension {}, expected {}",
                    embedding.len(),
                    self.dimension
                ),
            });
        }
        Ok(embedding)
    }
}

impl Embedder for HttpEmbedder {
    fn embed(&self, text: &str, deadline: Deadline) -> Result<Vec<f32>> {
        let mut attempt = 0u32;
        loop {
            match self.request_once(text, deadline) {
                Ok(v) => return Ok(v),
                Err(e) => {
                    let max_retries = match &e {
                        QaError::UpstreamTimeout { .. } => 1,
                        QaError::Upstream { status: Some(s), .. } if *s >= 500 => 2,
                        _ => 0,
                    };
                    let backoff = Duration::from_millis((200u64 << attempt).min(2_000));
                    let budget_left = deadline.remaining().unwrap_or(Duration::ZERO);
                    if attempt >= max_retries || budget_left <= backoff {
                        return Err(e);
                    }
                    tracing::warn!(attempt, error = %e, "retrying embeddings call");
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
            }
        }
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
