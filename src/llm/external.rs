//! OpenAI-compatible chat-completions provider over a blocking HTTP client.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;

use crate::error::{QaError, Result};
use crate::llm::{GenerationOptions, LanguageModel};

pub struct HttpLanguageModel {
    endpoint: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl HttpLanguageModel {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| QaError::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            model: model.into(),
            client,
        })
    }

    /// Parse a response body as JSON, with a clear error when the server
    /// returned an HTML error page instead (CDNs and proxies sometimes
    /// answer 200 with HTML).
    fn parse_json<T: serde::de::DeserializeOwned>(status: u16, body: &str) -> Result<T> {
        let trimmed = body.trim_start();
        if trimmed.starts_with('<') {
            let preview: String = trimmed.chars().take(200).collect();
            return Err(QaError::Upstream {
                status: Some(status),
                message: format!("endpoint returned HTML instead of JSON: {}", preview),
            });
        }
        serde_json::from_str(body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            QaError::Upstream {
                status: Some(status),
                message: format!("failed to parse JSON: {} (body: {})", e, preview),
            }
        })
    }

    fn request_once(&self, prompt: &str, opts: &GenerationOptions) -> Result<String> {
        let budget = opts
            .deadline
            .remaining()
            .ok_or(QaError::UpstreamTimeout { stage: "solver" })?;

        let payload = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": opts.temperature,
            "max_tokens": opts.max_tokens,
        });
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .timeout(budget)
            .json(&payload)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    QaError::UpstreamTimeout { stage: "solver" }
                } else {
                    QaError::Upstream {
                        status: None,
                        message: format!("chat request failed: {}", e),
                    }
                }
            })?;

        let status = response.status().as_u16();
        let body = response.text().map_err(|e| QaError::Upstream {
            status: Some(status),
            message: format!("failed to read chat response: {}", e),
        })?;
        if !(200..300).contains(&status) {
            let preview: String = body.chars().take(200).collect();
            return Err(QaError::Upstream {
                status: Some(status),
                message: preview,
            });
        }

        let parsed: ChatResponse = Self::parse_json(status, &body)?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(QaError::Upstream {
                status: Some(status),
                message: "chat response contained no choices".into(),
            })
    }
}

impl LanguageModel for HttpLanguageModel {
    fn generate(&self, prompt: &str, opts: &GenerationOptions) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            match self.request_once(prompt, opts) {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    let max_retries = match &e {
                        QaError::UpstreamTimeout { .. } => 1,
                        QaError::Upstream { status: Some(s), .. } if *s >= 500 => 2,
                        _ => 0,
                    };
                    let backoff = Duration::from_millis((200u64 << attempt).min(2_000));
                    let budget_left = opts.deadline.remaining().unwrap_or(Duration::ZERO);
                    if attempt >= max_retries || budget_left <= backoff {
                        return Err(e);
                    }
                    tracing::warn!(attempt, error = %e, "retrying chat call");
                    std::thread::sleep(backoff);
                    attempt += 1;
                }
            }
        }
    }
}
