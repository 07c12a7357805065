use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::instrument;

use relay_core::backend::{Backend, RunRequest};
use relay_core::errors::BackendError;
use relay_core::stream::{collect_tokens, TokenStream};

use crate::decode::DecodedStream;
use crate::sse::EventStreamDecoder;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const BACKEND: &str = "openai";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Any OpenAI-compatible `/chat/completions` endpoint, always streamed.
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    default_model: String,
}

impl OpenAiBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, default_model: impl Into<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
        }
    }

    /// Read `OPENAI_BASE_URL`, `OPENAI_API_KEY` and `OPENAI_MODEL`.
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| vars.get(key).filter(|v| !v.is_empty()).cloned();
        Self::new(
            get("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            get("OPENAI_API_KEY"),
            get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.into()),
        )
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn name(&self) -> &str {
        BACKEND
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(backend = "openai"))]
    async fn run(&self, request: &RunRequest) -> Result<String, BackendError> {
        let stream = self.run_stream(request).await?;
        let text = collect_tokens(stream)
            .await
            .map_err(|e| BackendError::stream(BACKEND, e))?;
        let text = text.trim();
        if text.is_empty() {
            return Err(BackendError::EmptyOutput {
                backend: BACKEND.into(),
            });
        }
        Ok(text.to_string())
    }

    async fn run_stream(&self, request: &RunRequest) -> Result<TokenStream, BackendError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = json!({
            "model": model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "stream": true,
        });
        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("accept", "text/event-stream")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout {
                    backend: BACKEND.into(),
                    timeout: request.timeout,
                }
            } else {
                BackendError::Request {
                    backend: BACKEND.into(),
                    detail: e.to_string(),
                }
            }
        })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                backend: BACKEND.into(),
                status,
                body,
            });
        }

        Ok(Box::pin(
            DecodedStream::new(resp.bytes_stream(), EventStreamDecoder::new())
                .with_deadline(request.timeout),
        ))
    }
}
