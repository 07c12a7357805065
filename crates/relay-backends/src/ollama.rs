use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use relay_core::backend::{Backend, RunRequest};
use relay_core::errors::BackendError;
use relay_core::stream::TokenStream;

use crate::decode::DecodedStream;
use crate::ndjson::NdjsonDecoder;

pub const DEFAULT_HOST: &str = "http://localhost:11434";

const BACKEND: &str = "Ollama";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);
const ERROR_BODY_LIMIT: usize = 200;

/// Ollama `/api/chat` over HTTP. Pure inference, so sandbox is ignored.
pub struct OllamaBackend {
    client: Client,
    host: String,
    default_model: Option<String>,
}

impl OllamaBackend {
    pub fn new(host: impl Into<String>, default_model: Option<String>) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            default_model,
        }
    }

    /// Read `OLLAMA_HOST` and `OLLAMA_MODEL`.
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    fn from_vars(vars: &HashMap<String, String>) -> Self {
        let host = vars
            .get("OLLAMA_HOST")
            .filter(|h| !h.is_empty())
            .map_or(DEFAULT_HOST, String::as_str);
        let model = vars.get("OLLAMA_MODEL").filter(|m| !m.is_empty()).cloned();
        Self::new(host, model)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn chat_body(&self, request: &RunRequest, stream: bool) -> Value {
        let mut body = json!({
            "messages": [{ "role": "user", "content": request.prompt }],
            "stream": stream,
        });
        if let Some(model) = request.model.as_ref().or(self.default_model.as_ref()) {
            body["model"] = Value::String(model.clone());
        }
        body
    }

    async fn send_chat(
        &self,
        request: &RunRequest,
        stream: bool,
    ) -> Result<reqwest::Response, BackendError> {
        let resp = self
            .client
            .post(format!("{}/api/chat", self.host))
            .timeout(request.timeout)
            .json(&self.chat_body(request, stream))
            .send()
            .await;
        let resp = match resp {
            Ok(resp) => resp,
            Err(e) => return Err(self.diagnose(e, request.timeout).await),
        };

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                backend: BACKEND.into(),
                status,
                body: body.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }
        Ok(resp)
    }

    /// Tell a dead server apart from a failing request with a quick health check.
    async fn diagnose(&self, err: reqwest::Error, timeout: Duration) -> BackendError {
        if err.is_timeout() {
            return BackendError::Timeout {
                backend: BACKEND.into(),
                timeout,
            };
        }
        let check = self
            .client
            .get(format!("{}/api/tags", self.host))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await;
        match check {
            Err(check_err) => {
                debug!(error = %check_err, "ollama health check failed");
                BackendError::Unreachable {
                    backend: BACKEND.into(),
                    host: self.host.clone(),
                }
            }
            Ok(_) => BackendError::Request {
                backend: BACKEND.into(),
                detail: err.to_string(),
            },
        }
    }
}

/// Extract the reply from a non-streaming `/api/chat` body.
fn reply_text(data: &Value) -> Result<String, BackendError> {
    if let Some(error) = data.get("error").filter(|e| !e.is_null()) {
        let detail = error.as_str().map_or_else(|| error.to_string(), str::to_string);
        return Err(BackendError::Request {
            backend: BACKEND.into(),
            detail: format!("Ollama error: {detail}"),
        });
    }
    let content = data
        .pointer("/message/content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim();
    if content.is_empty() {
        return Err(BackendError::EmptyOutput {
            backend: BACKEND.into(),
        });
    }
    Ok(content.to_string())
}

#[async_trait]
impl Backend for OllamaBackend {
    fn name(&self) -> &str {
        "ollama"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(backend = "ollama", host = %self.host))]
    async fn run(&self, request: &RunRequest) -> Result<String, BackendError> {
        let resp = self.send_chat(request, false).await?;
        let status = resp.status().as_u16();
        let data: Value = resp
            .json()
            .await
            .map_err(|_| BackendError::InvalidResponse {
                backend: BACKEND.into(),
                detail: format!("invalid JSON (HTTP {status})"),
            })?;
        reply_text(&data)
    }

    async fn run_stream(&self, request: &RunRequest) -> Result<TokenStream, BackendError> {
        let resp = self.send_chat(request, true).await?;
        Ok(Box::pin(
            DecodedStream::new(resp.bytes_stream(), NdjsonDecoder::new())
                .with_deadline(request.timeout),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use relay_core::stream::collect_tokens;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn env_host_trims_trailing_slashes() {
        let vars = HashMap::from([
            ("OLLAMA_HOST".to_string(), "http://gpu-box:11434//".to_string()),
            ("OLLAMA_MODEL".to_string(), "llama3.1".to_string()),
        ]);
        let backend = OllamaBackend::from_vars(&vars);
        assert_eq!(backend.host(), "http://gpu-box:11434");
        let body = backend.chat_body(&RunRequest::new("hi", "/repo"), false);
        assert_eq!(body["model"], "llama3.1");
        assert_eq!(body["stream"], false);
    }

    #[test]
    fn defaults_without_env() {
        let backend = OllamaBackend::from_vars(&HashMap::new());
        assert_eq!(backend.host(), DEFAULT_HOST);
        let body = backend.chat_body(&RunRequest::new("hi", "/repo"), true);
        assert!(body.get("model").is_none());
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn request_model_overrides_env_model() {
        let backend = OllamaBackend::new(DEFAULT_HOST, Some("llama3.1".into()));
        let req = RunRequest::new("hi", "/repo").with_model(Some("qwen2.5".into()));
        assert_eq!(backend.chat_body(&req, false)["model"], "qwen2.5");
    }

    #[test]
    fn reply_text_variants() {
        assert_eq!(
            reply_text(&json!({"message": {"content": "  hello \n"}})).unwrap(),
            "hello"
        );
        let err = reply_text(&json!({"message": {"content": "   "}})).unwrap_err();
        assert_eq!(err.error_kind(), "empty_output");
        let err = reply_text(&json!({"error": "model not found"})).unwrap_err();
        assert!(err.to_string().contains("Ollama error: model not found"));
    }

    #[tokio::test]
    async fn run_returns_message_content() {
        let router = Router::new().route(
            "/api/chat",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["stream"], false);
                Json(json!({"message": {"role": "assistant", "content": "@user done"}, "done": true}))
            }),
        );
        let host = serve(router).await;
        let text = OllamaBackend::new(host, None)
            .run(&RunRequest::new("hi", "/repo"))
            .await
            .unwrap();
        assert_eq!(text, "@user done");
    }

    #[tokio::test]
    async fn http_error_truncates_body() {
        let long = "x".repeat(500);
        let router = Router::new().route(
            "/api/chat",
            post(move || {
                let long = long.clone();
                async move { (StatusCode::INTERNAL_SERVER_ERROR, long) }
            }),
        );
        let host = serve(router).await;
        let err = OllamaBackend::new(host, None)
            .run(&RunRequest::new("hi", "/repo"))
            .await
            .unwrap_err();
        match err {
            BackendError::Http { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body.len(), ERROR_BODY_LIMIT);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_json_is_invalid_response() {
        let router = Router::new().route("/api/chat", post(|| async { "not json" }));
        let host = serve(router).await;
        let err = OllamaBackend::new(host, None)
            .run(&RunRequest::new("hi", "/repo"))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "invalid_response");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let host = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let err = OllamaBackend::new(host.clone(), None)
            .run(&RunRequest::new("hi", "/repo"))
            .await
            .unwrap_err();
        assert_eq!(err.error_kind(), "unreachable");
        assert!(err.to_string().contains(&host));
    }

    #[tokio::test]
    async fn stream_decodes_ndjson() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async {
                concat!(
                    "{\"message\":{\"content\":\"Hel\"},\"done\":false}\n",
                    "{\"message\":{\"content\":\"lo\"},\"done\":false}\n",
                    "{\"done\":true}\n",
                )
            }),
        );
        let host = serve(router).await;
        let stream = OllamaBackend::new(host, None)
            .run_stream(&RunRequest::new("hi", "/repo"))
            .await
            .unwrap();
        assert_eq!(collect_tokens(stream).await.unwrap(), "Hello");
    }
}
