use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use relay_core::backend::{Backend, RunRequest, SessionHandle};
use relay_core::errors::BackendError;
use relay_core::stream::TokenStream;

/// Pre-programmed replies for deterministic runs without real agents.
#[derive(Clone, Debug)]
pub enum MockResponse {
    Text(String),
    Error(BackendError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

type Responder = Arc<dyn Fn(&RunRequest) -> MockResponse + Send + Sync>;

/// Mock backend that replays queued responses, then falls back to a
/// responder (or an error once both are exhausted).
pub struct MockBackend {
    name: String,
    persistent: bool,
    streaming: bool,
    queue: Mutex<VecDeque<MockResponse>>,
    responder: Option<Responder>,
    prompts: Mutex<Vec<String>>,
    sessions: Mutex<Vec<SessionHandle>>,
    call_count: AtomicUsize,
}

impl MockBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            persistent: false,
            streaming: false,
            queue: Mutex::new(VecDeque::new()),
            responder: None,
            prompts: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn with_responses(self, responses: impl IntoIterator<Item = MockResponse>) -> Self {
        self.queue.lock().extend(responses);
        self
    }

    /// Answer every call the queue does not cover.
    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&RunRequest) -> MockResponse + Send + Sync + 'static,
    {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn with_persistent_sessions(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn with_streaming(mut self) -> Self {
        self.streaming = true;
        self
    }

    pub fn push(&self, response: MockResponse) {
        self.queue.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every prompt received, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Session handles received by `run_in_session`, in call order.
    pub fn sessions(&self) -> Vec<SessionHandle> {
        self.sessions.lock().clone()
    }

    fn next_response(&self, request: &RunRequest) -> MockResponse {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.prompts.lock().push(request.prompt.clone());
        if let Some(response) = self.queue.lock().pop_front() {
            return response;
        }
        match &self.responder {
            Some(responder) => responder(request),
            None => MockResponse::Error(BackendError::Request {
                backend: self.name.clone(),
                detail: format!("no response configured for call {idx}"),
            }),
        }
    }

    async fn resolve(mut response: MockResponse) -> Result<String, BackendError> {
        loop {
            match response {
                MockResponse::Text(text) => return Ok(text),
                MockResponse::Error(err) => return Err(err),
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn persistent_sessions(&self) -> bool {
        self.persistent
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn run(&self, request: &RunRequest) -> Result<String, BackendError> {
        Self::resolve(self.next_response(request)).await
    }

    async fn run_in_session(
        &self,
        session: &SessionHandle,
        request: &RunRequest,
    ) -> Result<String, BackendError> {
        self.sessions.lock().push(session.clone());
        self.run(request).await
    }

    async fn run_stream(&self, request: &RunRequest) -> Result<TokenStream, BackendError> {
        if !self.streaming {
            return Err(BackendError::StreamingUnsupported {
                backend: self.name.clone(),
            });
        }
        let text = Self::resolve(self.next_response(request)).await?;
        let tokens: Vec<_> = text
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(tokens)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::stream::collect_tokens;

    #[tokio::test]
    async fn queue_then_responder() {
        let mock = MockBackend::new("mock")
            .with_responses([MockResponse::text("first")])
            .with_responder(|req| MockResponse::text(format!("echo {}", req.prompt)));
        let req = RunRequest::new("hi", "/repo");
        assert_eq!(mock.run(&req).await.unwrap(), "first");
        assert_eq!(mock.run(&req).await.unwrap(), "echo hi");
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.prompts(), vec!["hi", "hi"]);
    }

    #[tokio::test]
    async fn exhausted_queue_errors() {
        let mock = MockBackend::new("mock");
        let err = mock.run(&RunRequest::new("hi", "/repo")).await.unwrap_err();
        assert!(err.to_string().contains("no response configured for call 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_then_error() {
        let mock = MockBackend::new("mock").with_responses([MockResponse::delayed(
            Duration::from_secs(30),
            MockResponse::Error(BackendError::EmptyOutput {
                backend: "mock".into(),
            }),
        )]);
        let err = mock.run(&RunRequest::new("hi", "/repo")).await.unwrap_err();
        assert_eq!(err.error_kind(), "empty_output");
    }

    #[tokio::test]
    async fn records_session_handles() {
        let mock = MockBackend::new("mock")
            .with_persistent_sessions()
            .with_responses([MockResponse::text("a"), MockResponse::text("b")]);
        let req = RunRequest::new("hi", "/repo");
        mock.run_in_session(&SessionHandle::New("s1".into()), &req).await.unwrap();
        mock.run_in_session(&SessionHandle::Resume("s1".into()), &req).await.unwrap();
        assert_eq!(
            mock.sessions(),
            vec![SessionHandle::New("s1".into()), SessionHandle::Resume("s1".into())]
        );
    }

    #[tokio::test]
    async fn streaming_splits_on_spaces() {
        let mock = MockBackend::new("mock")
            .with_streaming()
            .with_responses([MockResponse::text("@user all good")]);
        let stream = mock.run_stream(&RunRequest::new("hi", "/repo")).await.unwrap();
        assert_eq!(collect_tokens(stream).await.unwrap(), "@user all good");

        let plain = MockBackend::new("plain");
        assert!(plain.run_stream(&RunRequest::new("hi", "/repo")).await.is_err());
    }
}
