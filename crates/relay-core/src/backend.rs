use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::SandboxMode;
use crate::defaults::AgenticDefaults;
use crate::errors::BackendError;
use crate::stream::TokenStream;

/// One backend invocation.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub prompt: String,
    pub repo_path: PathBuf,
    pub timeout: Duration,
    pub sandbox: SandboxMode,
    pub model: Option<String>,
}

impl RunRequest {
    pub fn new(prompt: impl Into<String>, repo_path: impl Into<PathBuf>) -> Self {
        Self {
            prompt: prompt.into(),
            repo_path: repo_path.into(),
            timeout: AgenticDefaults::CALL_TIMEOUT,
            sandbox: SandboxMode::default(),
            model: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_sandbox(mut self, sandbox: SandboxMode) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// Native session reference for backends that persist conversations themselves.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionHandle {
    /// Open a new backend session under this id.
    New(String),
    /// Continue an existing backend session.
    Resume(String),
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        match self {
            Self::New(id) | Self::Resume(id) => id,
        }
    }
}

/// Trait implemented by each agent backend (CLI subprocess or HTTP API).
///
/// Backends are opaque text-in/text-out. Flag building and wire decoding
/// stay inside each implementation.
#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `run_in_session` keeps context on the backend side.
    /// When false, callers replay history inline.
    fn persistent_sessions(&self) -> bool {
        false
    }

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn run(&self, request: &RunRequest) -> Result<String, BackendError>;

    async fn run_in_session(
        &self,
        _session: &SessionHandle,
        request: &RunRequest,
    ) -> Result<String, BackendError> {
        self.run(request).await
    }

    async fn run_stream(&self, _request: &RunRequest) -> Result<TokenStream, BackendError> {
        Err(BackendError::StreamingUnsupported {
            backend: self.name().to_string(),
        })
    }
}
