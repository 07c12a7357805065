use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, instrument};

use relay_backends::BackendRegistry;
use relay_core::agent::{AgentConfig, SandboxMode};
use relay_core::backend::{Backend, RunRequest, SessionHandle};
use relay_core::defaults::AgenticDefaults;
use relay_core::errors::BackendError;
use relay_core::ids::backend_session_id;
use relay_core::stream::collect_tokens;

/// Slack on top of the per-call timeout so backends that kill their own
/// subprocess can still hand back partial output.
const CALL_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// One agent's conversation with its backend.
#[derive(Clone, Debug)]
pub struct AgentSession {
    pub agent_name: String,
    pub backend: String,
    pub model: Option<String>,
    pub session_id: String,
    /// Alternating prompt/response pairs, oldest first.
    pub history: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpawnResult {
    pub output: String,
    pub session_id: String,
}

/// Owns every agent's backend session for one agentic run.
///
/// Backends with native persistence are resumed by id. Everything else is
/// replayed: the full prompt/response history goes inline with each call.
pub struct SessionManager {
    registry: Arc<BackendRegistry>,
    sessions: DashMap<String, AgentSession>,
    sandbox: SandboxMode,
    call_timeout: Duration,
    streaming: bool,
}

impl SessionManager {
    pub fn new(registry: Arc<BackendRegistry>) -> Self {
        Self {
            registry,
            sessions: DashMap::new(),
            sandbox: SandboxMode::default(),
            call_timeout: AgenticDefaults::CALL_TIMEOUT,
            streaming: false,
        }
    }

    pub fn with_sandbox(mut self, sandbox: SandboxMode) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Start a session for `agent` with its system prompt and the shared
    /// initial prompt.
    #[instrument(skip_all, fields(agent = %agent.name, backend = %agent.backend))]
    pub async fn spawn(
        &self,
        agent: &AgentConfig,
        system_prompt: &str,
        initial_prompt: &str,
        repo_path: &Path,
    ) -> Result<SpawnResult, BackendError> {
        let backend = self.registry.get(&agent.backend)?;
        let session_id = backend_session_id();
        let prompt = format!("{system_prompt}\n\n---\n\n{initial_prompt}");
        let request = self.request(&prompt, repo_path, agent.model.clone());

        let output = if backend.persistent_sessions() {
            let handle = SessionHandle::New(session_id.clone());
            self.call(backend.run_in_session(&handle, &request), backend.name())
                .await?
        } else {
            self.stateless(backend.as_ref(), &request).await?
        };

        // Replays need the role instructions, so the combined prompt is turn 1.
        self.sessions.insert(
            agent.name.clone(),
            AgentSession {
                agent_name: agent.name.clone(),
                backend: agent.backend.clone(),
                model: agent.model.clone(),
                session_id: session_id.clone(),
                history: vec![prompt, output.clone()],
            },
        );
        debug!(%session_id, "agent session spawned");
        Ok(SpawnResult { output, session_id })
    }

    /// Send `message` to a spawned agent. History only grows on success.
    #[instrument(skip(self, message, repo_path))]
    pub async fn resume(
        &self,
        agent_name: &str,
        message: &str,
        repo_path: &Path,
    ) -> Result<String, BackendError> {
        let session = self
            .sessions
            .get(agent_name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| BackendError::NoSession(agent_name.to_string()))?;
        let backend = self.registry.get(&session.backend)?;

        let output = if backend.persistent_sessions() {
            let request = self.request(message, repo_path, session.model.clone());
            let handle = SessionHandle::Resume(session.session_id.clone());
            self.call(backend.run_in_session(&handle, &request), backend.name())
                .await?
        } else {
            let prompt = replay_prompt(&session.history, message);
            let request = self.request(&prompt, repo_path, session.model.clone());
            self.stateless(backend.as_ref(), &request).await?
        };

        if let Some(mut entry) = self.sessions.get_mut(agent_name) {
            entry.history.push(message.to_string());
            entry.history.push(output.clone());
        }
        Ok(output)
    }

    pub fn has_session(&self, agent_name: &str) -> bool {
        self.sessions.contains_key(agent_name)
    }

    pub fn get(&self, agent_name: &str) -> Option<AgentSession> {
        self.sessions.get(agent_name).map(|entry| entry.value().clone())
    }

    /// Release every session.
    pub fn clear(&self) {
        self.sessions.clear();
    }

    fn request(&self, prompt: &str, repo_path: &Path, model: Option<String>) -> RunRequest {
        RunRequest::new(prompt, repo_path)
            .with_timeout(self.call_timeout)
            .with_sandbox(self.sandbox)
            .with_model(model)
    }

    async fn stateless(
        &self,
        backend: &dyn Backend,
        request: &RunRequest,
    ) -> Result<String, BackendError> {
        if self.streaming && backend.supports_streaming() {
            let name = backend.name().to_string();
            let collected = self
                .call(
                    async {
                        let stream = backend.run_stream(request).await?;
                        collect_tokens(stream)
                            .await
                            .map_err(|e| BackendError::stream(name.clone(), e))
                    },
                    backend.name(),
                )
                .await?;
            let text = collected.trim();
            if text.is_empty() {
                return Err(BackendError::EmptyOutput { backend: name });
            }
            return Ok(text.to_string());
        }
        self.call(backend.run(request), backend.name()).await
    }

    async fn call<F>(&self, fut: F, backend: &str) -> Result<String, BackendError>
    where
        F: std::future::Future<Output = Result<String, BackendError>>,
    {
        match tokio::time::timeout(self.call_timeout + CALL_TIMEOUT_GRACE, fut).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout {
                backend: backend.to_string(),
                timeout: self.call_timeout,
            }),
        }
    }
}

/// Inline transcript for backends without native sessions.
pub fn replay_prompt(history: &[String], message: &str) -> String {
    let transcript = history
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let kind = if i % 2 == 0 { "prompt" } else { "response" };
            format!("[Turn {} {kind}]: {text}", i / 2 + 1)
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");
    format!("{transcript}\n\n---\n\n[New message]: {message}")
}
