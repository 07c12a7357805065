use std::path::PathBuf;
use std::time::Duration;

use relay_core::agent::{AgentConfig, SandboxMode};
use relay_core::defaults::AgenticDefaults;

/// Configuration for one agentic run.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub agents: Vec<AgentConfig>,
    pub prompt: String,
    pub max_turns: u32,
    /// Session wall clock, checked at round boundaries.
    pub timeout: Duration,
    pub repo_path: PathBuf,
    pub sandbox: SandboxMode,
    /// Hard limit for a single backend call.
    pub call_timeout: Duration,
    /// Use token streams where the backend supports them.
    pub streaming: bool,
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            agents: Vec::new(),
            prompt: String::new(),
            max_turns: AgenticDefaults::MAX_TURNS,
            timeout: AgenticDefaults::TIMEOUT,
            repo_path: PathBuf::from("."),
            sandbox: SandboxMode::default(),
            call_timeout: AgenticDefaults::CALL_TIMEOUT,
            streaming: false,
            max_message_size: AgenticDefaults::MAX_MESSAGE_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn new(prompt: impl Into<String>, agents: Vec<AgentConfig>) -> Self {
        Self {
            prompt: prompt.into(),
            agents,
            ..Default::default()
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_repo_path(mut self, repo_path: impl Into<PathBuf>) -> Self {
        self.repo_path = repo_path.into();
        self
    }
}

/// Loop-breaker thresholds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuardrailConfig {
    /// Consecutive rounds one agent pair may talk only to each other.
    pub ping_pong_threshold: u32,
    /// Consecutive rounds with pending mail but no new content.
    pub no_progress_threshold: u32,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            ping_pong_threshold: AgenticDefaults::PING_PONG_THRESHOLD,
            no_progress_threshold: AgenticDefaults::NO_PROGRESS_THRESHOLD,
        }
    }
}
