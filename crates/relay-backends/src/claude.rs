use std::collections::HashMap;

use async_trait::async_trait;
use tracing::instrument;

use relay_core::agent::SandboxMode;
use relay_core::backend::{Backend, RunRequest, SessionHandle};
use relay_core::defaults::AgenticDefaults;
use relay_core::errors::BackendError;
use relay_core::stream::TokenStream;

use crate::claude_stream::ClaudeStreamDecoder;
use crate::decode::DecodedStream;
use crate::process::{self, CliCommand};

pub const INSTALL_HINT: &str = "npm install -g @anthropic-ai/claude-code";

const READ_ONLY_TOOLS: &str = "Read,Grep,Glob,LS,WebFetch,WebSearch";
const WORKSPACE_WRITE_TOOLS: &str = "Read,Grep,Glob,LS,Edit,Write,WebFetch,WebSearch";
const DEFAULT_MAX_TURNS: &str = "10";

/// Claude Code CLI in print mode (`-p`).
///
/// Sandbox maps to `--tools`/`--allowedTools`, which is a tool policy and
/// not OS isolation. Native sessions use `--session-id` and `-r`.
pub struct ClaudeBackend {
    max_turns: String,
    max_budget_usd: Option<String>,
    session_max_turns: u32,
}

impl Default for ClaudeBackend {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS.to_string(),
            max_budget_usd: None,
            session_max_turns: AgenticDefaults::MAX_AGENT_TURNS_PER_ROUND,
        }
    }
}

impl ClaudeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `CLAUDE_MAX_TURNS` and `CLAUDE_MAX_BUDGET`.
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    fn from_vars(vars: &HashMap<String, String>) -> Self {
        let mut backend = Self::default();
        if let Some(turns) = vars.get("CLAUDE_MAX_TURNS").filter(|v| !v.is_empty()) {
            backend.max_turns = turns.clone();
        }
        backend.max_budget_usd = vars.get("CLAUDE_MAX_BUDGET").filter(|v| !v.is_empty()).cloned();
        backend
    }

    /// Tool-use turns per resumed session call.
    pub fn with_session_max_turns(mut self, turns: u32) -> Self {
        self.session_max_turns = turns;
        self
    }

    fn push_tool_policy(args: &mut Vec<String>, sandbox: SandboxMode) {
        match sandbox {
            SandboxMode::DangerFullAccess => args.push("--dangerously-skip-permissions".into()),
            SandboxMode::ReadOnly | SandboxMode::WorkspaceWrite => {
                let tools = if sandbox == SandboxMode::ReadOnly {
                    READ_ONLY_TOOLS
                } else {
                    WORKSPACE_WRITE_TOOLS
                };
                args.extend(["--tools".into(), tools.into(), "--allowedTools".into(), tools.into()]);
            }
        }
        // No recursion through skills or subagents.
        args.extend([
            "--disable-slash-commands".into(),
            "--disallowedTools".into(),
            "Task".into(),
        ]);
    }

    /// Args for an ephemeral one-shot run.
    pub fn build_args(&self, request: &RunRequest, output_format: &str) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            request.prompt.clone(),
            "--add-dir".into(),
            request.repo_path.display().to_string(),
            "--output-format".into(),
            output_format.into(),
        ];
        if let Some(model) = &request.model {
            args.extend(["--model".into(), model.clone()]);
        }
        args.extend(["--max-turns".into(), self.max_turns.clone()]);
        if let Some(budget) = &self.max_budget_usd {
            args.extend(["--max-budget-usd".into(), budget.clone()]);
        }
        Self::push_tool_policy(&mut args, request.sandbox);
        args.push("--no-session-persistence".into());
        args
    }

    /// Args for opening or resuming a persistent session. Both carry the sandbox tool policy.
    pub fn session_args(&self, session: &SessionHandle, request: &RunRequest) -> Vec<String> {
        let turns = self.session_max_turns.to_string();
        match session {
            SessionHandle::New(id) => {
                let mut args = vec![
                    "-p".to_string(),
                    request.prompt.clone(),
                    "--session-id".into(),
                    id.clone(),
                    "--add-dir".into(),
                    request.repo_path.display().to_string(),
                    "--max-turns".into(),
                    turns,
                    "--output-format".into(),
                    "text".into(),
                ];
                if let Some(model) = &request.model {
                    args.extend(["--model".into(), model.clone()]);
                }
                Self::push_tool_policy(&mut args, request.sandbox);
                args
            }
            SessionHandle::Resume(id) => {
                let mut args = vec![
                    "-p".to_string(),
                    request.prompt.clone(),
                    "-r".into(),
                    id.clone(),
                    "--max-turns".into(),
                    turns,
                    "--output-format".into(),
                    "text".into(),
                ];
                // Tool policy is per invocation; a resumed session does not inherit it.
                Self::push_tool_policy(&mut args, request.sandbox);
                args
            }
        }
    }

    fn command(&self, args: Vec<String>, request: &RunRequest) -> CliCommand {
        CliCommand {
            backend: "claude".into(),
            program: "claude".into(),
            args,
            cwd: request.repo_path.clone(),
            timeout: request.timeout,
            install_hint: INSTALL_HINT,
        }
    }
}

#[async_trait]
impl Backend for ClaudeBackend {
    fn name(&self) -> &str {
        "claude"
    }

    fn persistent_sessions(&self) -> bool {
        true
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    #[instrument(skip_all, fields(backend = "claude"))]
    async fn run(&self, request: &RunRequest) -> Result<String, BackendError> {
        let cmd = self.command(self.build_args(request, "text"), request);
        process::run_cli(&cmd).await?.into_text(&cmd)
    }

    #[instrument(skip_all, fields(backend = "claude", session = session.id()))]
    async fn run_in_session(
        &self,
        session: &SessionHandle,
        request: &RunRequest,
    ) -> Result<String, BackendError> {
        let cmd = self.command(self.session_args(session, request), request);
        process::run_cli(&cmd).await?.into_text(&cmd)
    }

    async fn run_stream(&self, request: &RunRequest) -> Result<TokenStream, BackendError> {
        let mut args = self.build_args(request, "stream-json");
        args.push("--include-partial-messages".into());
        let cmd = self.command(args, request);
        let stdout = process::spawn_stdout_stream(&cmd)?;
        Ok(Box::pin(
            DecodedStream::new(stdout, ClaudeStreamDecoder::new()).with_deadline(request.timeout),
        ))
    }
}
