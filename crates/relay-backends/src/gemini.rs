use async_trait::async_trait;
use tracing::instrument;

use relay_core::agent::SandboxMode;
use relay_core::backend::{Backend, RunRequest};
use relay_core::errors::BackendError;

use crate::process::{self, CliCommand};

pub const INSTALL_HINT: &str = "npm install -g @google/gemini-cli";

/// Gemini CLI in headless mode. `--sandbox` is on unless full access is granted.
#[derive(Default)]
pub struct GeminiBackend;

impl GeminiBackend {
    pub fn new() -> Self {
        Self
    }

    pub fn build_args(&self, request: &RunRequest) -> Vec<String> {
        let mut args = Vec::new();
        if request.sandbox != SandboxMode::DangerFullAccess {
            args.push("--sandbox".to_string());
        }
        args.extend([
            "--yolo".to_string(),
            "--include-directories".into(),
            request.repo_path.display().to_string(),
            "--output-format".into(),
            "text".into(),
        ]);
        if let Some(model) = &request.model {
            args.extend(["-m".into(), model.clone()]);
        }
        args.extend(["--prompt".into(), request.prompt.clone()]);
        args
    }
}

#[async_trait]
impl Backend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    #[instrument(skip_all, fields(backend = "gemini"))]
    async fn run(&self, request: &RunRequest) -> Result<String, BackendError> {
        let cmd = CliCommand {
            backend: "gemini".into(),
            program: "gemini".into(),
            args: self.build_args(request),
            cwd: request.repo_path.clone(),
            timeout: request.timeout,
            install_hint: INSTALL_HINT,
        };
        process::run_cli(&cmd).await?.into_text(&cmd)
    }
}
