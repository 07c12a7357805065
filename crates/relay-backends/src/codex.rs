use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, instrument};

use relay_core::backend::{Backend, RunRequest};
use relay_core::errors::BackendError;

use crate::process::{self, CliCommand};

pub const INSTALL_HINT: &str = "npm install -g @openai/codex";

/// Codex CLI (`codex exec`). Stateless; the final message is read from
/// `--output-last-message` and preferred over stdout.
#[derive(Default)]
pub struct CodexBackend;

impl CodexBackend {
    pub fn new() -> Self {
        Self
    }

    pub fn build_args(&self, request: &RunRequest, output_path: &Path) -> Vec<String> {
        let mut args = vec![
            "exec".to_string(),
            "-C".into(),
            request.repo_path.display().to_string(),
            "--skip-git-repo-check".into(),
            "--sandbox".into(),
            request.sandbox.to_string(),
            "--output-last-message".into(),
            output_path.display().to_string(),
        ];
        if let Some(model) = &request.model {
            args.extend(["-m".into(), model.clone()]);
        }
        args.push(request.prompt.clone());
        args
    }
}

fn scratch_dir() -> PathBuf {
    std::env::temp_dir().join(format!("relay-codex-{}", uuid::Uuid::now_v7()))
}

#[async_trait]
impl Backend for CodexBackend {
    fn name(&self) -> &str {
        "codex"
    }

    #[instrument(skip_all, fields(backend = "codex"))]
    async fn run(&self, request: &RunRequest) -> Result<String, BackendError> {
        let dir = scratch_dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| BackendError::Spawn {
                backend: "codex".into(),
                detail: format!("create scratch dir: {e}"),
            })?;
        let output_path = dir.join("codex-last-message.txt");

        let cmd = CliCommand {
            backend: "codex".into(),
            program: "codex".into(),
            args: self.build_args(request, &output_path),
            cwd: request.repo_path.clone(),
            timeout: request.timeout,
            install_hint: INSTALL_HINT,
        };
        let result = process::run_cli(&cmd).await;

        let last_message = tokio::fs::read_to_string(&output_path)
            .await
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            debug!(error = %e, "failed to remove codex scratch dir");
        }

        let output = result?;
        if !last_message.is_empty() {
            return Ok(last_message);
        }
        output.into_text(&cmd)
    }
}
