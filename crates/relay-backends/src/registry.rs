use std::collections::HashMap;
use std::sync::Arc;

use relay_core::backend::Backend;
use relay_core::errors::BackendError;

use crate::claude::ClaudeBackend;
use crate::codex::CodexBackend;
use crate::gemini::GeminiBackend;
use crate::ollama::OllamaBackend;
use crate::openai::OpenAiBackend;

/// Backends by name. Unknown names are rejected with the supported list.
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in backend, configured from the environment.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ClaudeBackend::from_env()));
        registry.register(Arc::new(CodexBackend::new()));
        registry.register(Arc::new(GeminiBackend::new()));
        registry.register(Arc::new(OllamaBackend::from_env()));
        registry.register(Arc::new(OpenAiBackend::from_env()));
        registry
    }

    /// Register under the backend's own name, replacing any previous entry.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.insert(backend.name().to_string(), backend);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Backend>, BackendError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::Unsupported {
                name: name.to_string(),
                supported: self.names().join(", "),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    /// Sorted backend names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}
