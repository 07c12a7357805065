pub mod claude;
pub mod claude_stream;
pub mod codex;
pub mod decode;
pub mod gemini;
pub mod ndjson;
pub mod ollama;
pub mod openai;
pub mod process;
pub mod registry;
pub mod sse;

pub mod mock;

pub use claude::ClaudeBackend;
pub use codex::CodexBackend;
pub use gemini::GeminiBackend;
pub use mock::{MockBackend, MockResponse};
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use registry::BackendRegistry;
