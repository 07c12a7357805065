pub mod channel;
pub mod config;
pub mod error;
pub mod guardrails;
pub mod names;
pub mod orchestrator;
pub mod parser;
pub mod queue;
pub mod session;
pub mod truncate;

pub use channel::{ChannelError, EventChannel, EventConsumer};
pub use config::{GuardrailConfig, SessionConfig};
pub use error::EngineError;
pub use orchestrator::{Orchestrator, SessionRun};
pub use session::SessionManager;
