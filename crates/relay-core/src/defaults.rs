use std::time::Duration;

/// Tuning constants for agentic sessions.
pub struct AgenticDefaults;

impl AgenticDefaults {
    pub const MAX_TURNS: u32 = 20;
    pub const TIMEOUT: Duration = Duration::from_secs(900);
    /// Routed message content above this many bytes is truncated.
    pub const MAX_MESSAGE_SIZE: usize = 50 * 1024;
    pub const PING_PONG_THRESHOLD: u32 = 4;
    pub const NO_PROGRESS_THRESHOLD: u32 = 2;
    /// Tool-use turns a persistent-session backend may take per resume.
    pub const MAX_AGENT_TURNS_PER_ROUND: u32 = 3;
    /// Hard wall-clock limit for one backend invocation.
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(600);
}
