use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentState;
use crate::ids::SessionId;

/// Persisted lifecycle status of an agentic session. Terminal once not `Active`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Stopped,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "stopped" => Ok(Self::Stopped),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Why the orchestrator ended a session. Carried by `session_end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndReason {
    Converged,
    MaxTurns,
    Timeout,
    Stopped,
    Error,
}

impl SessionEndReason {
    /// Status recorded in the store for this outcome.
    pub fn status(self) -> SessionStatus {
        match self {
            Self::Converged | Self::MaxTurns | Self::Timeout => SessionStatus::Completed,
            Self::Stopped => SessionStatus::Stopped,
            Self::Error => SessionStatus::Failed,
        }
    }
}

impl std::fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Converged => write!(f, "converged"),
            Self::MaxTurns => write!(f, "max_turns"),
            Self::Timeout => write!(f, "timeout"),
            Self::Stopped => write!(f, "stopped"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A session as read back from the transcript store.
///
/// `turn` is the highest of the round recorded at end and any persisted message or note.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgenticSession {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub prompt: String,
    pub status: SessionStatus,
    pub agents: Vec<AgentState>,
    pub turn: u32,
    pub max_turns: u32,
}
