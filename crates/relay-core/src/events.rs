use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentState, AgentStatus};
use crate::ids::SessionId;
use crate::session::SessionEndReason;

/// Orchestration events. These are the only values that cross the core
/// boundary live; every consumer (CLI, dashboard, web) sees the same sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum AgenticEvent {
    SessionStart {
        session_id: SessionId,
        prompt: String,
        agents: Vec<AgentState>,
        timestamp: DateTime<Utc>,
    },

    Message {
        session_id: SessionId,
        from: String,
        to: String,
        content: String,
        turn: u32,
        timestamp: DateTime<Utc>,
    },

    AgentStatus {
        session_id: SessionId,
        agent: String,
        status: AgentStatus,
        timestamp: DateTime<Utc>,
    },

    TurnComplete {
        session_id: SessionId,
        turn: u32,
        pending_count: usize,
        timestamp: DateTime<Utc>,
    },

    Guardrail {
        session_id: SessionId,
        guard: String,
        detail: String,
        timestamp: DateTime<Utc>,
    },

    /// Always the last event of a session.
    SessionEnd {
        session_id: SessionId,
        reason: SessionEndReason,
        turn: u32,
        /// Wall time since session start, in milliseconds.
        elapsed: u64,
        timestamp: DateTime<Utc>,
    },

    Error {
        session_id: SessionId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent: Option<String>,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl AgenticEvent {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::SessionStart { session_id, .. }
            | Self::Message { session_id, .. }
            | Self::AgentStatus { session_id, .. }
            | Self::TurnComplete { session_id, .. }
            | Self::Guardrail { session_id, .. }
            | Self::SessionEnd { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::SessionStart { .. } => "session_start",
            Self::Message { .. } => "message",
            Self::AgentStatus { .. } => "agent_status",
            Self::TurnComplete { .. } => "turn_complete",
            Self::Guardrail { .. } => "guardrail",
            Self::SessionEnd { .. } => "session_end",
            Self::Error { .. } => "error",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::SessionStart { timestamp, .. }
            | Self::Message { timestamp, .. }
            | Self::AgentStatus { timestamp, .. }
            | Self::TurnComplete { timestamp, .. }
            | Self::Guardrail { timestamp, .. }
            | Self::SessionEnd { timestamp, .. }
            | Self::Error { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionEnd { .. })
    }
}

/// Live observer of orchestration events (web broadcast, dashboard forwarder).
///
/// `publish` must not block and must not fail the caller; sinks that can
/// fail drop the event and log.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &AgenticEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_session_id() {
        let sid = SessionId::new();
        let evt = AgenticEvent::TurnComplete {
            session_id: sid.clone(),
            turn: 1,
            pending_count: 0,
            timestamp: Utc::now(),
        };
        assert_eq!(evt.session_id(), &sid);
        assert_eq!(evt.event_type(), "turn_complete");
    }

    #[test]
    fn wire_format_uses_type_tag_and_camel_case() {
        let evt = AgenticEvent::TurnComplete {
            session_id: SessionId::from_raw("sess_x"),
            turn: 3,
            pending_count: 2,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&evt).unwrap();
        assert_eq!(json["type"], "turn_complete");
        assert_eq!(json["sessionId"], "sess_x");
        assert_eq!(json["pendingCount"], 2);
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let events = vec![
            AgenticEvent::AgentStatus {
                session_id: SessionId::new(),
                agent: "kai.perf".into(),
                status: AgentStatus::Dead,
                timestamp: Utc::now(),
            },
            AgenticEvent::SessionEnd {
                session_id: SessionId::new(),
                reason: SessionEndReason::Converged,
                turn: 2,
                elapsed: 1500,
                timestamp: Utc::now(),
            },
            AgenticEvent::Error {
                session_id: SessionId::new(),
                agent: None,
                error: "boom".into(),
                timestamp: Utc::now(),
            },
        ];
        for evt in &events {
            let json = serde_json::to_value(evt).unwrap();
            assert_eq!(json["type"], evt.event_type());
            let parsed: AgenticEvent = serde_json::from_value(json).unwrap();
            assert_eq!(&parsed, evt);
        }
    }

    #[test]
    fn only_session_end_is_terminal() {
        let end = AgenticEvent::SessionEnd {
            session_id: SessionId::new(),
            reason: SessionEndReason::Stopped,
            turn: 0,
            elapsed: 0,
            timestamp: Utc::now(),
        };
        assert!(end.is_terminal());
        let guard = AgenticEvent::Guardrail {
            session_id: SessionId::new(),
            guard: "ping_pong".into(),
            detail: String::new(),
            timestamp: Utc::now(),
        };
        assert!(!guard.is_terminal());
    }
}
