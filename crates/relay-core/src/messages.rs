use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// Broadcast target. Expanded by the orchestrator, never by the queue.
pub const TARGET_ALL: &str = "all";
/// Final-output target. Persisted but never re-routed.
pub const TARGET_USER: &str = "user";

/// One addressed message in a session transcript. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub session_id: SessionId,
    pub from: String,
    pub to: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub turn: u32,
}

impl Message {
    pub fn new(
        session_id: SessionId,
        from: impl Into<String>,
        to: impl Into<String>,
        content: impl Into<String>,
        turn: u32,
    ) -> Self {
        Self {
            id: None,
            session_id,
            from: from.into(),
            to: to.into(),
            content: content.into(),
            timestamp: Utc::now(),
            turn,
        }
    }

    pub fn is_to_user(&self) -> bool {
        self.to == TARGET_USER
    }
}

/// Private commentary an agent produced alongside (or instead of) routed messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentNote {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub session_id: SessionId,
    pub agent: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub turn: u32,
}

/// A routed message extracted from one agent response. Not persisted as-is.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedMessage {
    pub to: String,
    pub content: String,
}

/// Parser output for one agent turn.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParseResult {
    pub messages: Vec<ParsedMessage>,
    pub notes: String,
}

impl ParseResult {
    pub fn has_routable(&self) -> bool {
        !self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_json_shape() {
        let msg = Message::new(SessionId::from_raw("sess_1"), "a.x", "user", "done", 2);
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["sessionId"], "sess_1");
        assert_eq!(json["from"], "a.x");
        assert_eq!(json["turn"], 2);
        assert!(json.get("id").is_none());
        assert!(msg.is_to_user());
    }

    #[test]
    fn parse_result_routable() {
        let mut result = ParseResult::default();
        assert!(!result.has_routable());
        result.messages.push(ParsedMessage {
            to: "user".into(),
            content: "x".into(),
        });
        assert!(result.has_routable());
    }
}
