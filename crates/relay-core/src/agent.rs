use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One participant in an agentic session, as configured by the caller.
///
/// `name` is either a bare role (`"security"`) or an already qualified
/// `firstname.role`. Bare roles receive a first name at session setup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub name: String,
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
            model: None,
            description: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Parse a `role:backend[:model]` roster entry.
    pub fn parse_roster_entry(entry: &str) -> Result<Self, String> {
        let mut parts = entry.splitn(3, ':');
        let role = parts.next().unwrap_or_default().trim();
        let backend = parts.next().map(str::trim).unwrap_or_default();
        if role.is_empty() || backend.is_empty() {
            return Err(format!("invalid agent '{entry}', expected role:backend[:model]"));
        }
        let mut config = Self::new(role, backend);
        if let Some(model) = parts.next().map(str::trim).filter(|m| !m.is_empty()) {
            config.model = Some(model.to_string());
        }
        Ok(config)
    }
}

/// Liveness of an agent within a session. `Dead` is terminal for the agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Idle,
    Dead,
}

impl AgentStatus {
    pub fn is_dead(self) -> bool {
        matches!(self, Self::Dead)
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Idle => write!(f, "idle"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "idle" => Ok(Self::Idle),
            "dead" => Ok(Self::Dead),
            other => Err(format!("unknown agent status: {other}")),
        }
    }
}

/// Runtime view of one agent, mirrored into the transcript store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub name: String,
    pub backend: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_session_id: Option<String>,
    pub status: AgentStatus,
    pub message_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl AgentState {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            name: config.name.clone(),
            backend: config.backend.clone(),
            model: config.model.clone(),
            backend_session_id: None,
            status: AgentStatus::Active,
            message_count: 0,
            last_seen: None,
        }
    }

    /// First-name part of a `firstname.role` identity.
    pub fn first_name(&self) -> &str {
        first_name(&self.name)
    }
}

/// First-name part of a `firstname.role` identity (the whole name when undotted).
pub fn first_name(name: &str) -> &str {
    name.split_once('.').map_or(name, |(first, _)| first)
}

/// Role part of a `firstname.role` identity (the whole name when undotted).
pub fn role_part(name: &str) -> &str {
    name.split_once('.').map_or(name, |(_, role)| role)
}

/// Permission policy handed to backends. Maps onto backend tool flags,
/// not OS-level isolation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    #[default]
    ReadOnly,
    WorkspaceWrite,
    DangerFullAccess,
}

impl std::fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadOnly => write!(f, "read-only"),
            Self::WorkspaceWrite => write!(f, "workspace-write"),
            Self::DangerFullAccess => write!(f, "danger-full-access"),
        }
    }
}

impl std::str::FromStr for SandboxMode {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read-only" => Ok(Self::ReadOnly),
            "workspace-write" => Ok(Self::WorkspaceWrite),
            "danger-full-access" => Ok(Self::DangerFullAccess),
            other => Err(format!("unknown sandbox mode: {other}")),
        }
    }
}
