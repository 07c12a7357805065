use chrono::Utc;
use rusqlite::Connection;
use tracing::instrument;

use relay_core::agent::{AgentState, AgentStatus};
use relay_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Partial update of an agent row. `None` fields are left unchanged;
/// `last_seen` is always refreshed.
#[derive(Clone, Debug, Default)]
pub struct AgentUpdate {
    pub status: Option<AgentStatus>,
    pub backend_session_id: Option<String>,
    pub message_count: Option<u32>,
}

impl AgentUpdate {
    pub fn status(status: AgentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

pub(crate) fn insert(
    conn: &Connection,
    session_id: &SessionId,
    agent: &AgentState,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO agents (session_id, name, backend, model, backend_session_id, status, message_count, last_seen)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            session_id.as_str(),
            agent.name,
            agent.backend,
            agent.model,
            agent.backend_session_id,
            agent.status.to_string(),
            agent.message_count,
            agent.last_seen.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

pub struct AgentRepo {
    db: Database,
}

impl AgentRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, agent), fields(session_id = %session_id, agent = %agent.name))]
    pub fn add(&self, session_id: &SessionId, agent: &AgentState) -> Result<(), StoreError> {
        self.db.with_conn(|conn| insert(conn, session_id, agent))
    }

    #[instrument(skip(self, update), fields(session_id = %session_id, agent = name))]
    pub fn update(
        &self,
        session_id: &SessionId,
        name: &str,
        update: &AgentUpdate,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE agents SET
                    status = COALESCE(?1, status),
                    backend_session_id = COALESCE(?2, backend_session_id),
                    message_count = COALESCE(?3, message_count),
                    last_seen = ?4
                 WHERE session_id = ?5 AND name = ?6",
                rusqlite::params![
                    update.status.map(|s| s.to_string()),
                    update.backend_session_id,
                    update.message_count,
                    Utc::now().to_rfc3339(),
                    session_id.as_str(),
                    name,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("agent {name} in {session_id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id, agent = name))]
    pub fn get(&self, session_id: &SessionId, name: &str) -> Result<AgentState, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, backend, model, backend_session_id, status, message_count, last_seen
                 FROM agents WHERE session_id = ?1 AND name = ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![session_id.as_str(), name])?;
            match rows.next()? {
                Some(row) => row_to_agent(row),
                None => Err(StoreError::NotFound(format!("agent {name} in {session_id}"))),
            }
        })
    }

    /// Agents in insertion order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<AgentState>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT name, backend, model, backend_session_id, status, message_count, last_seen
                 FROM agents WHERE session_id = ?1 ORDER BY rowid",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_agent(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> Result<AgentState, StoreError> {
    let status_str: String = row_helpers::get(row, 4, "agents", "status")?;

    Ok(AgentState {
        name: row_helpers::get(row, 0, "agents", "name")?,
        backend: row_helpers::get(row, 1, "agents", "backend")?,
        model: row_helpers::get_opt(row, 2, "agents", "model")?,
        backend_session_id: row_helpers::get_opt(row, 3, "agents", "backend_session_id")?,
        status: row_helpers::parse_enum(&status_str, "agents", "status")?,
        message_count: row_helpers::get(row, 5, "agents", "message_count")?,
        last_seen: row_helpers::get_time_opt(row, 6, "agents", "last_seen")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionRepo;
    use relay_core::agent::AgentConfig;

    fn setup() -> (AgentRepo, SessionId) {
        let db = Database::in_memory().unwrap();
        let session = SessionRepo::new(db.clone()).create("p", 5).unwrap();
        (AgentRepo::new(db), session.id)
    }

    fn agent(name: &str) -> AgentState {
        AgentState::from_config(&AgentConfig::new(name, "claude").with_model("sonnet"))
    }

    #[test]
    fn add_and_get() {
        let (repo, sid) = setup();
        repo.add(&sid, &agent("kai.perf")).unwrap();
        let fetched = repo.get(&sid, "kai.perf").unwrap();
        assert_eq!(fetched.backend, "claude");
        assert_eq!(fetched.model.as_deref(), Some("sonnet"));
        assert_eq!(fetched.status, AgentStatus::Active);
        assert!(fetched.last_seen.is_none());
    }

    #[test]
    fn duplicate_name_conflicts() {
        let (repo, sid) = setup();
        repo.add(&sid, &agent("kai.perf")).unwrap();
        let result = repo.add(&sid, &agent("kai.perf"));
        assert!(matches!(result, Err(StoreError::Conflict(_))));
    }

    #[test]
    fn unknown_session_rejected() {
        let (repo, _) = setup();
        let result = repo.add(&SessionId::from_raw("sess_missing"), &agent("x.y"));
        assert!(result.is_err());
    }

    #[test]
    fn partial_update_keeps_other_fields() {
        let (repo, sid) = setup();
        repo.add(&sid, &agent("kai.perf")).unwrap();
        repo.update(
            &sid,
            "kai.perf",
            &AgentUpdate {
                backend_session_id: Some("abc".into()),
                message_count: Some(4),
                ..Default::default()
            },
        )
        .unwrap();
        repo.update(&sid, "kai.perf", &AgentUpdate::status(AgentStatus::Idle))
            .unwrap();

        let fetched = repo.get(&sid, "kai.perf").unwrap();
        assert_eq!(fetched.status, AgentStatus::Idle);
        assert_eq!(fetched.backend_session_id.as_deref(), Some("abc"));
        assert_eq!(fetched.message_count, 4);
        assert!(fetched.last_seen.is_some());
    }

    #[test]
    fn update_unknown_agent_is_not_found() {
        let (repo, sid) = setup();
        let result = repo.update(&sid, "ghost", &AgentUpdate::status(AgentStatus::Dead));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn list_in_insertion_order() {
        let (repo, sid) = setup();
        repo.add(&sid, &agent("zara.b")).unwrap();
        repo.add(&sid, &agent("ada.a")).unwrap();
        let names: Vec<_> = repo.list(&sid).unwrap().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["zara.b", "ada.a"]);
    }
}
