use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use relay_core::agent::AgentState;
use relay_core::ids::SessionId;
use relay_core::session::{AgenticSession, SessionStatus};

use crate::agents::{self, AgentRepo};
use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Aggregate counts for the dashboard stats view.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub total_sessions: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub stopped: u64,
    pub total_messages: u64,
}

pub struct SessionRepo {
    db: Database,
}

// Rounds that only produced notes, or nothing at all, are covered by the
// turn recorded at end.
const SESSION_COLUMNS: &str = "s.id, s.created_at, s.ended_at, s.prompt, s.status, s.max_turns,
     MAX(s.turn,
         COALESCE((SELECT MAX(m.turn) FROM messages m WHERE m.session_id = s.id), 0),
         COALESCE((SELECT MAX(n.turn) FROM agent_notes n WHERE n.session_id = s.id), 0))";

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new active session.
    #[instrument(skip(self, prompt), fields(max_turns))]
    pub fn create(&self, prompt: &str, max_turns: u32) -> Result<AgenticSession, StoreError> {
        self.create_with_agents(prompt, max_turns, &[])
    }

    /// Create a session and its roster in one transaction. Nothing is written
    /// if any agent row is rejected.
    #[instrument(skip(self, prompt, roster), fields(max_turns, agents = roster.len()))]
    pub fn create_with_agents(
        &self,
        prompt: &str,
        max_turns: u32,
        roster: &[AgentState],
    ) -> Result<AgenticSession, StoreError> {
        let id = SessionId::new();
        let now = Utc::now();

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO sessions (id, created_at, prompt, status, max_turns)
                 VALUES (?1, ?2, ?3, 'active', ?4)",
                rusqlite::params![id.as_str(), now.to_rfc3339(), prompt, max_turns],
            )?;
            for agent in roster {
                agents::insert(&tx, &id, agent)?;
            }
            tx.commit()?;

            Ok(AgenticSession {
                id,
                created_at: now,
                ended_at: None,
                prompt: prompt.to_string(),
                status: SessionStatus::Active,
                agents: roster.to_vec(),
                turn: 0,
                max_turns,
            })
        })
    }

    /// Record the terminal status, end time and the last completed round.
    #[instrument(skip(self), fields(session_id = %id, status = %status, turn))]
    pub fn end(&self, id: &SessionId, status: SessionStatus, turn: u32) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET status = ?1, ended_at = ?2, turn = MAX(turn, ?3) WHERE id = ?4",
                rusqlite::params![status.to_string(), Utc::now().to_rfc3339(), turn, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }

    /// Get a session with its agents and derived turn.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<AgenticSession, StoreError> {
        let mut session = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions s WHERE s.id = ?1"
            ))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })?;
        session.agents = AgentRepo::new(self.db.clone()).list(id)?;
        Ok(session)
    }

    /// All sessions, newest first.
    #[instrument(skip(self))]
    pub fn list(&self) -> Result<Vec<AgenticSession>, StoreError> {
        let mut sessions = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions s ORDER BY s.created_at DESC, s.rowid DESC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_session(row)?);
            }
            Ok(results)
        })?;

        let agents = AgentRepo::new(self.db.clone());
        for session in &mut sessions {
            session.agents = agents.list(&session.id)?;
        }
        Ok(sessions)
    }

    /// Delete a session and everything that belongs to it in one transaction.
    /// Returns false when the session did not exist.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn delete(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM messages WHERE session_id = ?1", [id.as_str()])?;
            tx.execute("DELETE FROM agent_notes WHERE session_id = ?1", [id.as_str()])?;
            tx.execute("DELETE FROM agents WHERE session_id = ?1", [id.as_str()])?;
            let removed = tx.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    #[instrument(skip(self))]
    pub fn stats(&self) -> Result<SessionStats, StoreError> {
        self.db.with_conn(|conn| {
            let mut stats = SessionStats::default();
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM sessions GROUP BY status")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let raw: String = row_helpers::get(row, 0, "sessions", "status")?;
                let count: i64 = row_helpers::get(row, 1, "sessions", "status")?;
                let count = count.max(0) as u64;
                stats.total_sessions += count;
                match row_helpers::parse_enum(&raw, "sessions", "status")? {
                    SessionStatus::Active => stats.active = count,
                    SessionStatus::Completed => stats.completed = count,
                    SessionStatus::Failed => stats.failed = count,
                    SessionStatus::Stopped => stats.stopped = count,
                }
            }
            let messages: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))?;
            stats.total_messages = messages.max(0) as u64;
            Ok(stats)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<AgenticSession, StoreError> {
    let status_str: String = row_helpers::get(row, 4, "sessions", "status")?;

    Ok(AgenticSession {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        created_at: row_helpers::get_time(row, 1, "sessions", "created_at")?,
        ended_at: row_helpers::get_time_opt(row, 2, "sessions", "ended_at")?,
        prompt: row_helpers::get(row, 3, "sessions", "prompt")?,
        status: row_helpers::parse_enum(&status_str, "sessions", "status")?,
        agents: Vec::new(),
        max_turns: row_helpers::get(row, 5, "sessions", "max_turns")?,
        turn: row_helpers::get(row, 6, "sessions", "turn")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageRepo;
    use crate::notes::NoteRepo;
    use relay_core::agent::{AgentConfig, AgentState};
    use relay_core::messages::{AgentNote, Message};

    fn setup() -> (Database, SessionRepo) {
        let db = Database::in_memory().unwrap();
        let repo = SessionRepo::new(db.clone());
        (db, repo)
    }

    fn seed(db: &Database, session: &SessionId) {
        let agents = AgentRepo::new(db.clone());
        agents
            .add(session, &AgentState::from_config(&AgentConfig::new("ada.security", "claude")))
            .unwrap();
        let messages = MessageRepo::new(db.clone());
        messages
            .append(&Message::new(session.clone(), "user", "ada.security", "review", 0))
            .unwrap();
        messages
            .append(&Message::new(session.clone(), "ada.security", "user", "done", 3))
            .unwrap();
        NoteRepo::new(db.clone())
            .append(&AgentNote {
                id: None,
                session_id: session.clone(),
                agent: "ada.security".into(),
                content: "thinking".into(),
                timestamp: Utc::now(),
                turn: 1,
            })
            .unwrap();
    }

    #[test]
    fn create_session() {
        let (_db, repo) = setup();
        let session = repo.create("Review auth.py", 5).unwrap();
        assert!(session.id.as_str().starts_with("sess_"));
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.max_turns, 5);
        assert_eq!(session.turn, 0);
    }

    #[test]
    fn get_derives_turn_and_agents() {
        let (db, repo) = setup();
        let session = repo.create("p", 10).unwrap();
        seed(&db, &session.id);

        let fetched = repo.get(&session.id).unwrap();
        assert_eq!(fetched.turn, 3);
        assert_eq!(fetched.agents.len(), 1);
        assert_eq!(fetched.agents[0].name, "ada.security");
        assert_eq!(fetched.prompt, "p");
    }

    #[test]
    fn turn_counts_rounds_with_only_notes() {
        let (db, repo) = setup();
        let session = repo.create("p", 10).unwrap();
        let notes = NoteRepo::new(db.clone());
        for turn in 1..=2 {
            notes
                .append(&AgentNote {
                    id: None,
                    session_id: session.id.clone(),
                    agent: "ada.security".into(),
                    content: "thinking".into(),
                    timestamp: Utc::now(),
                    turn,
                })
                .unwrap();
        }
        assert_eq!(repo.get(&session.id).unwrap().turn, 2);
    }

    #[test]
    fn end_records_rounds_that_left_no_rows() {
        let (db, repo) = setup();
        let session = repo.create("p", 10).unwrap();
        seed(&db, &session.id);

        repo.end(&session.id, SessionStatus::Completed, 5).unwrap();
        assert_eq!(repo.get(&session.id).unwrap().turn, 5);

        // A lower recorded round never hides later transcript rows.
        let other = repo.create("q", 10).unwrap();
        seed(&db, &other.id);
        repo.end(&other.id, SessionStatus::Stopped, 1).unwrap();
        assert_eq!(repo.get(&other.id).unwrap().turn, 3);
    }

    #[test]
    fn create_with_agents_writes_roster() {
        let (_db, repo) = setup();
        let roster = vec![
            AgentState::from_config(&AgentConfig::new("ada.security", "claude")),
            AgentState::from_config(&AgentConfig::new("kai.perf", "ollama")),
        ];
        let session = repo.create_with_agents("p", 5, &roster).unwrap();
        assert_eq!(session.agents.len(), 2);

        let fetched = repo.get(&session.id).unwrap();
        let names: Vec<_> = fetched.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["ada.security", "kai.perf"]);
    }

    #[test]
    fn create_with_rejected_agent_leaves_nothing_behind() {
        let (db, repo) = setup();
        let agent = AgentState::from_config(&AgentConfig::new("ada.security", "claude"));
        let result = repo.create_with_agents("p", 5, &[agent.clone(), agent]);
        assert!(matches!(result, Err(StoreError::Conflict(_))));

        assert!(repo.list().unwrap().is_empty());
        let agents: i64 = db
            .with_conn(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM agents", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(agents, 0);
    }

    #[test]
    fn get_nonexistent_fails() {
        let (_db, repo) = setup();
        let result = repo.get(&SessionId::from_raw("sess_nonexistent"));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn list_newest_first() {
        let (_db, repo) = setup();
        let first = repo.create("one", 5).unwrap();
        let second = repo.create("two", 5).unwrap();
        let all = repo.list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
    }

    #[test]
    fn end_sets_status_and_time() {
        let (_db, repo) = setup();
        let session = repo.create("p", 5).unwrap();
        repo.end(&session.id, SessionStatus::Stopped, 0).unwrap();
        let fetched = repo.get(&session.id).unwrap();
        assert_eq!(fetched.status, SessionStatus::Stopped);
        assert!(fetched.ended_at.is_some());
    }

    #[test]
    fn end_unknown_session_is_not_found() {
        let (_db, repo) = setup();
        let result = repo.end(&SessionId::from_raw("sess_missing"), SessionStatus::Failed, 0);
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn delete_cascades_and_spares_other_sessions() {
        let (db, repo) = setup();
        let doomed = repo.create("doomed", 5).unwrap();
        let kept = repo.create("kept", 5).unwrap();
        seed(&db, &doomed.id);
        seed(&db, &kept.id);

        assert!(repo.delete(&doomed.id).unwrap());
        assert!(!repo.delete(&doomed.id).unwrap());

        let counts = |id: &SessionId| -> (i64, i64, i64, i64) {
            db.with_conn(|conn| {
                let q = |sql: &str| -> Result<i64, StoreError> {
                    Ok(conn.query_row(sql, [id.as_str()], |r| r.get(0))?)
                };
                Ok((
                    q("SELECT COUNT(*) FROM sessions WHERE id = ?1")?,
                    q("SELECT COUNT(*) FROM agents WHERE session_id = ?1")?,
                    q("SELECT COUNT(*) FROM messages WHERE session_id = ?1")?,
                    q("SELECT COUNT(*) FROM agent_notes WHERE session_id = ?1")?,
                ))
            })
            .unwrap()
        };
        assert_eq!(counts(&doomed.id), (0, 0, 0, 0));
        assert_eq!(counts(&kept.id), (1, 1, 2, 1));
    }

    #[test]
    fn stats_count_by_status() {
        let (db, repo) = setup();
        let a = repo.create("a", 5).unwrap();
        let b = repo.create("b", 5).unwrap();
        repo.create("c", 5).unwrap();
        repo.end(&a.id, SessionStatus::Completed, 3).unwrap();
        repo.end(&b.id, SessionStatus::Failed, 1).unwrap();
        seed(&db, &a.id);

        let stats = repo.stats().unwrap();
        assert_eq!(stats.total_sessions, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.stopped, 0);
        assert_eq!(stats.total_messages, 2);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["totalSessions"], 3);
        assert_eq!(json["totalMessages"], 2);
    }
}
