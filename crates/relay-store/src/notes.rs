use tracing::instrument;

use relay_core::ids::SessionId;
use relay_core::messages::AgentNote;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Private agent commentary. Never routed, never counted as messages.
pub struct NoteRepo {
    db: Database,
}

impl NoteRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, note), fields(session_id = %note.session_id, agent = %note.agent, turn = note.turn))]
    pub fn append(&self, note: &AgentNote) -> Result<AgentNote, StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO agent_notes (session_id, agent, content, turn, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    note.session_id.as_str(),
                    note.agent,
                    note.content,
                    note.turn,
                    note.timestamp.to_rfc3339(),
                ],
            )?;
            Ok(AgentNote {
                id: Some(conn.last_insert_rowid()),
                ..note.clone()
            })
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list(&self, session_id: &SessionId) -> Result<Vec<AgentNote>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, agent, content, turn, timestamp
                 FROM agent_notes WHERE session_id = ?1 ORDER BY turn ASC, id ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(AgentNote {
                    id: Some(row_helpers::get(row, 0, "agent_notes", "id")?),
                    session_id: SessionId::from_raw(row_helpers::get::<String>(
                        row,
                        1,
                        "agent_notes",
                        "session_id",
                    )?),
                    agent: row_helpers::get(row, 2, "agent_notes", "agent")?,
                    content: row_helpers::get(row, 3, "agent_notes", "content")?,
                    turn: row_helpers::get(row, 4, "agent_notes", "turn")?,
                    timestamp: row_helpers::get_time(row, 5, "agent_notes", "timestamp")?,
                });
            }
            Ok(results)
        })
    }
}
