use tracing::instrument;

use relay_core::ids::SessionId;
use relay_core::messages::Message;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message. Atomically:
    /// 1. Inserts the row
    /// 2. Increments the sender's message_count
    ///
    /// Either both happen or neither does.
    #[instrument(skip(self, message), fields(session_id = %message.session_id, from = %message.from, to = %message.to, turn = message.turn))]
    pub fn append(&self, message: &Message) -> Result<Message, StoreError> {
        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "INSERT INTO messages (session_id, from_agent, to_agent, content, timestamp, turn)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    message.session_id.as_str(),
                    message.from,
                    message.to,
                    message.content,
                    message.timestamp.to_rfc3339(),
                    message.turn,
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.execute(
                "UPDATE agents SET message_count = message_count + 1
                 WHERE session_id = ?1 AND name = ?2",
                rusqlite::params![message.session_id.as_str(), message.from],
            )?;
            tx.commit()?;

            Ok(Message {
                id: Some(id),
                ..message.clone()
            })
        })
    }

    /// Full transcript in replay order `(turn, id)`.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn transcript(&self, session_id: &SessionId) -> Result<Vec<Message>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, session_id, from_agent, to_agent, content, timestamp, turn
                 FROM messages WHERE session_id = ?1 ORDER BY turn ASC, id ASC",
            )?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn count(&self, session_id: &SessionId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, StoreError> {
    Ok(Message {
        id: Some(row_helpers::get(row, 0, "messages", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, "messages", "session_id")?),
        from: row_helpers::get(row, 2, "messages", "from_agent")?,
        to: row_helpers::get(row, 3, "messages", "to_agent")?,
        content: row_helpers::get(row, 4, "messages", "content")?,
        timestamp: row_helpers::get_time(row, 5, "messages", "timestamp")?,
        turn: row_helpers::get(row, 6, "messages", "turn")?,
    })
}
