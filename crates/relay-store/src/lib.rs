pub mod agents;
pub mod database;
pub mod error;
pub mod messages;
pub mod notes;
pub mod row_helpers;
pub mod schema;
pub mod sessions;

pub use agents::{AgentRepo, AgentUpdate};
pub use database::Database;
pub use error::StoreError;
pub use messages::MessageRepo;
pub use notes::NoteRepo;
pub use sessions::{SessionRepo, SessionStats};
