/// SQL DDL for the transcript store.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 3;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    ended_at TEXT,
    prompt TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    max_turns INTEGER NOT NULL DEFAULT 20,
    turn INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS agents (
    session_id TEXT NOT NULL REFERENCES sessions(id),
    name TEXT NOT NULL,
    backend TEXT NOT NULL,
    model TEXT,
    backend_session_id TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    message_count INTEGER NOT NULL DEFAULT 0,
    last_seen TEXT,
    PRIMARY KEY (session_id, name)
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    from_agent TEXT NOT NULL,
    to_agent TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    turn INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS agent_notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    agent TEXT NOT NULL,
    content TEXT NOT NULL,
    turn INTEGER NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session_turn ON messages(session_id, turn);
CREATE INDEX IF NOT EXISTS idx_messages_session_to ON messages(session_id, to_agent);
CREATE INDEX IF NOT EXISTS idx_notes_session ON agent_notes(session_id, turn);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

/// Columns added after the first schema release: (table, column, definition).
/// Applied only when missing, so reopening any database is safe.
pub const COLUMN_MIGRATIONS: &[(&str, &str, &str)] = &[
    ("sessions", "max_turns", "INTEGER NOT NULL DEFAULT 20"),
    ("sessions", "turn", "INTEGER NOT NULL DEFAULT 0"),
];

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
