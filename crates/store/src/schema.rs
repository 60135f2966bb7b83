//! Schema definition and additive migrations.
//!
//! Schema creation is idempotent (`CREATE TABLE IF NOT EXISTS`); the
//! migration list is applied on every boot with "duplicate column" treated
//! as already-applied.

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL UNIQUE,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    cwd TEXT,
    parent_session_id TEXT,
    event_count INTEGER NOT NULL DEFAULT 0,
    alert_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active'
);

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    hook_type TEXT NOT NULL,
    tool_name TEXT,
    tool_input TEXT,
    tool_result TEXT,
    category TEXT NOT NULL DEFAULT 'unknown',
    severity TEXT NOT NULL DEFAULT 'info',
    file_paths TEXT,
    commands TEXT,
    urls TEXT,
    ip_addresses TEXT,
    processed INTEGER NOT NULL DEFAULT 0,
    enriched INTEGER NOT NULL DEFAULT 0,
    raw_payload TEXT,
    FOREIGN KEY (session_id) REFERENCES sessions(session_id)
);

CREATE TABLE IF NOT EXISTS policies (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    enabled INTEGER NOT NULL DEFAULT 1,
    categories TEXT,
    tools TEXT,
    conditions TEXT,
    condition_logic TEXT NOT NULL DEFAULT 'all',
    action TEXT NOT NULL DEFAULT 'alert',
    severity TEXT NOT NULL DEFAULT 'medium',
    alert_title TEXT,
    alert_description TEXT,
    tags TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    severity TEXT NOT NULL DEFAULT 'medium',
    category TEXT NOT NULL DEFAULT 'unknown',
    status TEXT NOT NULL DEFAULT 'new',
    assigned_to TEXT,
    policy_id TEXT,
    event_ids TEXT,
    evidence TEXT,
    action_taken TEXT,
    blocked INTEGER NOT NULL DEFAULT 0,
    tags TEXT,
    metadata TEXT,
    FOREIGN KEY (session_id) REFERENCES sessions(session_id),
    FOREIGN KEY (policy_id) REFERENCES policies(id)
);

CREATE TABLE IF NOT EXISTS graph_nodes (
    id TEXT PRIMARY KEY,
    node_type TEXT NOT NULL,
    label TEXT NOT NULL,
    value TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    access_count INTEGER NOT NULL DEFAULT 1,
    alert_count INTEGER NOT NULL DEFAULT 0,
    session_ids TEXT,
    event_ids TEXT,
    size REAL NOT NULL DEFAULT 1.0,
    color TEXT,
    metadata TEXT,
    UNIQUE(node_type, value)
);

CREATE TABLE IF NOT EXISTS graph_edges (
    id TEXT PRIMARY KEY,
    source_id TEXT NOT NULL,
    target_id TEXT NOT NULL,
    relation TEXT NOT NULL,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    count INTEGER NOT NULL DEFAULT 1,
    session_ids TEXT,
    event_ids TEXT,
    weight REAL NOT NULL DEFAULT 1.0,
    color TEXT,
    metadata TEXT,
    UNIQUE(source_id, target_id, relation)
);

CREATE INDEX IF NOT EXISTS idx_sessions_session_id ON sessions(session_id);
CREATE INDEX IF NOT EXISTS idx_sessions_started_at ON sessions(started_at);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
CREATE INDEX IF NOT EXISTS idx_sessions_parent ON sessions(parent_session_id);

CREATE INDEX IF NOT EXISTS idx_events_session_id ON events(session_id);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_hook_type ON events(hook_type);
CREATE INDEX IF NOT EXISTS idx_events_tool_name ON events(tool_name);
CREATE INDEX IF NOT EXISTS idx_events_category ON events(category);
CREATE INDEX IF NOT EXISTS idx_events_severity ON events(severity);
CREATE INDEX IF NOT EXISTS idx_events_processed ON events(processed);

CREATE INDEX IF NOT EXISTS idx_alerts_session_id ON alerts(session_id);
CREATE INDEX IF NOT EXISTS idx_alerts_created_at ON alerts(created_at);
CREATE INDEX IF NOT EXISTS idx_alerts_severity ON alerts(severity);
CREATE INDEX IF NOT EXISTS idx_alerts_status ON alerts(status);
CREATE INDEX IF NOT EXISTS idx_alerts_policy_id ON alerts(policy_id);

CREATE INDEX IF NOT EXISTS idx_policies_name ON policies(name);
CREATE INDEX IF NOT EXISTS idx_policies_enabled ON policies(enabled);

CREATE INDEX IF NOT EXISTS idx_graph_nodes_identity ON graph_nodes(node_type, value);
CREATE INDEX IF NOT EXISTS idx_graph_edges_identity ON graph_edges(source_id, target_id, relation);
"#;

/// Additive column migrations. Each is guarded so "duplicate column name"
/// from an already-migrated database is not an error.
const MIGRATIONS: &[&str] = &[
    "ALTER TABLE sessions ADD COLUMN risk_score INTEGER DEFAULT 0",
    "ALTER TABLE sessions ADD COLUMN endpoint_hostname TEXT",
    "ALTER TABLE sessions ADD COLUMN endpoint_user TEXT",
    "ALTER TABLE sessions ADD COLUMN session_source TEXT",
];

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    run_migrations(conn);
    Ok(())
}

fn run_migrations(conn: &Connection) {
    for sql in MIGRATIONS {
        if let Err(err) = conn.execute(sql, []) {
            let message = err.to_string();
            if !message.contains("duplicate column name") {
                tracing::warn!(error = %message, sql, "schema migration failed");
            }
        }
    }
}
