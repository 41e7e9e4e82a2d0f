use rusqlite::Connection;

use crate::Result;

/// Schema version (increment when changing table definitions).
pub const SCHEMA_VERSION: i32 = 1;

pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version != 0 && current_version != SCHEMA_VERSION {
        drop_all_tables(conn)?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            working_directory TEXT NOT NULL,
            model TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_activity TEXT NOT NULL,
            parent_session_id TEXT,
            is_active BOOLEAN NOT NULL DEFAULT 1,
            is_archived BOOLEAN NOT NULL DEFAULT 0,
            title TEXT
        );

        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            parent_id TEXT,
            session_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            type TEXT NOT NULL,
            sequence INTEGER NOT NULL,
            payload TEXT NOT NULL,
            checksum TEXT,
            FOREIGN KEY (session_id) REFERENCES sessions(id)
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_events_session_seq
            ON events(session_id, sequence);
        CREATE INDEX IF NOT EXISTS idx_events_workspace_ts
            ON events(workspace_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_events_type
            ON events(session_id, type);
        CREATE INDEX IF NOT EXISTS idx_sessions_workspace
            ON sessions(workspace_id);
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}

fn drop_all_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS events;
        DROP TABLE IF EXISTS sessions;
        "#,
    )?;
    Ok(())
}
