//! The event store proper.
//!
//! One SQLite connection behind a mutex. Sequence numbers are assigned as
//! `MAX(sequence) + 1` inside the same locked section as the insert, so
//! per-session sequences are dense and appends never interleave. The parent
//! chain is the authoritative structure; sequence is a performance aid.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use sb_domain::config::StorageConfig;
use sb_domain::event::{DeleteMode, Event, EventBody, EventType};
use sb_domain::session::{SessionInfo, SessionStats};

use crate::error::{Result, StoreError};
use crate::schema;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Input to [`EventStore::create_session`].
#[derive(Debug, Clone)]
pub struct NewSession {
    pub workspace_id: String,
    pub working_directory: String,
    pub model: String,
    pub title: Option<String>,
}

/// Input to [`EventStore::append`].
#[derive(Debug, Clone)]
pub struct AppendEvent {
    pub session_id: String,
    pub body: EventBody,
    /// `None` parents the event onto the session's current tip.
    pub parent_id: Option<Uuid>,
}

/// Filters for [`EventStore::get_events_by_session`].
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub types: Option<Vec<EventType>>,
    pub limit: Option<usize>,
    /// Only events strictly before this one (by sequence).
    pub before_event_id: Option<Uuid>,
}

/// Delta query for clients catching up ([`EventStore::get_events_since`]).
#[derive(Debug, Clone, Default)]
pub struct SinceQuery {
    pub session_id: Option<String>,
    pub workspace_id: Option<String>,
    /// Only events appended after this one (global append order).
    pub after_event_id: Option<Uuid>,
    pub after_timestamp: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct EventStore {
    conn: Mutex<Connection>,
    verify_checksums: bool,
}

impl EventStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::with_connection(conn, false)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, false)
    }

    /// Build the store from config: on-disk when a path is set, in-memory
    /// otherwise.
    pub fn from_config(cfg: &StorageConfig) -> Result<Self> {
        let conn = match &cfg.db_path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        Self::with_connection(conn, cfg.verify_checksums)
    }

    fn with_connection(conn: Connection, verify_checksums: bool) -> Result<Self> {
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            verify_checksums,
        })
    }

    // ── Sessions ──────────────────────────────────────────────────

    /// Allocate a session, write its `session.start` root event, and return
    /// both. Atomic: either both rows land or neither.
    pub fn create_session(&self, new: NewSession) -> Result<(SessionInfo, Event)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let now = Utc::now();
        let session = SessionInfo {
            id: Uuid::new_v4().to_string(),
            workspace_id: new.workspace_id.clone(),
            working_directory: new.working_directory.clone(),
            model: new.model.clone(),
            created_at: now,
            last_activity: now,
            parent_session_id: None,
            is_active: true,
            is_archived: false,
            title: new.title.clone(),
        };
        insert_session(&tx, &session)?;

        let root = append_in_tx(
            &tx,
            &session.id,
            &session.workspace_id,
            EventBody::SessionStart {
                workspace_id: new.workspace_id,
                working_directory: new.working_directory,
                model: new.model,
                title: new.title,
            },
            None,
            false,
        )?;

        tx.commit()?;
        tracing::info!(session_id = %session.id, "session created");
        Ok((session, root))
    }

    pub fn get_session(&self, id: &str) -> Result<SessionInfo> {
        let conn = self.conn.lock();
        query_session(&conn, id)?.ok_or_else(|| StoreError::SessionNotFound(id.to_owned()))
    }

    pub fn list_sessions(
        &self,
        workspace_id: Option<&str>,
        include_archived: bool,
    ) -> Result<Vec<SessionInfo>> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, workspace_id, working_directory, model, created_at, last_activity, \
             parent_session_id, is_active, is_archived, title FROM sessions WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(ws) = workspace_id {
            sql.push_str(" AND workspace_id = ?");
            args.push(Box::new(ws.to_owned()));
        }
        if !include_archived {
            sql.push_str(" AND is_archived = 0");
        }
        sql.push_str(" ORDER BY last_activity DESC");

        let mut stmt = conn.prepare(&sql)?;
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = stmt
            .query_map(arg_refs.as_slice(), session_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(session_info_from_raw).collect()
    }

    /// Derived counters, projected from the log. Deleted messages are hidden.
    pub fn session_stats(&self, id: &str) -> Result<SessionStats> {
        let conn = self.conn.lock();
        if query_session(&conn, id)?.is_none() {
            return Err(StoreError::SessionNotFound(id.to_owned()));
        }

        let message_count: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM events
            WHERE session_id = ?1
              AND type IN ('message.user', 'message.assistant', 'message.system')
              AND id NOT IN (
                SELECT json_extract(payload, '$.target_event_id') FROM events
                WHERE session_id = ?1 AND type = 'message.deleted'
              )
            "#,
            [id],
            |row| row.get(0),
        )?;

        let (input_tokens, output_tokens): (i64, i64) = conn.query_row(
            r#"
            SELECT
              COALESCE(SUM(json_extract(payload, '$.usage.input_tokens')), 0),
              COALESCE(SUM(json_extract(payload, '$.usage.output_tokens')), 0)
            FROM events
            WHERE session_id = ?1 AND type = 'message.assistant'
            "#,
            [id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(SessionStats {
            message_count: message_count.max(0) as u64,
            input_tokens: input_tokens.max(0) as u64,
            output_tokens: output_tokens.max(0) as u64,
        })
    }

    pub fn set_model(&self, id: &str, model: &str) -> Result<()> {
        self.update_session_column(id, "model", model)
    }

    pub fn set_title(&self, id: &str, title: &str) -> Result<()> {
        self.update_session_column(id, "title", title)
    }

    pub fn set_archived(&self, id: &str, archived: bool) -> Result<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE sessions SET is_archived = ?2 WHERE id = ?1",
            params![id, archived],
        )?;
        if n == 0 {
            return Err(StoreError::SessionNotFound(id.to_owned()));
        }
        Ok(())
    }

    pub fn set_active(&self, id: &str, active: bool) -> Result<()> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "UPDATE sessions SET is_active = ?2 WHERE id = ?1",
            params![id, active],
        )?;
        if n == 0 {
            return Err(StoreError::SessionNotFound(id.to_owned()));
        }
        Ok(())
    }

    /// Remove a session row and its events. This is the one hard delete the
    /// store supports; everything else is append-only.
    pub fn delete_session(&self, id: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM events WHERE session_id = ?1", [id])?;
        let n = tx.execute("DELETE FROM sessions WHERE id = ?1", [id])?;
        if n == 0 {
            return Err(StoreError::SessionNotFound(id.to_owned()));
        }
        tx.commit()?;
        tracing::info!(session_id = %id, "session deleted");
        Ok(())
    }

    fn update_session_column(&self, id: &str, column: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock();
        let sql = format!("UPDATE sessions SET {column} = ?2 WHERE id = ?1");
        let n = conn.execute(&sql, params![id, value])?;
        if n == 0 {
            return Err(StoreError::SessionNotFound(id.to_owned()));
        }
        Ok(())
    }

    // ── Appends ───────────────────────────────────────────────────

    /// Append one event. Assigns id, sequence, timestamp, checksum.
    ///
    /// Transient storage failures are retried once before surfacing.
    pub fn append(&self, req: AppendEvent) -> Result<Event> {
        match self.append_once(&req) {
            Err(StoreError::Database(e)) if is_transient(&e) => {
                tracing::warn!(error = %e, "transient storage failure, retrying append");
                self.append_once(&req)
            }
            other => other,
        }
    }

    fn append_once(&self, req: &AppendEvent) -> Result<Event> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let session = query_session(&tx, &req.session_id)?
            .ok_or_else(|| StoreError::SessionNotFound(req.session_id.clone()))?;

        let event = append_in_tx(
            &tx,
            &session.id,
            &session.workspace_id,
            req.body.clone(),
            req.parent_id,
            req.parent_id.is_some(),
        )?;

        tx.commit()?;
        Ok(event)
    }

    // ── Queries ───────────────────────────────────────────────────

    pub fn get_event(&self, id: &Uuid) -> Result<Event> {
        let conn = self.conn.lock();
        let row = query_event(&conn, id)?
            .ok_or_else(|| StoreError::EventNotFound(id.to_string()))?;
        self.into_event(row)
    }

    /// Events for one session, ordered by sequence ascending.
    pub fn get_events_by_session(
        &self,
        session_id: &str,
        filter: &EventFilter,
    ) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        if query_session(&conn, session_id)?.is_none() {
            return Err(StoreError::SessionNotFound(session_id.to_owned()));
        }

        let mut sql = String::from(
            "SELECT id, parent_id, session_id, workspace_id, timestamp, sequence, payload, \
             checksum FROM events WHERE session_id = ?",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(session_id.to_owned())];

        if let Some(before) = &filter.before_event_id {
            let before_seq: Option<i64> = conn
                .query_row(
                    "SELECT sequence FROM events WHERE id = ?1 AND session_id = ?2",
                    params![before.to_string(), session_id],
                    |row| row.get(0),
                )
                .optional()?;
            let before_seq =
                before_seq.ok_or_else(|| StoreError::EventNotFound(before.to_string()))?;
            sql.push_str(" AND sequence < ?");
            args.push(Box::new(before_seq));
        }

        if let Some(types) = &filter.types {
            if !types.is_empty() {
                let placeholders = vec!["?"; types.len()].join(", ");
                sql.push_str(&format!(" AND type IN ({placeholders})"));
                for ty in types {
                    args.push(Box::new(ty.as_str().to_owned()));
                }
            }
        }

        sql.push_str(" ORDER BY sequence ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = stmt
            .query_map(arg_refs.as_slice(), event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| self.into_event(r)).collect()
    }

    /// Root-to-event path, chasing `parent_id`. Walks across fork boundaries
    /// into ancestor sessions.
    pub fn get_ancestors(&self, event_id: &Uuid) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut chain = Vec::new();
        let mut cursor = Some(*event_id);

        while let Some(id) = cursor {
            let row = query_event(&conn, &id)?
                .ok_or_else(|| StoreError::EventNotFound(id.to_string()))?;
            let event = self.into_event(row)?;
            cursor = event.parent_id;
            chain.push(event);
        }

        chain.reverse();
        Ok(chain)
    }

    /// Delta query for clients: events appended after a watermark, in global
    /// append order.
    pub fn get_events_since(&self, q: &SinceQuery) -> Result<Vec<Event>> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, parent_id, session_id, workspace_id, timestamp, sequence, payload, \
             checksum FROM events WHERE 1=1",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(session_id) = &q.session_id {
            sql.push_str(" AND session_id = ?");
            args.push(Box::new(session_id.clone()));
        }
        if let Some(workspace_id) = &q.workspace_id {
            sql.push_str(" AND workspace_id = ?");
            args.push(Box::new(workspace_id.clone()));
        }
        if let Some(after) = &q.after_event_id {
            let after_rowid: Option<i64> = conn
                .query_row(
                    "SELECT rowid FROM events WHERE id = ?1",
                    [after.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let after_rowid =
                after_rowid.ok_or_else(|| StoreError::EventNotFound(after.to_string()))?;
            sql.push_str(" AND rowid > ?");
            args.push(Box::new(after_rowid));
        }
        if let Some(ts) = &q.after_timestamp {
            sql.push_str(" AND timestamp > ?");
            args.push(Box::new(format_ts(ts)));
        }

        sql.push_str(" ORDER BY rowid ASC");
        if let Some(limit) = q.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = conn.prepare(&sql)?;
        let arg_refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(|a| a.as_ref()).collect();
        let rows = stmt
            .query_map(arg_refs.as_slice(), event_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(|r| self.into_event(r)).collect()
    }

    // ── Fork & delete ─────────────────────────────────────────────

    /// Create a new session rooted at an existing event. The new session's
    /// first event carries `parent_id = from_event_id`, so ancestor walks
    /// naturally cross the boundary into the origin session.
    pub fn fork(&self, from_event_id: &Uuid, name: Option<String>) -> Result<(SessionInfo, Event)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let fork_point = query_event(&tx, from_event_id)?
            .ok_or_else(|| StoreError::EventNotFound(from_event_id.to_string()))?;
        let source = query_session(&tx, &fork_point.session_id)?
            .ok_or_else(|| StoreError::SessionNotFound(fork_point.session_id.clone()))?;

        let now = Utc::now();
        let session = SessionInfo {
            id: Uuid::new_v4().to_string(),
            workspace_id: source.workspace_id.clone(),
            working_directory: source.working_directory.clone(),
            model: source.model.clone(),
            created_at: now,
            last_activity: now,
            parent_session_id: Some(source.id.clone()),
            is_active: true,
            is_archived: false,
            title: name.clone(),
        };
        insert_session(&tx, &session)?;

        let root = append_in_tx(
            &tx,
            &session.id,
            &session.workspace_id,
            EventBody::SessionFork {
                source_session_id: source.id.clone(),
                fork_event_id: *from_event_id,
                name,
            },
            Some(*from_event_id),
            // Fork roots point across sessions; existence was checked above.
            false,
        )?;

        tx.commit()?;
        tracing::info!(
            session_id = %session.id,
            source_session_id = %source.id,
            fork_event_id = %from_event_id,
            "session forked"
        );
        Ok((session, root))
    }

    /// Record a deletion marker for a message event. The target remains in
    /// the log; projections hide it.
    pub fn delete_message(&self, event_id: &Uuid, mode: DeleteMode) -> Result<Event> {
        let target = self.get_event(event_id)?;
        if !target.event_type().is_message() {
            return Err(StoreError::NotAMessage(event_id.to_string()));
        }
        self.append(AppendEvent {
            session_id: target.session_id.clone(),
            body: EventBody::MessageDeleted {
                target_event_id: *event_id,
                mode,
            },
            parent_id: None,
        })
    }

    // ── Row conversion ────────────────────────────────────────────

    fn into_event(&self, row: EventRow) -> Result<Event> {
        let body: EventBody = serde_json::from_str(&row.payload)?;

        if self.verify_checksums {
            if let Some(stored) = &row.checksum {
                let expected = compute_checksum(row.parent_id.as_deref(), &row.payload);
                if *stored != expected {
                    return Err(StoreError::ChecksumMismatch(row.id));
                }
            }
        }

        Ok(Event {
            id: parse_uuid(&row.id)?,
            parent_id: row.parent_id.as_deref().map(parse_uuid).transpose()?,
            session_id: row.session_id,
            workspace_id: row.workspace_id,
            timestamp: parse_ts(&row.timestamp)?,
            sequence: row.sequence,
            body,
            checksum: row.checksum,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Internal helpers (run under the connection lock)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct EventRow {
    id: String,
    parent_id: Option<String>,
    session_id: String,
    workspace_id: String,
    timestamp: String,
    sequence: i64,
    payload: String,
    checksum: Option<String>,
}

fn event_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        session_id: row.get(2)?,
        workspace_id: row.get(3)?,
        timestamp: row.get(4)?,
        sequence: row.get(5)?,
        payload: row.get(6)?,
        checksum: row.get(7)?,
    })
}

struct SessionRow {
    id: String,
    workspace_id: String,
    working_directory: String,
    model: String,
    created_at: String,
    last_activity: String,
    parent_session_id: Option<String>,
    is_active: bool,
    is_archived: bool,
    title: Option<String>,
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRow> {
    Ok(SessionRow {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        working_directory: row.get(2)?,
        model: row.get(3)?,
        created_at: row.get(4)?,
        last_activity: row.get(5)?,
        parent_session_id: row.get(6)?,
        is_active: row.get(7)?,
        is_archived: row.get(8)?,
        title: row.get(9)?,
    })
}

fn session_info_from_raw(row: SessionRow) -> Result<SessionInfo> {
    Ok(SessionInfo {
        id: row.id,
        workspace_id: row.workspace_id,
        working_directory: row.working_directory,
        model: row.model,
        created_at: parse_ts(&row.created_at)?,
        last_activity: parse_ts(&row.last_activity)?,
        parent_session_id: row.parent_session_id,
        is_active: row.is_active,
        is_archived: row.is_archived,
        title: row.title,
    })
}

fn query_session(conn: &Connection, id: &str) -> Result<Option<SessionInfo>> {
    let row = conn
        .query_row(
            "SELECT id, workspace_id, working_directory, model, created_at, last_activity, \
             parent_session_id, is_active, is_archived, title FROM sessions WHERE id = ?1",
            [id],
            session_from_row,
        )
        .optional()?;
    row.map(session_info_from_raw).transpose()
}

fn query_event(conn: &Connection, id: &Uuid) -> Result<Option<EventRow>> {
    let row = conn
        .query_row(
            "SELECT id, parent_id, session_id, workspace_id, timestamp, sequence, payload, \
             checksum FROM events WHERE id = ?1",
            [id.to_string()],
            event_from_row,
        )
        .optional()?;
    Ok(row)
}

fn insert_session(conn: &Connection, s: &SessionInfo) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO sessions (id, workspace_id, working_directory, model, created_at,
                              last_activity, parent_session_id, is_active, is_archived, title)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            s.id,
            s.workspace_id,
            s.working_directory,
            s.model,
            format_ts(&s.created_at),
            format_ts(&s.last_activity),
            s.parent_session_id,
            s.is_active,
            s.is_archived,
            s.title,
        ],
    )?;
    Ok(())
}

/// The one place events are written. Resolves the parent (explicit, or the
/// session tip), assigns the next dense sequence, computes the checksum, and
/// touches the session's `last_activity`.
fn append_in_tx(
    conn: &Connection,
    session_id: &str,
    workspace_id: &str,
    body: EventBody,
    parent_id: Option<Uuid>,
    validate_parent: bool,
) -> Result<Event> {
    let parent_id = match parent_id {
        Some(pid) => {
            if validate_parent && query_event(conn, &pid)?.is_none() {
                return Err(StoreError::EventNotFound(pid.to_string()));
            }
            Some(pid)
        }
        None => session_tip(conn, session_id)?,
    };

    let sequence: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sequence) + 1, 0) FROM events WHERE session_id = ?1",
        [session_id],
        |row| row.get(0),
    )?;

    let id = Uuid::now_v7();
    let timestamp = Utc::now();
    let payload = serde_json::to_string(&body)?;
    let parent_str = parent_id.map(|p| p.to_string());
    let checksum = compute_checksum(parent_str.as_deref(), &payload);

    conn.execute(
        r#"
        INSERT INTO events (id, parent_id, session_id, workspace_id, timestamp, type,
                            sequence, payload, checksum)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            id.to_string(),
            parent_str,
            session_id,
            workspace_id,
            format_ts(&timestamp),
            body.event_type().as_str(),
            sequence,
            payload,
            checksum,
        ],
    )?;

    conn.execute(
        "UPDATE sessions SET last_activity = ?2 WHERE id = ?1",
        params![session_id, format_ts(&timestamp)],
    )?;

    Ok(Event {
        id,
        parent_id,
        session_id: session_id.to_owned(),
        workspace_id: workspace_id.to_owned(),
        timestamp,
        sequence,
        body,
        checksum: Some(checksum),
    })
}

fn session_tip(conn: &Connection, session_id: &str) -> Result<Option<Uuid>> {
    let tip: Option<String> = conn
        .query_row(
            "SELECT id FROM events WHERE session_id = ?1 ORDER BY sequence DESC LIMIT 1",
            [session_id],
            |row| row.get(0),
        )
        .optional()?;
    tip.as_deref().map(parse_uuid).transpose()
}

fn compute_checksum(parent_id: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(pid) = parent_id {
        hasher.update(pid.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

fn is_transient(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {raw}: {e}")))
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt(format!("bad uuid {raw}: {e}")))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EventStore {
        EventStore::open_in_memory().unwrap()
    }

    fn new_session(store: &EventStore) -> (SessionInfo, Event) {
        store
            .create_session(NewSession {
                workspace_id: "ws1".into(),
                working_directory: "/tmp/work".into(),
                model: "anthropic/claude".into(),
                title: None,
            })
            .unwrap()
    }

    fn user_msg(store: &EventStore, session_id: &str, text: &str) -> Event {
        store
            .append(AppendEvent {
                session_id: session_id.into(),
                body: EventBody::MessageUser {
                    content: text.into(),
                },
                parent_id: None,
            })
            .unwrap()
    }

    #[test]
    fn create_session_writes_root_event() {
        let store = store();
        let (session, root) = new_session(&store);
        assert_eq!(root.sequence, 0);
        assert!(root.parent_id.is_none());
        assert_eq!(root.event_type(), EventType::SessionStart);
        assert_eq!(root.session_id, session.id);
    }

    #[test]
    fn sequences_are_dense_and_increasing() {
        let store = store();
        let (session, _) = new_session(&store);
        for i in 0..5 {
            let ev = user_msg(&store, &session.id, &format!("msg {i}"));
            assert_eq!(ev.sequence, i + 1);
        }
        let events = store
            .get_events_by_session(&session.id, &EventFilter::default())
            .unwrap();
        let seqs: Vec<i64> = events.iter().map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn default_parent_is_session_tip() {
        let store = store();
        let (session, root) = new_session(&store);
        let first = user_msg(&store, &session.id, "one");
        assert_eq!(first.parent_id, Some(root.id));
        let second = user_msg(&store, &session.id, "two");
        assert_eq!(second.parent_id, Some(first.id));
    }

    #[test]
    fn explicit_unknown_parent_is_rejected() {
        let store = store();
        let (session, _) = new_session(&store);
        let err = store
            .append(AppendEvent {
                session_id: session.id,
                body: EventBody::MessageUser { content: "x".into() },
                parent_id: Some(Uuid::now_v7()),
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::EventNotFound(_)));
    }

    #[test]
    fn append_to_unknown_session_is_rejected() {
        let store = store();
        let err = store
            .append(AppendEvent {
                session_id: "nope".into(),
                body: EventBody::MessageUser { content: "x".into() },
                parent_id: None,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::SessionNotFound(_)));
    }

    #[test]
    fn type_filter_and_limit() {
        let store = store();
        let (session, _) = new_session(&store);
        user_msg(&store, &session.id, "a");
        store
            .append(AppendEvent {
                session_id: session.id.clone(),
                body: EventBody::StreamTextDelta { text: "d".into() },
                parent_id: None,
            })
            .unwrap();
        user_msg(&store, &session.id, "b");

        let filter = EventFilter {
            types: Some(vec![EventType::MessageUser]),
            limit: Some(1),
            before_event_id: None,
        };
        let events = store.get_events_by_session(&session.id, &filter).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), EventType::MessageUser);
    }

    #[test]
    fn ancestors_walk_root_to_event() {
        let store = store();
        let (session, root) = new_session(&store);
        user_msg(&store, &session.id, "one");
        let last = user_msg(&store, &session.id, "two");

        let chain = store.get_ancestors(&last.id).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0].id, root.id);
        assert_eq!(chain[2].id, last.id);
    }

    #[test]
    fn fork_crosses_session_boundary_in_ancestors() {
        let store = store();
        let (parent, _) = new_session(&store);
        let pivot = user_msg(&store, &parent.id, "fork here");

        let (forked, fork_root) = store.fork(&pivot.id, Some("branch".into())).unwrap();
        assert_eq!(forked.parent_session_id.as_deref(), Some(parent.id.as_str()));
        assert_eq!(fork_root.parent_id, Some(pivot.id));
        assert_eq!(fork_root.sequence, 0);

        // Ancestors of the fork root include the parent session's chain.
        let chain = store.get_ancestors(&fork_root.id).unwrap();
        assert_eq!(chain.last().unwrap().id, fork_root.id);
        assert!(chain.iter().any(|e| e.id == pivot.id));
        assert!(chain.iter().any(|e| e.session_id == parent.id));
    }

    #[test]
    fn events_after_fork_do_not_leak_into_fork_ancestry() {
        let store = store();
        let (parent, _) = new_session(&store);
        let pivot = user_msg(&store, &parent.id, "pivot");
        let (_forked, fork_root) = store.fork(&pivot.id, None).unwrap();

        // New activity in the parent after the fork.
        let late = user_msg(&store, &parent.id, "later");

        let chain = store.get_ancestors(&fork_root.id).unwrap();
        assert!(!chain.iter().any(|e| e.id == late.id));
    }

    #[test]
    fn fork_of_unknown_event_fails() {
        let store = store();
        let err = store.fork(&Uuid::now_v7(), None).unwrap_err();
        assert!(matches!(err, StoreError::EventNotFound(_)));
    }

    #[test]
    fn delete_message_appends_marker_and_hides_from_stats() {
        let store = store();
        let (session, _) = new_session(&store);
        let msg = user_msg(&store, &session.id, "oops");
        user_msg(&store, &session.id, "keep");

        let before = store.session_stats(&session.id).unwrap();
        assert_eq!(before.message_count, 2);

        let marker = store.delete_message(&msg.id, DeleteMode::Soft).unwrap();
        assert_eq!(marker.event_type(), EventType::MessageDeleted);

        // Target remains in the log.
        assert!(store.get_event(&msg.id).is_ok());

        let after = store.session_stats(&session.id).unwrap();
        assert_eq!(after.message_count, 1);
    }

    #[test]
    fn delete_rejects_non_message_events() {
        let store = store();
        let (session, root) = new_session(&store);
        let _ = session;
        let err = store.delete_message(&root.id, DeleteMode::Soft).unwrap_err();
        assert!(matches!(err, StoreError::NotAMessage(_)));
    }

    #[test]
    fn events_since_watermark() {
        let store = store();
        let (session, _) = new_session(&store);
        let first = user_msg(&store, &session.id, "one");
        let second = user_msg(&store, &session.id, "two");

        let delta = store
            .get_events_since(&SinceQuery {
                session_id: Some(session.id.clone()),
                after_event_id: Some(first.id),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(delta.len(), 1);
        assert_eq!(delta[0].id, second.id);
    }

    #[test]
    fn events_since_by_workspace() {
        let store = store();
        let (a, _) = new_session(&store);
        let (b, _) = new_session(&store);
        user_msg(&store, &a.id, "in a");
        user_msg(&store, &b.id, "in b");

        let delta = store
            .get_events_since(&SinceQuery {
                workspace_id: Some("ws1".into()),
                ..Default::default()
            })
            .unwrap();
        // Both session roots plus both messages.
        assert_eq!(delta.len(), 4);
    }

    #[test]
    fn session_stats_sums_assistant_usage() {
        let store = store();
        let (session, _) = new_session(&store);
        store
            .append(AppendEvent {
                session_id: session.id.clone(),
                body: EventBody::MessageAssistant {
                    blocks: vec![],
                    usage: sb_domain::RawUsage {
                        input_tokens: 100,
                        output_tokens: 20,
                        ..Default::default()
                    },
                    stop_reason: sb_domain::StopReason::EndTurn,
                },
                parent_id: None,
            })
            .unwrap();

        let stats = store.session_stats(&session.id).unwrap();
        assert_eq!(stats.input_tokens, 100);
        assert_eq!(stats.output_tokens, 20);
    }

    #[test]
    fn checksum_verification_detects_tampering() {
        let store = EventStore::from_config(&StorageConfig {
            db_path: None,
            verify_checksums: true,
        })
        .unwrap();
        let (session, _) = store
            .create_session(NewSession {
                workspace_id: "ws1".into(),
                working_directory: "/w".into(),
                model: "m".into(),
                title: None,
            })
            .unwrap();
        let ev = store
            .append(AppendEvent {
                session_id: session.id.clone(),
                body: EventBody::MessageUser { content: "real".into() },
                parent_id: None,
            })
            .unwrap();

        // Clean read passes verification.
        assert!(store.get_event(&ev.id).is_ok());

        // Tamper with the payload behind the store's back.
        {
            let conn = store.conn.lock();
            conn.execute(
                "UPDATE events SET payload = ?2 WHERE id = ?1",
                params![
                    ev.id.to_string(),
                    r#"{"type":"message.user","content":"forged"}"#
                ],
            )
            .unwrap();
        }
        let err = store.get_event(&ev.id).unwrap_err();
        assert!(matches!(err, StoreError::ChecksumMismatch(_)));
    }

    #[test]
    fn archive_and_list() {
        let store = store();
        let (a, _) = new_session(&store);
        let (b, _) = new_session(&store);
        store.set_archived(&a.id, true).unwrap();

        let visible = store.list_sessions(Some("ws1"), false).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, b.id);

        let all = store.list_sessions(Some("ws1"), true).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn delete_session_removes_events() {
        let store = store();
        let (session, root) = new_session(&store);
        user_msg(&store, &session.id, "gone");

        store.delete_session(&session.id).unwrap();
        assert!(matches!(
            store.get_session(&session.id).unwrap_err(),
            StoreError::SessionNotFound(_)
        ));
        assert!(matches!(
            store.get_event(&root.id).unwrap_err(),
            StoreError::EventNotFound(_)
        ));
    }

    #[test]
    fn on_disk_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");

        let session_id = {
            let store = EventStore::open(&path).unwrap();
            let (session, _) = store
                .create_session(NewSession {
                    workspace_id: "ws1".into(),
                    working_directory: "/w".into(),
                    model: "m".into(),
                    title: None,
                })
                .unwrap();
            user_msg(&store, &session.id, "persisted");
            session.id
        };

        let reopened = EventStore::open(&path).unwrap();
        let events = reopened
            .get_events_by_session(&session_id, &EventFilter::default())
            .unwrap();
        assert_eq!(events.len(), 2);
    }
}
