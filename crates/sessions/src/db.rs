//! SQLite schema and row mapping.
//!
//! All functions here are synchronous and run on a blocking thread with
//! the store's connection locked. Timestamps are stored as Unix
//! milliseconds so a reload reproduces them exactly.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use ava_domain::error::{Error, Result};
use ava_domain::intent::IntentTag;
use ava_domain::session::{PermissionSet, Session};
use ava_domain::turn::{check_alternation, from_millis, NewTurn, Role, Turn};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id            TEXT PRIMARY KEY,
    owner_tag     TEXT NOT NULL,
    created_at    INTEGER NOT NULL,
    last_activity INTEGER NOT NULL,
    active        INTEGER NOT NULL DEFAULT 1,
    degraded      INTEGER NOT NULL DEFAULT 0,
    finalized_at  INTEGER,
    permissions   INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_sessions_activity ON sessions(active, last_activity);

CREATE TABLE IF NOT EXISTS turns (
    session_id     TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    turn_index     INTEGER NOT NULL,
    role           TEXT NOT NULL,
    tag            TEXT NOT NULL,
    text           TEXT NOT NULL,
    ref_turn_index INTEGER,
    ts             INTEGER NOT NULL,
    PRIMARY KEY (session_id, turn_index)
);
CREATE INDEX IF NOT EXISTS idx_turns_session_ts ON turns(session_id, ts);

CREATE TABLE IF NOT EXISTS preferences (
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    PRIMARY KEY (session_id, key)
);
";

const SESSION_COLUMNS: &str = "s.id, s.owner_tag, s.created_at, s.last_activity, s.active, \
     s.degraded, s.finalized_at, s.permissions, \
     (SELECT COUNT(*) FROM turns t WHERE t.session_id = s.id)";

pub(crate) fn db_err(e: rusqlite::Error) -> Error {
    Error::StoreUnavailable(e.to_string())
}

pub(crate) fn init(conn: &Connection) -> Result<()> {
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
        .map_err(db_err)?;
    conn.pragma_update(None, "synchronous", "FULL")
        .map_err(db_err)?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(db_err)?;
    conn.execute_batch(SCHEMA).map_err(db_err)?;
    Ok(())
}

// ── sessions ────────────────────────────────────────────────────────

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let finalized: Option<i64> = row.get(6)?;
    let packed: i64 = row.get(7)?;
    let count: i64 = row.get(8)?;
    Ok(Session {
        id: row.get(0)?,
        owner_tag: row.get(1)?,
        created_at: from_millis(row.get(2)?),
        last_activity: from_millis(row.get(3)?),
        active: row.get::<_, i64>(4)? != 0,
        degraded: row.get::<_, i64>(5)? != 0,
        finalized_at: finalized.map(from_millis),
        permissions: PermissionSet::unpack(packed as u8),
        turn_count: count as u64,
    })
}

pub(crate) fn get_session(conn: &Connection, id: &str) -> Result<Option<Session>> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions s WHERE s.id = ?1"),
        params![id],
        session_from_row,
    )
    .optional()
    .map_err(db_err)
}

fn require_session(conn: &Connection, id: &str) -> Result<Session> {
    get_session(conn, id)?.ok_or_else(|| Error::SessionMissing(id.to_owned()))
}

/// Returns the existing session or inserts a fresh one. The flag is true
/// when the session was created.
pub(crate) fn open_session(
    conn: &Connection,
    id: &str,
    owner_tag: &str,
    now: DateTime<Utc>,
) -> Result<(Session, bool)> {
    if let Some(existing) = get_session(conn, id)? {
        return Ok((existing, false));
    }
    let ms = now.timestamp_millis();
    conn.execute(
        "INSERT INTO sessions (id, owner_tag, created_at, last_activity, active, degraded, permissions)
         VALUES (?1, ?2, ?3, ?3, 1, 0, ?4)",
        params![id, owner_tag, ms, PermissionSet::default().pack() as i64],
    )
    .map_err(db_err)?;
    Ok((require_session(conn, id)?, true))
}

pub(crate) fn list_sessions(conn: &Connection, active_only: bool) -> Result<Vec<Session>> {
    let sql = if active_only {
        format!("SELECT {SESSION_COLUMNS} FROM sessions s WHERE s.active = 1 ORDER BY s.created_at")
    } else {
        format!("SELECT {SESSION_COLUMNS} FROM sessions s ORDER BY s.created_at")
    };
    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt.query_map([], session_from_row).map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

pub(crate) fn set_active(
    conn: &Connection,
    id: &str,
    active: bool,
    now: DateTime<Utc>,
) -> Result<Session> {
    let ms = now.timestamp_millis();
    let changed = if active {
        conn.execute(
            "UPDATE sessions SET active = 1, finalized_at = NULL, last_activity = ?2 WHERE id = ?1",
            params![id, ms],
        )
    } else {
        conn.execute(
            "UPDATE sessions SET active = 0, finalized_at = COALESCE(finalized_at, ?2) WHERE id = ?1",
            params![id, ms],
        )
    }
    .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::SessionMissing(id.to_owned()));
    }
    require_session(conn, id)
}

pub(crate) fn set_permissions(
    conn: &Connection,
    id: &str,
    permissions: PermissionSet,
) -> Result<Session> {
    let changed = conn
        .execute(
            "UPDATE sessions SET permissions = ?2 WHERE id = ?1",
            params![id, permissions.pack() as i64],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::SessionMissing(id.to_owned()));
    }
    require_session(conn, id)
}

pub(crate) fn set_degraded(conn: &Connection, id: &str, degraded: bool) -> Result<Session> {
    let changed = conn
        .execute(
            "UPDATE sessions SET degraded = ?2 WHERE id = ?1",
            params![id, degraded as i64],
        )
        .map_err(db_err)?;
    if changed == 0 {
        return Err(Error::SessionMissing(id.to_owned()));
    }
    require_session(conn, id)
}

/// Flips active sessions idle since before `cutoff` to inactive and
/// returns their ids.
pub(crate) fn expire_idle(
    conn: &mut Connection,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let tx = conn.transaction().map_err(db_err)?;
    let ids = {
        let mut stmt = tx
            .prepare("SELECT id FROM sessions WHERE active = 1 AND last_activity < ?1 ORDER BY last_activity")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![cutoff.timestamp_millis()], |r| r.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)?
    };
    for id in &ids {
        tx.execute(
            "UPDATE sessions SET active = 0, finalized_at = ?2 WHERE id = ?1",
            params![id, now.timestamp_millis()],
        )
        .map_err(db_err)?;
    }
    tx.commit().map_err(db_err)?;
    Ok(ids)
}

/// Deletes inactive sessions finalized before `cutoff`, with their turns
/// and preferences. Returns the removed ids.
pub(crate) fn purge(conn: &mut Connection, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
    let tx = conn.transaction().map_err(db_err)?;
    let ids = {
        let mut stmt = tx
            .prepare("SELECT id FROM sessions WHERE active = 0 AND finalized_at IS NOT NULL AND finalized_at < ?1")
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![cutoff.timestamp_millis()], |r| r.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)?
    };
    for id in &ids {
        tx.execute("DELETE FROM turns WHERE session_id = ?1", params![id])
            .map_err(db_err)?;
        tx.execute("DELETE FROM preferences WHERE session_id = ?1", params![id])
            .map_err(db_err)?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![id])
            .map_err(db_err)?;
    }
    tx.commit().map_err(db_err)?;
    Ok(ids)
}

// ── turns ───────────────────────────────────────────────────────────

fn turn_from_row(row: &Row<'_>) -> rusqlite::Result<Turn> {
    let role: String = row.get(1)?;
    let tag: String = row.get(2)?;
    let ref_index: Option<i64> = row.get(4)?;
    Ok(Turn {
        turn_index: row.get::<_, i64>(0)? as u64,
        role: Role::parse(&role).unwrap_or(Role::System),
        tag: IntentTag::parse(&tag).unwrap_or_default(),
        text: row.get(3)?,
        ref_turn_index: ref_index.map(|i| i as u64),
        ts: from_millis(row.get(5)?),
    })
}

/// Appends one turn inside a transaction, enforcing gap-free indices and
/// the user/assistant alternation rule.
pub(crate) fn append_turn(
    conn: &mut Connection,
    session_id: &str,
    turn: &NewTurn,
    now: DateTime<Utc>,
) -> Result<Turn> {
    let tx = conn.transaction().map_err(db_err)?;

    let exists = tx
        .query_row("SELECT 1 FROM sessions WHERE id = ?1", params![session_id], |_| Ok(()))
        .optional()
        .map_err(db_err)?;
    if exists.is_none() {
        return Err(Error::SessionMissing(session_id.to_owned()));
    }

    let next: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
            params![session_id],
            |r| r.get(0),
        )
        .map_err(db_err)?;
    let last_role: Option<String> = tx
        .query_row(
            "SELECT role FROM turns WHERE session_id = ?1 AND role IN ('user', 'assistant')
             ORDER BY turn_index DESC LIMIT 1",
            params![session_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;

    check_alternation(last_role.as_deref().and_then(Role::parse), turn.role)
        .map_err(|msg| Error::InvariantViolated(format!("session {session_id}: {msg}")))?;
    if let Some(r) = turn.ref_turn_index {
        if r as i64 >= next {
            return Err(Error::InvariantViolated(format!(
                "session {session_id}: turn {next} references future turn {r}"
            )));
        }
    }

    let ms = now.timestamp_millis();
    tx.execute(
        "INSERT INTO turns (session_id, turn_index, role, tag, text, ref_turn_index, ts)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            session_id,
            next,
            turn.role.as_str(),
            turn.tag.as_str(),
            turn.text,
            turn.ref_turn_index.map(|i| i as i64),
            ms,
        ],
    )
    .map_err(db_err)?;
    tx.execute(
        "UPDATE sessions SET last_activity = ?2 WHERE id = ?1",
        params![session_id, ms],
    )
    .map_err(db_err)?;
    tx.commit().map_err(db_err)?;

    Ok(turn.clone().into_turn(next as u64, from_millis(ms)))
}

pub(crate) fn load_turns(conn: &Connection, session_id: &str) -> Result<Vec<Turn>> {
    let mut stmt = conn
        .prepare(
            "SELECT turn_index, role, tag, text, ref_turn_index, ts
             FROM turns WHERE session_id = ?1 ORDER BY turn_index",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![session_id], turn_from_row)
        .map_err(db_err)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
}

// ── preferences ─────────────────────────────────────────────────────

pub(crate) fn get_preferences(
    conn: &Connection,
    session_id: &str,
) -> Result<BTreeMap<String, serde_json::Value>> {
    require_session(conn, session_id)?;
    let mut stmt = conn
        .prepare("SELECT key, value FROM preferences WHERE session_id = ?1")
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![session_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .map_err(db_err)?;
    let mut prefs = BTreeMap::new();
    for row in rows {
        let (key, raw) = row.map_err(db_err)?;
        let value = serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw));
        prefs.insert(key, value);
    }
    Ok(prefs)
}

pub(crate) fn set_preference(
    conn: &Connection,
    session_id: &str,
    key: &str,
    value: &serde_json::Value,
) -> Result<()> {
    require_session(conn, session_id)?;
    let raw = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO preferences (session_id, key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(session_id, key) DO UPDATE SET value = excluded.value",
        params![session_id, key, raw],
    )
    .map_err(db_err)?;
    Ok(())
}
