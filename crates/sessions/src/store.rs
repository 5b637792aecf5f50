//! Durable session store.
//!
//! One SQLite database holds sessions, their transcripts, and preferences.
//! Every write commits (WAL, `synchronous=FULL`) before the call returns.
//! Reads are served from a write-through shadow of sessions and loaded
//! transcripts, so after the first load a transcript never hits disk.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use rusqlite::Connection;

use ava_domain::error::{Error, Result};
use ava_domain::session::{validate_session_id, PermissionSet, Session};
use ava_domain::trace::TraceEvent;
use ava_domain::turn::{now_millis, NewTurn, Turn};

use crate::db;

/// Delay before the single retry of a transient storage failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Mint a fresh session id: 16 random bytes, hex-encoded.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
    sessions: RwLock<HashMap<String, Session>>,
    transcripts: Arc<RwLock<HashMap<String, Vec<Turn>>>>,
    soft_cap: usize,
    injected_failures: AtomicU32,
}

impl SessionStore {
    /// Open (or create) the database at `path` and make sure the schema
    /// exists.
    pub fn open(path: &Path, soft_cap: usize) -> Result<Self> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path).map_err(db::db_err)?;
        db::init(&conn)?;

        let sessions: HashMap<String, Session> = db::list_sessions(&conn, false)?
            .into_iter()
            .map(|s| (s.id.clone(), s))
            .collect();

        tracing::info!(
            sessions = sessions.len(),
            path = %path.display(),
            "session store loaded"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            sessions: RwLock::new(sessions),
            transcripts: Arc::new(RwLock::new(HashMap::new())),
            soft_cap: soft_cap.max(1),
            injected_failures: AtomicU32::new(0),
        })
    }

    /// Make the next `n` storage operations fail with `StoreUnavailable`.
    #[doc(hidden)]
    pub fn inject_failures(&self, n: u32) {
        self.injected_failures.store(n, Ordering::SeqCst);
    }

    pub fn soft_cap(&self) -> usize {
        self.soft_cap
    }

    // ── sessions ────────────────────────────────────────────────────

    /// Idempotent: returns the existing session, or creates it.
    /// The flag is true when the session was created by this call.
    pub async fn open_session(&self, id: &str, owner_tag: &str) -> Result<(Session, bool)> {
        validate_session_id(id)?;
        if let Some(existing) = self.sessions.read().get(id) {
            return Ok((existing.clone(), false));
        }

        let sid = id.to_owned();
        let owner = owner_tag.to_owned();
        let (session, is_new) = self
            .run(move |conn| db::open_session(conn, &sid, &owner, now_millis()))
            .await?;
        self.cache_session(&session);
        if is_new {
            self.transcripts.write().insert(session.id.clone(), Vec::new());
        }

        TraceEvent::SessionOpened {
            session_id: session.id.clone(),
            owner_tag: session.owner_tag.clone(),
            is_new,
        }
        .emit();

        Ok((session, is_new))
    }

    /// Look up a session; `SessionMissing` if unknown.
    pub async fn get_session(&self, id: &str) -> Result<Session> {
        if let Some(s) = self.sessions.read().get(id) {
            return Ok(s.clone());
        }
        let sid = id.to_owned();
        let found = self.run(move |conn| db::get_session(conn, &sid)).await?;
        match found {
            Some(session) => {
                self.cache_session(&session);
                Ok(session)
            }
            None => Err(Error::SessionMissing(id.to_owned())),
        }
    }

    pub fn list_sessions(&self, active_only: bool) -> Vec<Session> {
        let mut list: Vec<Session> = self
            .sessions
            .read()
            .values()
            .filter(|s| !active_only || s.active)
            .cloned()
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        list
    }

    /// Mark one session inactive now (explicit expiry).
    pub async fn expire_session(&self, id: &str) -> Result<Session> {
        let sid = id.to_owned();
        let session = self
            .run(move |conn| db::set_active(conn, &sid, false, now_millis()))
            .await?;
        self.cache_session(&session);
        Ok(session)
    }

    /// Flip an expired, not yet purged session back to active.
    pub async fn reopen_session(&self, id: &str) -> Result<Session> {
        let sid = id.to_owned();
        let session = self
            .run(move |conn| db::set_active(conn, &sid, true, now_millis()))
            .await?;
        self.cache_session(&session);
        Ok(session)
    }

    pub async fn set_permissions(&self, id: &str, permissions: PermissionSet) -> Result<Session> {
        let sid = id.to_owned();
        let session = self
            .run(move |conn| db::set_permissions(conn, &sid, permissions))
            .await?;
        self.cache_session(&session);
        Ok(session)
    }

    pub async fn set_degraded(&self, id: &str, degraded: bool) -> Result<Session> {
        let sid = id.to_owned();
        let session = self
            .run(move |conn| db::set_degraded(conn, &sid, degraded))
            .await?;
        self.cache_session(&session);
        Ok(session)
    }

    /// Returns ids whose active flag was flipped to false.
    pub async fn expire_idle(&self, before: DateTime<Utc>) -> Result<Vec<String>> {
        let now = now_millis();
        let ids = self
            .run(move |conn| db::expire_idle(conn, before, now))
            .await?;
        if !ids.is_empty() {
            let mut sessions = self.sessions.write();
            for id in &ids {
                if let Some(s) = sessions.get_mut(id) {
                    s.active = false;
                    s.finalized_at = Some(now);
                }
            }
            drop(sessions);
            TraceEvent::SessionsExpired { count: ids.len() }.emit();
        }
        Ok(ids)
    }

    /// Physically remove inactive sessions finalized before `before`.
    pub async fn purge(&self, before: DateTime<Utc>) -> Result<Vec<String>> {
        let ids = self.run(move |conn| db::purge(conn, before)).await?;
        if !ids.is_empty() {
            let mut sessions = self.sessions.write();
            let mut transcripts = self.transcripts.write();
            for id in &ids {
                sessions.remove(id);
                transcripts.remove(id);
            }
            drop(transcripts);
            drop(sessions);
            TraceEvent::SessionsPurged { count: ids.len() }.emit();
        }
        Ok(ids)
    }

    // ── turns ───────────────────────────────────────────────────────

    /// Atomic, durable append. Fails with `SessionMissing` for unknown ids
    /// and `InvariantViolated` when the role sequence rule would break.
    pub async fn append_turn(&self, session_id: &str, turn: NewTurn) -> Result<Turn> {
        let sid = session_id.to_owned();
        let shadow = self.transcripts.clone();
        // The shadow is updated while the connection is still held so it
        // never falls behind a concurrent transcript load.
        let appended = self
            .run(move |conn| {
                let turn = db::append_turn(conn, &sid, &turn, now_millis())?;
                if let Some(turns) = shadow.write().get_mut(&sid) {
                    turns.push(turn.clone());
                }
                Ok(turn)
            })
            .await?;

        if let Some(s) = self.sessions.write().get_mut(session_id) {
            s.turn_count = appended.turn_index + 1;
            s.last_activity = appended.ts;
        }

        TraceEvent::TurnAppended {
            session_id: session_id.to_owned(),
            turn_index: appended.turn_index,
            role: appended.role.as_str().to_owned(),
        }
        .emit();

        Ok(appended)
    }

    /// The last `limit` turns (default: the soft cap), oldest first.
    pub async fn load_transcript(&self, session_id: &str, limit: Option<usize>) -> Result<Vec<Turn>> {
        let limit = limit.unwrap_or(self.soft_cap);
        let turns = self.full_transcript(session_id).await?;
        let start = turns.len().saturating_sub(limit);
        Ok(turns[start..].to_vec())
    }

    /// Up to `limit` turns strictly older than `before_index`, oldest first.
    pub async fn load_older(
        &self,
        session_id: &str,
        before_index: u64,
        limit: usize,
    ) -> Result<Vec<Turn>> {
        let turns = self.full_transcript(session_id).await?;
        let end = (before_index as usize).min(turns.len());
        let start = end.saturating_sub(limit);
        Ok(turns[start..end].to_vec())
    }

    async fn full_transcript(&self, session_id: &str) -> Result<Vec<Turn>> {
        if let Some(turns) = self.transcripts.read().get(session_id) {
            return Ok(turns.clone());
        }
        // Distinguish an unknown session from an empty transcript.
        self.get_session(session_id).await?;

        let sid = session_id.to_owned();
        let shadow = self.transcripts.clone();
        self.run(move |conn| {
            let turns = db::load_turns(conn, &sid)?;
            Ok(shadow.write().entry(sid.clone()).or_insert(turns).clone())
        })
        .await
    }

    // ── preferences ─────────────────────────────────────────────────

    pub async fn get_preferences(
        &self,
        session_id: &str,
    ) -> Result<BTreeMap<String, serde_json::Value>> {
        let sid = session_id.to_owned();
        self.run(move |conn| db::get_preferences(conn, &sid)).await
    }

    /// Last write wins.
    pub async fn set_preference(
        &self,
        session_id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        if key.is_empty() {
            return Err(Error::InvalidArgument("preference key must not be empty".into()));
        }
        let sid = session_id.to_owned();
        let key = key.to_owned();
        self.run(move |conn| db::set_preference(conn, &sid, &key, &value))
            .await
    }

    // ── Private helpers ─────────────────────────────────────────────

    fn cache_session(&self, session: &Session) {
        self.sessions
            .write()
            .insert(session.id.clone(), session.clone());
    }

    /// Run `op` on a blocking thread with the connection locked. A
    /// transient failure is retried once after a short backoff.
    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut Connection) -> Result<T> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        match self.run_once(op.clone()).await {
            Err(e) if e.is_transient() => {
                tracing::warn!(error = %e, "store operation failed, retrying once");
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.run_once(op).await
            }
            other => other,
        }
    }

    async fn run_once<T, F>(&self, op: Arc<F>) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut Connection) -> Result<T> + Send + Sync + 'static,
    {
        if self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::StoreUnavailable("injected storage fault".into()));
        }

        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            op(&mut guard)
        })
        .await
        .map_err(|e| Error::StoreUnavailable(format!("blocking task: {e}")))?
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
