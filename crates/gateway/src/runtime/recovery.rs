//! Startup recovery and shutdown flush.
//!
//! A crash can leave a user turn without its answer. On startup every
//! active session is settled, which answers such turns in order. On
//! shutdown, user turns still held in memory are written so the next
//! start answers them.

use ava_domain::error::Error;
use ava_domain::turn::{NewTurn, Role};

use crate::runtime::session_gate::Admission;
use crate::runtime::settle_session;
use crate::state::AppState;

/// Settle every active session. Returns how many sessions were visited
/// without error.
pub async fn recover(state: &AppState) -> usize {
    let mut settled = 0;
    for session in state.sessions.list_sessions(true) {
        if session.degraded {
            continue;
        }
        let _permit = match state.gate.acquire(&session.id, Admission::Queue).await {
            Ok(permit) => permit,
            Err(e) => {
                tracing::warn!(session_id = %session.id, error = %e, "recovery skipped");
                continue;
            }
        };
        match settle_session(state, &session.id).await {
            Ok(()) => settled += 1,
            Err(e) => tracing::warn!(session_id = %session.id, error = %e, "recovery failed"),
        }
    }
    tracing::info!(sessions = settled, "startup recovery complete");
    settled
}

/// Persist held user turns without answering them. Returns how many were
/// written.
pub async fn flush_pending(state: &AppState) -> usize {
    let mut written = 0;
    for session_id in state.pending.sessions() {
        while let Some(pending) = state.pending.front(&session_id) {
            let tag = state.classifier.classify(&pending.text);
            match state
                .sessions
                .append_turn(&session_id, NewTurn::new(Role::User, pending.text, tag))
                .await
            {
                Ok(_) => {
                    state.pending.pop(&session_id);
                    written += 1;
                }
                Err(Error::InvariantViolated(msg)) => {
                    // A previous user turn is still unanswered; keeping both
                    // would break alternation.
                    tracing::warn!(session_id = %session_id, error = %msg, "held turn discarded at shutdown");
                    state.pending.pop(&session_id);
                }
                Err(e) => {
                    tracing::error!(session_id = %session_id, error = %e, "held turns lost at shutdown");
                    break;
                }
            }
        }
    }
    if written > 0 {
        tracing::info!(turns = written, "held user turns flushed");
    }
    written
}
