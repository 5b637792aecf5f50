//! Periodic housekeeping: idle expiry, purging, delivery of turns held
//! while the store was down, and provider re-probing.

use chrono::Utc;

use ava_domain::error::{Error, Result};
use ava_sessions::ExpiryReason;

use crate::events::EventEnvelope;
use crate::runtime::session_gate::Admission;
use crate::runtime::{say_farewell, settle_session};
use crate::state::AppState;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<String>,
    pub purged: Vec<String>,
    /// Sessions whose held turns were all delivered.
    pub delivered: Vec<String>,
}

/// One pass of the lifecycle sweep.
pub async fn sweep_once(state: &AppState) -> Result<SweepReport> {
    let now = Utc::now();
    let mut report = SweepReport::default();

    report.expired = state
        .sessions
        .expire_idle(state.lifecycle.expiry_cutoff(now))
        .await?;
    let reason = ExpiryReason::IdleTimeout {
        idle_minutes: state.config.sessions.idle_timeout_minutes,
    };
    for session_id in &report.expired {
        if let Err(e) = say_farewell(state, session_id, reason).await {
            tracing::warn!(session_id = %session_id, error = %e, "farewell turn not recorded");
        }
    }

    report.purged = state
        .sessions
        .purge(state.lifecycle.purge_cutoff(now))
        .await?;
    for session_id in &report.purged {
        while state.pending.front(session_id).is_some() {
            state.pending.pop(session_id);
        }
    }

    for session_id in state.pending.sessions() {
        match deliver_pending(state, &session_id).await {
            Ok(true) => report.delivered.push(session_id),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "pending turn delivery deferred")
            }
        }
    }

    state.gate.prune_idle();

    if !report.expired.is_empty() || !report.purged.is_empty() {
        tracing::info!(
            expired = report.expired.len(),
            purged = report.purged.len(),
            delivered = report.delivered.len(),
            "lifecycle sweep"
        );
    }
    Ok(report)
}

/// Deliver a session's held turns unless a turn is already running there
/// (that turn settles them itself). Returns whether delivery happened.
async fn deliver_pending(state: &AppState, session_id: &str) -> Result<bool> {
    let session = state.sessions.get_session(session_id).await?;
    if !session.active || session.degraded {
        let mut dropped = 0;
        while state.pending.front(session_id).is_some() {
            state.pending.pop(session_id);
            dropped += 1;
        }
        tracing::warn!(session_id = %session_id, dropped, "discarding held turns of a closed session");
        return Ok(false);
    }

    let _permit = match state.gate.acquire(session_id, Admission::RejectIfBusy).await {
        Ok(permit) => permit,
        Err(Error::ConcurrentTurn(_)) => return Ok(false),
        Err(e) => return Err(e),
    };
    settle_session(state, session_id).await?;
    Ok(true)
}

/// Re-probe unavailable providers and announce health changes.
pub async fn probe_once(state: &AppState) -> usize {
    let changes = state.llm.probe_unavailable().await;
    for change in &changes {
        state
            .events
            .publish(EventEnvelope::provider_health_changed(change));
    }
    changes.len()
}
