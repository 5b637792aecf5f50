//! Session orchestrator: turn-by-turn policy for every session.
//!
//! Entry points: [`run_turn`] for a user utterance and [`run_capability`]
//! for a capability requested directly. Both serialize on the session's
//! turn gate, append to the transcript only through the store, and are
//! the only code that publishes on the event bus.

pub mod context;
pub mod intent;
pub mod pending;
pub mod recovery;
pub mod session_gate;
pub mod sweeper;

use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;

use ava_domain::capability::{CapabilityRequest, CapabilityResult};
use ava_domain::error::{Error, Result};
use ava_domain::intent::IntentTag;
use ava_domain::session::Session;
use ava_domain::trace::TraceEvent;
use ava_domain::turn::{NewTurn, Role, Turn};
use ava_providers::{needs_long_context, GenerateRequest};
use ava_sessions::{new_session_id, ExpiryReason};

use crate::events::EventEnvelope;
use crate::state::AppState;

use self::context::build_context;
use self::intent::tag_for_capability;
use self::session_gate::Admission;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inputs & outcomes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct TurnInput {
    /// Existing or client-chosen session id; a fresh one is minted if absent.
    pub session_id: Option<String>,
    pub message: String,
    /// Reject instead of queueing when the session is busy.
    pub non_queuable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub session_id: String,
    pub reply: String,
    /// Index of the assistant turn.
    pub turn_index: u64,
    pub intent: IntentTag,
    pub degraded: bool,
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<CapabilityResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityRun {
    pub result: CapabilityResult,
    /// Index of the capability-result turn.
    pub turn_index: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one user turn to completion.
pub async fn run_turn(state: &AppState, input: TurnInput) -> Result<TurnOutcome> {
    let text = input.message.trim();
    if text.is_empty() {
        return Err(Error::InvalidArgument("message must not be empty".into()));
    }
    let session_id = input.session_id.unwrap_or_else(new_session_id);

    let (session, _) = state.sessions.open_session(&session_id, "").await?;
    check_accepting(state, &session, true).await?;

    let intent = state.classifier.classify(text);
    let implied = state.classifier.implied_capability(intent, text);
    if let Some(req) = &implied {
        state.tools.preflight(&session.permissions, req)?;
    }
    let long_context = would_need_long_context(state, &session_id, text, intent).await?;
    if !state
        .llm
        .has_eligible(state.config.sessions.max_output_tokens, long_context)
    {
        return Err(Error::ProviderExhausted(
            "no configured provider can take this turn".into(),
        ));
    }

    let _permit = state
        .gate
        .acquire(&session_id, Admission::from_non_queuable(input.non_queuable))
        .await?;

    // The session may have expired while this turn waited in the queue.
    let session = state.sessions.get_session(&session_id).await?;
    check_accepting(state, &session, true).await?;

    // Earlier utterances are answered before this one.
    let appended = match settle_session(state, &session_id).await {
        Ok(()) => append(state, &session_id, NewTurn::new(Role::User, text, intent)).await,
        Err(e) => Err(e),
    };
    let deadline = turn_deadline(state);
    let user_turn = match appended {
        Ok(turn) => turn,
        Err(e @ Error::StoreUnavailable(_)) => {
            tracing::warn!(session_id = %session_id, error = %e, "user turn queued until the store recovers");
            state.pending.push(&session_id, text.to_owned());
            return Err(e);
        }
        Err(e) => return Err(e),
    };

    complete_turn(state, &session_id, &user_turn, implied, deadline).await
}

/// Whether the context for `text` would exceed what short-context
/// providers accept.
async fn would_need_long_context(
    state: &AppState,
    session_id: &str,
    text: &str,
    intent: IntentTag,
) -> Result<bool> {
    let cfg = &state.config.sessions;
    let mut window = state
        .sessions
        .load_transcript(session_id, Some(cfg.context_turns))
        .await?;
    let next = NewTurn::new(Role::User, text, intent).into_turn(window.len() as u64, Utc::now());
    window.push(next);
    let context = build_context(&window, cfg.context_turns, cfg.context_token_budget);
    Ok(needs_long_context(&context))
}

/// Execute a capability requested directly and record its result turn.
///
/// Permission and argument failures are returned before anything is
/// recorded; execution failures are recorded and returned in the result.
pub async fn run_capability(
    state: &AppState,
    session_id: &str,
    req: CapabilityRequest,
) -> Result<CapabilityRun> {
    let session = state.sessions.get_session(session_id).await?;
    check_accepting(state, &session, false).await?;
    state.tools.preflight(&session.permissions, &req)?;

    let _permit = state.gate.acquire(session_id, Admission::Queue).await?;

    state
        .events
        .publish(EventEnvelope::capability_started(session_id, req.kind().as_str()));
    let result = state.tools.execute(session_id, &req, None).await;
    state
        .events
        .publish(EventEnvelope::capability_finished(session_id, &result));

    let turn = NewTurn::new(
        Role::CapabilityResult,
        result.to_turn_text(),
        tag_for_capability(req.kind()),
    );
    let turn = append(state, session_id, turn).await?;
    state
        .events
        .publish(EventEnvelope::turn_appended(session_id, &turn));

    Ok(CapabilityRun {
        result,
        turn_index: turn.turn_index,
    })
}

/// Answer whatever the session still owes: an unanswered user turn left
/// in the transcript, then any turns queued while the store was down.
///
/// The caller must hold the session's turn permit.
pub async fn settle_session(state: &AppState, session_id: &str) -> Result<()> {
    let transcript = state.sessions.load_transcript(session_id, None).await?;
    let unanswered = transcript
        .iter()
        .rev()
        .find(|t| t.role.alternates())
        .filter(|t| t.role == Role::User)
        .cloned();
    if let Some(user_turn) = unanswered {
        tracing::info!(
            session_id = %session_id,
            turn_index = user_turn.turn_index,
            "re-delivering unanswered user turn"
        );
        complete_turn(state, session_id, &user_turn, None, turn_deadline(state)).await?;
    }

    while let Some(pending) = state.pending.front(session_id) {
        let intent = state.classifier.classify(&pending.text);
        let implied = state.classifier.implied_capability(intent, &pending.text);
        let user_turn = append(
            state,
            session_id,
            NewTurn::new(Role::User, pending.text.clone(), intent),
        )
        .await?;
        state.pending.pop(session_id);
        complete_turn(state, session_id, &user_turn, implied, turn_deadline(state)).await?;
    }
    Ok(())
}

/// Steps after the user turn is durable: capability, context, model,
/// assistant turn.
async fn complete_turn(
    state: &AppState,
    session_id: &str,
    user_turn: &Turn,
    implied: Option<CapabilityRequest>,
    deadline: Instant,
) -> Result<TurnOutcome> {
    let started = std::time::Instant::now();
    state
        .events
        .publish(EventEnvelope::turn_appended(session_id, user_turn));
    state
        .events
        .publish(EventEnvelope::status_changed(session_id, "thinking"));

    let outcome = answer(state, session_id, user_turn, implied, deadline).await;

    let status = if outcome.is_ok() { "idle" } else { "failed" };
    state
        .events
        .publish(EventEnvelope::status_changed(session_id, status));

    if let Ok(ref o) = outcome {
        TraceEvent::TurnCompleted {
            session_id: session_id.to_owned(),
            intent: o.intent.as_str().into(),
            provider: o.provider.clone().unwrap_or_else(|| "none".into()),
            degraded: o.degraded,
            duration_ms: started.elapsed().as_millis() as u64,
        }
        .emit();
    }
    outcome
}

async fn answer(
    state: &AppState,
    session_id: &str,
    user_turn: &Turn,
    implied: Option<CapabilityRequest>,
    deadline: Instant,
) -> Result<TurnOutcome> {
    let cfg = &state.config.sessions;

    let capability = match implied {
        Some(req) => Some(dispatch_for_turn(state, session_id, &req, user_turn, deadline).await?),
        None => None,
    };

    let transcript = state
        .sessions
        .load_transcript(session_id, Some(cfg.context_turns))
        .await?;
    let session_context = build_context(&transcript, cfg.context_turns, cfg.context_token_budget);

    let response = state
        .llm
        .generate(&GenerateRequest {
            session_context,
            user_text: user_turn.text.clone(),
            intent_tag: user_turn.tag,
            max_output_tokens: cfg.max_output_tokens,
            deadline,
        })
        .await;
    for change in &response.health_changes {
        state
            .events
            .publish(EventEnvelope::provider_health_changed(change));
    }

    let reply = NewTurn::new(Role::Assistant, response.text.clone(), user_turn.tag)
        .answering(user_turn.turn_index);
    let assistant = append(state, session_id, reply).await?;
    state
        .events
        .publish(EventEnvelope::turn_appended(session_id, &assistant));

    Ok(TurnOutcome {
        session_id: session_id.to_owned(),
        reply: assistant.text,
        turn_index: assistant.turn_index,
        intent: user_turn.tag,
        degraded: response.degraded,
        provider: response.provider,
        capability,
    })
}

/// Run the capability a turn implies. Failures become a result with
/// `success = false`; the model narrates them.
async fn dispatch_for_turn(
    state: &AppState,
    session_id: &str,
    req: &CapabilityRequest,
    user_turn: &Turn,
    deadline: Instant,
) -> Result<CapabilityResult> {
    let session = state.sessions.get_session(session_id).await?;
    state
        .events
        .publish(EventEnvelope::capability_started(session_id, req.kind().as_str()));

    let result = match state.tools.preflight(&session.permissions, req) {
        Ok(()) => state.tools.execute(session_id, req, Some(deadline)).await,
        Err(e) => CapabilityResult::from_outcome(req.kind(), Utc::now(), 0, &Err(e)),
    };
    state
        .events
        .publish(EventEnvelope::capability_finished(session_id, &result));

    let turn = NewTurn::new(Role::CapabilityResult, result.to_turn_text(), user_turn.tag)
        .answering(user_turn.turn_index);
    let turn = append(state, session_id, turn).await?;
    state
        .events
        .publish(EventEnvelope::turn_appended(session_id, &turn));
    Ok(result)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session lifecycle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Expire a session now and record its closing turn. Expiring an
/// already inactive session is a no-op.
pub async fn expire_session(state: &AppState, session_id: &str) -> Result<Session> {
    let session = state.sessions.get_session(session_id).await?;
    if !session.active {
        return Ok(session);
    }
    let session = state.sessions.expire_session(session_id).await?;
    say_farewell(state, session_id, ExpiryReason::Explicit).await?;
    Ok(session)
}

/// Append the closing system turn of an expired session and announce it.
pub async fn say_farewell(state: &AppState, session_id: &str, reason: ExpiryReason) -> Result<()> {
    let text = match reason {
        ExpiryReason::IdleTimeout { idle_minutes } => format!(
            "This conversation was closed after {idle_minutes} minutes of inactivity. \
             Reopen it or start a new session to continue. Goodbye!"
        ),
        ExpiryReason::Explicit => "This conversation was closed. Reopen it to continue.".into(),
    };
    let turn = append(state, session_id, NewTurn::new(Role::System, text, IntentTag::Conversation)).await?;
    state
        .events
        .publish(EventEnvelope::turn_appended(session_id, &turn));
    state
        .events
        .publish(EventEnvelope::session_expired(session_id, &reason.to_string()));
    tracing::info!(session_id = %session_id, reason = %reason, "session finalized");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn turn_deadline(state: &AppState) -> Instant {
    Instant::now() + Duration::from_millis(state.config.sessions.turn_budget_ms)
}

/// Refuse sessions that may not take new turns. A session found idle past
/// its timeout is expired on the spot.
async fn check_accepting(state: &AppState, session: &Session, chat: bool) -> Result<()> {
    if let Some(reason) = state.lifecycle.should_expire(session, Utc::now()) {
        state.sessions.expire_session(&session.id).await?;
        say_farewell(state, &session.id, reason).await?;
        return Err(Error::SessionExpired(session.id.clone()));
    }
    if !session.active {
        return Err(Error::SessionExpired(session.id.clone()));
    }
    if session.degraded {
        return Err(Error::InvariantViolated(format!(
            "session {} is degraded until an operator restores it",
            session.id
        )));
    }
    if chat && !session.permissions.allow_chat {
        return Err(Error::PermissionDenied(format!(
            "session {} is not allowed to chat",
            session.id
        )));
    }
    Ok(())
}

/// Append through the store. An invariant violation marks the session
/// degraded before the error is returned.
async fn append(state: &AppState, session_id: &str, turn: NewTurn) -> Result<Turn> {
    match state.sessions.append_turn(session_id, turn).await {
        Err(Error::InvariantViolated(msg)) => {
            state.invariant_violations.fetch_add(1, Ordering::Relaxed);
            tracing::error!(session_id = %session_id, error = %msg, "transcript invariant violated");
            if let Err(e) = state.sessions.set_degraded(session_id, true).await {
                tracing::warn!(session_id = %session_id, error = %e, "failed to mark session degraded");
            }
            state
                .events
                .publish(EventEnvelope::status_changed(session_id, "degraded"));
            Err(Error::InvariantViolated(msg))
        }
        other => other,
    }
}
