use serde::Serialize;

/// Structured trace events emitted across all Ava crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionOpened {
        session_id: String,
        owner_tag: String,
        is_new: bool,
    },
    TurnAppended {
        session_id: String,
        turn_index: u64,
        role: String,
    },
    SessionsExpired {
        count: usize,
    },
    SessionsPurged {
        count: usize,
    },
    ProviderAttempt {
        provider: String,
        model: String,
        intent: String,
        success: bool,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<String>,
    },
    ProviderFallback {
        from_provider: String,
        to_provider: String,
        reason: String,
    },
    ProviderHealthChanged {
        provider: String,
        from: String,
        to: String,
    },
    CapabilityExecuted {
        session_id: String,
        kind: String,
        success: bool,
        duration_ms: u64,
    },
    TurnCompleted {
        session_id: String,
        intent: String,
        provider: String,
        degraded: bool,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "ava_event");
    }
}
