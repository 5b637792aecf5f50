use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intent::IntentTag;

/// Who contributed a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    CapabilityResult,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::CapabilityResult => "capability_result",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "capability_result" => Some(Self::CapabilityResult),
            _ => None,
        }
    }

    /// User and assistant turns take part in the alternation rule; the
    /// other roles may appear anywhere.
    pub fn alternates(self) -> bool {
        matches!(self, Self::User | Self::Assistant)
    }
}

/// One atomic, immutable contribution to a transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub turn_index: u64,
    pub role: Role,
    pub text: String,
    pub tag: IntentTag,
    pub ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_turn_index: Option<u64>,
}

/// A turn that has not been appended yet; the store assigns index and time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTurn {
    pub role: Role,
    pub text: String,
    pub tag: IntentTag,
    pub ref_turn_index: Option<u64>,
}

impl NewTurn {
    pub fn new(role: Role, text: impl Into<String>, tag: IntentTag) -> Self {
        Self {
            role,
            text: text.into(),
            tag,
            ref_turn_index: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text, IntentTag::Conversation)
    }

    pub fn answering(mut self, turn_index: u64) -> Self {
        self.ref_turn_index = Some(turn_index);
        self
    }

    pub fn into_turn(self, turn_index: u64, ts: DateTime<Utc>) -> Turn {
        Turn {
            turn_index,
            role: self.role,
            text: self.text,
            tag: self.tag,
            ts,
            ref_turn_index: self.ref_turn_index,
        }
    }
}

/// Current UTC time truncated to millisecond precision, so that what is
/// stored and what is returned compare equal.
pub fn now_millis() -> DateTime<Utc> {
    from_millis(Utc::now().timestamp_millis())
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

/// Checks whether `next` may follow a transcript whose last alternating
/// role is `last`. Returns a description of the violation otherwise.
pub fn check_alternation(last: Option<Role>, next: Role) -> Result<(), String> {
    if !next.alternates() {
        return Ok(());
    }
    match (last, next) {
        (None, Role::User) => Ok(()),
        (None, _) => Err("the first non-system turn must be a user turn".into()),
        (Some(prev), next) if prev == next => Err(format!(
            "{} turn cannot follow another {} turn",
            next.as_str(),
            prev.as_str()
        )),
        _ => Ok(()),
    }
}
