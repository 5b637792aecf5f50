use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification of a user utterance. Selects the system preamble
/// and may imply a capability dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentTag {
    #[default]
    Conversation,
    Advice,
    Information,
    TaskAssist,
    DeviceControl,
    BusinessAnalysis,
    CodeHelp,
}

impl IntentTag {
    pub const ALL: [IntentTag; 7] = [
        Self::Conversation,
        Self::Advice,
        Self::Information,
        Self::TaskAssist,
        Self::DeviceControl,
        Self::BusinessAnalysis,
        Self::CodeHelp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Advice => "advice",
            Self::Information => "information",
            Self::TaskAssist => "task_assist",
            Self::DeviceControl => "device_control",
            Self::BusinessAnalysis => "business_analysis",
            Self::CodeHelp => "code_help",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    /// Position in [`IntentTag::ALL`], used for O(1) table lookups.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for IntentTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
