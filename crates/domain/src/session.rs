use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::capability::CapabilityKind;

/// Per-session permission flags. Only an operator may widen them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub allow_chat: bool,
    pub allow_device_control: bool,
    pub allow_code_execution: bool,
    pub allow_network_probe: bool,
    pub allow_external_http: bool,
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self {
            allow_chat: true,
            allow_device_control: false,
            allow_code_execution: false,
            allow_network_probe: false,
            allow_external_http: false,
        }
    }
}

const CHAT: u8 = 1;
const DEVICE: u8 = 1 << 1;
const CODE: u8 = 1 << 2;
const PROBE: u8 = 1 << 3;
const HTTP: u8 = 1 << 4;

impl PermissionSet {
    /// Packed flag representation used by the sessions table.
    pub fn pack(&self) -> u8 {
        let mut bits = 0;
        if self.allow_chat {
            bits |= CHAT;
        }
        if self.allow_device_control {
            bits |= DEVICE;
        }
        if self.allow_code_execution {
            bits |= CODE;
        }
        if self.allow_network_probe {
            bits |= PROBE;
        }
        if self.allow_external_http {
            bits |= HTTP;
        }
        bits
    }

    pub fn unpack(bits: u8) -> Self {
        Self {
            allow_chat: bits & CHAT != 0,
            allow_device_control: bits & DEVICE != 0,
            allow_code_execution: bits & CODE != 0,
            allow_network_probe: bits & PROBE != 0,
            allow_external_http: bits & HTTP != 0,
        }
    }

    /// Whether a capability of `kind` may run in this session.
    /// `text_extract` is a pure function and needs no flag.
    pub fn allows(&self, kind: CapabilityKind) -> bool {
        match kind {
            CapabilityKind::HttpFetch => self.allow_external_http,
            CapabilityKind::CodeExec => self.allow_code_execution,
            CapabilityKind::NetworkProbe => self.allow_network_probe,
            CapabilityKind::DeviceCommand => self.allow_device_control,
            CapabilityKind::TextExtract => true,
        }
    }

    pub fn apply(&mut self, patch: &PermissionPatch) {
        if let Some(v) = patch.allow_chat {
            self.allow_chat = v;
        }
        if let Some(v) = patch.allow_device_control {
            self.allow_device_control = v;
        }
        if let Some(v) = patch.allow_code_execution {
            self.allow_code_execution = v;
        }
        if let Some(v) = patch.allow_network_probe {
            self.allow_network_probe = v;
        }
        if let Some(v) = patch.allow_external_http {
            self.allow_external_http = v;
        }
    }
}

/// Partial update of a [`PermissionSet`]; absent fields are left as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPatch {
    #[serde(default)]
    pub allow_chat: Option<bool>,
    #[serde(default)]
    pub allow_device_control: Option<bool>,
    #[serde(default)]
    pub allow_code_execution: Option<bool>,
    #[serde(default)]
    pub allow_network_probe: Option<bool>,
    #[serde(default)]
    pub allow_external_http: Option<bool>,
}

/// Durable view of a session. The transcript and preferences are loaded
/// separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub owner_tag: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub active: bool,
    /// Set after an invariant violation; no new turns until an operator
    /// restores the session.
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalized_at: Option<DateTime<Utc>>,
    pub permissions: PermissionSet,
    /// Number of turns appended so far (the next turn index).
    pub turn_count: u64,
}

/// Session ids are opaque but restricted to a URL- and log-safe alphabet.
pub fn validate_session_id(id: &str) -> crate::Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(crate::Error::InvalidArgument(format!(
            "session id must be 1-128 characters of [A-Za-z0-9_-], got {id:?}"
        )))
    }
}
