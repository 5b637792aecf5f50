use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// Hard ceiling on any capability's `timeout_ms`.
pub const MAX_TIMEOUT_MS: u64 = 30_000;

/// Discriminant of a capability request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    HttpFetch,
    CodeExec,
    NetworkProbe,
    DeviceCommand,
    TextExtract,
}

impl CapabilityKind {
    pub const ALL: [CapabilityKind; 5] = [
        Self::HttpFetch,
        Self::CodeExec,
        Self::NetworkProbe,
        Self::DeviceCommand,
        Self::TextExtract,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::HttpFetch => "http_fetch",
            Self::CodeExec => "code_exec",
            Self::NetworkProbe => "network_probe",
            Self::DeviceCommand => "device_command",
            Self::TextExtract => "text_extract",
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Requests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A structured request for an ancillary action: `{kind, arguments}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "arguments", rename_all = "snake_case")]
pub enum CapabilityRequest {
    HttpFetch(HttpFetchArgs),
    CodeExec(CodeExecArgs),
    NetworkProbe(NetworkProbeArgs),
    DeviceCommand(DeviceCommandArgs),
    TextExtract(TextExtractArgs),
}

impl CapabilityRequest {
    /// Builds a request from the loose `{kind, arguments}` pair the API
    /// receives. Unknown kinds and ill-shaped arguments are `InvalidArgument`.
    pub fn from_parts(kind: &str, arguments: serde_json::Value) -> crate::Result<Self> {
        let envelope = serde_json::json!({ "kind": kind, "arguments": arguments });
        serde_json::from_value(envelope)
            .map_err(|e| Error::InvalidArgument(format!("capability {kind}: {e}")))
    }

    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::HttpFetch(_) => CapabilityKind::HttpFetch,
            Self::CodeExec(_) => CapabilityKind::CodeExec,
            Self::NetworkProbe(_) => CapabilityKind::NetworkProbe,
            Self::DeviceCommand(_) => CapabilityKind::DeviceCommand,
            Self::TextExtract(_) => CapabilityKind::TextExtract,
        }
    }

    /// Timeout requested by the caller, if the kind has one.
    pub fn timeout_ms(&self) -> Option<u64> {
        match self {
            Self::HttpFetch(a) => Some(a.timeout_ms),
            Self::CodeExec(a) => Some(a.timeout_ms),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
            Self::Patch => "PATCH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpFetchArgs {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

/// Interpreted languages `code_exec` knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeLanguage {
    Python,
    Javascript,
    Bash,
}

impl CodeLanguage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Bash => "bash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "py" | "python3" => Some(Self::Python),
            "javascript" | "js" | "node" => Some(Self::Javascript),
            "bash" | "sh" | "shell" => Some(Self::Bash),
            _ => None,
        }
    }

    /// Interpreter binary looked up on `PATH`.
    pub fn interpreter(self) -> &'static str {
        match self {
            Self::Python => "python3",
            Self::Javascript => "node",
            Self::Bash => "bash",
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            Self::Python => "py",
            Self::Javascript => "js",
            Self::Bash => "sh",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CodeExecArgs {
    pub language: CodeLanguage,
    pub source: String,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

/// Exactly one of `cidr` or `host` must be given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkProbeArgs {
    #[serde(default)]
    pub cidr: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub ports: Option<Vec<u16>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeviceCommandArgs {
    pub device_id: String,
    pub command: String,
    #[serde(default)]
    pub parameters: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TextExtractArgs {
    pub from_payload: String,
}

fn d_timeout_ms() -> u64 {
    10_000
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Results
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Typed failure attached to an unsuccessful [`CapabilityResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for CapabilityFailure {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Transient outcome of one capability execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub kind: CapabilityKind,
    pub success: bool,
    pub payload: serde_json::Value,
    pub error: Option<CapabilityFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl CapabilityResult {
    /// Folds an execution outcome into a result record.
    pub fn from_outcome(
        kind: CapabilityKind,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        outcome: &crate::Result<serde_json::Value>,
    ) -> Self {
        let finished_at = started_at + chrono::Duration::milliseconds(duration_ms as i64);
        match outcome {
            Ok(payload) => Self {
                kind,
                success: true,
                payload: payload.clone(),
                error: None,
                started_at,
                finished_at,
                duration_ms,
            },
            Err(err) => Self {
                kind,
                success: false,
                payload: serde_json::Value::Null,
                error: Some(err.into()),
                started_at,
                finished_at,
                duration_ms,
            },
        }
    }

    /// One-line description used as the capability-result turn's text and
    /// as the context the model narrates from.
    pub fn to_turn_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!("{{\"kind\":\"{}\",\"success\":{}}}", self.kind, self.success)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_parts_parses_http_fetch() {
        let req = CapabilityRequest::from_parts(
            "http_fetch",
            json!({"url": "http://localhost/hello", "method": "GET", "timeout_ms": 5000}),
        )
        .unwrap();
        match req {
            CapabilityRequest::HttpFetch(a) => {
                assert_eq!(a.method, HttpMethod::Get);
                assert_eq!(a.timeout_ms, 5000);
                assert!(a.headers.is_empty());
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[test]
    fn from_parts_rejects_unknown_kind_and_bad_shape() {
        let err = CapabilityRequest::from_parts("teleport", json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err =
            CapabilityRequest::from_parts("code_exec", json!({"language": "cobol", "source": ""}))
                .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = CapabilityRequest::from_parts("http_fetch", json!({"url": "x", "verb": "GET"}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn language_aliases() {
        assert_eq!(CodeLanguage::parse("JS"), Some(CodeLanguage::Javascript));
        assert_eq!(CodeLanguage::parse("py"), Some(CodeLanguage::Python));
        assert_eq!(CodeLanguage::parse("sh"), Some(CodeLanguage::Bash));
        assert_eq!(CodeLanguage::parse("ruby"), None);
        assert_eq!(CodeLanguage::Javascript.interpreter(), "node");
    }

    #[test]
    fn failed_outcome_records_error_kind() {
        let started = crate::turn::now_millis();
        let outcome: crate::Result<serde_json::Value> = Err(Error::Timeout("2000ms".into()));
        let r = CapabilityResult::from_outcome(CapabilityKind::CodeExec, started, 2001, &outcome);
        assert!(!r.success);
        assert_eq!(r.error.as_ref().map(|e| e.kind), Some(ErrorKind::Timeout));
        assert_eq!((r.finished_at - r.started_at).num_milliseconds(), 2001);
    }
}
