//! Read-only catalog of descriptive metadata: capability kinds, intent
//! tags and device commands. Loaded once at startup.

use std::path::Path;

use anyhow::Context;
use serde_json::{json, Value};

use ava_domain::capability::CapabilityKind;
use ava_domain::intent::IntentTag;
use ava_tools::device::LOCAL_DEVICE_ID;
use ava_tools::DeviceBackend;

/// Load the catalog file at `path`, or build the built-in one.
pub fn load(path: Option<&Path>, device: &dyn DeviceBackend) -> anyhow::Result<Value> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading catalog {}", path.display()))?;
            let doc: Value = serde_json::from_str(&raw)
                .with_context(|| format!("parsing catalog {}", path.display()))?;
            if !doc.is_object() {
                anyhow::bail!("catalog {} must be a JSON object", path.display());
            }
            tracing::info!(path = %path.display(), "catalog loaded");
            Ok(doc)
        }
        None => Ok(builtin(device)),
    }
}

pub fn builtin(device: &dyn DeviceBackend) -> Value {
    let capabilities: Vec<Value> = [
        (
            CapabilityKind::HttpFetch,
            "allow_external_http",
            json!({
                "url": "http(s) URL",
                "method": ["GET", "POST", "PUT", "DELETE", "PATCH"],
                "headers": "object?",
                "body": "string?",
                "timeout_ms": "<= 30000",
            }),
            "Fetch a URL; the body is truncated to 64 KiB.",
        ),
        (
            CapabilityKind::CodeExec,
            "allow_code_execution",
            json!({
                "language": ["python", "javascript", "bash"],
                "source": "string",
                "timeout_ms": "<= 30000",
            }),
            "Run a snippet in a sandboxed child process.",
        ),
        (
            CapabilityKind::NetworkProbe,
            "allow_network_probe",
            json!({ "cidr": "string?", "host": "string?", "ports": "[u16]?" }),
            "TCP connect scan of a host or a /24-or-narrower range.",
        ),
        (
            CapabilityKind::DeviceCommand,
            "allow_device_control",
            json!({ "device_id": "string", "command": "string", "parameters": "object?" }),
            "Ask a device backend to act.",
        ),
        (
            CapabilityKind::TextExtract,
            "",
            json!({ "from_payload": "string" }),
            "Strip markup and collapse whitespace.",
        ),
    ]
    .into_iter()
    .map(|(kind, permission, arguments, summary)| {
        json!({
            "kind": kind.as_str(),
            "permission": (!permission.is_empty()).then_some(permission),
            "arguments": arguments,
            "summary": summary,
        })
    })
    .collect();

    let intents: Vec<&str> = IntentTag::ALL.iter().map(|t| t.as_str()).collect();

    json!({
        "capabilities": capabilities,
        "intents": intents,
        "devices": [{
            "device_id": LOCAL_DEVICE_ID,
            "commands": device.commands(),
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ava_tools::LocalDevice;

    #[test]
    fn builtin_lists_every_kind_and_intent() {
        let doc = builtin(&LocalDevice::new());
        assert_eq!(doc["capabilities"].as_array().unwrap().len(), 5);
        assert_eq!(doc["intents"].as_array().unwrap().len(), IntentTag::ALL.len());
        assert_eq!(doc["capabilities"][4]["permission"], Value::Null);
        assert!(doc["devices"][0]["commands"]
            .as_array()
            .unwrap()
            .iter()
            .any(|c| c == "system_info"));
    }

    #[test]
    fn file_catalog_must_be_an_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(load(Some(&path), &LocalDevice::new()).is_err());

        std::fs::write(&path, r#"{"capabilities": []}"#).unwrap();
        let doc = load(Some(&path), &LocalDevice::new()).unwrap();
        assert_eq!(doc["capabilities"], json!([]));
    }
}
